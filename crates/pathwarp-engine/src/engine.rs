//! The engine: process-wide redirection state and every entry point into it.
//!
//! ```text
//!  hook call ──▶ AccessGate ──▶ Blocklist ──▶ Normalizer ──▶ MembershipFilter
//!                   │bypass        │blocked                     │absent
//!                   ▼              ▼                            ▼
//!               pass through   pass through                pass through
//!                                                               │maybe
//!                                                               ▼
//!                                                  RuleStore / InjectionTree
//! ```
//!
//! Hooks never fail: anything that goes wrong degrades to pass-through.
//! Administrative operations serialize on one [`AdminLock`] and report
//! explicit errors.

use std::borrow::Cow;
use std::sync::Arc;

use pathwarp_types::{EntryKind, FileIdentity, PROTOCOL_VERSION, RuleFlags, Uid};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::dirent::DirentSink;
use crate::error::{EngineError, EngineResult};
use crate::filter::{FilterKey, MembershipFilter};
use crate::gate::{Access, AccessGate, Blocklist, Caller, ReentryGuard};
use crate::host::{DirHandle, HostFs};
use crate::inject::InjectionTree;
use crate::path::{Normalizer, join_relative, split_parent, validate_absolute};
use crate::rules::{Listing, Rule, RuleStore, rule_filter_keys};
use crate::snapshot::{AdminLock, Exclusive, SnapshotCell};
use crate::spoof::{FsTypeSpoofer, LabelError, LabelTable, copy_label};

/// An open directory being listed.
#[derive(Debug, Clone, Copy)]
pub struct OpenDir<'a> {
    pub path: &'a str,
    pub identity: FileIdentity,
}

/// Outcome of [`Engine::refresh`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Virtual paths invalidated directly.
    pub invalidated: usize,
    /// Virtual paths that did not exist, handled by invalidating the parent.
    pub via_parent: usize,
    /// Paths skipped after both attempts failed.
    pub failed: usize,
    /// Rules whose real identity changed.
    pub reresolved: usize,
}

/// Process-wide redirection state.
pub struct Engine {
    config: EngineConfig,
    normalizer: Normalizer,
    gate: AccessGate,
    blocklist: Blocklist,
    filter: MembershipFilter,
    rules: RuleStore,
    dirs: InjectionTree,
    fs_type: FsTypeSpoofer,
    labels: LabelTable,
    traversal: SnapshotCell<Vec<FileIdentity>>,
    host: Arc<dyn HostFs>,
    admin: AdminLock,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("enabled", &self.gate.is_enabled())
            .field("rules", &self.rules.len())
            .field("dirs", &self.dirs.len())
            .field("blocked", &self.blocklist.len())
            .field("filter", &self.filter)
            .finish()
    }
}

impl Engine {
    /// Build an engine over `host`. Out-of-range sizes in `config` are
    /// pulled into range first (see [`EngineConfig::bounded`]).
    pub fn new(config: EngineConfig, host: Arc<dyn HostFs>) -> Self {
        let config = config.bounded();
        let normalizer = Normalizer::new(config.alias_root.clone());
        Self {
            gate: AccessGate::new(config.start_enabled, config.critical_prefixes.clone()),
            blocklist: Blocklist::new(),
            filter: MembershipFilter::new(config.filter_bits),
            rules: RuleStore::new(normalizer.clone()),
            dirs: InjectionTree::new(),
            fs_type: FsTypeSpoofer::from_config(&config),
            labels: LabelTable::from_config(&config),
            traversal: SnapshotCell::default(),
            normalizer,
            host,
            admin: AdminLock::new(),
            config,
        }
    }

    /// Engine over the running system's filesystem.
    #[cfg(unix)]
    pub fn with_local_host(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(crate::host::LocalHost::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn bypass(&self, caller: &Caller) -> bool {
        self.gate.should_bypass(caller) || self.blocklist.contains(caller.uid)
    }

    /// Host identity of a canonical path under either of its spellings.
    fn host_identity(&self, canonical: &str) -> Option<FileIdentity> {
        self.host.identity(canonical).ok().or_else(|| {
            let aliased = self.normalizer.aliased(canonical)?;
            self.host.identity(&aliased).ok()
        })
    }

    /// Invalidate a canonical path, falling back to its alias-rooted
    /// spelling. Reports the canonical attempt's error.
    fn host_invalidate(&self, canonical: &str) -> std::io::Result<()> {
        let err = match self.host.invalidate(canonical) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        match self.normalizer.aliased(canonical) {
            Some(aliased) if self.host.invalidate(&aliased).is_ok() => Ok(()),
            _ => Err(err),
        }
    }

    // ========================================================================
    // Interception hooks
    // ========================================================================

    /// Real path for `path` if an active rule redirects it.
    pub fn resolve_path(&self, caller: &Caller, path: &str) -> Option<String> {
        if self.bypass(caller) {
            return None;
        }
        let canonical = self.normalizer.normalize(path).ok()?;
        if !self.filter.test_path(&canonical) {
            return None;
        }
        let real = self.rules.lookup_by_virtual_path(&canonical);
        if let Some(real) = &real {
            trace!(path, real = %real, "redirect");
        }
        real
    }

    /// Path to hand the host's open: the redirection target, or `path`
    /// unchanged.
    pub fn substitute_path<'a>(&self, caller: &Caller, path: &'a str) -> Cow<'a, str> {
        if !path.starts_with('/') || self.bypass(caller) {
            return Cow::Borrowed(path);
        }
        let Some(_guard) = ReentryGuard::enter() else {
            return Cow::Borrowed(path);
        };
        let canonical = match self.normalizer.normalize(path) {
            Ok(c) => c,
            Err(_) => return Cow::Borrowed(path),
        };
        if !self.filter.test_path(&canonical) {
            return Cow::Borrowed(path);
        }
        match self.rules.lookup_by_virtual_path(&canonical) {
            Some(real) => {
                trace!(path, real = %real, "substitute");
                Cow::Owned(real)
            }
            None => Cow::Borrowed(path),
        }
    }

    /// Absolute form of a relative `name` under `dir`.
    ///
    /// `None` for absolute or empty names and for results past the host's
    /// length limits.
    pub fn build_absolute_path(&self, caller: &Caller, dir: DirHandle, name: &str) -> Option<String> {
        if name.is_empty() || name.starts_with('/') || self.bypass(caller) {
            return None;
        }
        let _guard = ReentryGuard::enter()?;
        let base = self.host.directory_path(dir).ok()?;
        join_relative(&base, name).ok()
    }

    /// Append synthetic entries for `dir` to a listing in progress.
    ///
    /// `cursor` is the listing position on entry; it is advanced past each
    /// entry written and left at the first entry that did not fit. Returns
    /// the number of entries written.
    pub fn inject_entries(
        &self,
        caller: &Caller,
        dir: OpenDir<'_>,
        cursor: &mut u64,
        sink: &mut dyn DirentSink,
    ) -> usize {
        if self.bypass(caller) || !self.filter.test_inode(dir.identity.ino) {
            return 0;
        }
        let Ok(canonical) = self.normalizer.normalize(dir.path) else {
            return 0;
        };
        // A redirected directory's real backing already lists its children.
        if self.rules.lookup(&canonical).is_some() {
            return 0;
        }

        let mut written = 0;
        while let Some(entry) = self.dirs.next_synthetic_entry(&canonical, *cursor) {
            if !sink.emit(entry.ino, entry.next_cursor, entry.kind.d_type(), &entry.name) {
                break;
            }
            *cursor = entry.next_cursor;
            written += 1;
        }
        if written > 0 {
            trace!(dir = %canonical, written, "injected entries");
        }
        written
    }

    /// Virtual path of the synthetic object with real identity `identity`.
    pub fn virtual_path_for(&self, caller: &Caller, identity: FileIdentity) -> Option<String> {
        if self.bypass(caller) || !self.filter.test_inode(identity.ino) {
            return None;
        }
        self.rules.lookup_by_identity(identity)
    }

    /// Whether any active rule redirects to `identity`.
    pub fn is_injected(&self, identity: FileIdentity) -> bool {
        self.filter.test_inode(identity.ino) && self.rules.is_injected(identity)
    }

    /// Whether execute-only traversal of `identity` is allowed so a
    /// redirection target below it can be reached.
    pub fn is_traversal_allowed(&self, caller: &Caller, identity: FileIdentity, access: Access) -> bool {
        if !access.contains(Access::EXEC) || self.bypass(caller) {
            return false;
        }
        self.filter.test_inode(identity.ino) && self.traversal.load().contains(&identity)
    }

    /// Filesystem type to report for `path`.
    pub fn spoof_fs_type(&self, caller: &Caller, path: &str, fs_type: u64) -> u64 {
        if self.bypass(caller) {
            return fs_type;
        }
        let Ok(canonical) = self.normalizer.normalize(path) else {
            return fs_type;
        };
        if !self.filter.test_path(&canonical) || self.rules.lookup(&canonical).is_none() {
            return fs_type;
        }
        if self.fs_type.applies(path, &canonical) {
            trace!(path, "spoof fs type");
            self.fs_type.fs_type()
        } else {
            fs_type
        }
    }

    /// Answer a label attribute read for `identity` into `buf`.
    pub fn spoof_label(
        &self,
        caller: &Caller,
        identity: FileIdentity,
        attribute: &str,
        buf: &mut [u8],
    ) -> Result<usize, LabelError> {
        let label = self
            .label_for(caller, identity, attribute)
            .ok_or(LabelError::NotApplicable)?;
        copy_label(label, buf)
    }

    /// Label the spoofer reports for `identity`, if any.
    pub fn label_for(&self, caller: &Caller, identity: FileIdentity, attribute: &str) -> Option<&str> {
        if !self.labels.answers(attribute) {
            return None;
        }
        let virtual_path = self.virtual_path_for(caller, identity)?;
        self.labels.label_for(&virtual_path)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Register a redirection of `virtual_path` to `real_path`.
    pub fn add_rule(&self, virtual_path: &str, real_path: &str, flags: u32) -> EngineResult<()> {
        validate_absolute(virtual_path)?;
        validate_absolute(real_path)?;
        let canonical = self.normalizer.normalize(virtual_path)?;
        let flags = RuleFlags::from_bits_retain(flags);

        let section = self.admin.enter();
        let _guard = ReentryGuard::enter();
        self.ensure_traversal_roots(&section);

        let identity = self.host.identity(real_path).ok();
        let rule = self
            .rules
            .insert(&section, Rule::new(canonical.clone(), real_path, flags, identity))?;
        self.filter.add_path(&canonical);
        self.filter.add_path(real_path);
        if let Some(id) = rule.identity() {
            self.filter.add_inode(id.ino);
        }

        if self.host_identity(&canonical).is_none() {
            self.inject_ancestors(&section, &canonical, flags.entry_kind());
            rule.mark_fresh();
        }
        let _ = self.host_invalidate(&canonical);

        debug!(
            virtual_path = %canonical,
            real_path,
            identity = ?rule.identity(),
            fresh = rule.is_fresh(),
            "add_rule"
        );
        Ok(())
    }

    /// Make `path` visible in listings of its ancestors, walking up while
    /// the parent is missing on the host under both spellings.
    fn inject_ancestors(&self, section: &Exclusive<'_>, path: &str, kind: EntryKind) {
        let mut path = path.to_string();
        let mut kind = kind;
        while let Some((parent, name)) = split_parent(&path) {
            if self.is_redirected_dir(parent) {
                break;
            }
            let parent_identity = self.host_identity(parent);
            if self.dirs.add_child(section, parent, parent_identity, name, kind) {
                trace!(dir = parent, name, %kind, "inject child");
            }
            if let Some(id) = parent_identity {
                self.filter.add_inode(id.ino);
                break;
            }
            path = parent.to_string();
            kind = EntryKind::Directory;
        }
    }

    /// Whether `dir` or one of its ancestors is the target of a rule.
    fn is_redirected_dir(&self, dir: &str) -> bool {
        let mut current = dir;
        loop {
            if self.rules.lookup(current).is_some() {
                return true;
            }
            match split_parent(current) {
                Some((parent, _)) => current = parent,
                None => return false,
            }
        }
    }

    /// Cache the traversal roots' identities once they exist.
    fn ensure_traversal_roots(&self, section: &Exclusive<'_>) {
        let cached = self.traversal.load();
        if cached.len() < self.config.traversal_roots.len() {
            let resolved: Vec<FileIdentity> = self
                .config
                .traversal_roots
                .iter()
                .filter_map(|root| self.host.identity(root).ok())
                .collect();
            if resolved.len() > cached.len() {
                debug!(roots = resolved.len(), "cached traversal roots");
                self.traversal.publish(section, resolved);
            }
        }
        for id in self.traversal.load().iter() {
            self.filter.add_inode(id.ino);
        }
    }

    /// Remove the rule for `virtual_path`.
    pub fn remove_rule(&self, virtual_path: &str) -> EngineResult<()> {
        let canonical = self.normalizer.normalize(virtual_path)?;
        let section = self.admin.enter();
        let rule = self
            .rules
            .remove(&section, &canonical)
            .ok_or_else(|| EngineError::not_found(canonical.clone()))?;

        if rule.is_fresh() {
            if let Some((parent, name)) = split_parent(&canonical) {
                self.dirs.retire_child(&section, parent, name);
            }
        }
        self.rebuild_filter(&section);

        let _guard = ReentryGuard::enter();
        let _ = self.host_invalidate(&canonical);
        debug!(virtual_path = %canonical, real_path = rule.real_path(), "del_rule");
        Ok(())
    }

    fn rebuild_filter(&self, _section: &Exclusive<'_>) {
        let rules = self.rules.snapshot();
        let dir_inodes = self.dirs.dir_inodes();
        let roots = self.traversal.load();
        self.filter.rebuild(
            rule_filter_keys(&rules)
                .chain(dir_inodes.iter().map(|&ino| FilterKey::Inode(ino)))
                .chain(roots.iter().map(|id| FilterKey::Inode(id.ino))),
        );
    }

    /// Drop every rule, blocked uid, and injected directory.
    pub fn clear(&self) {
        let section = self.admin.enter();
        let rules = self.rules.clear(&section);
        let uids = self.blocklist.clear(&section);
        let dirs = self.dirs.clear(&section);
        self.filter.clear();
        debug!(rules, uids, dirs, "clear");
    }

    pub fn block_uid(&self, uid: Uid) -> EngineResult<()> {
        let section = self.admin.enter();
        self.blocklist.add(&section, uid)?;
        debug!(uid, "add_uid");
        Ok(())
    }

    pub fn unblock_uid(&self, uid: Uid) -> EngineResult<()> {
        let section = self.admin.enter();
        self.blocklist.remove(&section, uid)?;
        debug!(uid, "del_uid");
        Ok(())
    }

    pub fn is_uid_blocked(&self, uid: Uid) -> bool {
        self.blocklist.contains(uid)
    }

    pub fn enable(&self) {
        if !self.gate.set_enabled(true) {
            info!("engine enabled");
        }
    }

    pub fn disable(&self) {
        if self.gate.set_enabled(false) {
            info!("engine disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    /// 1 when enabled, 0 otherwise.
    pub fn status(&self) -> u32 {
        u32::from(self.is_enabled())
    }

    pub fn version(&self) -> u32 {
        PROTOCOL_VERSION
    }

    /// Invalidate cached resolution for every active virtual path and
    /// re-resolve rule targets. Individual failures are skipped.
    pub fn refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let rules = self.rules.snapshot();
        let _guard = ReentryGuard::enter();

        for rule in &rules {
            let path = rule.virtual_path();
            if self.host_invalidate(path).is_ok() {
                report.invalidated += 1;
                continue;
            }
            match split_parent(path).map(|(parent, _)| self.host_invalidate(parent)) {
                Some(Ok(())) => report.via_parent += 1,
                Some(Err(e)) => {
                    warn!(path, error = %e, "refresh: cannot invalidate");
                    report.failed += 1;
                }
                None => report.failed += 1,
            }
        }

        let section = self.admin.enter();
        for rule in &rules {
            let current = self
                .host
                .identity(rule.real_path())
                .ok()
                .filter(FileIdentity::is_valid);
            if current != rule.identity()
                && self.rules.replace_identity(&section, rule.virtual_path(), current)
            {
                report.reresolved += 1;
            }
        }
        if report.reresolved > 0 {
            self.rebuild_filter(&section);
        }

        debug!(?report, "refresh");
        report
    }

    /// `real->virtual` records, bounded by the configured list limit.
    pub fn list(&self) -> Listing {
        self.rules.list(self.config.list_limit)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Synthetic children currently injected into `dir`.
    pub fn injected_children(&self, dir: &str) -> Vec<(String, EntryKind)> {
        match self.normalizer.normalize(dir) {
            Ok(canonical) => self.dirs.children(&canonical),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirent::{DirentBuffer, DirentLayout};
    use crate::host::MemoryHost;
    use crate::inject::LISTING_CURSOR_BASE;
    use std::sync::{OnceLock, Weak};

    fn setup() -> (Arc<Engine>, Arc<MemoryHost>) {
        let host = Arc::new(MemoryHost::new());
        let config = EngineConfig {
            start_enabled: true,
            ..EngineConfig::default()
        };
        let engine = Arc::new(Engine::new(config, host.clone()));
        (engine, host)
    }

    fn app() -> Caller {
        Caller::process(10_123, "com.example")
    }

    fn list_all(engine: &Engine, host: &MemoryHost, dir: &str, capacity: usize) -> Vec<String> {
        let identity = host.identity(dir).unwrap();
        let mut cursor = 0;
        let mut names = Vec::new();
        loop {
            let mut buf = DirentBuffer::new(DirentLayout::Dirent64, capacity);
            let n = engine.inject_entries(&app(), OpenDir { path: dir, identity }, &mut cursor, &mut buf);
            names.extend(buf.entries().into_iter().map(|e| e.name));
            if n == 0 {
                break;
            }
        }
        names
    }

    #[test]
    fn test_alias_root_equivalence() {
        let (engine, host) = setup();
        host.add("/data/adb/su");
        engine.add_rule("/system/xbin/su", "/data/adb/su", 0).unwrap();

        assert_eq!(engine.resolve_path(&app(), "/xbin/su").as_deref(), Some("/data/adb/su"));
        assert_eq!(
            engine.resolve_path(&app(), "/system/xbin/su").as_deref(),
            Some("/data/adb/su")
        );
        assert_eq!(engine.substitute_path(&app(), "/xbin/su"), "/data/adb/su");
        assert_eq!(engine.substitute_path(&app(), "/xbin/sh"), "/xbin/sh");
        assert_eq!(engine.substitute_path(&app(), "xbin/su"), "xbin/su");
    }

    #[test]
    fn test_unresolvable_real_path() {
        let (engine, host) = setup();
        engine.add_rule("/xbin/su", "/data/adb/missing", 0).unwrap();
        assert_eq!(
            engine.resolve_path(&app(), "/xbin/su").as_deref(),
            Some("/data/adb/missing")
        );

        // An identity the target would have had, had it existed.
        let later = host.add("/data/adb/missing");
        assert!(!engine.is_injected(later));
    }

    #[test]
    fn test_disable_and_enable() {
        let (engine, host) = setup();
        host.add("/data/adb/su");
        engine.add_rule("/xbin/su", "/data/adb/su", 0).unwrap();

        engine.disable();
        assert!(!engine.is_enabled());
        assert_eq!(engine.status(), 0);
        assert_eq!(engine.resolve_path(&app(), "/xbin/su"), None);
        assert_eq!(engine.substitute_path(&app(), "/xbin/su"), "/xbin/su");

        engine.enable();
        assert_eq!(engine.status(), 1);
        assert_eq!(engine.resolve_path(&app(), "/xbin/su").as_deref(), Some("/data/adb/su"));
    }

    #[test]
    fn test_duplicate_rule() {
        let (engine, _host) = setup();
        engine.add_rule("/xbin/su", "/first", 0).unwrap();
        let err = engine.add_rule("/system/xbin/su", "/second", 0).unwrap_err();
        assert!(matches!(err, EngineError::Duplicate(_)));
        assert_eq!(engine.resolve_path(&app(), "/xbin/su").as_deref(), Some("/first"));
        assert_eq!(engine.rule_count(), 1);
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let (engine, _host) = setup();
        assert!(matches!(
            engine.add_rule("relative", "/x", 0),
            Err(EngineError::InvalidPath(_))
        ));
        assert!(matches!(
            engine.add_rule("/x", "relative", 0),
            Err(EngineError::InvalidPath(_))
        ));
        assert_eq!(engine.rule_count(), 0);
    }

    #[test]
    fn test_remove_rule() {
        let (engine, host) = setup();
        host.add("/data/a");
        engine.add_rule("/v/a", "/data/a", 0).unwrap();
        engine.remove_rule("/v/a").unwrap();
        assert_eq!(engine.resolve_path(&app(), "/v/a"), None);
        assert!(matches!(engine.remove_rule("/v/a"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_blocked_uid_passes_through() {
        let (engine, host) = setup();
        host.add("/data/adb/su");
        engine.add_rule("/xbin/su", "/data/adb/su", 0).unwrap();
        engine.block_uid(10_123).unwrap();
        assert!(engine.is_uid_blocked(10_123));
        assert_eq!(engine.resolve_path(&app(), "/xbin/su"), None);
        assert!(matches!(engine.block_uid(10_123), Err(EngineError::Duplicate(_))));

        engine.unblock_uid(10_123).unwrap();
        assert!(engine.resolve_path(&app(), "/xbin/su").is_some());
        assert!(matches!(engine.unblock_uid(10_123), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_critical_caller_passes_through() {
        let (engine, _host) = setup();
        engine.add_rule("/xbin/su", "/data/adb/su", 0).unwrap();
        assert_eq!(engine.resolve_path(&Caller::process(0, "init"), "/xbin/su"), None);
    }

    #[test]
    fn test_auto_injection_of_ancestors() {
        let (engine, host) = setup();
        host.add("/data/real_c");
        engine.add_rule("/a/b/c", "/data/real_c", 0).unwrap();

        assert_eq!(
            engine.injected_children("/"),
            vec![("a".to_string(), EntryKind::Directory)]
        );
        assert_eq!(
            engine.injected_children("/a"),
            vec![("b".to_string(), EntryKind::Directory)]
        );
        assert_eq!(
            engine.injected_children("/a/b"),
            vec![("c".to_string(), EntryKind::Regular)]
        );

        // A second rule under the same synthetic parent adds only itself.
        engine.add_rule("/a/b/d", "/data/real_c", RuleFlags::DIRECTORY.bits()).unwrap();
        assert_eq!(
            engine.injected_children("/a/b"),
            vec![
                ("c".to_string(), EntryKind::Regular),
                ("d".to_string(), EntryKind::Directory)
            ]
        );
        assert_eq!(engine.injected_children("/a").len(), 1);
    }

    #[test]
    fn test_injection_stops_at_existing_parent() {
        let (engine, host) = setup();
        host.add("/vendor/bin");
        engine.add_rule("/vendor/bin/tool", "/data/tool", 0).unwrap();
        assert_eq!(engine.injected_children("/vendor/bin").len(), 1);
        assert!(engine.injected_children("/vendor").is_empty());
    }

    #[test]
    fn test_no_injection_under_redirected_dir() {
        let (engine, host) = setup();
        host.add("/data/overlay");
        engine.add_rule("/odm/overlay", "/data/overlay", RuleFlags::DIRECTORY.bits()).unwrap();
        engine.add_rule("/odm/overlay/new/file", "/data/file", 0).unwrap();
        assert!(engine.injected_children("/odm/overlay/new").is_empty());
        assert!(engine.injected_children("/odm/overlay").is_empty());
    }

    #[test]
    fn test_injection_under_alias_rooted_dir() {
        let (engine, host) = setup();
        host.add("/system/xbin");
        host.add("/data/adb/su");
        engine.add_rule("/system/xbin/su", "/data/adb/su", 0).unwrap();

        // The parent exists as /system/xbin, so nothing is fabricated in /.
        assert!(engine.injected_children("/").is_empty());
        assert_eq!(
            engine.injected_children("/system/xbin"),
            vec![("su".to_string(), EntryKind::Regular)]
        );
        assert_eq!(list_all(&engine, &host, "/system/xbin", 4096), vec!["su"]);

        // Same directory opened through its canonical spelling.
        let identity = host.identity("/system/xbin").unwrap();
        let mut cursor = 0;
        let mut buf = DirentBuffer::new(DirentLayout::Dirent64, 4096);
        let open = OpenDir { path: "/xbin", identity };
        assert_eq!(engine.inject_entries(&app(), open, &mut cursor, &mut buf), 1);
        assert_eq!(buf.entries()[0].name, "su");
    }

    #[test]
    fn test_alias_rooted_walk_stops_at_existing_ancestor() {
        let (engine, host) = setup();
        host.add("/system/app");
        engine.add_rule("/system/app/New/base.apk", "/data/app/base.apk", 0).unwrap();

        assert!(engine.injected_children("/").is_empty());
        assert_eq!(
            engine.injected_children("/app"),
            vec![("New".to_string(), EntryKind::Directory)]
        );
        assert_eq!(
            engine.injected_children("/app/New"),
            vec![("base.apk".to_string(), EntryKind::Regular)]
        );
        assert_eq!(list_all(&engine, &host, "/system/app", 4096), vec!["New"]);
    }

    #[test]
    fn test_redirected_dir_is_not_injected_into() {
        let (engine, host) = setup();
        let dir = host.add("/a/b");
        host.add("/data/b");
        engine.add_rule("/a/b/c", "/data/c", 0).unwrap();
        assert_eq!(list_all(&engine, &host, "/a/b", 4096), vec!["c"]);

        engine.add_rule("/a/b", "/data/b", RuleFlags::DIRECTORY.bits()).unwrap();
        let mut cursor = 0;
        let mut buf = DirentBuffer::new(DirentLayout::Dirent64, 4096);
        let open = OpenDir { path: "/a/b", identity: dir };
        assert_eq!(engine.inject_entries(&app(), open, &mut cursor, &mut buf), 0);
        assert_eq!(cursor, 0);
        assert!(buf.is_empty());

        // Resuming mid-listing is refused the same way.
        let mut cursor = LISTING_CURSOR_BASE;
        assert_eq!(engine.inject_entries(&app(), open, &mut cursor, &mut buf), 0);
        assert_eq!(cursor, LISTING_CURSOR_BASE);
    }

    #[test]
    fn test_oversized_config_is_bounded() {
        let host = Arc::new(MemoryHost::new());
        let config = EngineConfig {
            filter_bits: 64,
            list_limit: usize::MAX,
            start_enabled: true,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config, host.clone());
        assert_eq!(engine.config().filter_bits, crate::filter::MAX_FILTER_BITS);
        assert_eq!(engine.config().list_limit, pathwarp_types::MAX_LIST_BYTES);

        host.add("/data/adb/su");
        engine.add_rule("/xbin/su", "/data/adb/su", 0).unwrap();
        assert_eq!(engine.resolve_path(&app(), "/xbin/su").as_deref(), Some("/data/adb/su"));
    }

    #[test]
    fn test_existing_virtual_path_is_not_fresh() {
        let (engine, host) = setup();
        host.add("/etc/hosts");
        let target = host.add("/data/hosts");
        engine.add_rule("/etc/hosts", "/data/hosts", 0).unwrap();

        assert!(engine.injected_children("/etc").is_empty());
        assert!(engine.is_injected(target));
        assert_eq!(engine.virtual_path_for(&app(), target), None);
    }

    #[test]
    fn test_listing_resumes_at_cursor() {
        let (engine, host) = setup();
        host.add("/product/app");
        for name in ["alpha", "beta", "gamma", "delta"] {
            engine
                .add_rule(&format!("/product/app/{}", name), "/data/x", 0)
                .unwrap();
        }

        // Room for exactly one record per call.
        let record = DirentLayout::Dirent64.record_len(5);
        let names = list_all(&engine, &host, "/product/app", record);
        assert_eq!(names, vec!["alpha", "beta", "gamma", "delta"]);

        let whole = list_all(&engine, &host, "/product/app", 4096);
        assert_eq!(whole, names);
    }

    #[test]
    fn test_cursor_left_at_unwritten_entry() {
        let (engine, host) = setup();
        let dir = host.add("/product/app");
        engine.add_rule("/product/app/one", "/data/x", 0).unwrap();
        engine.add_rule("/product/app/two", "/data/x", 0).unwrap();

        let mut cursor = 0;
        let mut buf = DirentBuffer::new(DirentLayout::Legacy, DirentLayout::Legacy.record_len(3));
        let open = OpenDir { path: "/product/app", identity: dir };
        assert_eq!(engine.inject_entries(&app(), open, &mut cursor, &mut buf), 1);
        assert_eq!(cursor, LISTING_CURSOR_BASE + 1);

        let entries = buf.entries();
        assert_eq!(entries[0].name, "one");
        assert_eq!(entries[0].off, LISTING_CURSOR_BASE + 1);
        assert_eq!(entries[0].d_type, EntryKind::Regular.d_type());

        let mut buf = DirentBuffer::new(DirentLayout::Legacy, 0);
        assert_eq!(engine.inject_entries(&app(), open, &mut cursor, &mut buf), 0);
        assert_eq!(cursor, LISTING_CURSOR_BASE + 1);
    }

    #[test]
    fn test_removed_child_disappears_from_listing() {
        let (engine, host) = setup();
        host.add("/product/app");
        engine.add_rule("/product/app/one", "/data/x", 0).unwrap();
        engine.add_rule("/product/app/two", "/data/x", 0).unwrap();
        engine.remove_rule("/product/app/one").unwrap();

        assert_eq!(list_all(&engine, &host, "/product/app", 4096), vec!["two"]);
    }

    #[test]
    fn test_injection_skipped_for_unknown_dir() {
        let (engine, host) = setup();
        host.add("/product/app");
        let other = host.add("/other");
        engine.add_rule("/product/app/one", "/data/x", 0).unwrap();

        let mut cursor = 0;
        let mut buf = DirentBuffer::new(DirentLayout::Dirent64, 4096);
        let open = OpenDir { path: "/other", identity: other };
        assert_eq!(engine.inject_entries(&app(), open, &mut cursor, &mut buf), 0);
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_synthetic_inodes_stable_across_listings() {
        let (engine, host) = setup();
        let dir = host.add("/product/app");
        engine.add_rule("/product/app/one", "/data/x", 0).unwrap();
        let open = OpenDir { path: "/product/app", identity: dir };

        let mut first = DirentBuffer::new(DirentLayout::Dirent64, 4096);
        engine.inject_entries(&app(), open, &mut 0, &mut first);
        let mut second = DirentBuffer::new(DirentLayout::Dirent64, 4096);
        engine.inject_entries(&app(), open, &mut 0, &mut second);
        assert_eq!(first.entries()[0].ino, second.entries()[0].ino);
    }

    #[test]
    fn test_identity_and_label_spoofing() {
        let (engine, host) = setup();
        let target = host.add("/data/adb/modules/m/libfoo.so");
        engine
            .add_rule("/system/lib64/libfoo.so", "/data/adb/modules/m/libfoo.so", 0)
            .unwrap();

        assert_eq!(
            engine.virtual_path_for(&app(), target).as_deref(),
            Some("/lib64/libfoo.so")
        );

        let mut buf = [0u8; 64];
        let n = engine
            .spoof_label(&app(), target, "security.selinux", &mut buf)
            .unwrap();
        assert_eq!(&buf[..n], b"u:object_r:system_lib_file:s0\0");
        assert_eq!(engine.spoof_label(&app(), target, "security.selinux", &mut []), Ok(n));
        assert_eq!(
            engine.spoof_label(&app(), target, "security.selinux", &mut [0u8; 3]),
            Err(LabelError::Range(n))
        );
        assert_eq!(
            engine.spoof_label(&app(), target, "user.other", &mut buf),
            Err(LabelError::NotApplicable)
        );
        let unrelated = host.add("/data/plain");
        assert_eq!(
            engine.spoof_label(&app(), unrelated, "security.selinux", &mut buf),
            Err(LabelError::NotApplicable)
        );
    }

    #[test]
    fn test_fs_type_spoofing() {
        let (engine, host) = setup();
        host.add("/data/adb/su");
        engine.add_rule("/system/xbin/su", "/data/adb/su", 0).unwrap();
        engine.add_rule("/data/local/thing", "/data/adb/su", 0).unwrap();

        let ext4 = 0xEF53;
        assert_eq!(engine.spoof_fs_type(&app(), "/system/xbin/su", ext4), 0xE0F5_E1E2);
        assert_eq!(engine.spoof_fs_type(&app(), "/data/local/thing", ext4), ext4);
        assert_eq!(engine.spoof_fs_type(&app(), "/system/xbin/other", ext4), ext4);
    }

    #[test]
    fn test_traversal_roots() {
        let (engine, host) = setup();
        let adb = host.add("/data/adb");
        let modules = host.add("/data/adb/modules");
        let other = host.add("/data/local");

        assert!(!engine.is_traversal_allowed(&app(), adb, Access::EXEC));
        engine.add_rule("/xbin/su", "/data/adb/su", 0).unwrap();

        assert!(engine.is_traversal_allowed(&app(), adb, Access::EXEC));
        assert!(engine.is_traversal_allowed(&app(), modules, Access::EXEC | Access::READ));
        assert!(!engine.is_traversal_allowed(&app(), adb, Access::READ));
        assert!(!engine.is_traversal_allowed(&app(), other, Access::EXEC));

        // Roots survive a rebuild triggered by removal.
        engine.remove_rule("/xbin/su").unwrap();
        assert!(engine.is_traversal_allowed(&app(), adb, Access::EXEC));
    }

    #[test]
    fn test_build_absolute_path() {
        let (engine, host) = setup();
        host.set_cwd("/data/local");
        host.open_dir(7, "/vendor");

        assert_eq!(
            engine.build_absolute_path(&app(), DirHandle::Cwd, "tmp/x").as_deref(),
            Some("/data/local/tmp/x")
        );
        assert_eq!(
            engine.build_absolute_path(&app(), DirHandle::Fd(7), "lib").as_deref(),
            Some("/vendor/lib")
        );
        assert_eq!(engine.build_absolute_path(&app(), DirHandle::Cwd, "/abs"), None);
        assert_eq!(engine.build_absolute_path(&app(), DirHandle::Cwd, ""), None);
        assert_eq!(engine.build_absolute_path(&app(), DirHandle::Fd(9), "x"), None);
        assert_eq!(
            engine.build_absolute_path(&app(), DirHandle::Cwd, &"n".repeat(256)),
            None
        );
    }

    #[test]
    fn test_clear() {
        let (engine, host) = setup();
        let target = host.add("/data/adb/su");
        engine.add_rule("/a/su", "/data/adb/su", 0).unwrap();
        engine.block_uid(2000).unwrap();

        engine.clear();
        assert_eq!(engine.rule_count(), 0);
        assert!(!engine.is_uid_blocked(2000));
        assert!(engine.injected_children("/").is_empty());
        assert!(!engine.is_injected(target));
        assert_eq!(engine.list().text, "");
    }

    #[test]
    fn test_list() {
        let (engine, _host) = setup();
        engine.add_rule("/system/xbin/su", "/data/adb/su", 0).unwrap();
        engine.add_rule("/vendor/bin/x", "/data/x", 0).unwrap();
        let listing = engine.list();
        assert_eq!(listing.text, "/data/adb/su->/xbin/su\n/data/x->/vendor/bin/x\n");
        assert!(!listing.truncated);
        assert_eq!(engine.version(), 1);
    }

    #[test]
    fn test_list_truncates() {
        let host = Arc::new(MemoryHost::new());
        let config = EngineConfig {
            list_limit: 20,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config, host);
        engine.add_rule("/a", "/real/a", 0).unwrap();
        engine.add_rule("/b", "/real/b", 0).unwrap();
        let listing = engine.list();
        assert_eq!(listing.text, "/real/a->/a\n");
        assert!(listing.truncated);
    }

    #[test]
    fn test_refresh() {
        let (engine, host) = setup();
        host.add("/xbin/su");
        host.add("/etc");
        host.add("/broken");
        engine.add_rule("/xbin/su", "/data/adb/su", 0).unwrap();
        engine.add_rule("/etc/fresh", "/data/adb/fresh", 0).unwrap();
        engine.add_rule("/broken/x", "/data/adb/x", 0).unwrap();
        host.fail_invalidate("/broken");

        // Target appears after the rule was added.
        let target = host.add("/data/adb/su");
        assert!(!engine.is_injected(target));

        let report = engine.refresh();
        assert_eq!(report.invalidated, 1);
        assert_eq!(report.via_parent, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.reresolved, 1);
        assert!(engine.is_injected(target));
        assert!(host.invalidated().contains(&"/etc".to_string()));
    }

    /// Calls back into the engine from inside a host lookup.
    struct ReentrantHost {
        inner: MemoryHost,
        engine: OnceLock<Weak<Engine>>,
        observed: parking_lot::Mutex<Vec<String>>,
    }

    impl HostFs for ReentrantHost {
        fn identity(&self, path: &str) -> std::io::Result<FileIdentity> {
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                let seen = engine.substitute_path(&app(), "/xbin/su").into_owned();
                self.observed.lock().push(seen);
            }
            self.inner.identity(path)
        }

        fn directory_path(&self, dir: DirHandle) -> std::io::Result<String> {
            self.inner.directory_path(dir)
        }

        fn invalidate(&self, path: &str) -> std::io::Result<()> {
            self.inner.invalidate(path)
        }
    }

    #[test]
    fn test_internal_lookups_do_not_recurse() {
        let host = Arc::new(ReentrantHost {
            inner: MemoryHost::new(),
            engine: OnceLock::new(),
            observed: parking_lot::Mutex::new(Vec::new()),
        });
        let config = EngineConfig {
            start_enabled: true,
            ..EngineConfig::default()
        };
        let engine = Arc::new(Engine::new(config, host.clone()));
        let _ = host.engine.set(Arc::downgrade(&engine));

        engine.add_rule("/xbin/su", "/data/adb/su", 0).unwrap();
        engine.add_rule("/xbin/sh", "/data/adb/sh", 0).unwrap();

        let observed = host.observed.lock().clone();
        assert!(!observed.is_empty());
        assert!(observed.iter().all(|p| p == "/xbin/su"));
        assert_eq!(engine.substitute_path(&app(), "/xbin/su"), "/data/adb/su");
    }

    #[test]
    fn test_concurrent_lookups_during_mutation() {
        let (engine, host) = setup();
        host.add("/data/stable");
        engine.add_rule("/stable", "/data/stable", 0).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        assert_eq!(
                            engine.resolve_path(&app(), "/stable").as_deref(),
                            Some("/data/stable")
                        );
                        if let Some(real) = engine.resolve_path(&app(), "/churn/7") {
                            assert_eq!(real, "/data/churn/7");
                        }
                    }
                })
            })
            .collect();

        for round in 0..20 {
            for i in 0..10 {
                engine
                    .add_rule(&format!("/churn/{}", i), &format!("/data/churn/{}", i), 0)
                    .unwrap();
            }
            for i in 0..10 {
                engine.remove_rule(&format!("/churn/{}", i)).unwrap();
            }
            assert_eq!(engine.rule_count(), 1, "round {}", round);
        }

        for r in readers {
            r.join().unwrap();
        }
    }
}
