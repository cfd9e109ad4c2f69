//! Rule store: the authoritative virtual-path → real-path mapping.
//!
//! Three indices are kept in one published table so a reader always sees
//! them consistent with each other:
//!
//! - `by_path`: canonical virtual path → rule (hash indexed)
//! - `by_identity`: real file identity → rules redirecting to it
//! - `ordered`: registration order, for listing and filter rebuilds
//!
//! Lookups load the table and never block behind a mutation. Mutations
//! run inside the engine's exclusive section and publish a new table;
//! removed rules are freed only once every reader holding the old table
//! has finished (see [`crate::snapshot`]).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pathwarp_types::{FileIdentity, RuleFlags};

use crate::error::{EngineError, EngineResult};
use crate::filter::FilterKey;
use crate::path::Normalizer;
use crate::snapshot::{Exclusive, SnapshotCell};

/// One redirection mapping.
#[derive(Debug)]
pub struct Rule {
    virtual_path: String,
    real_path: String,
    identity: Option<FileIdentity>,
    flags: RuleFlags,
    /// Set once the virtual path was found not to exist on the host, i.e.
    /// the rule conjures a new object rather than shadowing one.
    fresh: AtomicBool,
}

impl Rule {
    /// `virtual_path` must already be canonical. The rule is always created
    /// active.
    pub fn new(
        virtual_path: impl Into<String>,
        real_path: impl Into<String>,
        flags: RuleFlags,
        identity: Option<FileIdentity>,
    ) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            real_path: real_path.into(),
            identity: identity.filter(FileIdentity::is_valid),
            flags: flags | RuleFlags::ACTIVE,
            fresh: AtomicBool::new(false),
        }
    }

    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    pub fn real_path(&self) -> &str {
        &self.real_path
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }

    pub fn flags(&self) -> RuleFlags {
        self.flags
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(RuleFlags::ACTIVE)
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }

    pub fn mark_fresh(&self) {
        self.fresh.store(true, Ordering::Release);
    }

    /// Same rule, different cached identity. Freshness carries over.
    fn with_identity(&self, identity: Option<FileIdentity>) -> Self {
        let rule = Self::new(
            self.virtual_path.clone(),
            self.real_path.clone(),
            self.flags,
            identity,
        );
        rule.fresh.store(self.is_fresh(), Ordering::Release);
        rule
    }

    fn filter_keys(&self) -> impl Iterator<Item = FilterKey<'_>> {
        [
            Some(FilterKey::Path(&self.virtual_path)),
            Some(FilterKey::Path(&self.real_path)),
            self.identity.map(|id| FilterKey::Inode(id.ino)),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Default)]
struct RuleTables {
    by_path: HashMap<String, Arc<Rule>>,
    by_identity: HashMap<FileIdentity, Vec<Arc<Rule>>>,
    ordered: Vec<Arc<Rule>>,
}

impl RuleTables {
    fn link(&mut self, rule: Arc<Rule>) {
        if let Some(id) = rule.identity {
            self.by_identity.entry(id).or_default().push(Arc::clone(&rule));
        }
        self.by_path
            .insert(rule.virtual_path.clone(), Arc::clone(&rule));
        self.ordered.push(rule);
    }

    fn unlink(&mut self, virtual_path: &str) -> Option<Arc<Rule>> {
        let rule = self.by_path.remove(virtual_path)?;
        if let Some(id) = rule.identity {
            if let Some(list) = self.by_identity.get_mut(&id) {
                list.retain(|r| !Arc::ptr_eq(r, &rule));
                if list.is_empty() {
                    self.by_identity.remove(&id);
                }
            }
        }
        self.ordered.retain(|r| !Arc::ptr_eq(r, &rule));
        Some(rule)
    }
}

/// Result of [`RuleStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub text: String,
    /// The bound was reached; `text` holds only the leading records.
    pub truncated: bool,
}

/// Concurrent rule map, read-mostly.
#[derive(Debug)]
pub struct RuleStore {
    tables: SnapshotCell<RuleTables>,
    normalizer: Normalizer,
}

impl RuleStore {
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            tables: SnapshotCell::default(),
            normalizer,
        }
    }

    /// The active rule whose virtual path equals `canonical`, or equals it
    /// with the alias root stripped.
    pub fn lookup(&self, canonical: &str) -> Option<Arc<Rule>> {
        let tables = self.tables.load();
        let exact = tables.by_path.get(canonical).filter(|r| r.is_active());
        if let Some(rule) = exact {
            return Some(Arc::clone(rule));
        }
        let stripped = self
            .normalizer
            .strip_alias(canonical)
            .filter(|rest| rest.starts_with('/'))?;
        tables
            .by_path
            .get(stripped)
            .filter(|r| r.is_active())
            .map(Arc::clone)
    }

    /// Real path for `canonical`, if redirected.
    pub fn lookup_by_virtual_path(&self, canonical: &str) -> Option<String> {
        self.lookup(canonical).map(|r| r.real_path.clone())
    }

    /// Virtual path of a fresh rule whose real target is `identity`.
    ///
    /// Rules that merely shadow an existing object are not reported: the
    /// object is itself, not the virtual path.
    pub fn lookup_by_identity(&self, identity: FileIdentity) -> Option<String> {
        let tables = self.tables.load();
        tables
            .by_identity
            .get(&identity)?
            .iter()
            .find(|r| r.is_active() && r.is_fresh())
            .map(|r| r.virtual_path.clone())
    }

    /// Whether any active rule redirects to `identity`, fresh or not.
    pub fn is_injected(&self, identity: FileIdentity) -> bool {
        let tables = self.tables.load();
        tables
            .by_identity
            .get(&identity)
            .is_some_and(|rules| rules.iter().any(|r| r.is_active()))
    }

    /// Link `rule` into every index. Fails without touching the store if an
    /// active rule already owns the virtual path.
    pub fn insert(&self, section: &Exclusive<'_>, rule: Rule) -> EngineResult<Arc<Rule>> {
        let current = self.tables.load();
        if current
            .by_path
            .get(rule.virtual_path())
            .is_some_and(|r| r.is_active())
        {
            return Err(EngineError::duplicate(rule.virtual_path));
        }
        let rule = Arc::new(rule);
        self.tables.update(section, |t| t.link(Arc::clone(&rule)));
        Ok(rule)
    }

    /// Unlink the rule for `canonical` from every index.
    pub fn remove(&self, section: &Exclusive<'_>, canonical: &str) -> Option<Arc<Rule>> {
        if !self.tables.load().by_path.contains_key(canonical) {
            return None;
        }
        self.tables.update(section, |t| t.unlink(canonical))
    }

    /// Swap the cached identity of the rule for `canonical`.
    pub fn replace_identity(
        &self,
        section: &Exclusive<'_>,
        canonical: &str,
        identity: Option<FileIdentity>,
    ) -> bool {
        self.tables.update(section, |t| match t.by_path.get(canonical) {
            Some(old) => {
                let old = Arc::clone(old);
                let position = t.ordered.iter().position(|r| Arc::ptr_eq(r, &old));
                t.unlink(canonical);
                let new = Arc::new(old.with_identity(identity));
                t.link(Arc::clone(&new));
                // Keep registration order stable.
                if let (Some(pos), Some(last)) = (position, t.ordered.pop()) {
                    t.ordered.insert(pos, last);
                }
                true
            }
            None => false,
        })
    }

    /// Unlink every rule; returns how many there were.
    pub fn clear(&self, section: &Exclusive<'_>) -> usize {
        let count = self.len();
        self.tables.publish(section, RuleTables::default());
        count
    }

    pub fn len(&self) -> usize {
        self.tables.load().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of all active rules in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Rule>> {
        self.tables
            .load()
            .ordered
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    /// Serialize `real->virtual\n` records in registration order, stopping
    /// before the first record that would take the text past `limit` bytes.
    pub fn list(&self, limit: usize) -> Listing {
        let tables = self.tables.load();
        let mut text = String::new();
        let mut truncated = false;
        for rule in tables.ordered.iter().filter(|r| r.is_active()) {
            let record_len = rule.real_path.len() + 2 + rule.virtual_path.len() + 1;
            if text.len() + record_len > limit {
                truncated = true;
                break;
            }
            let _ = writeln!(text, "{}->{}", rule.real_path, rule.virtual_path);
        }
        Listing { text, truncated }
    }
}

/// Flatten the filter keys of `rules`.
pub fn rule_filter_keys(rules: &[Arc<Rule>]) -> impl Iterator<Item = FilterKey<'_>> {
    rules.iter().flat_map(|r| r.filter_keys())
}
