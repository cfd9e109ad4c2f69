//! Path canonicalization.
//!
//! Rule keys and lookup keys both pass through [`Normalizer::normalize`],
//! so they are always compared in the same canonical space.

use crate::error::{EngineError, EngineResult};

/// Longest accepted path, including the terminator the host would add.
pub const PATH_MAX: usize = 4096;

/// Longest accepted single component.
pub const NAME_MAX: usize = 255;

/// Canonicalizes paths against one redundant root.
#[derive(Debug, Clone)]
pub struct Normalizer {
    alias_root: String,
}

impl Normalizer {
    /// `alias_root` is the root that is also reachable at `/`, e.g.
    /// `/system`. Trailing separators are ignored.
    pub fn new(alias_root: impl Into<String>) -> Self {
        let mut alias_root = alias_root.into();
        while alias_root.len() > 1 && alias_root.ends_with('/') {
            alias_root.pop();
        }
        Self { alias_root }
    }

    pub fn alias_root(&self) -> &str {
        &self.alias_root
    }

    /// Canonical form of `path`: every leading `<alias>/` is collapsed to
    /// `/` and trailing separators past the first character are dropped.
    ///
    /// Idempotent. Returns a freshly allocated string; fails only when the
    /// allocation does.
    pub fn normalize(&self, path: &str) -> EngineResult<String> {
        let canonical = self.canonical_slice(path);
        let mut out = String::new();
        out.try_reserve_exact(canonical.len())?;
        out.push_str(canonical);
        Ok(out)
    }

    fn canonical_slice<'a>(&self, path: &'a str) -> &'a str {
        let mut p = path;
        while let Some(rest) = self.strip_alias(p).filter(|r| r.starts_with('/')) {
            p = rest;
        }
        trim_trailing(p)
    }

    /// The alias-rooted spelling of a canonical path: `/xbin` becomes
    /// `/system/xbin` and `/` becomes `/system`. `None` when there is no
    /// alias root.
    pub fn aliased(&self, canonical: &str) -> Option<String> {
        if self.alias_root.len() <= 1 || !canonical.starts_with('/') {
            return None;
        }
        if canonical == "/" {
            return Some(self.alias_root.clone());
        }
        Some(format!("{}{}", self.alias_root, canonical))
    }

    /// The remainder of `path` after the alias root, if `path` starts with
    /// it. The remainder is empty or begins with `/`.
    pub fn strip_alias<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.alias_root.len() <= 1 {
            return None;
        }
        let rest = path.strip_prefix(self.alias_root.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }
}

fn trim_trailing(path: &str) -> &str {
    let mut end = path.len();
    while end > 1 && path.as_bytes()[end - 1] == b'/' {
        end -= 1;
    }
    &path[..end]
}

/// Split an absolute path into its parent directory and final component.
///
/// Returns `None` for `/`, for relative paths, and for paths ending in a
/// separator. The parent of a top-level entry is `/`.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    if !path.starts_with('/') {
        return None;
    }
    let idx = path.rfind('/')?;
    let name = &path[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Some((parent, name))
}

/// Join a directory and a relative name into an absolute path, enforcing
/// the host's length limits.
pub fn join_relative(dir: &str, name: &str) -> EngineResult<String> {
    if name.is_empty() || name.starts_with('/') {
        return Err(EngineError::invalid_path(name));
    }
    if dir.len() > PATH_MAX || name.len() > NAME_MAX || dir.len() + name.len() + 2 > PATH_MAX {
        return Err(EngineError::invalid_path(format!("{}/{}", dir, name)));
    }
    let mut out = String::new();
    out.try_reserve_exact(dir.len() + 1 + name.len())?;
    out.push_str(dir);
    if !dir.ends_with('/') {
        out.push('/');
    }
    out.push_str(name);
    Ok(out)
}

/// Validate a virtual path supplied by the controller: absolute, within
/// `PATH_MAX`, no component longer than `NAME_MAX`.
pub fn validate_absolute(path: &str) -> EngineResult<()> {
    if !path.starts_with('/') || path.len() >= PATH_MAX || path.contains('\0') {
        return Err(EngineError::invalid_path(path));
    }
    if path.split('/').any(|c| c.len() > NAME_MAX) {
        return Err(EngineError::invalid_path(path));
    }
    Ok(())
}

/// Whether `path` equals `prefix` or continues it with a separator.
pub fn has_component_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}
