//! Directory injection tree.
//!
//! Per-directory lists of synthetic children appended to real listings for
//! virtual paths that have no real backing. A listing proceeds in two
//! phases split by [`LISTING_CURSOR_BASE`]: below it the host's own listing
//! runs untouched; at or above it the cursor is `BASE + ordinal` into the
//! directory's child list.
//!
//! Ordinals are assigned at append time and never reused. A removed child
//! is tombstoned in place so cursors handed out earlier stay valid.

use std::collections::HashMap;
use std::sync::Arc;

use pathwarp_types::{EntryKind, FileIdentity};

use crate::filter::stable_hash;
use crate::snapshot::{Exclusive, SnapshotCell};

/// Cursor value at which synthetic entries begin.
pub const LISTING_CURSOR_BASE: u64 = 0x7000_0000_0000_0000;

/// Child list position encoded by a listing cursor. Any cursor below the
/// base means the real listing is exhausted and injection starts at zero.
pub fn cursor_ordinal(cursor: u64) -> u64 {
    cursor.saturating_sub(LISTING_CURSOR_BASE)
}

/// Cursor that resumes at `ordinal`.
pub fn cursor_for(ordinal: u64) -> u64 {
    LISTING_CURSOR_BASE + ordinal
}

/// Stable synthetic inode number for `name` inside `dir`.
pub fn synthetic_ino(dir: &str, name: &str) -> u64 {
    stable_hash(0, dir) ^ stable_hash(0, name)
}

#[derive(Debug)]
struct InjectedChild {
    name: String,
    kind: EntryKind,
    retired: bool,
}

#[derive(Debug, Clone, Default)]
struct DirNode {
    /// Host identity of the directory, when it exists on the host.
    identity: Option<FileIdentity>,
    children: Vec<Arc<InjectedChild>>,
}

/// One synthetic entry produced for a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticEntry {
    pub name: String,
    pub kind: EntryKind,
    pub ino: u64,
    /// Ordinal of this entry within its directory.
    pub ordinal: u64,
    /// Cursor to resume after this entry.
    pub next_cursor: u64,
}

/// Concurrent map of canonical directory path → synthetic children.
#[derive(Debug, Default)]
pub struct InjectionTree {
    dirs: SnapshotCell<HashMap<String, Arc<DirNode>>>,
}

impl InjectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name` to `dir`'s children, creating the node on first use.
    ///
    /// Returns `false` if a live child of that name already exists. A
    /// tombstoned child of the same name is revived in its old slot.
    pub fn add_child(
        &self,
        section: &Exclusive<'_>,
        dir: &str,
        identity: Option<FileIdentity>,
        name: &str,
        kind: EntryKind,
    ) -> bool {
        let existing = self.dirs.load();
        if let Some(node) = existing.get(dir) {
            if node.children.iter().any(|c| c.name == name && !c.retired) {
                return false;
            }
        }
        drop(existing);

        self.dirs.update(section, |dirs| {
            let node = dirs.entry(dir.to_string()).or_default();
            let mut next = DirNode::clone(node);
            if identity.is_some() {
                next.identity = identity;
            }
            let child = Arc::new(InjectedChild {
                name: name.to_string(),
                kind,
                retired: false,
            });
            match next.children.iter().position(|c| c.name == name) {
                Some(slot) => next.children[slot] = child,
                None => next.children.push(child),
            }
            *node = Arc::new(next);
        });
        true
    }

    /// Tombstone `name` in `dir`. Returns whether a live child was found.
    pub fn retire_child(&self, section: &Exclusive<'_>, dir: &str, name: &str) -> bool {
        let snapshot = self.dirs.load();
        let Some(slot) = snapshot
            .get(dir)
            .and_then(|n| n.children.iter().position(|c| c.name == name && !c.retired))
        else {
            return false;
        };
        drop(snapshot);

        self.dirs.update(section, |dirs| {
            if let Some(node) = dirs.get_mut(dir) {
                let mut next = DirNode::clone(node);
                let old = &next.children[slot];
                next.children[slot] = Arc::new(InjectedChild {
                    name: old.name.clone(),
                    kind: old.kind,
                    retired: true,
                });
                *node = Arc::new(next);
            }
        });
        true
    }

    /// The first live child of `dir` at or after `cursor`.
    ///
    /// `None` ends injection for this listing call.
    pub fn next_synthetic_entry(&self, dir: &str, cursor: u64) -> Option<SyntheticEntry> {
        let dirs = self.dirs.load();
        let node = dirs.get(dir)?;
        let start = usize::try_from(cursor_ordinal(cursor)).ok()?;
        node.children
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, c)| !c.retired)
            .map(|(idx, c)| SyntheticEntry {
                name: c.name.clone(),
                kind: c.kind,
                ino: synthetic_ino(dir, &c.name),
                ordinal: idx as u64,
                next_cursor: cursor_for(idx as u64 + 1),
            })
    }

    /// Live children of `dir` in append order.
    pub fn children(&self, dir: &str) -> Vec<(String, EntryKind)> {
        self.dirs
            .load()
            .get(dir)
            .map(|node| {
                node.children
                    .iter()
                    .filter(|c| !c.retired)
                    .map(|c| (c.name.clone(), c.kind))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inode numbers of every host-backed directory in the tree.
    pub fn dir_inodes(&self) -> Vec<u64> {
        self.dirs
            .load()
            .values()
            .filter_map(|node| node.identity.map(|id| id.ino))
            .collect()
    }

    /// Number of directories with synthetic children.
    pub fn len(&self) -> usize {
        self.dirs.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every node; returns how many there were.
    pub fn clear(&self, section: &Exclusive<'_>) -> usize {
        let count = self.len();
        self.dirs.publish(section, HashMap::new());
        count
    }
}
