//! Rule flags and directory entry kinds.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

bitflags! {
    /// Flag bits carried by a redirection rule.
    ///
    /// Bit values match the control protocol: callers may pass bits the
    /// engine does not interpret and they are stored verbatim.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RuleFlags: u32 {
        /// The rule participates in lookups.
        const ACTIVE = 1 << 0;
        /// The virtual path names a directory.
        const DIRECTORY = 1 << 7;

        const _ = !0;
    }
}

impl RuleFlags {
    /// Entry kind synthesized for this rule's virtual path.
    pub fn entry_kind(&self) -> EntryKind {
        if self.contains(RuleFlags::DIRECTORY) {
            EntryKind::Directory
        } else {
            EntryKind::Regular
        }
    }
}

/// Kind of a synthetic directory entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum EntryKind {
    Directory,
    Regular,
}

impl EntryKind {
    /// The `d_type` byte reported in directory listing records.
    pub fn d_type(&self) -> u8 {
        match self {
            EntryKind::Directory => 4,
            EntryKind::Regular => 8,
        }
    }
}

/// One line of the rule listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub real_path: String,
    pub virtual_path: String,
}

impl RuleRecord {
    /// Parse the `real->virtual` listing format, one record per line.
    pub fn parse_listing(listing: &str) -> Vec<RuleRecord> {
        listing
            .lines()
            .filter_map(|line| {
                let (real, virt) = line.split_once("->")?;
                Some(RuleRecord {
                    real_path: real.to_string(),
                    virtual_path: virt.to_string(),
                })
            })
            .collect()
    }
}

impl fmt::Display for RuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.real_path, self.virtual_path)
    }
}
