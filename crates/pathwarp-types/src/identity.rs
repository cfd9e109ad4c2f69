//! File and caller identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric user id of a caller.
pub type Uid = u32;

/// Identifies one backing filesystem object: the device it lives on and its
/// inode number on that device.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    pub const fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Inode zero never names a real object; identities carrying it are
    /// treated as "not resolved".
    pub fn is_valid(&self) -> bool {
        self.ino != 0
    }
}

impl fmt::Debug for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileIdentity({}:{})", self.dev, self.ino)
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let id = FileIdentity::new(64769, 1234);
        assert_eq!(id.to_string(), "64769:1234");
        assert_eq!(format!("{:?}", id), "FileIdentity(64769:1234)");
    }

    #[test]
    fn test_zero_inode_is_invalid() {
        assert!(!FileIdentity::new(1, 0).is_valid());
        assert!(FileIdentity::new(0, 1).is_valid());
    }
}
