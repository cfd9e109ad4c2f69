//! Membership filter: a double-hashed bitmap over path strings and inode
//! numbers.
//!
//! `test` returning `false` is authoritative ("definitely absent"); `true`
//! only means "possibly present". Bits are never cleared individually, since
//! another live key may share them; deletions are handled by
//! [`MembershipFilter::rebuild`].

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

const SEED_A: u64 = 0;
const SEED_B: u64 = 1;
const INODE_SEED_A: u64 = 0x6e_6f_64_65;
const INODE_SEED_B: u64 = 0x6e_6f_64_66;

/// Smallest filter: one word.
pub const MIN_FILTER_BITS: u8 = 6;
/// Largest filter: 32 MiB of bitmap.
pub const MAX_FILTER_BITS: u8 = 28;

/// One key added to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKey<'a> {
    Path(&'a str),
    Inode(u64),
}

/// Stable string hash used for filter bits and synthetic inode numbers.
pub fn stable_hash(seed: u64, s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    s.as_bytes().hash(&mut hasher);
    hasher.finish()
}

fn inode_hash(seed: u64, ino: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    ino.hash(&mut hasher);
    hasher.finish()
}

/// Fixed-size probabilistic set. Safe to query from any number of threads
/// while one writer adds or rebuilds.
pub struct MembershipFilter {
    words: Box<[AtomicU64]>,
    mask: u64,
}

impl std::fmt::Debug for MembershipFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipFilter")
            .field("bits", &(self.mask + 1))
            .field("set", &self.count_set())
            .finish()
    }
}

impl MembershipFilter {
    /// Create an empty filter of `2^log2_bits` bits, with `log2_bits`
    /// clamped to [`MIN_FILTER_BITS`]..=[`MAX_FILTER_BITS`].
    pub fn new(log2_bits: u8) -> Self {
        let bits = 1u64 << log2_bits.clamp(MIN_FILTER_BITS, MAX_FILTER_BITS);
        let words = (0..bits / 64).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            mask: bits - 1,
        }
    }

    fn positions(&self, key: FilterKey<'_>) -> [u64; 2] {
        match key {
            FilterKey::Path(s) => [
                stable_hash(SEED_A, s) & self.mask,
                stable_hash(SEED_B, s) & self.mask,
            ],
            FilterKey::Inode(ino) => [
                inode_hash(INODE_SEED_A, ino) & self.mask,
                inode_hash(INODE_SEED_B, ino) & self.mask,
            ],
        }
    }

    fn set_bit(words: &[AtomicU64], bit: u64) {
        words[(bit / 64) as usize].fetch_or(1 << (bit % 64), Ordering::Release);
    }

    fn test_bit(&self, bit: u64) -> bool {
        self.words[(bit / 64) as usize].load(Ordering::Acquire) & (1 << (bit % 64)) != 0
    }

    pub fn add(&self, key: FilterKey<'_>) {
        for bit in self.positions(key) {
            Self::set_bit(&self.words, bit);
        }
    }

    pub fn add_path(&self, path: &str) {
        self.add(FilterKey::Path(path));
    }

    pub fn add_inode(&self, ino: u64) {
        self.add(FilterKey::Inode(ino));
    }

    pub fn test(&self, key: FilterKey<'_>) -> bool {
        self.positions(key).into_iter().all(|bit| self.test_bit(bit))
    }

    pub fn test_path(&self, path: &str) -> bool {
        self.test(FilterKey::Path(path))
    }

    pub fn test_inode(&self, ino: u64) -> bool {
        self.test(FilterKey::Inode(ino))
    }

    /// Reset to empty.
    pub fn clear(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }

    /// Replace the contents with exactly `keys`.
    ///
    /// The new bitmap is built off to the side and stored word by word. A
    /// key present both before and after has its bits set in both word
    /// values, so concurrent readers never see a false negative for it.
    /// Callers serialize rebuilds against `add`.
    pub fn rebuild<'a>(&self, keys: impl IntoIterator<Item = FilterKey<'a>>) {
        let fresh: Box<[AtomicU64]> = (0..self.words.len()).map(|_| AtomicU64::new(0)).collect();
        for key in keys {
            for bit in self.positions(key) {
                Self::set_bit(&fresh, bit);
            }
        }
        for (word, new) in self.words.iter().zip(fresh.iter()) {
            word.store(new.load(Ordering::Relaxed), Ordering::Release);
        }
    }

    /// Number of set bits, for diagnostics.
    pub fn count_set(&self) -> u32 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones())
            .sum()
    }
}
