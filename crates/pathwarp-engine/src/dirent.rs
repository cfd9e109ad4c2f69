//! Directory listing record encoding.
//!
//! Synthetic entries are appended to the caller's listing buffer in the
//! record layout the caller asked for. A record is written whole or not at
//! all; when it does not fit, the sink reports so and the listing cursor
//! stays where it was.
//!
//! ```text
//! 64-bit layout            legacy layout
//! +0  ino     u64          +0  ino     u64
//! +8  off     i64          +8  off     u64
//! +16 reclen  u16          +16 reclen  u16
//! +18 type    u8           +18 name ... NUL
//! +19 name ... NUL             padding
//!     padding to 8             type    u8   (last byte)
//! ```
//!
//! All integers are native-endian.

/// Receives synthetic listing entries.
pub trait DirentSink {
    /// Write one entry. Returns `false`, leaving the sink unchanged, when
    /// the entry does not fit.
    fn emit(&mut self, ino: u64, next_cursor: u64, d_type: u8, name: &str) -> bool;
}

/// Which record layout a listing uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentLayout {
    Dirent64,
    Legacy,
}

const HEADER_64: usize = 19;
const HEADER_LEGACY: usize = 18;
const RECORD_ALIGN: usize = 8;

fn align_up(n: usize, to: usize) -> usize {
    n.div_ceil(to) * to
}

impl DirentLayout {
    /// Total record length for a name of `name_len` bytes.
    pub fn record_len(self, name_len: usize) -> usize {
        match self {
            // header, name, NUL
            DirentLayout::Dirent64 => align_up(HEADER_64 + name_len + 1, RECORD_ALIGN),
            // header, name, NUL, type byte
            DirentLayout::Legacy => align_up(HEADER_LEGACY + name_len + 2, RECORD_ALIGN),
        }
    }
}

/// A decoded listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub ino: u64,
    pub off: u64,
    pub d_type: u8,
    pub name: String,
}

/// Bounded output buffer for one listing call.
#[derive(Debug)]
pub struct DirentBuffer {
    layout: DirentLayout,
    buf: Vec<u8>,
    capacity: usize,
}

impl DirentBuffer {
    pub fn new(layout: DirentLayout, capacity: usize) -> Self {
        Self {
            layout,
            buf: Vec::new(),
            capacity,
        }
    }

    pub fn layout(&self) -> DirentLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Append one record if it fits.
    pub fn try_push(&mut self, ino: u64, off: u64, d_type: u8, name: &str) -> bool {
        let reclen = self.layout.record_len(name.len());
        if reclen > self.remaining() || reclen > u16::MAX as usize {
            return false;
        }
        if self.buf.try_reserve(reclen).is_err() {
            return false;
        }

        let start = self.buf.len();
        self.buf.extend_from_slice(&ino.to_ne_bytes());
        self.buf.extend_from_slice(&off.to_ne_bytes());
        self.buf.extend_from_slice(&(reclen as u16).to_ne_bytes());
        if self.layout == DirentLayout::Dirent64 {
            self.buf.push(d_type);
        }
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.resize(start + reclen, 0);
        if self.layout == DirentLayout::Legacy {
            self.buf[start + reclen - 1] = d_type;
        }
        true
    }

    /// Decode every record in the buffer.
    pub fn entries(&self) -> Vec<Dirent> {
        let mut out = Vec::new();
        let mut pos = 0;
        while let Some(rec) = self.decode_at(pos) {
            pos += rec.0;
            out.push(rec.1);
        }
        out
    }

    fn decode_at(&self, pos: usize) -> Option<(usize, Dirent)> {
        let b = &self.buf;
        let u64_at = |at: usize| -> Option<u64> {
            Some(u64::from_ne_bytes(b.get(at..at + 8)?.try_into().ok()?))
        };
        let ino = u64_at(pos)?;
        let off = u64_at(pos + 8)?;
        let reclen = u16::from_ne_bytes(b.get(pos + 16..pos + 18)?.try_into().ok()?) as usize;
        let record = b.get(pos..pos + reclen)?;

        let (d_type, name_start) = match self.layout {
            DirentLayout::Dirent64 => (*record.get(18)?, HEADER_64),
            DirentLayout::Legacy => (*record.last()?, HEADER_LEGACY),
        };
        let name_bytes = record.get(name_start..)?;
        let name_len = name_bytes.iter().position(|&c| c == 0)?;
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

        Some((
            reclen,
            Dirent {
                ino,
                off,
                d_type,
                name,
            },
        ))
    }
}

impl DirentSink for DirentBuffer {
    fn emit(&mut self, ino: u64, next_cursor: u64, d_type: u8, name: &str) -> bool {
        self.try_push(ino, next_cursor, d_type, name)
    }
}
