use std::ops::Deref;

use crate::error::{Result, WalkError};
use crate::info::Mode;

/// One direct child of a prefix, as produced by a level scan.
///
/// Deliberately lightweight: just the name and what kind of thing it is.
/// Full metadata is an [`Info`](crate::Info), resolved separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// The child's name within its prefix, never a full path.
    pub name: String,

    /// What kind of entry this is.
    pub kind: EntryKind,
}

/// The kind of a scanned entry.
///
/// Backends map their native types onto these variants. On the wire each
/// variant is carried as mode type bits (see [`Mode`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A regular file.
    File,

    /// A prefix that may hold children.
    Dir,

    /// A symbolic link.
    Symlink,

    /// Anything else (device files, pipes, sockets, etc.).
    Other,
}

impl EntryKind {
    /// The mode type bits for this kind.
    pub fn type_bits(self) -> u32 {
        match self {
            Self::File => 0,
            Self::Dir => Mode::DIR,
            Self::Symlink => Mode::SYMLINK,
            Self::Other => Mode::IRREGULAR,
        }
    }

    /// Decode mode type bits. Permission bits are ignored; a directory bit
    /// takes precedence over a symlink bit.
    pub fn from_type_bits(bits: u32) -> Self {
        if bits & Mode::DIR != 0 {
            Self::Dir
        } else if bits & Mode::SYMLINK != 0 {
            Self::Symlink
        } else if bits & Mode::TYPE_MASK != 0 {
            Self::Other
        } else {
            Self::File
        }
    }
}

impl Entry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, EntryKind::File)
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self::new(name, EntryKind::Dir)
    }

    pub fn symlink(name: impl Into<String>) -> Self {
        Self::new(name, EntryKind::Symlink)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}

/// An ordered batch of [`Entry`] values, in scan order.
///
/// Encodes to a compact binary form for storage or transfer:
///
/// ```text
/// uvarint(count) { uvarint(name_len) name_bytes u32_le(type_bits) }*
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryList(Vec<Entry>);

impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Entry) {
        self.0.push(entry);
    }

    pub fn into_vec(self) -> Vec<Entry> {
        self.0
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = self.0.iter().map(|e| e.name.len() + 4 + 2).sum::<usize>() + 4;
        let mut buf = Vec::with_capacity(size);
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoding of this list to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        put_uvarint(buf, self.0.len() as u64);
        for entry in &self.0 {
            put_uvarint(buf, entry.name.len() as u64);
            buf.extend_from_slice(entry.name.as_bytes());
            buf.extend_from_slice(&entry.kind.type_bits().to_le_bytes());
        }
    }

    /// Decode a list produced by [`encode`](Self::encode). Trailing bytes
    /// are rejected.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let count = get_uvarint(&mut buf)?;
        // Every entry needs at least 5 bytes; refuse counts the input can't hold.
        if count > (buf.len() / 5) as u64 {
            return Err(WalkError::Decode(format!(
                "count {count} exceeds remaining {} bytes",
                buf.len()
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            let len = get_uvarint(&mut buf)?;
            if len > buf.len() as u64 {
                return Err(WalkError::Decode(format!("entry {i}: name overruns buffer")));
            }
            let (name, rest) = buf.split_at(len as usize);
            let name = std::str::from_utf8(name)
                .map_err(|e| WalkError::Decode(format!("entry {i}: {e}")))?
                .to_owned();

            if rest.len() < 4 {
                return Err(WalkError::Decode(format!("entry {i}: truncated type bits")));
            }
            let (bits, rest) = rest.split_at(4);
            let bits = u32::from_le_bytes([bits[0], bits[1], bits[2], bits[3]]);
            buf = rest;

            entries.push(Entry::new(name, EntryKind::from_type_bits(bits)));
        }

        if !buf.is_empty() {
            return Err(WalkError::Decode(format!("{} trailing bytes", buf.len())));
        }
        Ok(Self(entries))
    }
}

impl Deref for EntryList {
    type Target = [Entry];

    fn deref(&self) -> &[Entry] {
        &self.0
    }
}

impl From<Vec<Entry>> for EntryList {
    fn from(entries: Vec<Entry>) -> Self {
        Self(entries)
    }
}

impl FromIterator<Entry> for EntryList {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for EntryList {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// LEB128, as used by Go's encoding/binary uvarint.

fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn get_uvarint(buf: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate() {
        if i == 10 || (i == 9 && byte > 1) {
            return Err(WalkError::Decode("varint overflows u64".into()));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            *buf = &buf[i + 1..];
            return Ok(value);
        }
    }
    Err(WalkError::Decode("truncated varint".into()))
}
