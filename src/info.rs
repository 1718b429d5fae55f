use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::entry::{Entry, EntryKind};

/// File mode: permission bits in the low 9 bits plus type bits at the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode(pub u32);

impl Mode {
    pub const DIR: u32 = 1 << 31;
    pub const SYMLINK: u32 = 1 << 27;
    /// Device files, pipes, sockets.
    pub const IRREGULAR: u32 = 1 << 19;
    pub const TYPE_MASK: u32 = Self::DIR | Self::SYMLINK | Self::IRREGULAR;
    pub const PERM_MASK: u32 = 0o777;

    pub fn new(kind: EntryKind, perm: u32) -> Self {
        Self(kind.type_bits() | (perm & Self::PERM_MASK))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn perm(self) -> u32 {
        self.0 & Self::PERM_MASK
    }

    pub fn kind(self) -> EntryKind {
        EntryKind::from_type_bits(self.0)
    }

    pub fn is_dir(self) -> bool {
        self.0 & Self::DIR != 0
    }

    pub fn is_symlink(self) -> bool {
        self.0 & Self::SYMLINK != 0
    }

    pub fn is_regular(self) -> bool {
        self.0 & Self::TYPE_MASK == 0
    }
}

/// Fully resolved metadata for one name.
///
/// Built once by a `stat`/`lstat` call and never mutated afterwards; clones
/// share the backend attachment.
#[derive(Clone)]
pub struct Info {
    name: String,
    size: u64,
    mode: Mode,
    modified: SystemTime,
    sys: Option<Arc<dyn Any + Send + Sync>>,
}

/// An ordered batch of [`Info`] values.
pub type InfoList = Vec<Info>;

impl Info {
    pub fn new(name: impl Into<String>, size: u64, mode: Mode, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            modified,
            sys: None,
        }
    }

    /// Attach backend-specific data, retrievable with [`sys`](Self::sys).
    pub fn with_sys<S: Any + Send + Sync>(mut self, sys: S) -> Self {
        self.sys = Some(Arc::new(sys));
        self
    }

    /// Build from local filesystem metadata. `meta` should come from
    /// `symlink_metadata` when the caller wants links reported as links.
    pub fn from_metadata(name: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        let ft = meta.file_type();
        let kind = if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Self::new(name, meta.len(), Mode::new(kind, permissions(meta)), modified)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.mode.is_symlink()
    }

    pub fn kind(&self) -> EntryKind {
        self.mode.kind()
    }

    /// The backend attachment, if it is of type `S`.
    pub fn sys<S: Any>(&self) -> Option<&S> {
        self.sys.as_deref().and_then(|s| s.downcast_ref::<S>())
    }

    /// The lightweight entry form of this record.
    pub fn to_entry(&self) -> Entry {
        Entry::new(self.name.clone(), self.kind())
    }
}

impl fmt::Debug for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Info")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mode", &format_args!("{:#o}", self.mode.perm()))
            .field("kind", &self.kind())
            .field("modified", &self.modified)
            .field("sys", &self.sys.is_some())
            .finish()
    }
}

#[cfg(unix)]
fn permissions(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn permissions(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}
