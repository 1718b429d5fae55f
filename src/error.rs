use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = WalkError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum WalkError {
    // Control flow
    /// Returned by a handler to stop descending into the current prefix.
    #[error("skip this prefix")]
    SkipDir,

    /// Returned by a handler to stop scheduling any further work.
    /// In-flight prefixes drain normally and the walk reports success.
    #[error("skip everything remaining")]
    SkipAll,

    // Cancellation
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    // Namespace
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error at {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Free-form failure reported by a backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// Any error qualified with the path it occurred at.
    #[error("{path}: {source}")]
    WithPath {
        path: String,
        #[source]
        source: Box<WalkError>,
    },

    // Config
    #[error("invalid scan size {0}: must be at least 1")]
    InvalidScanSize(usize),

    #[error("invalid concurrency {0}")]
    InvalidConcurrency(usize),

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    // Codec
    #[error("malformed entry list: {0}")]
    Decode(String),
}

impl WalkError {
    /// Wrap `self` with the path it occurred at. Already-qualified errors for
    /// the same path are returned unchanged.
    pub fn with_path(self, path: impl Into<String>) -> Self {
        let path = path.into();
        if self.is_for(&path) {
            return self;
        }
        Self::WithPath {
            path,
            source: Box::new(self),
        }
    }

    /// Classify an `io::Error` into a namespace error for `path`.
    pub fn from_io(path: impl Into<String>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io { path, source: err },
        }
    }

    /// The path this error occurred at, if applicable.
    /// The outermost qualification wins.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::WithPath { path, .. }
            | Self::NotFound(path)
            | Self::PermissionDenied(path)
            | Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Whether any layer of this error refers to `path`.
    pub fn is_for(&self, path: &str) -> bool {
        match self {
            Self::WithPath { path: p, source } => p == path || source.is_for(path),
            other => other.path() == Some(path),
        }
    }

    /// The innermost error, with every path qualification stripped.
    pub fn root_cause(&self) -> &WalkError {
        match self {
            Self::WithPath { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled | Self::DeadlineExceeded)
    }

    pub fn is_skip_dir(&self) -> bool {
        matches!(self.root_cause(), Self::SkipDir)
    }

    pub fn is_skip_all(&self) -> bool {
        matches!(self.root_cause(), Self::SkipAll)
    }

    pub fn is_not_found(&self) -> bool {
        match self.root_cause() {
            Self::NotFound(_) => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        match self.root_cause() {
            Self::PermissionDenied(_) => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Whether a walk can reasonably carry on past this error.
    ///
    /// Missing or unreadable branches are recoverable; cancellation and
    /// configuration errors are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::Io { .. } | Self::Backend(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_io_classifies_kinds() {
        let err = WalkError::from_io("a/b", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, WalkError::NotFound(ref p) if p == "a/b"));

        let err = WalkError::from_io("a/b", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.is_permission_denied());

        let err = WalkError::from_io("a/b", io::Error::other("boom"));
        assert!(matches!(err, WalkError::Io { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn path_qualification_matches_inner_and_outer() {
        let err = WalkError::NotFound("a/b".into()).with_path("a");
        assert!(err.is_for("a"));
        assert!(err.is_for("a/b"));
        assert!(!err.is_for("c"));
        assert_eq!(err.path(), Some("a"));
        assert!(err.is_not_found());
    }

    #[test]
    fn with_path_is_idempotent_for_same_path() {
        let err = WalkError::PermissionDenied("x".into()).with_path("x");
        assert!(matches!(err, WalkError::PermissionDenied(_)));
    }

    #[test]
    fn sentinels_survive_wrapping() {
        assert!(WalkError::SkipDir.with_path("p").is_skip_dir());
        assert!(WalkError::SkipAll.with_path("p").is_skip_all());
        assert!(WalkError::Cancelled.with_path("p").is_cancellation());
        assert!(WalkError::DeadlineExceeded.is_cancellation());
        assert!(!WalkError::Cancelled.is_recoverable());
    }
}
