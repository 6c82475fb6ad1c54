use std::io;
use thiserror::Error;

/// Status returned by every filesystem callback.
///
/// Transport failures never appear here: the engine absorbs them and
/// reports [`FsError::NotFound`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsError {
    /// The virtual object does not exist, is a loose archive member, belongs
    /// to a disabled archive format, or could not be fetched.
    #[error("object not found")]
    NotFound,

    /// The local cache refused access.
    #[error("access denied")]
    AccessDenied,

    /// The cache file is locked by another process.
    #[error("sharing violation")]
    SharingViolation,

    /// Any attempt to mutate the filesystem.
    #[error("media is write protected")]
    WriteProtected,

    /// The handle is unknown, already closed, or of the wrong kind.
    #[error("invalid handle")]
    InvalidHandle,

    /// A read started at or beyond the end of the file.
    #[error("end of file")]
    EndOfFile,

    /// The host framework should apply its default behavior.
    #[error("not implemented")]
    NotImplemented,

    /// Unmapped I/O error or a panic caught at the dispatch boundary.
    #[error("internal failure: {0}")]
    Internal(String),
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        if is_sharing_violation(&err) {
            return FsError::SharingViolation;
        }
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::AccessDenied,
            _ => FsError::Internal(err.to_string()),
        }
    }
}

#[cfg(windows)]
fn is_sharing_violation(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_sharing_violation(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ResourceBusy
}

/// Result type for filesystem operations.
pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_statuses() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "gone");
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        let busy = io::Error::new(io::ErrorKind::ResourceBusy, "locked");
        let other = io::Error::new(io::ErrorKind::InvalidData, "bad");

        assert_eq!(FsError::from(not_found), FsError::NotFound);
        assert_eq!(FsError::from(denied), FsError::AccessDenied);
        #[cfg(not(windows))]
        assert_eq!(FsError::from(busy), FsError::SharingViolation);
        #[cfg(windows)]
        let _ = busy;
        assert!(matches!(FsError::from(other), FsError::Internal(_)));
    }
}
