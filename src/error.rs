//! Error types shared across the stores, the dispatcher and the mount adapter.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("bad file descriptor: {0}")]
    BadDescriptor(u64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no backend registered for: {0}")]
    NoBackend(String),

    #[error("undecodable name: {0}")]
    InvalidName(String),

    #[error("cross-device rename: {0}")]
    CrossDevice(String),

    #[error("cipher failure: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify a backing-store I/O error into the taxonomy, attributing it
    /// to the virtual path the operation targeted.
    pub fn from_io(err: std::io::Error, path: impl Into<String>) -> Self {
        use std::io::ErrorKind;

        let path = path.into();
        match err.kind() {
            ErrorKind::NotFound => Error::NotFound(path),
            ErrorKind::PermissionDenied => Error::Permission(path),
            ErrorKind::AlreadyExists => Error::AlreadyExists(path),
            _ => match err.raw_os_error() {
                Some(libc::ENOTDIR) => Error::NotADirectory(path),
                Some(libc::ENOTEMPTY) => Error::NotEmpty(path),
                Some(libc::EISDIR) => Error::InvalidArgument(path),
                _ => Error::Io(err),
            },
        }
    }

    /// The negative-errno convention used by the host adapter: the dispatcher
    /// maps every backend failure through this before replying.
    pub fn errno(&self) -> libc::c_int {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::NotADirectory(_) => libc::ENOTDIR,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::NotEmpty(_) => libc::ENOTEMPTY,
            Error::Permission(_) => libc::EACCES,
            Error::BadDescriptor(_) => libc::EBADF,
            Error::InvalidArgument(_) => libc::EINVAL,
            // An unroutable path looks like a missing path from outside.
            Error::NoBackend(_) => libc::ENOENT,
            Error::InvalidName(_) => libc::EIO,
            Error::CrossDevice(_) => libc::EXDEV,
            Error::Crypto(_) => libc::EIO,
            Error::Config(_) => libc::EINVAL,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_classification() {
        let e = Error::from_io(io::Error::from(io::ErrorKind::NotFound), "/a");
        assert!(matches!(e, Error::NotFound(_)));
        assert_eq!(e.errno(), libc::ENOENT);

        let e = Error::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/a");
        assert!(matches!(e, Error::Permission(_)));

        let e = Error::from_io(io::Error::from_raw_os_error(libc::ENOTEMPTY), "/d");
        assert!(matches!(e, Error::NotEmpty(_)));
        assert_eq!(e.errno(), libc::ENOTEMPTY);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::BadDescriptor(7).errno(), libc::EBADF);
        assert_eq!(Error::NoBackend("/x".into()).errno(), libc::ENOENT);
        assert_eq!(Error::CrossDevice("/x".into()).errno(), libc::EXDEV);
        assert_eq!(Error::Crypto("tag".into()).errno(), libc::EIO);
    }
}
