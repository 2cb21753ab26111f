//! Error taxonomy for bridge operations
//!
//! Every bridge call either succeeds or fails with one of three kinds:
//! filesystem, dialog, or watch. The kind survives the trip across the
//! wire so the UI can tell a failure apart from an empty result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Classification of a filesystem failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FsErrorKind {
    NotFound,
    NotADirectory,
    NotAFile,
    PermissionDenied,
    AlreadyExists,
    CrossDevice,
    /// Path is relative or otherwise unusable
    InvalidPath,
    /// Path lies outside the configured sandbox roots
    OutsideRoots,
    Other,
}

impl FsErrorKind {
    /// Wire code, e.g. `notFound`
    pub fn code(self) -> &'static str {
        match self {
            FsErrorKind::NotFound => "notFound",
            FsErrorKind::NotADirectory => "notADirectory",
            FsErrorKind::NotAFile => "notAFile",
            FsErrorKind::PermissionDenied => "permissionDenied",
            FsErrorKind::AlreadyExists => "alreadyExists",
            FsErrorKind::CrossDevice => "crossDevice",
            FsErrorKind::InvalidPath => "invalidPath",
            FsErrorKind::OutsideRoots => "outsideRoots",
            FsErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FsErrorKind::NotFound => "no such file or directory",
            FsErrorKind::NotADirectory => "not a directory",
            FsErrorKind::NotAFile => "not a file",
            FsErrorKind::PermissionDenied => "permission denied",
            FsErrorKind::AlreadyExists => "destination already exists",
            FsErrorKind::CrossDevice => "cannot move across filesystems",
            FsErrorKind::InvalidPath => "path must be absolute",
            FsErrorKind::OutsideRoots => "path is outside the allowed roots",
            FsErrorKind::Other => "filesystem error",
        };
        f.write_str(text)
    }
}

/// A failed filesystem call, tagged with the path it was about
#[derive(Debug, Error)]
#[error("{kind}: {}", .path.display())]
pub struct FilesystemError {
    pub kind: FsErrorKind,
    pub path: PathBuf,
    #[source]
    pub source: Option<io::Error>,
}

impl FilesystemError {
    pub fn new(kind: FsErrorKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            source: None,
        }
    }

    /// Classify an `io::Error` returned while operating on `path`
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => FsErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
            io::ErrorKind::AlreadyExists => FsErrorKind::AlreadyExists,
            _ if is_cross_device(&err) => FsErrorKind::CrossDevice,
            _ if is_not_a_directory(&err) => FsErrorKind::NotADirectory,
            _ => FsErrorKind::Other,
        };
        Self {
            kind,
            path: path.to_path_buf(),
            source: Some(err),
        }
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV
    err.raw_os_error() == Some(18)
}

#[cfg(windows)]
fn is_cross_device(err: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn is_not_a_directory(err: &io::Error) -> bool {
    // ENOTDIR
    err.raw_os_error() == Some(20)
}

#[cfg(windows)]
fn is_not_a_directory(err: &io::Error) -> bool {
    // ERROR_DIRECTORY
    err.raw_os_error() == Some(267)
}

#[cfg(not(any(unix, windows)))]
fn is_not_a_directory(_err: &io::Error) -> bool {
    false
}

/// The native picker could not be shown. Cancellation is not an error.
#[derive(Debug, Error)]
pub enum DialogError {
    #[error("no folder dialog available in this build")]
    Unavailable,
    #[error("folder dialog failed: {0}")]
    Failed(String),
}

/// A directory watch could not be installed
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot watch {}: not an existing directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to watch {}: {source}", .path.display())]
    Install {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("watch registry has been shut down")]
    ShutDown,
    #[error("session {0} is not open")]
    SessionClosed(String),
}

impl WatchError {
    pub fn code(&self) -> &'static str {
        match self {
            WatchError::NotADirectory(_) => "notADirectory",
            WatchError::Install { .. } => "install",
            WatchError::ShutDown => "shutDown",
            WatchError::SessionClosed(_) => "sessionClosed",
        }
    }
}

/// Top-level error for every bridge operation
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    #[error(transparent)]
    Dialog(#[from] DialogError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Wire-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Filesystem,
    Dialog,
    Watch,
    /// Malformed request or unknown session; never produced by an operation
    Protocol,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Filesystem(_) => ErrorKind::Filesystem,
            BridgeError::Dialog(_) => ErrorKind::Dialog,
            BridgeError::Watch(_) => ErrorKind::Watch,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Filesystem(e) => e.kind.code(),
            BridgeError::Dialog(DialogError::Unavailable) => "unavailable",
            BridgeError::Dialog(DialogError::Failed(_)) => "failed",
            BridgeError::Watch(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
