//! Error types for filesystem and archive operations.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during a filesystem or archive operation.
///
/// Every variant maps onto a POSIX errno through [`OpError::code`], so
/// callers can branch on well-known values without matching variants.
#[derive(Debug, Error)]
pub enum OpError {
    /// The progress callback asked the operation to stop.
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic I/O error with the failing call and path.
    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Recursion went deeper than the configured maximum.
    #[error("Maximum recursion depth exceeded: {}", path.display())]
    DepthExceeded { path: PathBuf },

    /// FIFO, socket, device or another type the engine cannot handle.
    #[error("Unsupported file type: {}", path.display())]
    UnsupportedFileType { path: PathBuf },

    /// Invalid request before any work was done.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Archive entry whose path would escape the extraction root.
    #[error("Unsafe path in archive entry: {entry}")]
    UnsafeArchivePath { entry: String },

    /// Destination already exists.
    #[error("Already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// A path component exists but is not a directory.
    #[error("Not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// Source and destination resolve to the same location.
    #[error("Source and destination are the same: {}", path.display())]
    SameFile { path: PathBuf },

    /// Another operation is already running on this executor.
    #[error("Another operation is already in progress")]
    Busy,

    /// Error reported by the tar encoder/decoder.
    #[error("{context}: {source}")]
    Archive {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl OpError {
    /// Create an I/O error with call and path context.
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            io::ErrorKind::NotADirectory => Self::NotADirectory { path },
            _ => Self::Io {
                context,
                path,
                source,
            },
        }
    }

    /// Create an invalid input error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap an error raised by the archive codec.
    pub fn archive(context: &'static str, source: io::Error) -> Self {
        Self::Archive { context, source }
    }

    /// The POSIX errno equivalent of this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Cancelled => libc::ECANCELED,
            Self::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Self::DepthExceeded { .. } => libc::ELOOP,
            Self::UnsupportedFileType { .. } => libc::ENOTSUP,
            Self::InvalidInput { .. } | Self::UnsafeArchivePath { .. } | Self::SameFile { .. } => {
                libc::EINVAL
            }
            Self::AlreadyExists { .. } => libc::EEXIST,
            Self::NotADirectory { .. } => libc::ENOTDIR,
            Self::Busy => libc::EBUSY,
            Self::Archive { .. } => libc::EIO,
        }
    }

    /// Whether this error is a user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Plain value form of an error: a POSIX code and a message.
///
/// `code == 0` or an empty message means "no error".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// POSIX errno value.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error value.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Check whether an error has been recorded.
    pub fn is_set(&self) -> bool {
        self.code != 0 && !self.message.is_empty()
    }

    /// Whether the recorded error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.code == libc::ECANCELED
    }
}

impl From<&OpError> for ErrorInfo {
    fn from(err: &OpError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (errno {})", self.message, self.code)
    }
}
