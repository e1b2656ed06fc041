//! Error taxonomy for filesystem-level registration work

use std::io;
use std::path::PathBuf;

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth retrying later (flaky mount, remote service down).
    Transient,
    /// Retrying will not help.
    Permanent,
    /// A stop was requested while the operation was running.
    Cancelled,
}

impl ErrorKind {
    /// Classify an I/O error.
    pub fn of_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::AlreadyExists
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::StorageFull => Self::Permanent,
            _ => Self::Transient,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Error from a transactional filesystem operation.
#[derive(Debug)]
pub enum DssError {
    /// I/O failure with a description of what was attempted.
    Io { context: String, source: io::Error },
    /// A persisted log could not be parsed.
    Corrupt { path: PathBuf, message: String },
    /// The operation is not valid for its inputs.
    Invalid(String),
    /// A resource stayed unavailable after bounded waiting.
    Unavailable(String),
    /// A stop was requested.
    Cancelled(String),
}

impl std::fmt::Display for DssError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Corrupt { path, message } => {
                write!(f, "corrupt log {}: {message}", path.display())
            }
            Self::Invalid(msg) => f.write_str(msg),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for DssError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for DssError {
    fn from(e: io::Error) -> Self {
        Self::Io {
            context: "I/O".to_string(),
            source: e,
        }
    }
}

impl DssError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { source, .. } => ErrorKind::of_io(source),
            Self::Corrupt { .. } | Self::Invalid(_) | Self::Unavailable(_) => ErrorKind::Permanent,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// True for I/O errors of the given kind.
    pub fn is_io_kind(&self, kind: io::ErrorKind) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == kind)
    }
}

/// Attach a lazily built description to an I/O result.
pub trait IoContext<T> {
    fn io_context<F: FnOnce() -> String>(self, f: F) -> Result<T, DssError>;
}

impl<T> IoContext<T> for Result<T, io::Error> {
    fn io_context<F: FnOnce() -> String>(self, f: F) -> Result<T, DssError> {
        self.map_err(|e| DssError::io(f(), e))
    }
}
