//! Errors raised while building and committing a registration transaction

use std::path::PathBuf;

use dss_core::{DssError, ErrorKind};

use crate::service::ServiceError;

/// Terminal transaction state named in [`RegistrationError::TerminalState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Committed,
    Rolledback,
    RecoveryPending,
}

impl std::fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Committed => f.write_str("committed"),
            Self::Rolledback => f.write_str("rolled back"),
            Self::RecoveryPending => f.write_str("awaiting recovery"),
        }
    }
}

#[derive(Debug)]
pub enum RegistrationError {
    /// Caller passed something that can never be registered.
    InvalidArgument(String),
    /// The transaction already left the live state.
    TerminalState(TerminalKind),
    /// A file-carrying data set has nothing in its staging folder.
    EmptyDataSet { code: String },
    /// A data set has more than one top-level entry in its staging folder.
    AmbiguousDataSet { code: String, entries: usize },
    /// A container or link data set was given file content.
    ContainerWithFiles { code: String },
    /// A staging source could not be found.
    FileNotFound { given: PathBuf, resolved: PathBuf },
    /// The owner of a data set is neither new nor known to the service.
    UnknownOwner { code: String },
    /// The staging area stayed unreachable while rolling back.
    StagingUnavailable(String),
    Storage(DssError),
    Service(ServiceError),
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => f.write_str(msg),
            Self::TerminalState(kind) => {
                write!(f, "the transaction is {kind} and cannot be modified")
            }
            Self::EmptyDataSet { code } => {
                write!(f, "data set {code} has no content in its staging folder")
            }
            Self::AmbiguousDataSet { code, entries } => write!(
                f,
                "data set {code} has {entries} entries in its staging folder; \
                 move a single file or directory per data set"
            ),
            Self::ContainerWithFiles { code } => {
                write!(f, "container/link data set {code} must not contain files")
            }
            Self::FileNotFound { given, resolved } => write!(
                f,
                "Neither '{}' nor '{}' were found.",
                given.display(),
                resolved.display()
            ),
            Self::UnknownOwner { code } => {
                write!(f, "owner of data set {code} does not exist")
            }
            Self::StagingUnavailable(msg) => write!(f, "staging unavailable: {msg}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Service(e) => write!(f, "service: {e}"),
        }
    }
}

impl std::error::Error for RegistrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Service(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DssError> for RegistrationError {
    fn from(e: DssError) -> Self {
        match e {
            DssError::Unavailable(msg) => Self::StagingUnavailable(msg),
            other => Self::Storage(other),
        }
    }
}

impl From<ServiceError> for RegistrationError {
    fn from(e: ServiceError) -> Self {
        Self::Service(e)
    }
}

impl RegistrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(e) => e.kind(),
            Self::Service(e) if e.retryable => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_state_names_state() {
        let err = RegistrationError::TerminalState(TerminalKind::Rolledback);
        assert!(err.to_string().contains("rolled back"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn file_not_found_message() {
        let err = RegistrationError::FileNotFound {
            given: "data.txt".into(),
            resolved: "/work/data.txt".into(),
        };
        assert_eq!(
            err.to_string(),
            "Neither 'data.txt' nor '/work/data.txt' were found."
        );
    }

    #[test]
    fn unavailable_maps_to_staging_unavailable() {
        let err: RegistrationError = DssError::Unavailable("/staging".into()).into();
        assert!(matches!(err, RegistrationError::StagingUnavailable(_)));
    }

    #[test]
    fn retryable_service_error_is_transient() {
        let err: RegistrationError = ServiceError::transient("down").into();
        assert!(err.is_retryable());
        let err: RegistrationError = ServiceError::permanent("bad").into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn cancelled_storage_error() {
        let err: RegistrationError = DssError::Cancelled("stop".into()).into();
        assert!(err.is_cancelled());
    }
}
