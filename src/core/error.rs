use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Transport-level classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// No connectivity, timeout, DNS failure.
    Network,
    /// Session expired or credentials rejected.
    Unauthorized,
    /// The service answered with a failure status.
    Server,
    /// The background task driving the call died before producing a result.
    Aborted,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network",
            Self::Unauthorized => "unauthorized",
            Self::Server => "server",
            Self::Aborted => "aborted",
        };
        write!(f, "{label}")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Remote error ({kind}): {message}")]
    Remote {
        kind: RemoteErrorKind,
        message: String,
    },

    #[error("Version conflict: expected version {expected}, server has {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Offline operation {id} dropped after {attempts} attempts: {last_error}")]
    QueueExhausted {
        id: Uuid,
        attempts: u32,
        last_error: String,
    },

    #[error("Offline queue is full ({0} items)")]
    QueueFull(usize),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn remote(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self::Remote {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::remote(RemoteErrorKind::Network, message)
    }

    /// Returns `true` for failures that may succeed when the same request is
    /// issued again later.
    ///
    /// Authorization failures are not retryable: replaying them without a new
    /// session only produces the same rejection.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { kind, .. } => !matches!(kind, RemoteErrorKind::Unauthorized),
            Self::Conflict { .. } => true,
            Self::Validation(_)
            | Self::QueueExhausted { .. }
            | Self::QueueFull(_)
            | Self::Config(_) => false,
        }
    }

    /// Returns `true` when the error may be handed to the recovery chain.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SyncError::network("offline").is_retryable());
        assert!(SyncError::Conflict { expected: 2, actual: 3 }.is_retryable());
        assert!(!SyncError::remote(RemoteErrorKind::Unauthorized, "expired").is_retryable());
        assert!(!SyncError::Validation("empty".into()).is_retryable());
    }

    #[test]
    fn test_recoverable_only_remote_and_conflict() {
        assert!(SyncError::network("x").is_recoverable());
        assert!(SyncError::Conflict { expected: 1, actual: 0 }.is_recoverable());
        assert!(!SyncError::Validation("x".into()).is_recoverable());
        assert!(
            !SyncError::QueueExhausted {
                id: Uuid::new_v4(),
                attempts: 2,
                last_error: "x".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_display() {
        let err = SyncError::remote(RemoteErrorKind::Server, "503");
        assert_eq!(err.to_string(), "Remote error (server): 503");
    }
}
