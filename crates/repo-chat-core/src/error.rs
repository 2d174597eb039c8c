//! Error taxonomy shared by every component.
//!
//! Components return `anyhow::Result` and raise a [`RepoChatError`] when
//! the failure belongs to one of the classified kinds. Callers recover the
//! kind with [`ErrorKind::of`], which walks the `anyhow` chain. Anything
//! that is not a `RepoChatError` (SQLite, I/O, JSON) classifies as
//! [`ErrorKind::Internal`].

use thiserror::Error;

/// Classified failures.
#[derive(Debug, Error)]
pub enum RepoChatError {
    /// Malformed input. Rejected immediately, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// A remote endpoint was unavailable or timed out.
    #[error("remote endpoint unavailable: {0}")]
    TransientRemote(String),

    /// The vector index and metadata disagree beyond what reconciliation
    /// can resolve. Requires a full reindex of the project.
    #[error("consistency error: {0} (run a full reindex)")]
    Consistency(String),

    /// Unknown project, session, or chunk.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl RepoChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RepoChatError::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        RepoChatError::TransientRemote(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        RepoChatError::Consistency(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RepoChatError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Coarse classification of an `anyhow::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    TransientRemote,
    Consistency,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// Classify an error by looking for a [`RepoChatError`] anywhere in
    /// its context chain.
    pub fn of(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<RepoChatError>() {
                return match e {
                    RepoChatError::Validation(_) => ErrorKind::Validation,
                    RepoChatError::TransientRemote(_) => ErrorKind::TransientRemote,
                    RepoChatError::Consistency(_) => ErrorKind::Consistency,
                    RepoChatError::NotFound { .. } => ErrorKind::NotFound,
                };
            }
        }
        ErrorKind::Internal
    }

    /// Whether an operation failing with this kind may succeed on retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientRemote)
    }
}
