//! Error types for the operation pipeline.

use conduit_model::{CardId, ModelError, ObjectId};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while running send and receive operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The operation was cancelled by the user or superseded by a newer one.
    #[error("operation cancelled")]
    Cancelled,

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// Server rejected the request.
    #[error("server error: {0}")]
    Server(String),

    /// No account is registered for the card.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// The send filter resolved to no host objects.
    #[error("no objects matched the send filter")]
    NoObjectsMatched,

    /// Every selected object failed to convert.
    #[error("failed to convert all {0} objects")]
    NothingConverted(usize),

    /// The model card does not exist.
    #[error("model card not found: {0}")]
    CardNotFound(CardId),

    /// The model card cannot run the requested operation.
    #[error("invalid model card {card_id}: {reason}")]
    InvalidCard {
        /// Card id.
        card_id: CardId,
        /// Why the card is unusable.
        reason: String,
    },

    /// The version does not exist on the server.
    #[error("version not found: {0}")]
    VersionNotFound(String),

    /// A requested object does not exist on the server.
    #[error("object not found on server: {0}")]
    ObjectNotFound(ObjectId),

    /// The received graph violates a structural rule.
    #[error("malformed object graph: {0}")]
    MalformedGraph(String),

    /// The host thread stopped before running a job.
    #[error("host thread is no longer running")]
    HostThreadStopped,

    /// Model encoding or decoding error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Card store persistence error.
    #[error("persistence error: {0}")]
    Persistence(#[from] serde_json::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true for user cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { retryable, .. } => *retryable,
            EngineError::Server(_) => true,
            _ => false,
        }
    }
}

/// Failure to convert a single object.
///
/// Never aborts an operation; it is recorded in the conversion report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// No converter is registered for the object's type.
    #[error("no converter registered for type `{0}`")]
    Unsupported(String),

    /// The converter failed.
    #[error("conversion failed: {0}")]
    Failed(String),
}
