//! Error types for the object server.

use conduit_model::ObjectId;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by the object server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// An object is not stored in the project.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A version does not exist.
    #[error("version not found: {0}")]
    VersionNotFound(String),

    /// An uploaded object exceeds the size limit.
    #[error("object {id} is {size} bytes, limit is {limit}")]
    ObjectTooLarge {
        /// Object id.
        id: ObjectId,
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The server is temporarily unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotAuthorized(_)
                | ServerError::ObjectNotFound(_)
                | ServerError::VersionNotFound(_)
                | ServerError::ObjectTooLarge { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Unavailable(_) | ServerError::Internal(_))
    }

    /// Returns true if repeating the request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServerError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::Unavailable("maintenance".into()).is_transient());
        assert!(!ServerError::Internal("oops".into()).is_transient());
    }

    #[test]
    fn error_display() {
        let err = ServerError::ObjectTooLarge {
            id: ObjectId::from("abc"),
            size: 10,
            limit: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("10"));
        assert!(msg.contains("5"));
    }
}
