//! Error types for the object model.

use crate::ids::ObjectId;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while encoding, decoding or assembling object graphs.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A referenced object is not present in the object store.
    #[error("object {0} missing from store")]
    MissingObject(ObjectId),

    /// The stored object does not have the shape expected at this position.
    #[error("unexpected object {id}: {message}")]
    UnexpectedObject {
        /// The offending object.
        id: ObjectId,
        /// What was wrong with it.
        message: String,
    },

    /// JSON error while persisting model cards.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::MissingObject(ObjectId::new("abc"));
        assert_eq!(err.to_string(), "object abc missing from store");

        let err = ModelError::decoding("truncated");
        assert!(err.to_string().contains("truncated"));
    }
}
