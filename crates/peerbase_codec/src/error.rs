//! Error types for codec operations.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding stored objects.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR encoding failed.
    #[error("CBOR encode error: {message}")]
    CborEncode {
        /// Description of the failure.
        message: String,
    },

    /// CBOR decoding failed.
    #[error("CBOR decode error: {message}")]
    CborDecode {
        /// Description of the failure.
        message: String,
    },

    /// The payload is structurally invalid for the target type.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Description of what was wrong with the payload.
        message: String,
    },
}

impl CodecError {
    /// Creates a CBOR encode error.
    pub fn cbor_encode(message: impl Into<String>) -> Self {
        Self::CborEncode {
            message: message.into(),
        }
    }

    /// Creates a CBOR decode error.
    pub fn cbor_decode(message: impl Into<String>) -> Self {
        Self::CborDecode {
            message: message.into(),
        }
    }

    /// Creates an invalid payload error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }
}
