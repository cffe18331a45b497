//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize an event.
    #[error("event encoding failed: {0}")]
    Encode(String),

    /// Failed to deserialize an event.
    ///
    /// Covers malformed JSON, unknown event names, and payloads that do not
    /// match the event's schema.
    #[error("event decoding failed: {0}")]
    Decode(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
