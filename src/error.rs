//! Error types for turnlink.

use thiserror::Error;

/// Main error type for all turnlink operations.
#[derive(Debug, Error)]
pub enum TurnlinkError {
    /// I/O error on a stream-backed transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed frame, oversized reassembly, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport adapter could not be constructed or has gone away.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The peer task has stopped.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Role negotiation gave up after the configured number of attempts.
    #[error("Handshake exhausted after {attempts} attempts")]
    HandshakeExhausted { attempts: u32 },
}

/// Result type alias using TurnlinkError.
pub type Result<T> = std::result::Result<T, TurnlinkError>;
