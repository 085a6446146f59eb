//! Error types for consolewire.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Errors produced while decoding a single embedded frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Prefix and suffix are present but the body is not base64 JSON.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The suffix has not arrived yet. Not a failure, the caller needs more bytes.
    #[error("incomplete frame")]
    IncompleteFrame,
}

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the console stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame decode error.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// No handler is registered for the request kind.
    #[error("unknown request type: {0}")]
    UnresolvedRequest(String),

    /// The request payload is missing a required field or has the wrong shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The handler did not finish within the governing timeout.
    #[error("request {id} timed out after {after:?}")]
    HandlerTimeout { id: String, after: Duration },

    /// The handler returned an error or panicked.
    #[error("handler failed: {0}")]
    HandlerFailed(String),

    /// The cache producer failed. Shared by every caller joined to the rebuild.
    #[error("cache rebuild failed: {0}")]
    CacheRebuild(String),

    /// Output never resumed after the allowed number of reattachments.
    #[error("stream stalled after {attempts} reattach attempts")]
    StreamStalled { attempts: u32 },

    /// A pending completion was cancelled or replaced before it resolved.
    #[error("completion cancelled")]
    CompletionCancelled,

    /// The request queue is full.
    #[error("request queue full ({capacity} pending)")]
    Overloaded { capacity: usize },

    /// The bridge answered with an error response.
    #[error("bridge error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// The bridge was built without a required capability.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
