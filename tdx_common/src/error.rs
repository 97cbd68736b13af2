//! Error types shared between the client, the simulator and the protocol codec.
//!
//! The `TdxError` enum unifies transport failures, correlation outcomes
//! (timeouts, cancellation, closed connections), payload decoding and
//! client-side validation, allowing every crate to propagate a single error type.
use std::io;
use std::sync::PoisonError;
use std::time::Duration;

use thiserror::Error;

/// Unified error type shared by client, simulator and codec.
#[derive(Error, Debug)]
pub enum TdxError {
    /// I/O error originating from the socket or the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No response with a matching id arrived before the deadline.
    #[error("request {id} timed out after {timeout:?}")]
    Timeout {
        /// Id of the request that timed out.
        id: u32,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The connection is closed or was lost while the request was pending.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The caller cancelled the operation or its outer deadline passed.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A payload could not be decoded into its typed value.
    #[error("decode error: {0}")]
    Decode(String),

    /// The byte stream does not follow the frame layout.
    #[error("framing error: {0}")]
    Framing(String),

    /// A frame carried a type tag this client does not understand.
    #[error("unrecognized message type: 0x{0:04X}")]
    UnknownMessageType(u16),

    /// Arguments rejected before any network I/O took place.
    #[error("validation error: {0}")]
    Validation(String),

    /// A response of one kind arrived where another kind was expected.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind that was actually delivered.
        actual: &'static str,
    },

    /// A test channel or internal queue refused a send.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),

    /// Failure while encoding JSON via serde_json.
    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl<T> From<PoisonError<T>> for TdxError {
    fn from(err: PoisonError<T>) -> Self {
        TdxError::MutexLock(err.to_string())
    }
}

impl TdxError {
    /// Shorthand for a [`TdxError::Decode`] with a formatted message.
    pub fn decode(msg: impl Into<String>) -> Self {
        TdxError::Decode(msg.into())
    }

    /// Shorthand for a [`TdxError::Validation`] with a formatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        TdxError::Validation(msg.into())
    }

    /// Returns `true` for errors that end a pagination loop because the
    /// caller asked for it rather than because something failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TdxError::Cancelled(_))
    }
}
