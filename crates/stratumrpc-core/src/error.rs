//! Session-level error types.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur on a Stratum session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be established (refused, timed out, unsupported).
    #[error("connection error: {0}")]
    Connection(String),

    /// An inbound frame could not be parsed or classified.
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// The server answered the request with an `error` payload.
    #[error("remote error: {0}")]
    Remote(Value),

    /// The transport ended or the session was closed before an answer arrived.
    #[error("session closed")]
    SessionClosed,

    /// A response arrived for an id that has no pending request.
    #[error("unsolicited response for id {id}")]
    UnsolicitedResponse { id: u64 },

    /// The call was not answered within the configured request timeout.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A request could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SessionError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error means the whole session is unusable.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::SessionClosed)
    }

    /// Returns `true` if this is an error payload sent by the server.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;
