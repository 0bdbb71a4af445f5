//! Error types for the header watcher.

use thiserror::Error;

use stratumrpc_core::SessionError;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("malformed block announcement: {0}")]
    MalformedAnnouncement(String),

    #[error("coinbase lookup for block {height} returned no txid")]
    MissingTxid { height: u64 },
}

impl WatchError {
    /// Returns `true` if the underlying session has gone away.
    pub fn is_session_closed(&self) -> bool {
        matches!(self, Self::Session(SessionError::SessionClosed))
    }
}
