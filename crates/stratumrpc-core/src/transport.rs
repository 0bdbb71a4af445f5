//! The `Connector` trait: how a session obtains its byte stream.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SessionError;
use crate::server::{Protocol, SecurityOptions, ServerInfo};

/// Any bidirectional byte stream a session can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A type-erased stream, as returned by a [`Connector`].
pub type BoxedStream = Box<dyn ByteStream>;

/// Opens transports to Electrum servers.
///
/// Closing is done by dropping (or shutting down) the returned stream.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection to `server` over `protocol`.
    ///
    /// Fails with [`SessionError::Connection`] on refusal, timeout or an
    /// unsupported protocol/option combination.
    async fn open(
        &self,
        server: &ServerInfo,
        protocol: Protocol,
        options: &SecurityOptions,
    ) -> Result<BoxedStream, SessionError>;
}
