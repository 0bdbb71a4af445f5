//! stratumrpc-tcp — plain TCP transport for stratumrpc sessions.
//!
//! Only the `t` protocol is supported. TLS (`s`) and Tor routing are
//! rejected with a connection error rather than silently downgraded.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use stratumrpc_core::{BoxedStream, Connector, Protocol, SecurityOptions, ServerInfo, SessionError};

/// [`Connector`] that opens a plain `TcpStream`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Upper bound on DNS resolution plus the TCP handshake.
    pub connect_timeout: Duration,
    /// Set `TCP_NODELAY` on the socket.
    pub nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
        }
    }
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(
        &self,
        server: &ServerInfo,
        protocol: Protocol,
        options: &SecurityOptions,
    ) -> Result<BoxedStream, SessionError> {
        if protocol != Protocol::Tcp {
            return Err(SessionError::Connection(format!(
                "protocol '{protocol}' is not supported by the TCP connector"
            )));
        }
        if options.use_tor {
            return Err(SessionError::Connection(
                "Tor routing is not supported by the TCP connector".into(),
            ));
        }

        let (host, port) = server.endpoint(protocol)?;
        tracing::debug!(host, port, timeout_ms = self.connect_timeout.as_millis() as u64, "opening TCP connection");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                SessionError::Connection(format!(
                    "timed out connecting to {host}:{port} after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| SessionError::Connection(format!("{host}:{port}: {e}")))?;

        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = %e, "could not set TCP_NODELAY");
            }
        }
        Ok(Box::new(stream))
    }
}
