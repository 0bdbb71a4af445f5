//! A Stratum session: one connection, many logical conversations.
//!
//! The session owns the write half of the transport and spawns a single
//! background read loop that owns the read half. Inbound frames are routed
//! either to the pending-request table (responses, matched by id) or to the
//! subscription registry (notifications, matched by method).
//!
//! Dropping the last [`Session`] handle shuts the session down, just like
//! [`Session::close`]. Outstanding [`PendingCall`]s then fail with
//! [`SessionError::SessionClosed`].

use std::future::IntoFuture;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch, Notify};

use crate::error::{Result, SessionError};
use crate::keepalive::{Keepalive, KeepaliveConfig, KeepaliveState};
use crate::message::{self, Inbound};
use crate::pending::{Outcome, PendingTable};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::server::{Protocol, SecurityOptions, ServerInfo};
use crate::transport::{BoxedStream, ByteStream, Connector};

/// Longest inbound line accepted by default, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Configuration for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Heartbeat to run for the lifetime of the session. `None` disables it.
    pub keepalive: Option<KeepaliveConfig>,
    /// Per-call deadline. `None` waits until the response or session close.
    pub request_timeout: Option<Duration>,
    /// Inbound lines longer than this are discarded as malformed.
    pub max_frame_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive: None,
            request_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl SessionConfig {
    /// Default config with a `server.ping` heartbeat every `period`.
    pub fn with_ping_every(period: Duration) -> Self {
        Self {
            keepalive: Some(KeepaliveConfig {
                period,
                ..KeepaliveConfig::default()
            }),
            ..Self::default()
        }
    }
}

struct Shared {
    peer: String,
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    pending: Mutex<PendingTable>,
    subscriptions: SubscriptionRegistry,
    next_id: AtomicU64,
    malformed_frames: AtomicU64,
    request_timeout: Option<Duration>,
    max_frame_len: usize,
    shutdown: Notify,
    closed: watch::Sender<bool>,
    keepalive: OnceLock<Keepalive>,
}

/// Handle to a live session. Clones share the same connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    // `None` for the session's own background tasks, so they never keep it open.
    _owner: Option<Arc<Owner>>,
}

/// Requests shutdown once every user-held [`Session`] clone is gone.
struct Owner(Arc<Shared>);

impl Drop for Owner {
    fn drop(&mut self) {
        if !*self.0.closed.borrow() {
            tracing::debug!(peer = %self.0.peer, "last session handle dropped");
        }
        self.0.shutdown.notify_one();
    }
}

impl Session {
    /// Open a transport to `server` through `connector` and start the session.
    pub async fn connect(
        connector: &dyn Connector,
        server: &ServerInfo,
        protocol: Protocol,
        options: &SecurityOptions,
        config: SessionConfig,
    ) -> Result<Self> {
        let stream = connector.open(server, protocol, options).await?;
        tracing::info!(server = %server, %protocol, "connected");
        Ok(Self::start(stream, server.to_string(), config))
    }

    /// Run a session over an already-established stream.
    ///
    /// Must be called from within a Tokio runtime: the read loop (and the
    /// keepalive, if configured) are spawned immediately.
    pub fn from_stream(stream: impl ByteStream, config: SessionConfig) -> Self {
        Self::start(Box::new(stream), "stream".to_owned(), config)
    }

    fn start(stream: BoxedStream, peer: String, config: SessionConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            peer,
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(PendingTable::new()),
            subscriptions: SubscriptionRegistry::new(),
            next_id: AtomicU64::new(1),
            malformed_frames: AtomicU64::new(0),
            request_timeout: config.request_timeout,
            max_frame_len: config.max_frame_len.max(1),
            shutdown: Notify::new(),
            closed,
            keepalive: OnceLock::new(),
        });

        tokio::spawn(read_loop(shared.clone(), reader));

        if let Some(keepalive) = config.keepalive {
            let detached = Self {
                shared: shared.clone(),
                _owner: None,
            };
            let _ = shared.keepalive.set(Keepalive::spawn(detached, keepalive));
        }
        Self {
            _owner: Some(Arc::new(Owner(shared.clone()))),
            shared,
        }
    }

    /// Call `method` and wait for its result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.send_request(method, params).await?.await
    }

    /// Write a request and return without waiting for the response.
    pub async fn send_request(&self, method: &str, params: Vec<Value>) -> Result<PendingCall> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = message::encode(Some(id), method, &params)?;
        let rx = self
            .shared
            .pending
            .lock()
            .insert(id)
            .ok_or(SessionError::SessionClosed)?;

        tracing::debug!(id, method, "sending request");
        if let Err(e) = self.shared.write_frame(&frame).await {
            self.shared.pending.lock().remove(id);
            return Err(e);
        }

        Ok(PendingCall {
            id,
            method: method.to_owned(),
            rx,
            shared: self.shared.clone(),
        })
    }

    /// Subscribe to `method`.
    ///
    /// The delivery queue is registered before the request is written, so a
    /// push that overtakes the initial reply is queued rather than lost.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<(PendingCall, SubscriptionHandle)> {
        let handle = self.shared.subscriptions.register(method);
        match self.send_request(method, params).await {
            Ok(initial) => Ok((initial, handle)),
            Err(e) => {
                // A concurrent subscribe may already own the slot.
                self.shared.subscriptions.unregister(&handle);
                Err(e)
            }
        }
    }

    /// Send an id-less notification frame.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::SessionClosed);
        }
        let frame = message::encode(None, method, &params)?;
        self.shared.write_frame(&frame).await
    }

    /// Shut the session down and wait until every waiter has been released.
    pub async fn close(&self) {
        self.shared.shutdown.notify_one();
        self.closed().await;
    }

    /// Resolves once the session is closed, for whatever reason.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        // Err only if the sender is gone, which means the session is gone too.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Number of inbound frames discarded because they could not be decoded.
    pub fn malformed_frames(&self) -> u64 {
        self.shared.malformed_frames.load(Ordering::Relaxed)
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.shared.subscriptions
    }

    /// State of the session's heartbeat, if one was configured.
    pub fn keepalive_state(&self) -> Option<KeepaliveState> {
        self.shared.keepalive.get().map(Keepalive::state)
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.shared.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A request that has been written and is waiting for its response.
///
/// `.await` it (or call [`PendingCall::wait`]) to obtain the result.
pub struct PendingCall {
    id: u64,
    method: String,
    rx: oneshot::Receiver<Outcome>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the response.
    pub async fn wait(self) -> Result<Value> {
        let PendingCall {
            id,
            method,
            rx,
            shared,
        } = self;

        let received = match shared.request_timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    shared.pending.lock().remove(id);
                    tracing::warn!(id, %method, "request timed out");
                    return Err(SessionError::Timeout {
                        ms: limit.as_millis() as u64,
                    });
                }
            },
        };

        match received {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(payload)) => {
                tracing::debug!(id, %method, error = %payload, "remote error");
                Err(SessionError::Remote(payload))
            }
            Err(_) => Err(SessionError::SessionClosed),
        }
    }
}

impl IntoFuture for PendingCall {
    type Output = Result<Value>;
    type IntoFuture = BoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl Shared {
    async fn write_frame(&self, frame: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let written = match writer.write_all(frame.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        drop(writer);

        if let Err(e) = written {
            tracing::warn!(peer = %self.peer, error = %e, "transport write failed, closing session");
            self.shutdown.notify_one();
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    fn dispatch(&self, frame: &[u8]) {
        let line = match std::str::from_utf8(frame) {
            Ok(line) => line,
            Err(e) => return self.discard(SessionError::malformed(format!("invalid UTF-8: {e}"))),
        };
        if line.trim().is_empty() {
            return;
        }
        match message::decode(line) {
            Ok(Inbound::Response(resp)) => {
                let id = resp.id;
                if !self.pending.lock().resolve(id, resp.outcome) {
                    let err = SessionError::UnsolicitedResponse { id };
                    tracing::warn!(peer = %self.peer, error = %err, "ignoring response");
                }
            }
            Ok(Inbound::Notification(note)) => {
                if self.subscriptions.publish(&note.method, note.params) {
                    tracing::debug!(method = %note.method, "notification queued");
                }
            }
            Err(e) => self.discard(e),
        }
    }

    fn discard(&self, err: SessionError) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(peer = %self.peer, error = %err, "discarding frame");
    }

    /// Release every waiter. Called exactly once, by the read loop on exit.
    fn mark_closed(&self, reason: &str) {
        let outstanding = self.pending.lock().close();
        self.subscriptions.close();
        self.closed.send_replace(true);
        tracing::info!(peer = %self.peer, reason, outstanding, "session closed");
    }
}

enum Frame {
    Line,
    Oversized,
    Eof,
}

/// Read one `\n`-terminated line into `buf`, without the terminator.
///
/// Bytes past `limit` are consumed but not kept; such a line is reported as
/// [`Frame::Oversized`]. A final line without terminator still counts as a line.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut oversized = false;
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(match (oversized, buf.is_empty()) {
                (true, _) => Frame::Oversized,
                (false, true) => Frame::Eof,
                (false, false) => Frame::Line,
            });
        }

        let (body, used, done) = match chunk.iter().position(|&b| b == b'\n') {
            Some(i) => (&chunk[..i], i + 1, true),
            None => (chunk, chunk.len(), false),
        };
        if !oversized {
            if buf.len() + body.len() > limit {
                oversized = true;
                buf.clear();
            } else {
                buf.extend_from_slice(body);
            }
        }
        reader.consume(used);

        if done {
            return Ok(if oversized { Frame::Oversized } else { Frame::Line });
        }
    }
}

async fn read_loop(shared: Arc<Shared>, reader: ReadHalf<BoxedStream>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let limit = shared.max_frame_len;

    let reason = loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.notified() => break "shutdown requested",
            frame = read_frame(&mut reader, &mut buf, limit) => match frame {
                Ok(Frame::Line) => shared.dispatch(&buf),
                Ok(Frame::Oversized) => {
                    shared.discard(SessionError::malformed(format!("line exceeds {limit} bytes")));
                }
                Ok(Frame::Eof) => break "connection closed by peer",
                Err(e) => {
                    tracing::warn!(peer = %shared.peer, error = %e, "transport read failed");
                    break "read error";
                }
            },
        }
    };

    shared.mark_closed(reason);

    let mut writer = shared.writer.lock().await;
    let _ = writer.shutdown().await;
}
