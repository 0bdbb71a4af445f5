//! Periodic heartbeat that keeps an idle session from being dropped by the server.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::error::SessionError;
use crate::session::Session;

/// Heartbeat method and cadence.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Method to call on every tick. Its result is ignored.
    pub method: String,
    pub params: Vec<Value>,
    /// Interval between heartbeats. The first one is sent immediately.
    pub period: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            method: "server.ping".into(),
            params: Vec::new(),
            period: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveState {
    Running,
    Stopped,
}

/// A running heartbeat task bound to one session.
#[derive(Debug)]
pub struct Keepalive {
    state: watch::Receiver<KeepaliveState>,
    task: JoinHandle<()>,
}

impl Keepalive {
    /// Start heartbeating on `session` until it closes.
    pub fn spawn(session: Session, config: KeepaliveConfig) -> Self {
        let (tx, rx) = watch::channel(KeepaliveState::Running);
        let task = tokio::spawn(async move {
            run(session, config).await;
            tx.send_replace(KeepaliveState::Stopped);
        });
        Self { state: rx, task }
    }

    pub fn state(&self) -> KeepaliveState {
        if self.task.is_finished() {
            KeepaliveState::Stopped
        } else {
            *self.state.borrow()
        }
    }

    /// Resolves once the heartbeat has stopped.
    pub async fn stopped(&self) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|s| *s == KeepaliveState::Stopped).await;
    }

    /// Stop heartbeating without closing the session.
    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn run(session: Session, config: KeepaliveConfig) {
    let mut ticker = time::interval(config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = session.closed() => break,
            _ = ticker.tick() => {}
        }

        match session.call(&config.method, config.params.clone()).await {
            Ok(result) => tracing::trace!(method = %config.method, %result, "heartbeat answered"),
            Err(SessionError::SessionClosed) => break,
            Err(e) => tracing::warn!(method = %config.method, error = %e, "heartbeat failed"),
        }
    }

    tracing::debug!(peer = session.peer(), "keepalive stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    const PERIOD: Duration = Duration::from_secs(120);

    /// Server that answers every request, counting how many `server.ping`s it saw.
    fn spawn_ping_server(
        stream: tokio::io::DuplexStream,
        reply_with_error: bool,
    ) -> Arc<AtomicUsize> {
        let pings = Arc::new(AtomicUsize::new(0));
        let seen = pings.clone();
        tokio::spawn(async move {
            let (rx, mut tx) = tokio::io::split(stream);
            let mut lines = BufReader::new(rx).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                if req["method"] == "server.ping" {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                let reply = if reply_with_error {
                    json!({"id": req["id"], "error": {"code": -1, "message": "busy"}})
                } else {
                    json!({"id": req["id"], "result": null})
                };
                let mut text = reply.to_string();
                text.push('\n');
                if tx.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        pings
    }

    #[tokio::test(start_paused = true)]
    async fn one_ping_per_period() {
        let (client, server) = tokio::io::duplex(4096);
        let pings = spawn_ping_server(server, false);
        let session = Session::from_stream(client, SessionConfig::with_ping_every(PERIOD));

        // Ticks at 0, 120, 240 and 360 seconds.
        time::sleep(PERIOD * 3 + PERIOD / 2).await;
        assert_eq!(pings.load(Ordering::SeqCst), 4);
        assert_eq!(session.keepalive_state(), Some(KeepaliveState::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_session_closes() {
        let (client, server) = tokio::io::duplex(4096);
        let pings = spawn_ping_server(server, false);
        let session = Session::from_stream(client, SessionConfig::default());
        let keepalive = Keepalive::spawn(
            session.clone(),
            KeepaliveConfig {
                period: PERIOD,
                ..KeepaliveConfig::default()
            },
        );

        time::sleep(PERIOD / 2).await;
        assert_eq!(pings.load(Ordering::SeqCst), 1);

        session.close().await;
        keepalive.stopped().await;
        assert_eq!(keepalive.state(), KeepaliveState::Stopped);

        time::sleep(PERIOD * 5).await;
        assert_eq!(pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_errors_do_not_stop_heartbeat() {
        let (client, server) = tokio::io::duplex(4096);
        let pings = spawn_ping_server(server, true);
        let session = Session::from_stream(client, SessionConfig::with_ping_every(PERIOD));

        time::sleep(PERIOD * 2 + PERIOD / 2).await;
        assert_eq!(pings.load(Ordering::SeqCst), 3);
        assert_eq!(session.keepalive_state(), Some(KeepaliveState::Running));
    }

    #[tokio::test]
    async fn custom_method_is_used() {
        let (client, server) = tokio::io::duplex(4096);
        let session = Session::from_stream(client, SessionConfig::default());
        let _keepalive = Keepalive::spawn(
            session.clone(),
            KeepaliveConfig {
                method: "server.version".into(),
                params: vec![json!("blockwatch"), json!("1.4")],
                period: PERIOD,
            },
        );

        let (rx, _tx) = tokio::io::split(server);
        let mut lines = BufReader::new(rx).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["method"], "server.version");
        assert_eq!(first["params"], json!(["blockwatch", "1.4"]));
    }
}
