//! The watch loop.
//!
//! # Sequence
//! 1. `server.version` — capability handshake (fatal on failure)
//! 2. `server.banner` — fatal or best-effort, per [`BannerPolicy`]
//! 3. `blockchain.headers.subscribe` — the initial reply is the first batch
//! 4. For every batch: one `blockchain.transaction.id_from_pos(height, 0)`
//!    per block, then a [`BatchReport`] to the sink
//!
//! The loop only ends by error: session closed, a remote error, or a
//! payload that cannot be read as block announcements.

use std::convert::Infallible;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde_json::{json, Value};

use stratumrpc_core::Session;

use crate::announcement::{parse_batch, BlockAnnouncement};
use crate::error::WatchError;
use crate::sink::{BatchReport, BlockReport, ReportSink};

pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
pub const ID_FROM_POS: &str = "blockchain.transaction.id_from_pos";

/// What to do when `server.banner` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BannerPolicy {
    /// Abort the watcher.
    #[default]
    Required,
    /// Log and carry on without a banner.
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Client name sent in `server.version`.
    pub client_name: String,
    /// Protocol version sent in `server.version`.
    pub protocol_version: String,
    pub banner_policy: BannerPolicy,
    /// Transaction position looked up in each block (0 = coinbase).
    pub coinbase_position: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            client_name: "Electrum 1.9.5".into(),
            protocol_version: "1.4.1".into(),
            banner_policy: BannerPolicy::Required,
            coinbase_position: 0,
        }
    }
}

/// Follows the header subscription and resolves each block's coinbase txid.
#[derive(Debug, Clone, Default)]
pub struct BlockWatcher {
    config: WatcherConfig,
}

impl BlockWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    /// Handshake, subscribe and process batches until something fails.
    pub async fn run<S: ReportSink>(
        &self,
        session: &Session,
        sink: &mut S,
    ) -> Result<Infallible, WatchError> {
        self.handshake(session, sink).await?;

        let (initial, mut queue) = session.subscribe(HEADERS_SUBSCRIBE, vec![]).await?;
        let mut last = self.process_batch(session, initial.await?, None, sink).await?;

        loop {
            let payload = queue.next().await?;
            last = self.process_batch(session, payload, Some(last), sink).await?;
        }
    }

    async fn handshake<S: ReportSink>(&self, session: &Session, sink: &mut S) -> Result<(), WatchError> {
        let ack = session
            .call(
                "server.version",
                vec![
                    json!(self.config.client_name),
                    json!(self.config.protocol_version),
                ],
            )
            .await?;
        tracing::info!(%ack, "server version acknowledged");
        sink.version_ack(&ack);

        match session.call("server.banner", vec![]).await {
            Ok(banner) => sink.banner(&banner_text(&banner)),
            Err(e) if self.config.banner_policy == BannerPolicy::BestEffort && !e.is_session_fatal() => {
                tracing::warn!(error = %e, "server.banner failed, continuing without banner");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Resolve one batch and report it. Returns the batch's receipt time.
    async fn process_batch<S: ReportSink>(
        &self,
        session: &Session,
        payload: Value,
        previous: Option<DateTime<Local>>,
        sink: &mut S,
    ) -> Result<DateTime<Local>, WatchError> {
        let received_at = Local::now();
        let delta = previous
            .and_then(|prev| (received_at - prev).to_std().ok())
            .unwrap_or(Duration::ZERO);

        let announcements = parse_batch(payload)?;
        let mut blocks = Vec::with_capacity(announcements.len());
        for block in announcements {
            blocks.push(self.resolve_coinbase(session, block).await?);
        }

        tracing::debug!(count = blocks.len(), delta_ms = delta.as_millis() as u64, "batch resolved");
        sink.block_batch(&BatchReport {
            received_at,
            delta,
            blocks,
        });
        Ok(received_at)
    }

    async fn resolve_coinbase(
        &self,
        session: &Session,
        block: BlockAnnouncement,
    ) -> Result<BlockReport, WatchError> {
        let height = block.height;
        let result = session
            .call(
                ID_FROM_POS,
                vec![json!(height), json!(self.config.coinbase_position)],
            )
            .await?;

        // Servers answer with {"txid": …}; older ones with the bare txid string.
        let txid = match &result {
            Value::String(s) => Some(s.clone()),
            other => other.get("txid").and_then(Value::as_str).map(str::to_owned),
        };
        let coinbase_txid = txid.ok_or(WatchError::MissingTxid { height })?;
        Ok(BlockReport {
            height,
            coinbase_txid,
        })
    }
}

fn banner_text(banner: &Value) -> String {
    match banner {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
