//! Where the watcher reports what it sees.

use std::time::Duration;

use chrono::{DateTime, Local};
use serde_json::Value;

use stratumrpc_core::ServerInfo;

/// A resolved block within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    pub height: u64,
    pub coinbase_txid: String,
}

/// Everything learned from one announcement batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Wall-clock time the batch was received.
    pub received_at: DateTime<Local>,
    /// Time since the previous batch; zero for the first.
    pub delta: Duration,
    pub blocks: Vec<BlockReport>,
}

/// Output side of the watcher.
pub trait ReportSink {
    fn connected(&mut self, _server: &ServerInfo) {}
    fn version_ack(&mut self, ack: &Value);
    fn banner(&mut self, text: &str);
    fn block_batch(&mut self, report: &BatchReport);
}

/// Sink that stores everything it is given. Useful in tests and embeddings.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub version_acks: Vec<Value>,
    pub banners: Vec<String>,
    pub batches: Vec<BatchReport>,
}

impl RecordingSink {
    /// Heights of every reported block, in report order.
    pub fn heights(&self) -> Vec<u64> {
        self.batches
            .iter()
            .flat_map(|b| b.blocks.iter().map(|blk| blk.height))
            .collect()
    }
}

impl ReportSink for RecordingSink {
    fn version_ack(&mut self, ack: &Value) {
        self.version_acks.push(ack.clone());
    }

    fn banner(&mut self, text: &str) {
        self.banners.push(text.to_owned());
    }

    fn block_batch(&mut self, report: &BatchReport) {
        self.batches.push(report.clone());
    }
}
