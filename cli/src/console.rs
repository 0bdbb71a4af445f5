//! Plain-text output for `blockwatch`.

use std::io::{self, Write};

use serde_json::Value;

use stratumrpc_core::ServerInfo;
use stratumrpc_headers::{BatchReport, ReportSink};

/// Writes reports as human-readable lines to any `Write` (stdout by default).
pub struct ConsoleSink<W: Write = io::Stdout> {
    out: W,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    // Losing console output is not worth aborting the watcher over.
    fn emit(&mut self, text: std::fmt::Arguments<'_>) {
        if let Err(e) = self.out.write_fmt(text).and_then(|()| self.out.flush()) {
            tracing::debug!(error = %e, "console write failed");
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for ConsoleSink<W> {
    fn connected(&mut self, server: &ServerInfo) {
        self.emit(format_args!("\nConnected to: {server}\n\n"));
    }

    fn version_ack(&mut self, ack: &Value) {
        self.emit(format_args!("Server version acknowledge: {ack}\n"));
    }

    fn banner(&mut self, text: &str) {
        self.emit(format_args!("\n---\n{text}\n---\n"));
    }

    fn block_batch(&mut self, report: &BatchReport) {
        self.emit(format_args!(
            "Block received at: {}\nDelta (seconds): {}\n",
            report.received_at.format("%Y-%m-%d %H:%M:%S%.6f"),
            report.delta.as_secs_f64()
        ));
        for block in &report.blocks {
            self.emit(format_args!(
                "Height: {}\nCoinbase TX ID: {}\n",
                block.height, block.coinbase_txid
            ));
        }
        self.emit(format_args!("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stratumrpc_headers::BlockReport;

    #[test]
    fn batch_layout() {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.block_batch(&BatchReport {
            received_at: chrono::Local::now(),
            delta: Duration::from_millis(1500),
            blocks: vec![BlockReport {
                height: 101,
                coinbase_txid: "abc".into(),
            }],
        });
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.starts_with("Block received at: "));
        assert!(text.contains("Delta (seconds): 1.5\n"));
        assert!(text.contains("Height: 101\nCoinbase TX ID: abc\n"));
    }

    #[test]
    fn version_and_banner() {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.version_ack(&serde_json::json!("1.4.1"));
        sink.banner("welcome");
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "Server version acknowledge: \"1.4.1\"\n\n---\nwelcome\n---\n");
    }
}
