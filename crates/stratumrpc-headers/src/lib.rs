//! stratumrpc-headers — follow new blocks on an Electrum server.
//!
//! [`BlockWatcher`] performs the version/banner handshake, subscribes to
//! `blockchain.headers.subscribe` and, for every announced block, resolves
//! its coinbase transaction id with a follow-up call on the same session.
//! Results are handed to a [`ReportSink`].

pub mod announcement;
pub mod error;
pub mod sink;
pub mod watcher;

pub use announcement::{parse_batch, BlockAnnouncement};
pub use error::WatchError;
pub use sink::{BatchReport, BlockReport, RecordingSink, ReportSink};
pub use watcher::{BannerPolicy, BlockWatcher, WatcherConfig};
