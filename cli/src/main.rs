//! blockwatch — follow new blocks on an Electrum server from the terminal.
//!
//! Usage:
//! ```bash
//! # Watch headers on a server's default TCP port (50001)
//! blockwatch electrum.example.org
//!
//! # Override the port, ping every 60s, keep going if the banner is unavailable
//! blockwatch electrum.example.org --port 50011 --ping-interval 60 --best-effort-banner
//! ```
//!
//! `RUST_LOG` controls log filtering (default `info`, `debug` with `--verbose`).

use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stratumrpc_core::{
    KeepaliveConfig, Protocol, SecurityOptions, ServerInfo, Session, SessionConfig,
};
use stratumrpc_headers::{BannerPolicy, BlockWatcher, ReportSink, WatcherConfig};
use stratumrpc_tcp::TcpConnector;

mod console;

use console::ConsoleSink;

#[derive(Parser, Debug)]
#[command(
    name = "blockwatch",
    about = "Subscribe to new block headers on an Electrum server",
    version
)]
struct Cli {
    /// Hostname of the Electrum server to use
    server: String,

    /// Port number to override the default for the protocol
    #[arg(long)]
    port: Option<u16>,

    /// Client name sent in server.version
    #[arg(long, default_value = "Electrum 1.9.5")]
    client_name: String,

    /// Protocol version sent in server.version
    #[arg(long, default_value = "1.4.1")]
    protocol_version: String,

    /// Seconds between server.ping heartbeats
    #[arg(long, default_value_t = 120)]
    ping_interval: u64,

    /// Seconds to wait for the TCP connection
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Give up on any single request after this many seconds
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Keep going if server.banner fails
    #[arg(long)]
    best_effort_banner: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn server_info(&self) -> Result<ServerInfo> {
        let info = ServerInfo::new(&self.server, &self.server, "t")
            .context("invalid server description")?;
        Ok(match self.port {
            Some(port) => info.with_port(Protocol::Tcp, port),
            None => info,
        })
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            keepalive: Some(KeepaliveConfig {
                period: Duration::from_secs(self.ping_interval.max(1)),
                ..KeepaliveConfig::default()
            }),
            request_timeout: self.request_timeout.map(Duration::from_secs),
            ..SessionConfig::default()
        }
    }

    fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            client_name: self.client_name.clone(),
            protocol_version: self.protocol_version.clone(),
            banner_policy: if self.best_effort_banner {
                BannerPolicy::BestEffort
            } else {
                BannerPolicy::Required
            },
            ..WatcherConfig::default()
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let server = match cli.server_info() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(2);
        }
    };

    let connector = TcpConnector::new(Duration::from_secs(cli.connect_timeout));
    let session = match Session::connect(
        &connector,
        &server,
        Protocol::Tcp,
        &SecurityOptions::default(),
        cli.session_config(),
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Unable to connect to server: {e}");
            process::exit(1);
        }
    };

    let mut sink = ConsoleSink::stdout();
    sink.connected(&server);

    if let Err(e) = watch(&session, &cli.watcher_config(), &mut sink).await {
        eprintln!("Error: {e:#}");
        session.close().await;
        process::exit(1);
    }
}

async fn watch(session: &Session, config: &WatcherConfig, sink: &mut ConsoleSink) -> Result<()> {
    let watcher = BlockWatcher::new(config.clone());
    tokio::select! {
        res = watcher.run(session, sink) => match res {
            Ok(never) => match never {},
            Err(e) => Err(anyhow::Error::new(e).context("block watcher stopped")),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, closing session");
            session.close().await;
            Ok(())
        }
    }
}
