//! msgstream server entry point.
//!
//! Loads the TOML configuration, starts the [`StreamServer`] on its own I/O
//! thread, and feeds every event through the [`Relay`] use case until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! msgstream-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Configuration file [default: msgstream.toml]
//!   --port <PORT>     Override the configured listen port
//!   --mode <MODE>     log | echo | broadcast [default: log]
//!   --init-config     Write the default configuration to --config and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable           | Description                                |
//! |--------------------|--------------------------------------------|
//! | `MSGSTREAM_CONFIG` | Configuration file path                    |
//! | `MSGSTREAM_PORT`   | Listen port                                |
//! | `RUST_LOG`         | Log filter; overrides `logging.log_level`  |
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML file, defaults when absent
//!  └─ StreamServer::start()    -- binds, spawns the msgstream-io thread
//!  └─ event loop               -- Relay::handle() per ServerEvent, until Ctrl-C
//!  └─ StreamServer::stop()     -- joins the I/O thread
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use msgstream_core::protocol::RawCodec;
use msgstream_server::application::relay::{Relay, RelayMode};
use msgstream_server::infrastructure::network::StreamServer;
use msgstream_server::infrastructure::storage::config::{load_config, save_config, AppConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// What the server does with each received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Log events only.
    Log,
    /// Send every message back to its sender.
    Echo,
    /// Send every message to all connected clients.
    Broadcast,
}

impl From<Mode> for RelayMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Log => RelayMode::LogOnly,
            Mode::Echo => RelayMode::Echo,
            Mode::Broadcast => RelayMode::Broadcast,
        }
    }
}

/// Multi-client TCP server for length-prefixed, multiplexed messages.
#[derive(Debug, Parser)]
#[command(
    name = "msgstream-server",
    about = "Multi-client TCP server for the msgstream framed message protocol",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// A missing file is not an error; built-in defaults are used.
    #[arg(long, default_value = "msgstream.toml", env = "MSGSTREAM_CONFIG")]
    config: PathBuf,

    /// Listen port.  Overrides `server.port` from the configuration file.
    #[arg(long, env = "MSGSTREAM_PORT")]
    port: Option<u16>,

    /// What to do with received messages.
    #[arg(long, value_enum, default_value_t = Mode::Log)]
    mode: Mode,

    /// Write the default configuration to `--config` and exit.
    #[arg(long)]
    init_config: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.init_config {
        save_config(&cli.config, &AppConfig::default())
            .with_context(|| format!("failed to write {}", cli.config.display()))?;
        println!("wrote default configuration to {}", cli.config.display());
        return Ok(());
    }

    let mut app_config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        app_config.server.port = port;
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&app_config.logging.log_level)),
        )
        .init();

    let server_config = app_config
        .to_server_config()
        .context("invalid server configuration")?;
    let (mut server, mut events) =
        StreamServer::start(server_config, RawCodec).context("failed to start server")?;

    let mode = RelayMode::from(cli.mode);
    info!(
        "msgstream server ready on {} in {mode:?} mode.  Press Ctrl-C to exit.",
        server.local_addr()
    );

    let mut relay = Relay::new(&server, mode);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    if relay.handle(event).is_break() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let stats = relay.stats();
    info!(
        "served {} client(s), received {} message(s), relayed {} frame(s)",
        stats.connected, stats.received, stats.relayed
    );

    server.stop();
    Ok(())
}
