//! stewardd — the Steward daemon.
//!
//! Single binary that assembles the control plane:
//! - Versioned key store + long-poll host
//! - Metrics aggregator
//! - Controller (autoscaling, health, rollouts)
//! - Checkpoint store (redb)
//! - HTTP API
//!
//! # Usage
//!
//! ```text
//! stewardd serve --config /etc/steward/steward.toml --data-dir /var/lib/steward
//! stewardd default-config > steward.toml
//! stewardd watch --address 127.0.0.1:8000 --key endpoints
//! ```

mod serve;
mod watch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use steward_core::{LoggingConfig, StewardConfig};

#[derive(Parser)]
#[command(name = "stewardd", about = "Steward control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Serve {
        /// Path to steward.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Directory for the checkpoint database. Without it, submitted
        /// applications do not survive a restart.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the default configuration as TOML.
    DefaultConfig,
    /// Follow keys on a running daemon through long poll.
    Watch {
        /// Daemon address as `host:port`.
        #[arg(long, default_value = "127.0.0.1:8000")]
        address: String,

        /// Key to follow; repeat for several keys.
        #[arg(long = "key", required = true)]
        keys: Vec<String>,

        /// Timeout sent with each poll.
        #[arg(long, default_value_t = 30.0)]
        timeout_s: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => StewardConfig::from_file(&path)?,
                None => StewardConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(&config.logging)?;
            serve::run(config, data_dir).await
        }
        Command::DefaultConfig => {
            print!("{}", StewardConfig::default().to_toml_string()?);
            Ok(())
        }
        Command::Watch {
            address,
            keys,
            timeout_s,
        } => {
            init_tracing(&StewardConfig::default().logging)?;
            watch::run(address, keys, timeout_s).await
        }
    }
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.filter)?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
