//! # roomsync
//!
//! Command line client for the roomsync engine.
//!
//! ## Commands
//!
//! - `sync`: Run the engine and log progress until Ctrl-C
//! - `send`: Send a text message and wait for its remote echo
//! - `status`: Show the stored session and rooms
//!
//! ## Example
//!
//! ```bash
//! # Sync with the homeserver from ~/.config/roomsync/roomsync.toml
//! roomsync sync
//!
//! # Send a message
//! roomsync send '!abc:example.org' "Hello from roomsync"
//!
//! # Inspect the store without contacting the server
//! roomsync status
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sync_types::RoomId;

mod commands;
mod config;

use commands::{send, status, sync};

/// Command line client for the roomsync Matrix sync engine.
#[derive(Parser, Debug)]
#[command(name = "roomsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Store database file, overriding the configuration
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync until interrupted
    Sync,

    /// Send a text message to a room
    Send {
        /// Target room id
        room_id: String,

        /// Message body
        message: String,

        /// Seconds to wait for the remote echo
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// Show the stored session and rooms
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref(), cli.store).await?;

    match cli.command {
        Commands::Sync => sync::run(config).await?,
        Commands::Send {
            room_id,
            message,
            timeout,
        } => {
            send::run(
                config,
                RoomId::new(room_id),
                &message,
                std::time::Duration::from_secs(timeout),
            )
            .await?
        }
        Commands::Status => status::run(&config).await?,
    }

    Ok(())
}
