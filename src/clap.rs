//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, instrument};

/// Returns the crate version, with `ROOMSYNC_VERSION_EXTRA` appended in
/// parentheses when it was set at build time.
pub fn version() -> String {
    let cargo_pkg_version = env!("CARGO_PKG_VERSION");

    match option_env!("ROOMSYNC_VERSION_EXTRA") {
        Some(x) => format!("{} ({})", cargo_pkg_version, x),
        None => cargo_pkg_version.to_owned(),
    }
}

/// Roomsync - room, history and read-marker synchronization core
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(about, version, name = "roomsync")]
pub struct Args {
    /// Path to configuration file
    #[clap(short, long, help = "Path to configuration file", global = true, env = "ROOMSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(short, long, help = "Log level override", global = true)]
    pub log_level: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Apply a stream of real-time events to a fresh store and report unread state
    Replay {
        /// File with one JSON-encoded event per line
        #[clap(short, long, help = "NDJSON event file")]
        events: PathBuf,

        /// Rooms to view after the replay; each may produce a read receipt
        #[clap(long = "view", help = "Room to mark read")]
        view: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

/// Parse command line arguments
#[instrument(level = "debug")]
pub fn parse() -> Args {
    let start = Instant::now();
    let args = Args::parse();
    debug!("✅ Command line arguments parsed in {:?}", start.elapsed());
    args
}
