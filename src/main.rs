//! Roomsync command line entry point

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use roomsync::{config, logging};
use roomsync_core::{SyncConfig, SyncStore};

mod clap;

#[tokio::main]
async fn main() -> Result<()> {
    let args = clap::parse();

    let config = config::load(args.config.as_deref()).context("failed to load configuration")?;
    logging::init(&config.logging, args.log_level.as_deref())?;
    info!("🚀 roomsync {} for {}", clap::version(), config.own_user_id);

    match args.command {
        clap::Commands::Replay { events, view } => replay(&config, &events, &view).await,
        clap::Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Replays an NDJSON event stream into a fresh store and prints the
/// resulting unread state together with the receipts viewing would send.
async fn replay(config: &SyncConfig, events: &Path, view: &[String]) -> Result<()> {
    let start = Instant::now();
    let raw = tokio::fs::read_to_string(events)
        .await
        .with_context(|| format!("failed to read {}", events.display()))?;

    let mut store = SyncStore::from_config(config);
    let (mut applied, mut dropped) = (0usize, 0usize);
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match store.apply_raw_event(line) {
            Ok(effect) => {
                debug!("Line {}: {:?}", index + 1, effect);
                applied += 1;
            }
            Err(e) => {
                warn!("⚠️ Line {} dropped: {}", index + 1, e);
                dropped += 1;
            }
        }
    }

    let receipts: Vec<_> = view
        .iter()
        .filter_map(|room_id| store.mark_room_read(&room_id.as_str().into()))
        .map(|receipt| {
            json!({
                "room_id": receipt.room_id,
                "message_id": receipt.message_id,
            })
        })
        .collect();

    let summary = json!({
        "applied": applied,
        "dropped": dropped,
        "rooms": store.room_summaries(),
        "read_receipts": receipts,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!("✅ Replayed {} events in {:?}", applied + dropped, start.elapsed());
    Ok(())
}
