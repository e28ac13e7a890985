//! Watch command implementation
//!
//! Indexing and detection run on their own timers as background tasks. A
//! tick that finds its task still running is skipped.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::index::print_suggestion;
use crate::engine::Engine;

pub async fn run(engine: Arc<Engine>, index_every: Duration, detect_every: Duration) -> Result<()> {
    println!(
        "👀 Watching transcripts (index every {}s, detect every {}s). Ctrl-C to stop.",
        index_every.as_secs(),
        detect_every.as_secs()
    );

    let mut index_timer = interval(index_every);
    let mut detect_timer = interval(detect_every);
    index_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    detect_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = index_timer.tick() => {
                if engine.is_indexing() {
                    debug!("indexing still running, skipping tick");
                    continue;
                }
                tokio::spawn(index_once(engine.clone()));
            }
            _ = detect_timer.tick() => {
                if engine.is_detecting() {
                    debug!("detection still running, skipping tick");
                    continue;
                }
                tokio::spawn(detect_once(engine.clone()));
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            }
        }
    }

    info!("watch stopped");
    println!("\n✅ Stopped watching.");
    Ok(())
}

async fn index_once(engine: Arc<Engine>) {
    match engine.index_in_background().await {
        Ok(report) => {
            if report.sources_indexed > 0 {
                info!(
                    indexed = report.sources_indexed,
                    embedded = report.messages_embedded,
                    "background index finished"
                );
            }
            for suggestion in &report.suggestions {
                print_suggestion(suggestion);
            }
        }
        Err(e) => warn!(error = %e, "background index failed"),
    }
}

async fn detect_once(engine: Arc<Engine>) {
    match engine.detect_in_background().await {
        Ok(patterns) => debug!(patterns = patterns.len(), "background detection finished"),
        Err(e) => warn!(error = %e, "background detection failed"),
    }
}
