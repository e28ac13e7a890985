//! Candidates command implementation

use anyhow::{bail, Result};

use super::preview;
use crate::engine::Engine;

pub fn list(engine: &Engine, all: bool) -> Result<()> {
    let candidates: Vec<_> = engine
        .candidates()?
        .into_iter()
        .filter(|c| all || !c.dismissed)
        .collect();

    if candidates.is_empty() {
        println!("No repeat candidates yet.");
        return Ok(());
    }

    println!(
        "{:<6} {:<8} {:<6} {:<17} {:<10} {}",
        "ID", "Repeats", "Sim", "Last seen", "State", "Prompt"
    );
    println!("{}", "-".repeat(100));

    for candidate in candidates {
        let state = if candidate.dismissed { "dismissed" } else { "active" };
        println!(
            "{:<6} {:<8} {:<6.2} {:<17} {:<10} {}",
            candidate.id,
            candidate.repeat_count,
            candidate.avg_similarity,
            candidate.last_seen.format("%Y-%m-%d %H:%M"),
            state,
            preview(&candidate.content, 50),
        );
    }

    Ok(())
}

pub fn dismiss(engine: &Engine, id: i64) -> Result<()> {
    if !engine.dismiss(id)? {
        bail!("Candidate not found: {}", id);
    }
    println!("✓ Dismissed candidate {}", id);
    Ok(())
}

pub fn convert(engine: &Engine, id: i64) -> Result<()> {
    if !engine.convert(id)? {
        bail!("Candidate not found: {}", id);
    }
    println!("✓ Candidate {} converted and no longer tracked", id);
    Ok(())
}
