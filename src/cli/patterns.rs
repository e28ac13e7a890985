//! Patterns command implementation

use anyhow::Result;

use super::preview;
use crate::engine::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<()> {
    let patterns = engine.detect()?;

    if json {
        println!("{}", serde_json::to_string_pretty(patterns.as_slice())?);
        return Ok(());
    }

    if patterns.is_empty() {
        println!("No repeated patterns found. Run 'refrain index' first.");
        return Ok(());
    }

    println!(
        "{:<4} {:<7} {:<8} {:<8} {:<6} {}",
        "#", "Score", "Members", "Sessions", "Repos", "Representative"
    );
    println!("{}", "-".repeat(100));

    for (rank, pattern) in patterns.iter().enumerate() {
        println!(
            "{:<4} {:<7.2} {:<8} {:<8} {:<6} {}",
            rank + 1,
            pattern.score.composite,
            pattern.member_count,
            pattern.session_count,
            pattern.repository_count,
            preview(&pattern.representative.content, 60),
        );
    }

    Ok(())
}
