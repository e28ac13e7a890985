//! Search command implementation

use anyhow::Result;

use super::preview;
use crate::engine::Engine;

pub fn run(engine: &Engine, query: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let hits = engine.search(query, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No similar messages found.");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<10} {}", "Score", "Role", "Session", "Content");
    println!("{}", "-".repeat(100));

    for hit in hits {
        let session: String = hit.message.session_id.chars().take(8).collect();
        println!(
            "{:<6.2} {:<10} {:<10} {}",
            hit.similarity,
            hit.message.role.as_str(),
            session,
            preview(&hit.message.content, 70),
        );
    }

    Ok(())
}
