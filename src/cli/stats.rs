//! Stats command implementation

use anyhow::Result;

use crate::engine::Engine;

pub fn run(engine: &Engine) -> Result<()> {
    let stats = engine.stats()?;
    let provider = if engine.embeddings().is_available() {
        format!("ready ({} dimensions)", engine.embeddings().dimensions())
    } else {
        format!(
            "unavailable ({})",
            engine.embeddings().unavailable_reason().unwrap_or("unknown")
        )
    };

    println!("Database:    {}", engine.config().database_path().display());
    println!("Embeddings:  {}", provider);
    println!();
    println!("Messages:    {} ({} user)", stats.messages, stats.user_messages);
    println!("Sessions:    {}", stats.sessions);
    println!("Sources:     {} checkpointed", stats.checkpoints);
    println!(
        "Candidates:  {} ({} dismissed)",
        stats.candidates, stats.dismissed_candidates
    );
    Ok(())
}
