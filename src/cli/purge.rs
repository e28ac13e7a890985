//! Purge command implementation

use anyhow::Result;

use crate::engine::Engine;

pub fn run(engine: &Engine, session_id: &str) -> Result<()> {
    let removed = engine.purge_session(session_id)?;
    if removed == 0 {
        println!("No messages stored for session {}", session_id);
    } else {
        println!("✓ Removed {} messages of session {}", removed, session_id);
    }
    Ok(())
}
