//! Index command implementation

use anyhow::Result;
use std::io::Write;

use super::preview;
use crate::engine::Engine;
use crate::tracker::{PatternSuggestion, Placement};

pub fn run(engine: &Engine) -> Result<()> {
    let probes = engine.registry().available_probes();
    if probes.is_empty() {
        println!("No transcript sources available. Check your configuration.");
        return Ok(());
    }
    for probe in probes {
        println!("📡 {} ({})", probe.id(), probe.description());
    }

    let report = engine.index(|done, total| {
        print!("\r   Indexed {}/{} sources", done, total);
        let _ = std::io::stdout().flush();
    })?;
    println!("\n");

    println!(
        "   {} indexed, {} unchanged, {} failed",
        report.sources_indexed, report.sources_skipped, report.sources_failed
    );
    println!(
        "   {} messages embedded, {} reused, {} skipped",
        report.messages_embedded, report.messages_reused, report.embed_skipped
    );
    if report.insert_failures > 0 || report.unparseable_lines > 0 {
        println!(
            "   {} insert failures, {} unparseable lines",
            report.insert_failures, report.unparseable_lines
        );
    }

    for suggestion in &report.suggestions {
        print_suggestion(suggestion);
    }

    println!("✅ Indexing complete!");
    Ok(())
}

pub fn print_suggestion(suggestion: &PatternSuggestion) {
    let scope = match &suggestion.placement {
        Placement::Global => "global".to_string(),
        Placement::Project(path) => format!("project {}", path),
    };
    println!();
    println!("💡 Repeated prompt #{}: {}", suggestion.candidate.id, suggestion.skill_name);
    println!("   {}", preview(&suggestion.description, 100));
    println!(
        "   avg similarity {:.2}, suggested scope: {}",
        suggestion.candidate.avg_similarity, scope
    );
    println!(
        "   'refrain candidates dismiss {0}' or 'refrain candidates convert {0}'",
        suggestion.candidate.id
    );
}
