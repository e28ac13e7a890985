//! Command implementations for the `refrain` binary

pub mod candidates;
pub mod index;
pub mod patterns;
pub mod purge;
pub mod search;
pub mod stats;
pub mod watch;

/// First line of `text`, cut to `max` characters
pub(crate) fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or(text).trim();
    if line.chars().count() > max {
        let head: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}
