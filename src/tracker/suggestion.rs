//! Suggestions emitted when a repeated prompt is ready to surface

use serde::Serialize;

use crate::store::{EmbeddedMessage, RepeatCandidate};

/// Where a reusable artifact for the pattern would best live
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "repository", rename_all = "lowercase")]
pub enum Placement {
    /// Repeats came from several repositories (or none recorded)
    Global,
    /// Every repeat came from this repository
    Project(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternSuggestion {
    pub candidate: RepeatCandidate,
    /// Originating message, when it is still stored
    pub message: Option<EmbeddedMessage>,
    pub skill_name: String,
    pub description: String,
    pub placement: Placement,
}

impl PatternSuggestion {
    pub fn new(candidate: RepeatCandidate, message: Option<EmbeddedMessage>) -> Self {
        let skill_name = skill_name(&candidate.content, candidate.id);
        let description = describe(&candidate.content, candidate.repeat_count);
        let placement = placement(&candidate.repositories);
        Self {
            candidate,
            message,
            skill_name,
            description,
            placement,
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "to", "of", "in", "on", "for", "with", "at", "by",
    "from", "is", "are", "be", "it", "this", "that", "these", "those", "i", "you", "we", "me",
    "my", "your", "our", "please", "can", "could", "would", "should", "will", "do", "does",
    "just", "all", "any", "some", "now", "then", "so", "if", "as", "into", "up", "out",
];

const MAX_NAME_WORDS: usize = 4;

/// Kebab-case name from the first significant words of a prompt
pub fn skill_name(content: &str, candidate_id: i64) -> String {
    let words: Vec<String> = content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()) && !w.chars().all(|c| c.is_ascii_digit()))
        .take(MAX_NAME_WORDS)
        .collect();

    if words.is_empty() {
        format!("repeated-prompt-{}", candidate_id)
    } else {
        words.join("-")
    }
}

/// One-line description quoting the start of the prompt
pub fn describe(content: &str, repeat_count: u32) -> String {
    let first_line = content.lines().next().unwrap_or(content).trim();
    let quoted = if first_line.chars().count() > 100 {
        let head: String = first_line.chars().take(97).collect();
        format!("{}...", head)
    } else {
        first_line.to_string()
    };
    format!("Prompt repeated {} times: \"{}\"", repeat_count, quoted)
}

pub fn placement(repositories: &[String]) -> Placement {
    match repositories {
        [only] => Placement::Project(only.clone()),
        _ => Placement::Global,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skill_name_drops_stop_words() {
        assert_eq!(
            skill_name("Please run the integration tests and fix any failures", 1),
            "run-integration-tests-fix"
        );
        assert_eq!(skill_name("Deploy to staging", 1), "deploy-staging");
        assert_eq!(skill_name("the and of", 42), "repeated-prompt-42");
    }

    #[test]
    fn test_describe_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let description = describe(&long, 3);
        assert!(description.starts_with("Prompt repeated 3 times"));
        assert!(description.contains("..."));

        assert_eq!(
            describe("fix lint\nsecond line", 4),
            "Prompt repeated 4 times: \"fix lint\""
        );
    }

    #[test]
    fn test_placement() {
        assert_eq!(placement(&[]), Placement::Global);
        assert_eq!(
            placement(&["/repo/a".to_string()]),
            Placement::Project("/repo/a".to_string())
        );
        assert_eq!(
            placement(&["/repo/a".to_string(), "/repo/b".to_string()]),
            Placement::Global
        );
    }
}
