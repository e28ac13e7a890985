//! Transcript source trait and registry
//!
//! A probe knows where one tool keeps its conversation transcripts, how to
//! fingerprint a transcript file, and how to turn it into role-tagged turns.
//!
//! Probe Status:
//! - ClaudeCode: Active

mod claudecode;

pub use claudecode::{parse_line, ClaudeCodeProbe};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::Config;

/// Reference to one transcript source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// Stable key used for checkpoints
    pub id: String,
    pub path: PathBuf,
}

/// Speaker of a conversational turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One conversational turn extracted from a transcript
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub message_uuid: String,
    pub role: Role,
    pub text: String,
    pub repository_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of parsing one transcript line
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    Turn {
        session_id: Option<String>,
        uuid: Option<String>,
        role: Role,
        text: String,
        repository_path: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Well-formed, but not a turn worth indexing
    Ignored,
    /// Could not be parsed; skipped on its own
    Unparseable { line_number: usize, reason: String },
}

/// All turns of one source file, in source order
#[derive(Debug, Clone)]
pub struct Transcript {
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub unparseable_lines: usize,
}

/// Transcript source trait
pub trait TranscriptProbe: Send + Sync {
    /// Unique identifier: "{provider}:{source}"
    fn id(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Check if this probe's data source exists
    fn is_available(&self) -> bool;

    /// Enumerate transcript files
    fn discover(&self) -> Result<Vec<SourceRef>>;

    /// Fingerprint of the file's current content
    fn content_hash(&self, source: &SourceRef) -> Result<String> {
        sha256_file(&source.path)
    }

    /// Parse a transcript into turns
    fn read_transcript(&self, source: &SourceRef) -> Result<Transcript>;
}

/// Registry of available probes
pub struct ProbeRegistry {
    probes: Vec<Box<dyn TranscriptProbe>>,
}

impl ProbeRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self { probes: vec![] };

        if config.is_probe_enabled("claude:ClaudeCode") {
            let claudecode = ClaudeCodeProbe::new(config.probe_path("claude:ClaudeCode"));
            registry.register(Box::new(claudecode));
        }

        registry
    }

    pub fn empty() -> Self {
        Self { probes: vec![] }
    }

    pub fn register(&mut self, probe: Box<dyn TranscriptProbe>) {
        self.probes.push(probe);
    }

    pub fn available_probes(&self) -> Vec<&dyn TranscriptProbe> {
        self.probes
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.as_ref())
            .collect()
    }

    pub fn get_probe(&self, id: &str) -> Option<&dyn TranscriptProbe> {
        self.probes
            .iter()
            .find(|p| p.id() == id)
            .map(|p| p.as_ref())
    }
}

/// SHA-256 of a file's bytes, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256_changes_with_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hello").unwrap();
        let first = sha256_file(file.path()).unwrap();
        assert_eq!(
            first,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        write!(file, " world").unwrap();
        assert_ne!(sha256_file(file.path()).unwrap(), first);
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn test_registry_respects_disabled_probe() {
        let mut config = Config::default();
        config.probes.insert(
            "claude:ClaudeCode".to_string(),
            crate::config::ProbeConfig {
                enabled: false,
                status: None,
                base_path: None,
            },
        );
        let registry = ProbeRegistry::new(&config);
        assert!(registry.get_probe("claude:ClaudeCode").is_none());
    }
}
