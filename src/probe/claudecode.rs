//! Claude Code probe implementation
//!
//! Reads conversation history from Claude Code CLI sessions.
//! Data format: JSONL files in ~/.claude/projects/<project_hash>/<session_id>.jsonl

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;

use super::{Role, SourceRef, Transcript, TranscriptEvent, TranscriptProbe, Turn};

pub struct ClaudeCodeProbe {
    base_path: PathBuf,
}

impl ClaudeCodeProbe {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".claude/projects")
        });
        Self { base_path }
    }
}

// ============================================
// LINE MODEL
// ============================================

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawLine {
    User(RawEntry),
    Assistant(RawEntry),
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    uuid: Option<String>,
    session_id: Option<String>,
    timestamp: Option<String>,
    cwd: Option<String>,
    #[serde(default)]
    is_meta: bool,
    #[serde(default)]
    is_sidechain: bool,
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    content: Option<RawContent>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<RawBlock>),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl RawContent {
    fn text(&self) -> String {
        match self {
            RawContent::Text(text) => text.trim().to_string(),
            RawContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    RawBlock::Text { text } => Some(text.trim()),
                    RawBlock::Other => None,
                })
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Wrapper text the CLI injects around slash commands and interrupts
fn is_synthetic_prompt(text: &str) -> bool {
    const MARKERS: &[&str] = &[
        "<command-name>",
        "<command-message>",
        "<local-command-stdout>",
        "<local-command-stderr>",
        "[Request interrupted by user",
        "Caveat: The messages below were generated",
    ];
    MARKERS.iter().any(|m| text.starts_with(m))
}

/// Parse one JSONL line into a transcript event
pub fn parse_line(line: &str, line_number: usize) -> TranscriptEvent {
    let raw: RawLine = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            return TranscriptEvent::Unparseable {
                line_number,
                reason: e.to_string(),
            }
        }
    };

    let (role, entry) = match raw {
        RawLine::User(entry) => (Role::User, entry),
        RawLine::Assistant(entry) => (Role::Assistant, entry),
        RawLine::Other => return TranscriptEvent::Ignored,
    };

    if entry.is_meta || (role == Role::User && entry.is_sidechain) {
        return TranscriptEvent::Ignored;
    }

    let text = match entry.message.as_ref().and_then(|m| m.content.as_ref()) {
        Some(content) => content.text(),
        None => return TranscriptEvent::Ignored,
    };

    if text.is_empty() || (role == Role::User && is_synthetic_prompt(&text)) {
        return TranscriptEvent::Ignored;
    }

    let timestamp = match entry.timestamp.as_deref() {
        Some(raw_ts) => match DateTime::parse_from_rfc3339(raw_ts) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                return TranscriptEvent::Unparseable {
                    line_number,
                    reason: format!("bad timestamp '{}': {}", raw_ts, e),
                }
            }
        },
        None => None,
    };

    TranscriptEvent::Turn {
        session_id: entry.session_id,
        uuid: entry.uuid,
        role,
        text,
        repository_path: entry.cwd,
        timestamp,
    }
}

impl TranscriptProbe for ClaudeCodeProbe {
    fn id(&self) -> &str {
        "claude:ClaudeCode"
    }

    fn description(&self) -> &str {
        "Claude Code CLI (Anthropic)"
    }

    fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn discover(&self) -> Result<Vec<SourceRef>> {
        let mut sources = vec![];

        if !self.base_path.exists() {
            return Ok(sources);
        }

        for project_entry in std::fs::read_dir(&self.base_path)? {
            let project_dir = project_entry?.path();
            if !project_dir.is_dir() {
                continue;
            }

            for file_entry in std::fs::read_dir(&project_dir)? {
                let file_path = file_entry?.path();
                if file_path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                    sources.push(SourceRef {
                        id: file_path.to_string_lossy().to_string(),
                        path: file_path,
                    });
                }
            }
        }

        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    fn read_transcript(&self, source: &SourceRef) -> Result<Transcript> {
        let file = File::open(&source.path)
            .with_context(|| format!("failed to open transcript: {}", source.path.display()))?;
        let reader = BufReader::new(file);

        // Lines without a timestamp inherit the previous one; before any
        // timestamp is seen, the file's modification time stands in.
        let mut last_ts: DateTime<Utc> = std::fs::metadata(&source.path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let mut session_id: Option<String> = None;
        let mut turns = vec![];
        let mut unparseable_lines = 0;

        // Split on raw bytes: a line that is not valid UTF-8 is skipped like
        // any other unparseable line instead of failing the whole file.
        for (idx, bytes) in reader.split(b'\n').enumerate() {
            let line_number = idx + 1;
            let mut bytes = bytes.with_context(|| {
                format!("failed to read line {} of {}", line_number, source.path.display())
            })?;
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let event = match String::from_utf8(bytes) {
                Ok(line) => parse_line(&line, line_number),
                Err(e) => TranscriptEvent::Unparseable {
                    line_number,
                    reason: format!("invalid UTF-8: {}", e.utf8_error()),
                },
            };

            match event {
                TranscriptEvent::Turn {
                    session_id: line_session,
                    uuid,
                    role,
                    text,
                    repository_path,
                    timestamp,
                } => {
                    if session_id.is_none() {
                        session_id = line_session;
                    }
                    if let Some(ts) = timestamp {
                        last_ts = ts;
                    }
                    turns.push(Turn {
                        message_uuid: uuid.unwrap_or_else(|| format!("line-{}", line_number)),
                        role,
                        text,
                        repository_path,
                        timestamp: last_ts,
                    });
                }
                TranscriptEvent::Ignored => {}
                TranscriptEvent::Unparseable {
                    line_number,
                    reason,
                } => {
                    debug!(
                        source = %source.id,
                        line = line_number,
                        reason = %reason,
                        "skipping unparseable transcript line"
                    );
                    unparseable_lines += 1;
                }
            }
        }

        let session_id = session_id.unwrap_or_else(|| {
            source
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string()
        });

        Ok(Transcript {
            session_id,
            turns,
            unparseable_lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const USER_LINE: &str = r#"{"type":"user","uuid":"u1","sessionId":"s1","timestamp":"2025-01-02T03:04:05Z","cwd":"/repo/a","message":{"role":"user","content":"Run the tests and fix failures"}}"#;
    const ASSISTANT_LINE: &str = r#"{"type":"assistant","uuid":"a1","sessionId":"s1","timestamp":"2025-01-02T03:04:09Z","cwd":"/repo/a","message":{"role":"assistant","content":[{"type":"thinking","thinking":"hm"},{"type":"text","text":"Running them now."},{"type":"tool_use","id":"t1","name":"Bash","input":{}}]}}"#;

    #[test]
    fn test_parse_user_turn() {
        match parse_line(USER_LINE, 1) {
            TranscriptEvent::Turn {
                session_id,
                uuid,
                role,
                text,
                repository_path,
                timestamp,
            } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(uuid.as_deref(), Some("u1"));
                assert_eq!(role, Role::User);
                assert_eq!(text, "Run the tests and fix failures");
                assert_eq!(repository_path.as_deref(), Some("/repo/a"));
                assert_eq!(timestamp.unwrap().to_rfc3339(), "2025-01-02T03:04:05+00:00");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_assistant_blocks_keep_only_text() {
        match parse_line(ASSISTANT_LINE, 2) {
            TranscriptEvent::Turn { role, text, .. } => {
                assert_eq!(role, Role::Assistant);
                assert_eq!(text, "Running them now.");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ignored_lines() {
        let tool_result = r#"{"type":"user","uuid":"u2","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#;
        let meta = r#"{"type":"user","uuid":"u3","isMeta":true,"message":{"role":"user","content":"hello there"}}"#;
        let command = r#"{"type":"user","uuid":"u4","message":{"role":"user","content":"<command-name>/clear</command-name>"}}"#;
        let summary = r#"{"type":"summary","summary":"Fixing tests","leafUuid":"x"}"#;
        let sidechain = r#"{"type":"user","uuid":"u5","isSidechain":true,"message":{"role":"user","content":"Search the codebase"}}"#;

        for line in [tool_result, meta, command, summary, sidechain] {
            assert_eq!(parse_line(line, 1), TranscriptEvent::Ignored, "{}", line);
        }
    }

    #[test]
    fn test_parse_unparseable_lines() {
        assert!(matches!(
            parse_line("{not json", 7),
            TranscriptEvent::Unparseable { line_number: 7, .. }
        ));
        let bad_ts = r#"{"type":"user","uuid":"u1","timestamp":"yesterday","message":{"content":"hello"}}"#;
        assert!(matches!(
            parse_line(bad_ts, 3),
            TranscriptEvent::Unparseable { line_number: 3, .. }
        ));
    }

    #[test]
    fn test_read_transcript_skips_bad_lines_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("-repo-a");
        std::fs::create_dir_all(&project).unwrap();
        let path = project.join("s1.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "{}", USER_LINE).unwrap();
        writeln!(file, "garbage line").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", ASSISTANT_LINE).unwrap();
        writeln!(
            file,
            r#"{{"type":"user","sessionId":"s1","message":{{"content":"no uuid or timestamp here"}}}}"#
        )
        .unwrap();

        let probe = ClaudeCodeProbe::new(Some(dir.path().to_path_buf()));
        assert!(probe.is_available());

        let sources = probe.discover().unwrap();
        assert_eq!(sources.len(), 1);

        let transcript = probe.read_transcript(&sources[0]).unwrap();
        assert_eq!(transcript.session_id, "s1");
        assert_eq!(transcript.unparseable_lines, 1);
        assert_eq!(transcript.turns.len(), 3);
        assert_eq!(transcript.turns[0].message_uuid, "u1");
        assert_eq!(transcript.turns[1].message_uuid, "a1");
        assert_eq!(transcript.turns[2].message_uuid, "line-5");
        // inherits the previous timestamp
        assert_eq!(transcript.turns[2].timestamp, transcript.turns[1].timestamp);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("-repo-a");
        std::fs::create_dir_all(&project).unwrap();
        let path = project.join("s1.jsonl");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(USER_LINE.as_bytes());
        bytes.extend_from_slice(b"\n\xff\xfe garbage\r\n");
        bytes.extend_from_slice(ASSISTANT_LINE.as_bytes());
        bytes.push(b'\n');
        std::fs::write(&path, bytes).unwrap();

        let probe = ClaudeCodeProbe::new(Some(dir.path().to_path_buf()));
        let source = SourceRef {
            id: path.to_string_lossy().to_string(),
            path,
        };
        let transcript = probe.read_transcript(&source).unwrap();
        assert_eq!(transcript.unparseable_lines, 1);
        assert_eq!(transcript.turns.len(), 2);
        assert_eq!(transcript.turns[0].message_uuid, "u1");
        assert_eq!(transcript.turns[1].message_uuid, "a1");
    }

    #[test]
    fn test_session_id_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        let path = project.join("abc123.jsonl");
        std::fs::write(
            &path,
            r#"{"type":"user","uuid":"u1","message":{"content":"hello world again"}}"#,
        )
        .unwrap();

        let probe = ClaudeCodeProbe::new(Some(dir.path().to_path_buf()));
        let source = SourceRef {
            id: path.to_string_lossy().to_string(),
            path,
        };
        let transcript = probe.read_transcript(&source).unwrap();
        assert_eq!(transcript.session_id, "abc123");
    }
}
