//! Repeat candidate persistence and tracker key/value state

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::{format_timestamp, parse_timestamp, MessageStore};
use crate::error::StoreError;

/// A prompt seen repeatedly, tracked incrementally
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeatCandidate {
    pub id: i64,
    /// Message whose vector represents the candidate
    pub message_id: i64,
    pub content: String,
    pub repository_path: Option<String>,
    /// Every repository the repeats came from
    pub repositories: Vec<String>,
    pub repeat_count: u32,
    pub last_seen: DateTime<Utc>,
    /// Running mean of match similarities
    pub avg_similarity: f64,
    pub dismissed: bool,
    pub dismissed_at: Option<DateTime<Utc>>,
    /// Set while a surfaced suggestion awaits a decision
    pub surfaced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields of a candidate before the store assigns its id
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub message_id: i64,
    pub content: String,
    pub repository_path: Option<String>,
    pub repositories: Vec<String>,
    pub repeat_count: u32,
    pub last_seen: DateTime<Utc>,
    pub avg_similarity: f64,
}

const CANDIDATE_COLUMNS: &str = r#"SELECT id, message_id, content, repository_path, repositories,
                                          repeat_count, last_seen, avg_similarity, dismissed,
                                          dismissed_at, surfaced_at, created_at
                                   FROM repeat_candidates"#;

struct CandidateRow {
    id: i64,
    message_id: i64,
    content: String,
    repository_path: Option<String>,
    repositories: String,
    repeat_count: i64,
    last_seen: String,
    avg_similarity: f64,
    dismissed: bool,
    dismissed_at: Option<String>,
    surfaced_at: Option<String>,
    created_at: String,
}

impl CandidateRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            message_id: row.get(1)?,
            content: row.get(2)?,
            repository_path: row.get(3)?,
            repositories: row.get(4)?,
            repeat_count: row.get(5)?,
            last_seen: row.get(6)?,
            avg_similarity: row.get(7)?,
            dismissed: row.get(8)?,
            dismissed_at: row.get(9)?,
            surfaced_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_candidate(self) -> Result<RepeatCandidate, StoreError> {
        let repositories: Vec<String> = serde_json::from_str(&self.repositories)
            .map_err(|e| StoreError::Corrupt(format!("bad repositories column: {}", e)))?;
        Ok(RepeatCandidate {
            id: self.id,
            message_id: self.message_id,
            content: self.content,
            repository_path: self.repository_path,
            repositories,
            repeat_count: self.repeat_count.max(0) as u32,
            last_seen: parse_timestamp(&self.last_seen)?,
            avg_similarity: self.avg_similarity,
            dismissed: self.dismissed,
            dismissed_at: self.dismissed_at.as_deref().map(parse_timestamp).transpose()?,
            surfaced_at: self.surfaced_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn encode_repositories(repositories: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(repositories)
        .map_err(|e| StoreError::Corrupt(format!("cannot encode repositories: {}", e)))
}

impl MessageStore {
    // ============================================
    // REPEAT CANDIDATES
    // ============================================

    pub fn insert_candidate(&self, new: &NewCandidate) -> Result<RepeatCandidate, StoreError> {
        // stored with millisecond precision
        let created_at = Utc::now().trunc_subsecs(3);
        let repositories = encode_repositories(&new.repositories)?;
        let conn = self.conn()?;

        let id: i64 = conn
            .prepare_cached(
                r#"INSERT INTO repeat_candidates
                   (message_id, content, repository_path, repositories, repeat_count,
                    last_seen, avg_similarity, dismissed, dismissed_at, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, FALSE, NULL, ?8)
                   RETURNING id"#,
            )
            .map_err(StoreError::Prepare)?
            .query_row(
                params![
                    new.message_id,
                    new.content,
                    new.repository_path,
                    repositories,
                    new.repeat_count,
                    format_timestamp(&new.last_seen),
                    new.avg_similarity,
                    format_timestamp(&created_at),
                ],
                |row| row.get(0),
            )
            .map_err(|source| StoreError::Insert {
                what: "repeat candidate",
                source,
            })?;

        Ok(RepeatCandidate {
            id,
            message_id: new.message_id,
            content: new.content.clone(),
            repository_path: new.repository_path.clone(),
            repositories: new.repositories.clone(),
            repeat_count: new.repeat_count,
            last_seen: new.last_seen,
            avg_similarity: new.avg_similarity,
            dismissed: false,
            dismissed_at: None,
            surfaced_at: None,
            created_at,
        })
    }

    pub fn update_candidate(&self, candidate: &RepeatCandidate) -> Result<(), StoreError> {
        let repositories = encode_repositories(&candidate.repositories)?;
        let conn = self.conn()?;
        conn.prepare_cached(
            r#"UPDATE repeat_candidates SET
                 message_id = ?2, content = ?3, repository_path = ?4, repositories = ?5,
                 repeat_count = ?6, last_seen = ?7, avg_similarity = ?8,
                 dismissed = ?9, dismissed_at = ?10, surfaced_at = ?11
               WHERE id = ?1"#,
        )
        .map_err(StoreError::Prepare)?
        .execute(params![
            candidate.id,
            candidate.message_id,
            candidate.content,
            candidate.repository_path,
            repositories,
            candidate.repeat_count,
            format_timestamp(&candidate.last_seen),
            candidate.avg_similarity,
            candidate.dismissed,
            candidate.dismissed_at.as_ref().map(format_timestamp),
            candidate.surfaced_at.as_ref().map(format_timestamp),
        ])
        .map_err(StoreError::Execute)?;
        Ok(())
    }

    pub fn get_candidate(&self, id: i64) -> Result<Option<RepeatCandidate>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .prepare_cached(&format!("{} WHERE id = ?1", CANDIDATE_COLUMNS))
            .map_err(StoreError::Prepare)?
            .query_row(params![id], CandidateRow::from_row)
            .optional()
            .map_err(StoreError::Execute)?;
        row.map(CandidateRow::into_candidate).transpose()
    }

    pub fn load_candidates(&self) -> Result<Vec<RepeatCandidate>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY id", CANDIDATE_COLUMNS))
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map([], CandidateRow::from_row)
            .map_err(StoreError::Execute)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::Execute)?.into_candidate()?);
        }
        Ok(out)
    }

    /// Returns false if no such candidate existed
    pub fn delete_candidate(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM repeat_candidates WHERE id = ?1", params![id])
            .map_err(StoreError::Execute)?;
        Ok(removed > 0)
    }

    // ============================================
    // TRACKER STATE
    // ============================================

    pub fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .prepare_cached("SELECT value FROM tracker_state WHERE key = ?1")
            .map_err(StoreError::Prepare)?
            .query_row(params![key], |row| row.get(0))
            .optional()
            .map_err(StoreError::Execute)?;
        Ok(value)
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.prepare_cached("INSERT OR REPLACE INTO tracker_state (key, value) VALUES (?1, ?2)")
            .map_err(StoreError::Prepare)?
            .execute(params![key, value])
            .map_err(|source| StoreError::Insert {
                what: "tracker state",
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_candidate() -> NewCandidate {
        NewCandidate {
            message_id: 7,
            content: "run the integration tests".to_string(),
            repository_path: Some("/repo/a".to_string()),
            repositories: vec!["/repo/a".to_string()],
            repeat_count: 2,
            last_seen: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            avg_similarity: 0.91,
        }
    }

    #[test]
    fn test_candidate_lifecycle() {
        let store = MessageStore::open_in_memory().unwrap();
        let mut candidate = store.insert_candidate(&new_candidate()).unwrap();
        assert_eq!(store.load_candidates().unwrap(), vec![candidate.clone()]);

        candidate.repeat_count = 0;
        candidate.dismissed = true;
        candidate.dismissed_at = Some(Utc.timestamp_opt(1_700_000_100, 0).unwrap());
        candidate.surfaced_at = Some(Utc.timestamp_opt(1_700_000_050, 0).unwrap());
        candidate.repositories.push("/repo/b".to_string());
        store.update_candidate(&candidate).unwrap();

        let loaded = store.get_candidate(candidate.id).unwrap().unwrap();
        assert_eq!(loaded, candidate);
        assert_eq!(store.stats().unwrap().dismissed_candidates, 1);

        assert!(store.delete_candidate(candidate.id).unwrap());
        assert!(!store.delete_candidate(candidate.id).unwrap());
        assert!(store.get_candidate(candidate.id).unwrap().is_none());
    }

    #[test]
    fn test_state_round_trip() {
        let store = MessageStore::open_in_memory().unwrap();
        assert_eq!(store.get_state("k").unwrap(), None);
        store.set_state("k", "1").unwrap();
        store.set_state("k", "2").unwrap();
        assert_eq!(store.get_state("k").unwrap().as_deref(), Some("2"));
    }
}
