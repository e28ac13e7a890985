//! Message storage with SQLite
//!
//! Single source of truth for embedded messages, indexing checkpoints and
//! repeat candidates. The connection sits behind a mutex so the store can be
//! shared between the indexing and detection tasks.

mod candidates;
mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::embedding::{decode_vector, encode_vector};
use crate::error::StoreError;
use crate::probe::Role;

pub use candidates::{NewCandidate, RepeatCandidate};
pub use schema::SCHEMA;

/// Bound parameters per `IN (...)` query
const ID_CHUNK: usize = 500;

pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::Execute)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(StoreError::Execute)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ============================================
    // MESSAGES
    // ============================================

    /// Insert or replace a message keyed by (session id, message uuid).
    ///
    /// An existing row keeps its id; only its payload is overwritten.
    pub fn upsert_message(&self, msg: &NewMessage<'_>) -> Result<UpsertOutcome, StoreError> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .prepare_cached("SELECT id FROM messages WHERE session_id = ?1 AND message_uuid = ?2")
            .map_err(StoreError::Prepare)?
            .query_row(params![msg.session_id, msg.message_uuid], |row| row.get(0))
            .optional()
            .map_err(StoreError::Execute)?;

        let id: i64 = conn
            .prepare_cached(
                r#"INSERT INTO messages
                   (session_id, message_uuid, role, content, embedding,
                    repository_path, source_path, timestamp)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                   ON CONFLICT(session_id, message_uuid) DO UPDATE SET
                     role = excluded.role,
                     content = excluded.content,
                     embedding = excluded.embedding,
                     repository_path = excluded.repository_path,
                     source_path = excluded.source_path,
                     timestamp = excluded.timestamp
                   RETURNING id"#,
            )
            .map_err(StoreError::Prepare)?
            .query_row(
                params![
                    msg.session_id,
                    msg.message_uuid,
                    msg.role.as_str(),
                    msg.content,
                    encode_vector(msg.embedding),
                    msg.repository_path,
                    msg.source_path,
                    format_timestamp(&msg.timestamp),
                ],
                |row| row.get(0),
            )
            .map_err(|source| StoreError::Insert {
                what: "message",
                source,
            })?;

        Ok(UpsertOutcome {
            id,
            inserted: existing.is_none(),
        })
    }

    /// Stored content and vector of one logical message, if present
    pub fn find_message(
        &self,
        session_id: &str,
        message_uuid: &str,
    ) -> Result<Option<StoredTurn>, StoreError> {
        let conn = self.conn()?;
        let row: Option<(i64, String, Vec<u8>)> = conn
            .prepare_cached(
                "SELECT id, content, embedding FROM messages WHERE session_id = ?1 AND message_uuid = ?2",
            )
            .map_err(StoreError::Prepare)?
            .query_row(params![session_id, message_uuid], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()
            .map_err(StoreError::Execute)?;

        row.map(|(id, content, blob)| {
            Ok(StoredTurn {
                id,
                content,
                embedding: decode_vector(&blob)?,
            })
        })
        .transpose()
    }

    pub fn get_message(&self, id: i64) -> Result<Option<EmbeddedMessage>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .prepare_cached(&format!("{} WHERE id = ?1", MESSAGE_COLUMNS))
            .map_err(StoreError::Prepare)?
            .query_row(params![id], MessageRow::from_row)
            .optional()
            .map_err(StoreError::Execute)?;

        row.map(MessageRow::into_message).transpose()
    }

    /// Batch lookup; ids that do not exist are simply absent from the result
    pub fn get_messages(&self, ids: &[i64]) -> Result<Vec<EmbeddedMessage>, StoreError> {
        let conn = self.conn()?;
        let mut messages = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("{} WHERE id IN ({})", MESSAGE_COLUMNS, placeholders);
            let mut stmt = conn.prepare(&sql).map_err(StoreError::Prepare)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), MessageRow::from_row)
                .map_err(StoreError::Execute)?;
            for row in rows {
                messages.push(row.map_err(StoreError::Execute)?.into_message()?);
            }
        }

        Ok(messages)
    }

    /// (id, vector) of every stored message
    pub fn all_embeddings(&self) -> Result<Vec<(i64, Vec<f64>)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, embedding FROM messages ORDER BY id")
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))
            .map_err(StoreError::Execute)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row.map_err(StoreError::Execute)?;
            out.push((id, decode_vector(&blob)?));
        }
        Ok(out)
    }

    /// Every user-role message with the metadata clustering needs
    pub fn user_embeddings(&self) -> Result<Vec<UserEmbedding>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"SELECT id, session_id, content, embedding, repository_path, timestamp
                   FROM messages
                   WHERE role = 'user'
                   ORDER BY id"#,
            )
            .map_err(StoreError::Prepare)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(StoreError::Execute)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, session_id, content, blob, repository_path, ts) =
                row.map_err(StoreError::Execute)?;
            out.push(UserEmbedding {
                id,
                session_id,
                content,
                embedding: decode_vector(&blob)?,
                repository_path,
                timestamp: parse_timestamp(&ts)?,
            });
        }
        Ok(out)
    }

    /// Remove rows of a session whose uuid is not in `keep`
    pub fn prune_session(&self, session_id: &str, keep: &HashSet<String>) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::Execute)?;

        let stale: Vec<i64> = {
            let mut stmt = tx
                .prepare("SELECT id, message_uuid FROM messages WHERE session_id = ?1")
                .map_err(StoreError::Prepare)?;
            let rows = stmt
                .query_map(params![session_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(StoreError::Execute)?;

            let mut stale = Vec::new();
            for row in rows {
                let (id, uuid) = row.map_err(StoreError::Execute)?;
                if !keep.contains(&uuid) {
                    stale.push(id);
                }
            }
            stale
        };

        for id in &stale {
            tx.execute("DELETE FROM messages WHERE id = ?1", params![id])
                .map_err(StoreError::Execute)?;
        }
        tx.commit().map_err(StoreError::Execute)?;

        if !stale.is_empty() {
            debug!(session = %session_id, removed = stale.len(), "pruned stale messages");
        }
        Ok(stale.len())
    }

    /// Purge a session, forgetting the checkpoints of its source files
    pub fn delete_session(&self, session_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::Execute)?;

        tx.execute(
            r#"DELETE FROM index_checkpoints WHERE source IN
               (SELECT DISTINCT source_path FROM messages
                WHERE session_id = ?1 AND source_path IS NOT NULL)"#,
            params![session_id],
        )
        .map_err(StoreError::Execute)?;
        let removed = tx
            .execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])
            .map_err(StoreError::Execute)?;

        tx.commit().map_err(StoreError::Execute)?;
        Ok(removed)
    }

    // ============================================
    // CHECKPOINTS
    // ============================================

    pub fn get_checkpoint(&self, source: &str) -> Result<Option<IndexCheckpoint>, StoreError> {
        let conn = self.conn()?;
        let row: Option<(String, String, i64, String)> = conn
            .prepare_cached(
                "SELECT source, content_hash, message_count, indexed_at FROM index_checkpoints WHERE source = ?1",
            )
            .map_err(StoreError::Prepare)?
            .query_row(params![source], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .optional()
            .map_err(StoreError::Execute)?;

        row.map(|(source, content_hash, count, indexed_at)| {
            Ok(IndexCheckpoint {
                source,
                content_hash,
                message_count: count.max(0) as usize,
                indexed_at: parse_timestamp(&indexed_at)?,
            })
        })
        .transpose()
    }

    pub fn save_checkpoint(&self, checkpoint: &IndexCheckpoint) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.prepare_cached(
            r#"INSERT OR REPLACE INTO index_checkpoints
               (source, content_hash, message_count, indexed_at)
               VALUES (?1, ?2, ?3, ?4)"#,
        )
        .map_err(StoreError::Prepare)?
        .execute(params![
            checkpoint.source,
            checkpoint.content_hash,
            checkpoint.message_count as i64,
            format_timestamp(&checkpoint.indexed_at),
        ])
        .map_err(|source| StoreError::Insert {
            what: "checkpoint",
            source,
        })?;
        Ok(())
    }

    // ============================================
    // QUERIES
    // ============================================

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = conn
                .query_row(sql, [], |row| row.get(0))
                .map_err(StoreError::Execute)?;
            Ok(n.max(0) as usize)
        };

        Ok(StoreStats {
            messages: count("SELECT COUNT(*) FROM messages")?,
            user_messages: count("SELECT COUNT(*) FROM messages WHERE role = 'user'")?,
            sessions: count("SELECT COUNT(DISTINCT session_id) FROM messages")?,
            checkpoints: count("SELECT COUNT(*) FROM index_checkpoints")?,
            candidates: count("SELECT COUNT(*) FROM repeat_candidates")?,
            dismissed_candidates: count(
                "SELECT COUNT(*) FROM repeat_candidates WHERE dismissed = TRUE",
            )?,
        })
    }
}

// ============================================
// ROW TYPES
// ============================================

/// Message to be written by [`MessageStore::upsert_message`]
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub session_id: &'a str,
    pub message_uuid: &'a str,
    pub role: Role,
    pub content: &'a str,
    pub embedding: &'a [f64],
    pub repository_path: Option<&'a str>,
    pub source_path: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    /// false when an existing row was overwritten
    pub inserted: bool,
}

#[derive(Debug, Clone)]
pub struct StoredTurn {
    pub id: i64,
    pub content: String,
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EmbeddedMessage {
    pub id: i64,
    pub session_id: String,
    pub message_uuid: String,
    pub role: Role,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f64>,
    pub repository_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UserEmbedding {
    pub id: i64,
    pub session_id: String,
    pub content: String,
    pub embedding: Vec<f64>,
    pub repository_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCheckpoint {
    pub source: String,
    pub content_hash: String,
    pub message_count: usize,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub messages: usize,
    pub user_messages: usize,
    pub sessions: usize,
    pub checkpoints: usize,
    pub candidates: usize,
    pub dismissed_candidates: usize,
}

const MESSAGE_COLUMNS: &str = r#"SELECT id, session_id, message_uuid, role, content, embedding,
                                        repository_path, timestamp
                                 FROM messages"#;

struct MessageRow {
    id: i64,
    session_id: String,
    message_uuid: String,
    role: String,
    content: String,
    embedding: Vec<u8>,
    repository_path: Option<String>,
    timestamp: String,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            message_uuid: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            embedding: row.get(5)?,
            repository_path: row.get(6)?,
            timestamp: row.get(7)?,
        })
    }

    fn into_message(self) -> Result<EmbeddedMessage, StoreError> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown role '{}'", self.role)))?;
        Ok(EmbeddedMessage {
            id: self.id,
            session_id: self.session_id,
            message_uuid: self.message_uuid,
            role,
            content: self.content,
            embedding: decode_vector(&self.embedding)?,
            repository_path: self.repository_path,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message<'a>(session: &'a str, uuid: &'a str, content: &'a str, v: &'a [f64]) -> NewMessage<'a> {
        NewMessage {
            session_id: session,
            message_uuid: uuid,
            role: Role::User,
            content,
            embedding: v,
            repository_path: Some("/repo"),
            source_path: Some("/src/s1.jsonl"),
            timestamp: ts(0),
        }
    }

    #[test]
    fn test_upsert_is_idempotent_and_keeps_id() {
        let store = MessageStore::open_in_memory().unwrap();
        let v1 = [0.1, 0.2, 0.3];
        let v2 = [0.4, 0.5, 0.6];

        let first = store.upsert_message(&message("s1", "u1", "hello", &v1)).unwrap();
        assert!(first.inserted);

        let second = store.upsert_message(&message("s1", "u1", "hello again", &v2)).unwrap();
        assert!(!second.inserted);
        assert_eq!(first.id, second.id);

        assert_eq!(store.stats().unwrap().messages, 1);
        let stored = store.get_message(first.id).unwrap().unwrap();
        assert_eq!(stored.content, "hello again");
        assert_eq!(stored.embedding, v2.to_vec());

        // same uuid in another session is a different message
        let other = store.upsert_message(&message("s2", "u1", "hello", &v1)).unwrap();
        assert!(other.inserted);
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn test_vectors_round_trip_exactly() {
        let store = MessageStore::open_in_memory().unwrap();
        let v: Vec<f64> = (0..512).map(|i| (i as f64).sin() / 3.0).collect();
        let out = store.upsert_message(&message("s1", "u1", "x", &v)).unwrap();
        assert_eq!(store.get_message(out.id).unwrap().unwrap().embedding, v);
        assert_eq!(store.all_embeddings().unwrap(), vec![(out.id, v)]);
    }

    #[test]
    fn test_batch_lookup_returns_existing_ids() {
        let store = MessageStore::open_in_memory().unwrap();
        let v = [1.0, 0.0];
        let a = store.upsert_message(&message("s1", "a", "a", &v)).unwrap().id;
        let b = store.upsert_message(&message("s1", "b", "b", &v)).unwrap().id;

        let mut found: Vec<i64> = store
            .get_messages(&[b, 9999, a])
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        found.sort();
        assert_eq!(found, vec![a, b]);
        assert!(store.get_messages(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_user_embeddings_only_user_role() {
        let store = MessageStore::open_in_memory().unwrap();
        let v = [1.0, 0.0];
        store.upsert_message(&message("s1", "a", "question", &v)).unwrap();
        let mut reply = message("s1", "b", "answer", &v);
        reply.role = Role::Assistant;
        store.upsert_message(&reply).unwrap();

        let users = store.user_embeddings().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].content, "question");
        assert_eq!(users[0].repository_path.as_deref(), Some("/repo"));
        assert_eq!(users[0].timestamp, ts(0));
    }

    #[test]
    fn test_prune_and_delete_session() {
        let store = MessageStore::open_in_memory().unwrap();
        let v = [1.0];
        for uuid in ["a", "b", "c"] {
            store.upsert_message(&message("s1", uuid, uuid, &v)).unwrap();
        }
        store.upsert_message(&message("s2", "a", "a", &v)).unwrap();
        store
            .save_checkpoint(&IndexCheckpoint {
                source: "/src/s1.jsonl".to_string(),
                content_hash: "abc".to_string(),
                message_count: 3,
                indexed_at: ts(10),
            })
            .unwrap();

        let keep: HashSet<String> = ["a".to_string(), "c".to_string()].into_iter().collect();
        assert_eq!(store.prune_session("s1", &keep).unwrap(), 1);
        assert!(store.find_message("s1", "b").unwrap().is_none());
        assert!(store.find_message("s1", "a").unwrap().is_some());

        assert_eq!(store.delete_session("s1").unwrap(), 2);
        assert!(store.get_checkpoint("/src/s1.jsonl").unwrap().is_none());
        let stats = store.stats().unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.sessions, 1);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let store = MessageStore::open_in_memory().unwrap();
        assert!(store.get_checkpoint("f").unwrap().is_none());

        let checkpoint = IndexCheckpoint {
            source: "f".to_string(),
            content_hash: "h1".to_string(),
            message_count: 4,
            indexed_at: ts(5),
        };
        store.save_checkpoint(&checkpoint).unwrap();
        assert_eq!(store.get_checkpoint("f").unwrap(), Some(checkpoint.clone()));

        let updated = IndexCheckpoint {
            content_hash: "h2".to_string(),
            ..checkpoint
        };
        store.save_checkpoint(&updated).unwrap();
        assert_eq!(store.get_checkpoint("f").unwrap().unwrap().content_hash, "h2");
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/refrain.db");
        let store = MessageStore::open(&path).unwrap();
        store.upsert_message(&message("s1", "u1", "x", &[1.0])).unwrap();
        drop(store);

        let reopened = MessageStore::open(&path).unwrap();
        assert_eq!(reopened.stats().unwrap().messages, 1);
    }
}
