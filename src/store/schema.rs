//! SQLite schema definition
//!
//! - messages: embedded conversational turns, one row per (session, message uuid)
//! - index_checkpoints: content hash per source file for skip-if-unchanged indexing
//! - repeat_candidates: prompt clusters tracked incrementally as messages arrive
//! - tracker_state: small key/value state of the repeat tracker (daily counter)

pub const SCHEMA: &str = r#"
-- ============================================
-- MESSAGES
-- ============================================

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    message_uuid TEXT NOT NULL,
    role TEXT NOT NULL,                    -- 'user', 'assistant'
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,               -- little-endian f64 array
    repository_path TEXT,
    source_path TEXT,                      -- transcript file the row came from
    timestamp TEXT NOT NULL,               -- RFC 3339, UTC
    UNIQUE(session_id, message_uuid)
);

-- ============================================
-- INDEXING CHECKPOINTS
-- ============================================

CREATE TABLE IF NOT EXISTS index_checkpoints (
    source TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,            -- SHA-256 hex at last full index
    message_count INTEGER NOT NULL,
    indexed_at TEXT NOT NULL
);

-- ============================================
-- REPEAT CANDIDATES
-- ============================================

CREATE TABLE IF NOT EXISTS repeat_candidates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL,           -- originating message (representative)
    content TEXT NOT NULL,                 -- snapshot of the prompt text
    repository_path TEXT,
    repositories TEXT NOT NULL DEFAULT '[]', -- JSON array of every repository seen
    repeat_count INTEGER NOT NULL CHECK (repeat_count >= 0),
    last_seen TEXT NOT NULL,
    avg_similarity REAL NOT NULL,
    dismissed BOOLEAN NOT NULL DEFAULT FALSE,
    dismissed_at TEXT,
    surfaced_at TEXT,                      -- set while a suggestion is pending
    created_at TEXT NOT NULL
);

-- ============================================
-- TRACKER STATE
-- ============================================

CREATE TABLE IF NOT EXISTS tracker_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
CREATE INDEX IF NOT EXISTS idx_messages_role ON messages(role);
CREATE INDEX IF NOT EXISTS idx_messages_source ON messages(source_path);
CREATE INDEX IF NOT EXISTS idx_candidates_dismissed ON repeat_candidates(dismissed);
"#;
