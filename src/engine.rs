//! Engine: owns the services and runs them
//!
//! Everything is constructed explicitly and shared through `Arc`. Indexing
//! and detection each carry their own single-flight guard and can run as
//! independent background tasks on the blocking pool.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::detector::{DetectedPattern, PatternDetector};
use crate::embedding::EmbeddingService;
use crate::error::{DetectError, IndexError, SearchError, StoreError};
use crate::indexer::{IndexReport, Indexer};
use crate::probe::ProbeRegistry;
use crate::search::{search, SearchHit};
use crate::store::{MessageStore, RepeatCandidate, StoreStats};
use crate::tracker::RepeatTracker;

pub struct Engine {
    config: Config,
    store: Arc<MessageStore>,
    embeddings: Arc<EmbeddingService>,
    registry: ProbeRegistry,
    tracker: Arc<RepeatTracker>,
    indexer: Indexer,
    detector: PatternDetector,
}

impl Engine {
    /// Open the configured database and start the built-in embedder.
    ///
    /// Failing to open the store is the one hard failure.
    pub fn open(config: Config) -> Result<Self, StoreError> {
        let store = Arc::new(MessageStore::open(&config.database_path())?);
        let embeddings = Arc::new(EmbeddingService::hashed(&config.embedding));
        let registry = ProbeRegistry::new(&config);
        Self::from_parts(config, store, embeddings, registry)
    }

    pub fn from_parts(
        config: Config,
        store: Arc<MessageStore>,
        embeddings: Arc<EmbeddingService>,
        registry: ProbeRegistry,
    ) -> Result<Self, StoreError> {
        let tracker = Arc::new(RepeatTracker::new(store.clone(), config.tracker.clone())?);
        let indexer = Indexer::new(store.clone(), embeddings.clone(), tracker.clone());
        let detector = PatternDetector::new(config.detector.clone());

        Ok(Self {
            config,
            store,
            embeddings,
            registry,
            tracker,
            indexer,
            detector,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn tracker(&self) -> &RepeatTracker {
        &self.tracker
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    pub fn index<F>(&self, progress: F) -> Result<IndexReport, IndexError>
    where
        F: FnMut(usize, usize),
    {
        self.indexer.run(&self.registry, progress)
    }

    pub fn detect(&self) -> Result<Arc<Vec<DetectedPattern>>, DetectError> {
        self.detector.detect(&self.store)
    }

    pub fn last_patterns(&self) -> Arc<Vec<DetectedPattern>> {
        self.detector.last_result()
    }

    /// Search with the configured floor; `limit` overrides the configured one.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchHit>, SearchError> {
        search(
            &self.store,
            &self.embeddings,
            query,
            limit.unwrap_or(self.config.search.limit),
            self.config.search.min_similarity,
        )
    }

    pub fn candidates(&self) -> Result<Vec<RepeatCandidate>, StoreError> {
        self.tracker.candidates()
    }

    pub fn dismiss(&self, candidate_id: i64) -> Result<bool, StoreError> {
        self.tracker.dismiss(candidate_id)
    }

    pub fn convert(&self, candidate_id: i64) -> Result<bool, StoreError> {
        self.tracker.convert(candidate_id)
    }

    /// Delete a session's messages; the tracker restarts cold afterwards.
    pub fn purge_session(&self, session_id: &str) -> Result<usize, StoreError> {
        let removed = self.store.delete_session(session_id)?;
        self.tracker.reload()?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        self.store.stats()
    }

    pub fn is_indexing(&self) -> bool {
        self.indexer.is_running()
    }

    pub fn is_detecting(&self) -> bool {
        self.detector.is_running()
    }

    /// Run indexing on the blocking pool.
    pub async fn index_in_background(self: Arc<Self>) -> Result<IndexReport> {
        let report = tokio::task::spawn_blocking(move || {
            self.index(|done, total| debug!(done, total, "indexing progress"))
        })
        .await
        .context("indexing task did not complete")??;
        Ok(report)
    }

    /// Run pattern detection on the blocking pool.
    pub async fn detect_in_background(self: Arc<Self>) -> Result<Arc<Vec<DetectedPattern>>> {
        let patterns = tokio::task::spawn_blocking(move || self.detect())
            .await
            .context("detection task did not complete")??;
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ClaudeCodeProbe;
    use std::fs;

    fn engine_with_transcript(lines: &[&str]) -> (tempfile::TempDir, Arc<Engine>) {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("-repo");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("s1.jsonl"), lines.join("\n")).unwrap();

        let mut registry = ProbeRegistry::empty();
        registry.register(Box::new(ClaudeCodeProbe::new(Some(dir.path().to_path_buf()))));

        let config = Config::default();
        let store = Arc::new(MessageStore::open_in_memory().unwrap());
        let embeddings = Arc::new(EmbeddingService::hashed(&config.embedding));
        let engine = Engine::from_parts(config, store, embeddings, registry).unwrap();
        (dir, Arc::new(engine))
    }

    const LINES: [&str; 2] = [
        r#"{"type":"user","uuid":"u1","sessionId":"s1","timestamp":"2025-03-01T09:00:00Z","message":{"content":"Rebuild the docker image and push it"}}"#,
        r#"{"type":"user","uuid":"u2","sessionId":"s1","timestamp":"2025-03-01T09:05:00Z","message":{"content":"Rebuild the docker image and push it"}}"#,
    ];

    #[tokio::test]
    async fn test_background_index_then_detect() {
        let (_dir, engine) = engine_with_transcript(&LINES);

        let report = engine.clone().index_in_background().await.unwrap();
        assert_eq!(report.sources_indexed, 1);
        assert!(!engine.is_indexing());

        let patterns = engine.clone().detect_in_background().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].member_count, 2);
        assert_eq!(engine.last_patterns().len(), 1);

        let hits = engine.search("rebuild docker image", None).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_purge_session_resets_checkpoint() {
        let (_dir, engine) = engine_with_transcript(&LINES);
        engine.index(|_, _| {}).unwrap();
        assert_eq!(engine.candidates().unwrap().len(), 1);

        assert_eq!(engine.purge_session("s1").unwrap(), 2);
        let stats = engine.stats().unwrap();
        assert_eq!(stats.messages, 0);
        assert_eq!(stats.checkpoints, 0);

        // the purged session is picked up again on the next run
        let report = engine.index(|_, _| {}).unwrap();
        assert_eq!(report.sources_indexed, 1);
        assert_eq!(engine.stats().unwrap().messages, 2);
    }
}
