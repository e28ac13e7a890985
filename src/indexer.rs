//! Incremental transcript indexer
//!
//! Each source is hashed and compared with its checkpoint; unchanged sources
//! are skipped outright. A changed source is re-read in full and replaces the
//! stored session: surviving turns keep their row ids, turns whose content is
//! unchanged keep their vectors, and rows the parse no longer produced are
//! pruned. Newly inserted user turns go to the repeat tracker in source order.
//!
//! The checkpoint is written only when every turn of the source was stored,
//! so an interrupted or partially failed file is retried on the next run.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::embedding::EmbeddingService;
use crate::error::{EmbedError, IndexError};
use crate::probe::{ProbeRegistry, Role, SourceRef, TranscriptProbe};
use crate::single_flight::SingleFlight;
use crate::store::{IndexCheckpoint, MessageStore, NewMessage};
use crate::tracker::{PatternSuggestion, RepeatTracker, TrackedMessage};

#[derive(Debug, Default, Serialize)]
pub struct IndexReport {
    pub sources_total: usize,
    pub sources_indexed: usize,
    pub sources_skipped: usize,
    pub sources_failed: usize,
    pub messages_embedded: usize,
    pub messages_reused: usize,
    pub embed_skipped: usize,
    pub insert_failures: usize,
    pub unparseable_lines: usize,
    pub suggestions: Vec<PatternSuggestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Content hash matched the checkpoint
    Unchanged,
    /// Every turn stored and the checkpoint written
    Indexed,
    /// Some turns failed to store; checkpoint withheld
    Incomplete,
}

pub struct Indexer {
    store: Arc<MessageStore>,
    embeddings: Arc<EmbeddingService>,
    tracker: Arc<RepeatTracker>,
    flight: SingleFlight,
}

impl Indexer {
    pub fn new(
        store: Arc<MessageStore>,
        embeddings: Arc<EmbeddingService>,
        tracker: Arc<RepeatTracker>,
    ) -> Self {
        Self {
            store,
            embeddings,
            tracker,
            flight: SingleFlight::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_running()
    }

    /// Index every source of every available probe.
    ///
    /// `progress` is called with (sources done, sources total) after each
    /// source.
    pub fn run<F>(&self, registry: &ProbeRegistry, mut progress: F) -> Result<IndexReport, IndexError>
    where
        F: FnMut(usize, usize),
    {
        let _guard = self.flight.try_start().ok_or(IndexError::AlreadyRunning)?;

        if !self.embeddings.is_available() {
            let reason = self
                .embeddings
                .unavailable_reason()
                .unwrap_or("unknown reason")
                .to_string();
            return Err(IndexError::EmbeddingUnavailable(reason));
        }

        let mut sources: Vec<(&dyn TranscriptProbe, SourceRef)> = Vec::new();
        for probe in registry.available_probes() {
            let found = probe.discover().map_err(IndexError::Probe)?;
            debug!(probe = probe.id(), sources = found.len(), "discovered sources");
            sources.extend(found.into_iter().map(|source| (probe, source)));
        }

        let mut report = IndexReport {
            sources_total: sources.len(),
            ..IndexReport::default()
        };

        for (done, (probe, source)) in sources.iter().enumerate() {
            match self.index_source(*probe, source, &mut report) {
                Ok(SourceOutcome::Unchanged) => report.sources_skipped += 1,
                Ok(SourceOutcome::Indexed) => report.sources_indexed += 1,
                Ok(SourceOutcome::Incomplete) => report.sources_failed += 1,
                Err(IndexError::EmbeddingUnavailable(reason)) => {
                    return Err(IndexError::EmbeddingUnavailable(reason));
                }
                Err(e) => {
                    warn!(source = %source.id, error = %e, "failed to index source");
                    report.sources_failed += 1;
                }
            }
            progress(done + 1, report.sources_total);
        }

        info!(
            total = report.sources_total,
            indexed = report.sources_indexed,
            skipped = report.sources_skipped,
            failed = report.sources_failed,
            embedded = report.messages_embedded,
            reused = report.messages_reused,
            suggestions = report.suggestions.len(),
            "indexing finished"
        );
        Ok(report)
    }

    /// Index one source file.
    #[instrument(skip_all, fields(source = %source.id))]
    pub fn index_source(
        &self,
        probe: &dyn TranscriptProbe,
        source: &SourceRef,
        report: &mut IndexReport,
    ) -> Result<SourceOutcome, IndexError> {
        let hash = probe.content_hash(source).map_err(IndexError::Probe)?;
        if let Some(checkpoint) = self.store.get_checkpoint(&source.id)? {
            if checkpoint.content_hash == hash {
                debug!("source unchanged since last index, skipping");
                return Ok(SourceOutcome::Unchanged);
            }
        }

        let transcript = probe.read_transcript(source).map_err(IndexError::Probe)?;
        report.unparseable_lines += transcript.unparseable_lines;
        let session_id = transcript.session_id.as_str();

        let mut keep: HashSet<String> = HashSet::new();
        let mut complete = true;

        for turn in &transcript.turns {
            let stored = self.store.find_message(session_id, &turn.message_uuid)?;

            let vector = match stored {
                Some(stored) if stored.content == turn.text => {
                    report.messages_reused += 1;
                    stored.embedding
                }
                _ => match self.embeddings.embed(&turn.text) {
                    Ok(Some(vector)) => {
                        report.messages_embedded += 1;
                        vector
                    }
                    Ok(None) | Err(EmbedError::Failed(_)) => {
                        debug!(uuid = %turn.message_uuid, "turn not embeddable, skipping");
                        report.embed_skipped += 1;
                        continue;
                    }
                    Err(EmbedError::Unavailable(reason)) => {
                        return Err(IndexError::EmbeddingUnavailable(reason));
                    }
                },
            };

            // a row that fails to update must survive the prune below
            keep.insert(turn.message_uuid.clone());

            let upserted = self.store.upsert_message(&NewMessage {
                session_id,
                message_uuid: &turn.message_uuid,
                role: turn.role,
                content: &turn.text,
                embedding: &vector,
                repository_path: turn.repository_path.as_deref(),
                source_path: Some(&source.id),
                timestamp: turn.timestamp,
            });

            let outcome = match upserted {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(uuid = %turn.message_uuid, error = %e, "failed to store message");
                    report.insert_failures += 1;
                    complete = false;
                    continue;
                }
            };

            if outcome.inserted && turn.role == Role::User {
                let tracked = TrackedMessage {
                    message_id: outcome.id,
                    content: &turn.text,
                    vector: &vector,
                    repository_path: turn.repository_path.as_deref(),
                    timestamp: turn.timestamp,
                };
                match self.tracker.process(&tracked) {
                    Ok(Some(suggestion)) => report.suggestions.push(suggestion),
                    Ok(None) => {}
                    Err(e) => warn!(message_id = outcome.id, error = %e, "repeat tracking failed"),
                }
            }
        }

        self.store.prune_session(session_id, &keep)?;

        if !complete {
            warn!("some messages were not stored, checkpoint withheld");
            return Ok(SourceOutcome::Incomplete);
        }

        self.store.save_checkpoint(&IndexCheckpoint {
            source: source.id.clone(),
            content_hash: hash,
            message_count: keep.len(),
            indexed_at: Utc::now(),
        })?;
        debug!(session = %session_id, messages = keep.len(), "source indexed");
        Ok(SourceOutcome::Indexed)
    }
}
