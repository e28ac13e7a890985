//! Online repeat tracker
//!
//! Consumes newly indexed user prompts one at a time and maintains persistent
//! repeat candidates without rescanning history:
//!
//! 1. prompts shorter than `min_words` are ignored
//! 2. the prompt is matched against candidate representatives (active ones
//!    first, then dismissed ones so they can collect resurfacing evidence)
//! 3. with no candidate match, it is matched against the recency cache and a
//!    new candidate is created if anything there is similar enough
//! 4. the prompt always enters the recency cache
//! 5. a candidate with enough repeats that is not dismissed or already pending
//!    is surfaced as a suggestion, within the daily cap
//!
//! The store stays authoritative: candidates, including which of them are
//! pending, are reloaded from it on start and every change is written through.

mod cache;
mod limiter;
mod suggestion;

pub use cache::{CachedEmbedding, RecencyCache};
pub use limiter::DailyLimiter;
pub use suggestion::{describe, placement, skill_name, PatternSuggestion, Placement};

use chrono::{DateTime, Local, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::TrackerConfig;
use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::store::{MessageStore, NewCandidate, RepeatCandidate};

/// A freshly indexed user prompt
#[derive(Debug, Clone, Copy)]
pub struct TrackedMessage<'a> {
    pub message_id: i64,
    pub content: &'a str,
    pub vector: &'a [f64],
    pub repository_path: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

struct TrackerState {
    cache: RecencyCache,
    candidates: Vec<RepeatCandidate>,
    /// candidate id -> representative vector, filled on first use
    representatives: HashMap<i64, Vec<f64>>,
    limiter: DailyLimiter,
}

pub struct RepeatTracker {
    store: Arc<MessageStore>,
    config: TrackerConfig,
    state: Mutex<TrackerState>,
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

impl RepeatTracker {
    /// Build a tracker, loading candidates and the daily counter from the store.
    pub fn new(store: Arc<MessageStore>, config: TrackerConfig) -> Result<Self, StoreError> {
        let candidates = store.load_candidates()?;
        let limiter = DailyLimiter::load(&store, config.max_notifications_per_day)?;
        debug!(candidates = candidates.len(), "repeat tracker loaded");

        Ok(Self {
            state: Mutex::new(TrackerState {
                cache: RecencyCache::new(config.cache_capacity),
                candidates,
                representatives: HashMap::new(),
                limiter,
            }),
            store,
            config,
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, TrackerState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Process a prompt using the current wall clock for the daily cap.
    pub fn process(
        &self,
        message: &TrackedMessage<'_>,
    ) -> Result<Option<PatternSuggestion>, StoreError> {
        self.process_at(message, Utc::now())
    }

    /// Process a prompt; `now` decides which calendar day the cap applies to.
    pub fn process_at(
        &self,
        message: &TrackedMessage<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<PatternSuggestion>, StoreError> {
        if word_count(message.content) < self.config.min_words {
            debug!(message_id = message.message_id, "prompt too short to track");
            return Ok(None);
        }

        let mut state = self.state()?;

        let touched = match self.match_candidate(&mut state, message.vector)? {
            Some((idx, similarity)) => Some(self.record_repeat(&mut state, idx, message, similarity)?),
            None => self.start_candidate(&mut state, message)?,
        };

        state.cache.insert(CachedEmbedding {
            message_id: message.message_id,
            vector: message.vector.to_vec(),
            repository_path: message.repository_path.map(String::from),
            timestamp: message.timestamp,
        });

        match touched {
            Some(idx) => self.maybe_surface(&mut state, idx, now),
            None => Ok(None),
        }
    }

    /// Best candidate above the threshold, trying active candidates first.
    fn match_candidate(
        &self,
        state: &mut TrackerState,
        vector: &[f64],
    ) -> Result<Option<(usize, f64)>, StoreError> {
        for dismissed in [false, true] {
            let mut best: Option<(usize, f64)> = None;
            for idx in 0..state.candidates.len() {
                if state.candidates[idx].dismissed != dismissed {
                    continue;
                }
                let Some(similarity) = self.similarity_to(state, idx, vector)? else {
                    continue;
                };
                if similarity >= self.config.similarity_threshold
                    && best.map_or(true, |(_, s)| similarity > s)
                {
                    best = Some((idx, similarity));
                }
            }
            if best.is_some() {
                return Ok(best);
            }
        }
        Ok(None)
    }

    /// Similarity to a candidate's representative, resolved from the memo,
    /// then the recency cache, then the store.
    fn similarity_to(
        &self,
        state: &mut TrackerState,
        idx: usize,
        vector: &[f64],
    ) -> Result<Option<f64>, StoreError> {
        let candidate_id = state.candidates[idx].id;
        if let Some(rep) = state.representatives.get(&candidate_id) {
            return Ok(Some(cosine_similarity(vector, rep)));
        }

        let message_id = state.candidates[idx].message_id;
        let rep = match state.cache.get(message_id) {
            Some(entry) => entry.vector.clone(),
            None => match self.store.get_message(message_id)? {
                Some(message) => message.embedding,
                None => {
                    debug!(
                        candidate = candidate_id,
                        message_id, "representative message no longer stored"
                    );
                    return Ok(None);
                }
            },
        };

        let similarity = cosine_similarity(vector, &rep);
        state.representatives.insert(candidate_id, rep);
        Ok(Some(similarity))
    }

    fn record_repeat(
        &self,
        state: &mut TrackerState,
        idx: usize,
        message: &TrackedMessage<'_>,
        similarity: f64,
    ) -> Result<usize, StoreError> {
        let resurface_after = self.config.resurface_after;
        let candidate = &mut state.candidates[idx];

        candidate.repeat_count += 1;
        let n = f64::from(candidate.repeat_count);
        candidate.avg_similarity = (candidate.avg_similarity * (n - 1.0) + similarity) / n;
        candidate.last_seen = message.timestamp;
        if let Some(repo) = message.repository_path {
            if !candidate.repositories.iter().any(|r| r == repo) {
                candidate.repositories.push(repo.to_string());
            }
        }

        if candidate.dismissed {
            let seen_since = candidate
                .dismissed_at
                .map_or(true, |at| candidate.last_seen > at);
            if candidate.repeat_count >= resurface_after && seen_since {
                candidate.dismissed = false;
                candidate.dismissed_at = None;
                info!(
                    candidate = candidate.id,
                    repeats = candidate.repeat_count,
                    "dismissed candidate resurfaced"
                );
            }
        }

        debug!(
            candidate = candidate.id,
            repeats = candidate.repeat_count,
            similarity,
            "prompt matched repeat candidate"
        );
        self.store.update_candidate(candidate)?;
        Ok(idx)
    }

    fn start_candidate(
        &self,
        state: &mut TrackerState,
        message: &TrackedMessage<'_>,
    ) -> Result<Option<usize>, StoreError> {
        let mut similarities = Vec::new();
        let mut repositories: Vec<String> = Vec::new();

        for entry in state.cache.iter() {
            if entry.message_id == message.message_id {
                continue;
            }
            let similarity = cosine_similarity(message.vector, &entry.vector);
            if similarity >= self.config.similarity_threshold {
                similarities.push(similarity);
                if let Some(repo) = &entry.repository_path {
                    if !repositories.contains(repo) {
                        repositories.push(repo.clone());
                    }
                }
            }
        }

        if similarities.is_empty() {
            return Ok(None);
        }

        if let Some(repo) = message.repository_path {
            if !repositories.iter().any(|r| r == repo) {
                repositories.insert(0, repo.to_string());
            }
        }

        let avg_similarity = similarities.iter().sum::<f64>() / similarities.len() as f64;
        let candidate = self.store.insert_candidate(&NewCandidate {
            message_id: message.message_id,
            content: message.content.to_string(),
            repository_path: message.repository_path.map(String::from),
            repositories,
            repeat_count: similarities.len() as u32 + 1,
            last_seen: message.timestamp,
            avg_similarity,
        })?;

        info!(
            candidate = candidate.id,
            repeats = candidate.repeat_count,
            avg_similarity,
            "new repeat candidate"
        );

        state
            .representatives
            .insert(candidate.id, message.vector.to_vec());
        state.candidates.push(candidate);
        Ok(Some(state.candidates.len() - 1))
    }

    fn maybe_surface(
        &self,
        state: &mut TrackerState,
        idx: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<PatternSuggestion>, StoreError> {
        let candidate = &state.candidates[idx];
        if candidate.dismissed
            || candidate.repeat_count < self.config.min_repeats_to_surface
            || candidate.surfaced_at.is_some()
        {
            return Ok(None);
        }

        let today = now.with_timezone(&Local).date_naive();
        if !state.limiter.try_acquire(today) {
            info!(
                candidate = candidate.id,
                "suggestion held back, daily limit reached"
            );
            return Ok(None);
        }
        state.limiter.save(&self.store)?;

        let candidate = &mut state.candidates[idx];
        candidate.surfaced_at = Some(now);
        self.store.update_candidate(candidate)?;

        let candidate = candidate.clone();
        let message = self.store.get_message(candidate.message_id)?;
        let suggestion = PatternSuggestion::new(candidate, message);

        info!(
            candidate = suggestion.candidate.id,
            skill = %suggestion.skill_name,
            repeats = suggestion.candidate.repeat_count,
            "surfacing repeated prompt"
        );
        Ok(Some(suggestion))
    }

    /// Dismiss a candidate: its count restarts at zero and it is no longer
    /// pending. Returns false for an unknown id.
    pub fn dismiss(&self, candidate_id: i64) -> Result<bool, StoreError> {
        self.dismiss_at(candidate_id, Utc::now())
    }

    pub fn dismiss_at(&self, candidate_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let Some(candidate) = state.candidates.iter_mut().find(|c| c.id == candidate_id) else {
            return Ok(false);
        };

        candidate.repeat_count = 0;
        candidate.dismissed = true;
        candidate.dismissed_at = Some(now);
        candidate.surfaced_at = None;
        self.store.update_candidate(candidate)?;

        info!(candidate = candidate_id, "candidate dismissed");
        Ok(true)
    }

    /// Stop tracking a candidate for good (it became a reusable artifact).
    pub fn convert(&self, candidate_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let removed = self.store.delete_candidate(candidate_id)?;

        state.candidates.retain(|c| c.id != candidate_id);
        state.representatives.remove(&candidate_id);

        if removed {
            info!(candidate = candidate_id, "candidate converted");
        }
        Ok(removed)
    }

    pub fn candidates(&self) -> Result<Vec<RepeatCandidate>, StoreError> {
        Ok(self.state()?.candidates.clone())
    }

    /// Candidates surfaced and neither dismissed nor converted since.
    pub fn pending_suggestions(&self) -> Result<Vec<RepeatCandidate>, StoreError> {
        Ok(self
            .state()?
            .candidates
            .iter()
            .filter(|c| c.surfaced_at.is_some())
            .cloned()
            .collect())
    }

    pub fn cached_len(&self) -> Result<usize, StoreError> {
        Ok(self.state()?.cache.len())
    }

    /// Cold start: reload candidates from the store and empty the cache.
    pub fn reload(&self) -> Result<(), StoreError> {
        let candidates = self.store.load_candidates()?;
        let limiter = DailyLimiter::load(&self.store, self.config.max_notifications_per_day)?;

        let mut state = self.state()?;
        state.candidates = candidates;
        state.representatives.clear();
        state.cache.clear();
        state.limiter = limiter;
        Ok(())
    }
}
