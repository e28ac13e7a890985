//! Batch pattern detection
//!
//! Re-clusters every stored user prompt from scratch: pairs at or above the
//! similarity threshold are unioned, small components are dropped, and each
//! surviving component is represented by its medoid and ranked by a composite
//! score.
//!
//! Connectivity is transitive. Two prompts can share a cluster through a
//! chain of intermediate matches without being similar to each other.
//! Pairwise comparison is O(n²), so corpora beyond `max_corpus` are only
//! clustered with a warning.

mod score;
mod union_find;

pub use score::{
    burst_factor, context_specificity, prompt_complexity, recency, success_signal, PatternScore,
    ScoreInputs,
};
pub use union_find::UnionFind;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::DetectorConfig;
use crate::embedding::cosine_similarity;
use crate::error::DetectError;
use crate::single_flight::SingleFlight;
use crate::store::{MessageStore, UserEmbedding};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMember {
    pub message_id: i64,
    pub session_id: String,
    pub content: String,
    pub repository_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Similarity to the cluster representative
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedPattern {
    pub id: Uuid,
    pub representative: PatternMember,
    /// Most similar to the representative first
    pub members: Vec<PatternMember>,
    pub score: PatternScore,
    pub member_count: usize,
    pub session_count: usize,
    pub repository_count: usize,
}

/// Connected components of the similarity graph at `min_similarity`.
pub fn connected_components(vectors: &[&[f64]], min_similarity: f64) -> Vec<Vec<usize>> {
    let mut uf = UnionFind::new(vectors.len());
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            if cosine_similarity(vectors[i], vectors[j]) >= min_similarity {
                uf.union(i, j);
            }
        }
    }
    uf.groups()
}

/// Cluster, rank and truncate. Pure apart from logging.
pub fn cluster_messages(
    records: &[UserEmbedding],
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> Vec<DetectedPattern> {
    if records.len() > config.max_corpus {
        warn!(
            messages = records.len(),
            ceiling = config.max_corpus,
            "corpus exceeds the pairwise clustering ceiling, detection will be slow"
        );
    }

    let vectors: Vec<&[f64]> = records.iter().map(|r| r.embedding.as_slice()).collect();
    let min_size = config.min_cluster_size.max(1);

    let mut patterns: Vec<DetectedPattern> = connected_components(&vectors, config.min_similarity)
        .into_iter()
        .filter(|group| group.len() >= min_size)
        .map(|group| build_pattern(records, &group, now))
        .collect();

    patterns.sort_by(|a, b| b.score.composite.total_cmp(&a.score.composite));
    patterns.truncate(config.max_patterns);
    patterns
}

/// Medoid index and mean pairwise similarity of a cluster.
///
/// Row sums are accumulated in one pass over the pairs, so memory stays
/// linear in the cluster size. The medoid has the highest mean similarity to
/// the rest, first index on ties.
pub fn medoid_and_cohesion(vectors: &[&[f64]]) -> (usize, f64) {
    let k = vectors.len();
    if k < 2 {
        return (0, 1.0);
    }

    let mut row_sums = vec![0.0; k];
    let mut total = 0.0;
    for a in 0..k {
        for b in (a + 1)..k {
            let s = cosine_similarity(vectors[a], vectors[b]);
            row_sums[a] += s;
            row_sums[b] += s;
            total += s;
        }
    }

    let mut medoid = 0;
    for a in 1..k {
        if row_sums[a] > row_sums[medoid] {
            medoid = a;
        }
    }
    (medoid, total / (k * (k - 1) / 2) as f64)
}

fn build_pattern(records: &[UserEmbedding], group: &[usize], now: DateTime<Utc>) -> DetectedPattern {
    let k = group.len();
    let vectors: Vec<&[f64]> = group.iter().map(|&i| records[i].embedding.as_slice()).collect();
    let (medoid, avg_pairwise) = medoid_and_cohesion(&vectors);

    let member = |a: usize, similarity: f64| {
        let record = &records[group[a]];
        PatternMember {
            message_id: record.id,
            session_id: record.session_id.clone(),
            content: record.content.clone(),
            repository_path: record.repository_path.clone(),
            timestamp: record.timestamp,
            similarity,
        }
    };

    let representative = member(medoid, 1.0);
    let mut members: Vec<PatternMember> = (0..k)
        .map(|a| {
            let similarity = if a == medoid {
                1.0
            } else {
                cosine_similarity(vectors[medoid], vectors[a])
            };
            member(a, similarity)
        })
        .collect();
    members.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    let session_count = members
        .iter()
        .map(|m| m.session_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let repository_count = members
        .iter()
        .filter_map(|m| m.repository_path.as_deref())
        .collect::<HashSet<_>>()
        .len();

    let contents: Vec<&str> = members.iter().map(|m| m.content.as_str()).collect();
    let timestamps: Vec<DateTime<Utc>> = members.iter().map(|m| m.timestamp).collect();
    let score = PatternScore::compute(&ScoreInputs {
        member_count: k,
        session_count,
        avg_pairwise_similarity: avg_pairwise,
        representative: &representative.content,
        contents: &contents,
        timestamps: &timestamps,
        now,
    });

    DetectedPattern {
        id: Uuid::new_v4(),
        representative,
        members,
        score,
        member_count: k,
        session_count,
        repository_count,
    }
}

/// Runs detection against the store, one run at a time, keeping the latest
/// result set.
pub struct PatternDetector {
    config: DetectorConfig,
    flight: SingleFlight,
    last: RwLock<Arc<Vec<DetectedPattern>>>,
}

impl PatternDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            flight: SingleFlight::new(),
            last: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn detect(&self, store: &MessageStore) -> Result<Arc<Vec<DetectedPattern>>, DetectError> {
        self.detect_at(store, Utc::now())
    }

    #[instrument(skip_all, fields(min_similarity = self.config.min_similarity))]
    pub fn detect_at(
        &self,
        store: &MessageStore,
        now: DateTime<Utc>,
    ) -> Result<Arc<Vec<DetectedPattern>>, DetectError> {
        let _guard = self.flight.try_start().ok_or(DetectError::AlreadyRunning)?;

        let records = store.user_embeddings()?;
        let patterns = Arc::new(cluster_messages(&records, &self.config, now));
        info!(
            messages = records.len(),
            patterns = patterns.len(),
            "pattern detection finished"
        );

        let mut last = self.last.write().unwrap_or_else(|e| e.into_inner());
        *last = patterns.clone();
        Ok(patterns)
    }

    /// Result of the most recent completed run
    pub fn last_result(&self) -> Arc<Vec<DetectedPattern>> {
        self.last.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()
    }

    fn record(id: i64, session: &str, v: Vec<f64>) -> UserEmbedding {
        UserEmbedding {
            id,
            session_id: session.to_string(),
            content: format!("prompt number {}", id),
            embedding: v,
            repository_path: Some("/repo".to_string()),
            timestamp: now() - Duration::days(id),
        }
    }

    /// Three prompts around one axis (pairwise ≈ 0.9) and two around another (≈ 0.85)
    fn scenario() -> Vec<UserEmbedding> {
        vec![
            record(1, "s1", vec![1.0, 0.3, 0.0, 0.0, 0.0, 0.0]),
            record(2, "s2", vec![1.0, 0.0, 0.3, 0.0, 0.0, 0.0]),
            record(3, "s3", vec![1.0, 0.15, 0.15, 0.0, 0.0, 0.0]),
            record(4, "s1", vec![0.0, 0.0, 0.0, 1.0, 0.42, 0.0]),
            record(5, "s1", vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.42]),
        ]
    }

    #[test]
    fn test_scenario_two_clusters_with_medoid() {
        let patterns = cluster_messages(&scenario(), &DetectorConfig::default(), now());
        assert_eq!(patterns.len(), 2);

        let big = patterns.iter().find(|p| p.member_count == 3).unwrap();
        let small = patterns.iter().find(|p| p.member_count == 2).unwrap();

        // the balanced prompt is closest to both others
        assert_eq!(big.representative.message_id, 3);
        assert_eq!(big.members[0].message_id, 3);
        assert_eq!(big.members.len(), 3);
        assert!(big.members.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert_eq!(big.session_count, 3);
        assert_eq!(big.repository_count, 1);

        let small_ids: HashSet<i64> = small.members.iter().map(|m| m.message_id).collect();
        assert_eq!(small_ids, [4, 5].into_iter().collect());
        assert_eq!(small.session_count, 1);
        assert!((small.members[1].similarity - 0.85).abs() < 0.001);
        assert_ne!(big.id, small.id);

        assert!(patterns[0].score.composite >= patterns[1].score.composite);
    }

    #[test]
    fn test_min_cluster_size_and_max_patterns() {
        let strict = DetectorConfig {
            min_cluster_size: 3,
            ..DetectorConfig::default()
        };
        let patterns = cluster_messages(&scenario(), &strict, now());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].member_count, 3);

        let capped = DetectorConfig {
            max_patterns: 1,
            ..DetectorConfig::default()
        };
        assert_eq!(cluster_messages(&scenario(), &capped, now()).len(), 1);

        assert!(cluster_messages(&[], &DetectorConfig::default(), now()).is_empty());
    }

    #[test]
    fn test_clustering_is_transitive() {
        // a~b and b~c, but a and c are far apart
        let records = vec![
            record(1, "s1", vec![1.0, 0.0, 0.0]),
            record(2, "s1", vec![1.0, 1.0, 0.0]),
            record(3, "s1", vec![0.0, 1.0, 0.0]),
        ];
        let config = DetectorConfig {
            min_similarity: 0.7,
            ..DetectorConfig::default()
        };
        let patterns = cluster_messages(&records, &config, now());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].member_count, 3);
        assert_eq!(patterns[0].representative.message_id, 2);
    }

    #[test]
    fn test_medoid_and_cohesion() {
        let vectors = [vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0]];
        let refs: Vec<&[f64]> = vectors.iter().map(|v| v.as_slice()).collect();
        let (medoid, cohesion) = medoid_and_cohesion(&refs);
        assert_eq!(medoid, 1);
        let side = std::f64::consts::FRAC_1_SQRT_2;
        assert!((cohesion - (2.0 * side) / 3.0).abs() < 1e-12);

        assert_eq!(medoid_and_cohesion(&refs[..1]), (0, 1.0));
    }

    #[test]
    fn test_large_single_cluster() {
        // one component spanning thousands of prompts
        let records: Vec<UserEmbedding> = (0..3000)
            .map(|i| {
                let nudge = (i % 7) as f64 * 0.01;
                record(i, "s1", vec![1.0, nudge, 0.0, 0.0])
            })
            .collect();
        let patterns = cluster_messages(&records, &DetectorConfig::default(), now());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].member_count, 3000);
        assert_eq!(patterns[0].members.len(), 3000);
        assert!(patterns[0].score.composite.is_finite());
    }

    #[test]
    fn test_detector_replaces_result_and_guards_overlap() {
        let store = MessageStore::open_in_memory().unwrap();
        let detector = PatternDetector::new(DetectorConfig::default());
        assert!(detector.last_result().is_empty());

        let first = detector.detect_at(&store, now()).unwrap();
        assert!(first.is_empty());
        assert!(!detector.is_running());

        let _held = detector.flight.try_start().unwrap();
        assert!(matches!(
            detector.detect_at(&store, now()),
            Err(DetectError::AlreadyRunning)
        ));
    }

    fn vectors_strategy() -> impl Strategy<Value = Vec<Vec<f64>>> {
        prop::collection::vec(prop::collection::vec(-1.0f64..1.0, 4), 0..14)
    }

    proptest! {
        #[test]
        fn prop_raising_threshold_only_fragments(
            vectors in vectors_strategy(),
            low in 0.0f64..0.9,
            step in 0.0f64..0.5,
        ) {
            let high = low + step;
            let refs: Vec<&[f64]> = vectors.iter().map(|v| v.as_slice()).collect();
            let coarse = connected_components(&refs, low);
            let fine = connected_components(&refs, high);

            let mut owner = vec![0; refs.len()];
            for (g, group) in coarse.iter().enumerate() {
                for &i in group {
                    owner[i] = g;
                }
            }
            prop_assert!(fine.len() >= coarse.len());
            for group in &fine {
                prop_assert!(group.iter().all(|&i| owner[i] == owner[group[0]]));
            }
        }
    }
}
