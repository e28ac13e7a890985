//! Bounded cache of recently seen prompt embeddings
//!
//! Entries are evicted strictly oldest-first: lookups use `peek`, so reading
//! an entry never refreshes it.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEmbedding {
    pub message_id: i64,
    pub vector: Vec<f64>,
    pub repository_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct RecencyCache {
    entries: LruCache<i64, CachedEmbedding>,
}

impl RecencyCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
        }
    }

    /// Insert an entry, returning the one evicted to make room, if any.
    pub fn insert(&mut self, entry: CachedEmbedding) -> Option<CachedEmbedding> {
        match self.entries.push(entry.message_id, entry) {
            // push hands back the old value when the key was already present
            Some((_, old)) if self.entries.contains(&old.message_id) => None,
            Some((_, evicted)) => Some(evicted),
            None => None,
        }
    }

    pub fn get(&self, message_id: i64) -> Option<&CachedEmbedding> {
        self.entries.peek(&message_id)
    }

    /// Newest first
    pub fn iter(&self) -> impl Iterator<Item = &CachedEmbedding> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: i64) -> CachedEmbedding {
        CachedEmbedding {
            message_id: id,
            vector: vec![id as f64],
            repository_path: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        }
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut cache = RecencyCache::new(3);
        for id in 1..=3 {
            assert_eq!(cache.insert(entry(id)), None);
        }
        // reading does not refresh
        assert!(cache.get(1).is_some());

        let evicted = cache.insert(entry(4)).unwrap();
        assert_eq!(evicted.message_id, 1);
        assert_eq!(cache.len(), 3);
        assert!(cache.get(1).is_none());

        let ids: Vec<i64> = cache.iter().map(|e| e.message_id).collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[test]
    fn test_reinsert_same_id_does_not_report_eviction() {
        let mut cache = RecencyCache::new(2);
        cache.insert(entry(1));
        assert_eq!(cache.insert(entry(1)), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut cache = RecencyCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert(entry(1));
        assert_eq!(cache.insert(entry(2)).map(|e| e.message_id), Some(1));
        assert!(!cache.is_empty());
    }
}
