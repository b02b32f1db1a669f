//! LRU embedding cache with zero-copy sharing via `Arc<[f32]>`

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Statistics for the embedding cache
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
    /// Hit rate as percentage (0.0 - 100.0)
    pub hit_rate: f64,
}

struct CacheEntry {
    embedding: Arc<[f32]>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

/// Thread-safe LRU cache keyed by input text, bounded by entry count
pub struct EmbeddingCache {
    state: Mutex<CacheState>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<[f32]>> {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.embedding))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert, evicting the least recently used entry when full
    pub fn put(&self, key: impl Into<String>, embedding: Arc<[f32]>) {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                embedding,
                last_used: tick,
            },
        );
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        EmbeddingCacheStats {
            hits,
            misses,
            entries: self.len(),
            capacity: self.capacity,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64 * 100.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(x: f32) -> Arc<[f32]> {
        Arc::from(vec![x, x])
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = EmbeddingCache::new(4);
        assert!(cache.get("a").is_none());
        cache.put("a", vector(1.0));
        assert_eq!(cache.get("a").as_deref(), Some(&[1.0, 1.0][..]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = EmbeddingCache::new(2);
        cache.put("a", vector(1.0));
        cache.put("b", vector(2.0));
        cache.get("a");
        cache.put("c", vector(3.0));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_shared_without_copy() {
        let cache = EmbeddingCache::new(2);
        let original = vector(5.0);
        cache.put("x", Arc::clone(&original));
        let fetched = cache.get("x").unwrap();
        assert!(Arc::ptr_eq(&original, &fetched));
    }
}
