//! Lazily loaded embedder with idle unloading

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::cache::{EmbeddingCache, EmbeddingCacheStats};
use super::{create_embedder, Embedder};
use crate::config::RecallConfig;
use crate::error::{GraphError, Result};

/// Builds the underlying embedder on first use and after each unload
pub type EmbedderLoader = Box<dyn Fn() -> Result<Arc<dyn Embedder>> + Send + Sync>;

struct LoadedEmbedder {
    embedder: Arc<dyn Embedder>,
    last_used: Instant,
}

/// Owns the embedder lifecycle so the graph never has to.
///
/// The embedder is loaded on the first `embed` call and dropped once it has
/// been idle for `idle_timeout`. Cached vectors survive an unload.
pub struct ManagedEmbedder {
    loader: EmbedderLoader,
    slot: Mutex<Option<LoadedEmbedder>>,
    cache: EmbeddingCache,
    idle_timeout: Duration,
    loads: AtomicU64,
}

impl ManagedEmbedder {
    pub fn new(loader: EmbedderLoader, idle_timeout: Duration, cache_entries: usize) -> Self {
        Self {
            loader,
            slot: Mutex::new(None),
            cache: EmbeddingCache::new(cache_entries),
            idle_timeout,
            loads: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RecallConfig) -> Self {
        let recall = config.clone();
        Self::new(
            Box::new(move || create_embedder(&recall)),
            Duration::from_secs(config.idle_unload_secs),
            config.cache_entries,
        )
    }

    /// Wrap an already constructed embedder; it is reused after every unload
    pub fn with_embedder(embedder: Arc<dyn Embedder>, idle_timeout: Duration) -> Self {
        Self::new(
            Box::new(move || -> Result<Arc<dyn Embedder>> { Ok(Arc::clone(&embedder)) }),
            idle_timeout,
            RecallConfig::default().cache_entries,
        )
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Number of times the loader has run
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    fn acquire(&self) -> Result<Arc<dyn Embedder>> {
        let mut slot = self.slot.lock();
        if let Some(loaded) = slot.as_mut() {
            loaded.last_used = Instant::now();
            return Ok(Arc::clone(&loaded.embedder));
        }

        let embedder = (self.loader)()
            .map_err(|e| GraphError::Embedding(format!("Failed to load embedder: {}", e)))?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(model = embedder.model_name(), "Loaded embedder");

        *slot = Some(LoadedEmbedder {
            embedder: Arc::clone(&embedder),
            last_used: Instant::now(),
        });
        Ok(embedder)
    }

    /// Embed `text`, serving repeats from the cache
    pub fn embed(&self, text: &str) -> Result<Arc<[f32]>> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit);
        }
        let embedder = self.acquire()?;
        let vector: Arc<[f32]> = Arc::from(embedder.embed(text)?);
        self.cache.put(text, Arc::clone(&vector));
        Ok(vector)
    }

    pub fn similarity(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        Ok(self.acquire()?.similarity(a, b))
    }

    /// Drop the embedder if it has not been used since `now - idle_timeout`
    pub fn unload_if_idle(&self, now: Instant) -> bool {
        let mut slot = self.slot.lock();
        let idle = slot
            .as_ref()
            .map(|loaded| now.saturating_duration_since(loaded.last_used) >= self.idle_timeout)
            .unwrap_or(false);
        if idle {
            *slot = None;
            tracing::info!(
                idle_secs = self.idle_timeout.as_secs(),
                "Unloaded idle embedder"
            );
        }
        idle
    }

    pub fn unload(&self) {
        self.slot.lock().take();
    }

    /// Periodically unload the embedder once idle.
    ///
    /// The task holds only a weak reference and exits when the last strong
    /// reference is dropped.
    pub fn spawn_idle_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(managed) = weak.upgrade() else {
                    break;
                };
                managed.unload_if_idle(Instant::now());
            }
        })
    }

    pub fn cache_stats(&self) -> EmbeddingCacheStats {
        self.cache.stats()
    }
}

impl std::fmt::Debug for ManagedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedEmbedder")
            .field("loaded", &self.is_loaded())
            .field("idle_timeout", &self.idle_timeout)
            .field("loads", &self.load_count())
            .finish()
    }
}
