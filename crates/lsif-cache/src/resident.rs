use crate::{CacheStats, WeightedLru};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use lsif_core::{LsifError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Release the resources held by a cached value once it leaves the cache.
#[async_trait]
pub trait Dispose: Send + Sync + 'static {
    async fn dispose(&self);
}

type LoadOutput<V> = std::result::Result<Arc<V>, Arc<LsifError>>;
type SharedLoad<V> = Shared<BoxFuture<'static, LoadOutput<V>>>;

struct Slot<V> {
    id: u64,
    load: SharedLoad<V>,
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            load: self.load.clone(),
        }
    }
}

/// LRU of lazily loaded values keyed by string.
///
/// Each entry holds the (possibly still running) load, so concurrent callers
/// for one key share a single load. Entries are weighed when first inserted
/// and evicted once the total weight exceeds the budget; evicted values are
/// disposed after their load settles.
pub struct ResidentCache<V: Dispose> {
    entries: Mutex<WeightedLru<String, Slot<V>>>,
    next_id: AtomicU64,
}

impl<V: Dispose> ResidentCache<V> {
    pub fn new(max_weight: u64) -> Self {
        Self {
            entries: Mutex::new(WeightedLru::new(max_weight)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Return the value for `key`, starting `load` if nothing is cached.
    ///
    /// `weigh` runs only on a miss and before the load is registered. A failed
    /// load is dropped from the cache so the next caller retries.
    pub async fn get_or_load<W, WF, L, LF>(&self, key: &str, weigh: W, load: L) -> Result<Arc<V>>
    where
        W: FnOnce() -> WF,
        WF: Future<Output = u64>,
        L: FnOnce() -> LF,
        LF: Future<Output = Result<V>> + Send + 'static,
    {
        let cached = self.entries.lock().get(&key.to_string()).cloned();
        if let Some(slot) = cached {
            return self.settle(key, slot).await;
        }

        let weight = weigh().await;
        let (slot, evicted) = {
            let mut entries = self.entries.lock();
            match entries.peek(&key.to_string()) {
                // another caller registered a load while we were weighing
                Some(slot) => (slot.clone(), Vec::new()),
                None => {
                    let slot = Slot {
                        id: self.next_id.fetch_add(1, Ordering::Relaxed),
                        load: load()
                            .map(|res| res.map(Arc::new).map_err(Arc::new))
                            .boxed()
                            .shared(),
                    };
                    let evicted = entries.insert(key.to_string(), slot.clone(), weight);
                    (slot, evicted)
                }
            }
        };

        for (evicted_key, evicted_slot) in evicted {
            debug!(key = %evicted_key, "Evicting resident entry");
            tokio::spawn(dispose_slot(evicted_slot));
        }

        self.settle(key, slot).await
    }

    async fn settle(&self, key: &str, slot: Slot<V>) -> Result<Arc<V>> {
        match slot.load.clone().await {
            Ok(value) => Ok(value),
            Err(err) => {
                let mut entries = self.entries.lock();
                let owned_key = key.to_string();
                if entries.peek(&owned_key).map(|s| s.id) == Some(slot.id) {
                    entries.remove(&owned_key);
                }
                Err(LsifError::Shared(err))
            }
        }
    }

    /// Evict `key` and wait for its value to be disposed.
    pub async fn remove(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(&key.to_string());
        match removed {
            Some(slot) => {
                debug!(key, "Removing resident entry");
                dispose_slot(slot).await;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.lock().stats()
    }
}

async fn dispose_slot<V: Dispose>(slot: Slot<V>) {
    if let Ok(value) = slot.load.await {
        value.dispose().await;
    }
}
