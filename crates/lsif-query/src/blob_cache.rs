use lsif_cache::{CacheStats, WeightedLru};
use lsif_core::Result;
use lsif_storage::{decode_blob, DocumentBlob};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Decoded document blobs shared by every database, keyed `<dump file>::<path>`.
///
/// Concurrent misses for one key may each decode; the last insert wins.
pub struct BlobCache {
    entries: Mutex<WeightedLru<String, Arc<DocumentBlob>>>,
}

impl BlobCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(WeightedLru::new(max_bytes)),
        }
    }

    pub fn key(file: &str, path: &str) -> String {
        format!("{}::{}", file, path)
    }

    pub async fn get_or_decode<F, Fut>(&self, key: &str, fetch: F) -> Result<Arc<DocumentBlob>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let cached = self.entries.lock().get(&key.to_string()).cloned();
        if let Some(blob) = cached {
            return Ok(blob);
        }

        let bytes = fetch().await?;
        let blob = Arc::new(decode_blob(&bytes)?);
        let weight = blob.approximate_size() as u64;
        let evicted = self
            .entries
            .lock()
            .insert(key.to_string(), blob.clone(), weight);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted document blobs");
        }
        Ok(blob)
    }

    /// Drop every blob decoded from `file`.
    pub fn invalidate_file(&self, file: &str) -> usize {
        let prefix = Self::key(file, "");
        let removed = self
            .entries
            .lock()
            .remove_where(|key| key.starts_with(&prefix));
        removed.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsif_core::LsifError;
    use lsif_storage::encode_blob;

    fn encoded() -> Vec<u8> {
        encode_blob(&DocumentBlob::default()).unwrap()
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_memory() {
        let cache = BlobCache::new(1 << 20);
        let key = BlobCache::key("/data/a.lsif", "src/index.ts");
        let first = cache.get_or_decode(&key, || async { Ok(encoded()) }).await.unwrap();
        let second = cache
            .get_or_decode(&key, || async {
                Err(LsifError::Storage("should not be fetched".into()))
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = BlobCache::new(1 << 20);
        let err = cache
            .get_or_decode("f::p", || async { Err(LsifError::NotFound("p".into())) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let err = cache
            .get_or_decode("f::p", || async { Ok(b"not a blob".to_vec()) })
            .await
            .unwrap_err();
        assert!(matches!(err, LsifError::Decode(_)));
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn invalidation_is_scoped_to_one_file() {
        let cache = BlobCache::new(1 << 20);
        for key in ["a.lsif::x", "a.lsif::y", "a.lsif.old::x"] {
            cache.get_or_decode(key, || async { Ok(encoded()) }).await.unwrap();
        }
        assert_eq!(cache.invalidate_file("a.lsif"), 2);
        assert_eq!(cache.stats().entries, 1);
    }
}
