use crate::blob_cache::BlobCache;
use crate::database::Database;
use async_trait::async_trait;
use lsif_cache::{CacheStats, ResidentCache};
use lsif_core::{CacheConfig, RepositoryCommit, Result};
use lsif_storage::{
    dump_path, dump_weight, project_root_factory, BackendKind, CrossRepoIndex, MultiBackend,
    UriTransformerFactory,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::info;

/// Opens databases for other repositories during remote lookups.
#[async_trait]
pub trait DatabaseResolver: Send + Sync {
    async fn resolve(&self, target: &RepositoryCommit) -> Result<Arc<Database>>;
}

/// Every database this process has open, bounded by the resident memory budget.
pub struct Databases {
    root: PathBuf,
    backends: MultiBackend,
    factory: UriTransformerFactory,
    resident: ResidentCache<Database>,
    blobs: Arc<BlobCache>,
    xrepo: Arc<dyn CrossRepoIndex>,
    this: Weak<Databases>,
}

impl Databases {
    pub fn new(
        root: impl Into<PathBuf>,
        backends: MultiBackend,
        cache: &CacheConfig,
        xrepo: Arc<dyn CrossRepoIndex>,
    ) -> Arc<Self> {
        let root = root.into();
        Arc::new_cyclic(|this| Self {
            root,
            backends,
            factory: project_root_factory(),
            resident: ResidentCache::new(cache.soft_max_memory_bytes),
            blobs: Arc::new(BlobCache::new(cache.blob_cache_max_bytes)),
            xrepo,
            this: this.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backends(&self) -> &MultiBackend {
        &self.backends
    }

    pub fn xrepo(&self) -> &Arc<dyn CrossRepoIndex> {
        &self.xrepo
    }

    /// `<root>/<urlencoded repository>@<commit>`, without an encoding extension.
    pub fn base_path(&self, target: &RepositoryCommit) -> PathBuf {
        self.root.join(target.hash_key())
    }

    pub async fn has_data(&self, target: &RepositoryCommit) -> bool {
        self.backends.has_data(&self.base_path(target)).await
    }

    /// The cached database for `target`, loading it on first use.
    pub async fn get(&self, target: &RepositoryCommit) -> Result<Arc<Database>> {
        let key = target.hash_key();
        let base = self.base_path(target);

        let load = {
            let backends = self.backends;
            let factory = self.factory.clone();
            let blobs = self.blobs.clone();
            let xrepo = self.xrepo.clone();
            let resolver: Weak<dyn DatabaseResolver> = self.this.clone();
            let target = target.clone();
            let base = base.clone();
            move || async move {
                let loaded = backends.load(&base, factory).await?;
                Ok(Database::new(target, loaded, blobs, xrepo, resolver))
            }
        };

        self.resident
            .get_or_load(&key, || dump_weight(&base), load)
            .await
    }

    /// Close and forget the database for `target`, e.g. after its files are replaced.
    pub async fn evict(&self, target: &RepositoryCommit) -> bool {
        self.evict_key(&target.hash_key()).await
    }

    /// Same as [`Databases::evict`], addressed by the on-disk base name.
    pub async fn evict_key(&self, key: &str) -> bool {
        let evicted = self.resident.remove(key).await;
        if evicted {
            info!(key, "Evicted resident database");
        }
        evicted
    }

    /// Drop decoded blobs of every encoding stored for `target`.
    pub fn invalidate_blobs(&self, target: &RepositoryCommit) -> usize {
        let base = self.base_path(target);
        BackendKind::ALL
            .into_iter()
            .map(|kind| self.invalidate_file(&dump_path(&base, kind)))
            .sum()
    }

    pub fn invalidate_file(&self, file: &Path) -> usize {
        self.blobs.invalidate_file(&file.display().to_string())
    }

    pub fn resident_stats(&self) -> CacheStats {
        self.resident.stats()
    }

    pub fn blob_stats(&self) -> CacheStats {
        self.blobs.stats()
    }
}

#[async_trait]
impl DatabaseResolver for Databases {
    async fn resolve(&self, target: &RepositoryCommit) -> Result<Arc<Database>> {
        self.get(target).await
    }
}
