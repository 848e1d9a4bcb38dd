use crate::backend::{BackendKind, StorageBackend};
use crate::uri::UriTransformerFactory;
use lsif_core::{BackendFlags, LsifError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `<base><extension>` for one encoding.
pub fn dump_path(base: &Path, kind: BackendKind) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(kind.extension());
    PathBuf::from(name)
}

/// A backend picked by [`MultiBackend::load`].
#[derive(Clone)]
pub struct LoadedBackend {
    pub kind: BackendKind,
    pub path: PathBuf,
    pub backend: Arc<dyn StorageBackend>,
}

/// Tries each enabled encoding in priority order and serves the first that loads.
#[derive(Debug, Clone, Copy)]
pub struct MultiBackend {
    flags: BackendFlags,
}

impl MultiBackend {
    pub fn new(flags: BackendFlags) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> BackendFlags {
        self.flags
    }

    pub fn enabled(&self) -> impl Iterator<Item = BackendKind> + '_ {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| kind.is_enabled(&self.flags))
    }

    pub async fn load(&self, base: &Path, factory: UriTransformerFactory) -> Result<LoadedBackend> {
        for kind in self.enabled() {
            let path = dump_path(base, kind);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!(backend = %kind, path = %path.display(), "No file for backend");
                continue;
            }
            match kind.load(&path, factory.clone()).await {
                Ok(backend) => {
                    info!(backend = %kind, path = %path.display(), "Loaded storage backend");
                    return Ok(LoadedBackend {
                        kind,
                        path,
                        backend,
                    });
                }
                Err(e) => {
                    warn!(backend = %kind, path = %path.display(), error = %e, "Backend failed to load");
                }
            }
        }
        Err(LsifError::NotFound(format!(
            "no LSIF data available for {}",
            base.display()
        )))
    }

    /// Whether any enabled encoding has a file for `base`.
    pub async fn has_data(&self, base: &Path) -> bool {
        for kind in self.enabled() {
            if tokio::fs::try_exists(dump_path(base, kind))
                .await
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }
}

/// Files present for `base` across every encoding, enabled or not.
pub async fn existing_dump_files(base: &Path) -> Vec<(BackendKind, PathBuf, u64)> {
    let mut files = Vec::new();
    for kind in BackendKind::ALL {
        let path = dump_path(base, kind);
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            files.push((kind, path, meta.len()));
        }
    }
    files
}

/// Sum of on-disk sizes across all encodings; stands in for resident memory.
pub async fn dump_weight(base: &Path) -> u64 {
    existing_dump_files(base)
        .await
        .iter()
        .map(|(_, _, size)| *size)
        .sum()
}
