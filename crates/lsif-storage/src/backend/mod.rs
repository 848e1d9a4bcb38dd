//! The storage backends a repository@commit can be served from.

mod blob;
mod graph;
mod json;
pub(crate) mod sqlite;

pub use blob::{write_blob_database, BlobBackend};
pub use graph::{write_graph_database, GraphBackend};
pub use json::JsonBackend;

use crate::uri::{UriTransformer, UriTransformerFactory};
use async_trait::async_trait;
use lsif_core::{BackendFlags, Location, LsifError, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Read access to one encoded dump. Paths are relative to the dump's project root.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Encoded [`DocumentBlob`](crate::DocumentBlob) for `path`, or `NotFound`.
    async fn document_blob(&self, path: &str) -> Result<Vec<u8>>;

    async fn definitions_by_moniker(&self, scheme: &str, identifier: &str)
        -> Result<Vec<Location>>;

    async fn references_by_moniker(&self, scheme: &str, identifier: &str) -> Result<Vec<Location>>;

    /// Release file handles. Later calls fail with a storage error.
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Json,
    Graph,
    Blob,
}

impl BackendKind {
    /// Lookup priority.
    pub const ALL: [BackendKind; 3] = [BackendKind::Json, BackendKind::Graph, BackendKind::Blob];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Json => "json",
            BackendKind::Graph => "graph",
            BackendKind::Blob => "blob",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            BackendKind::Json => ".lsif",
            BackendKind::Graph => ".graph.db",
            BackendKind::Blob => ".blob.db",
        }
    }

    pub fn is_enabled(self, flags: &BackendFlags) -> bool {
        match self {
            BackendKind::Json => flags.json,
            BackendKind::Graph => flags.graph,
            BackendKind::Blob => flags.blob,
        }
    }

    /// Split a stored file name into its encoding and base name.
    pub fn split_file_name(file_name: &str) -> Option<(BackendKind, &str)> {
        Self::ALL.iter().find_map(|kind| {
            file_name
                .strip_suffix(kind.extension())
                .filter(|base| !base.is_empty())
                .map(|base| (*kind, base))
        })
    }

    pub async fn load(
        self,
        path: &Path,
        factory: UriTransformerFactory,
    ) -> Result<Arc<dyn StorageBackend>> {
        let path = path.to_path_buf();
        let backend: Arc<dyn StorageBackend> = match self {
            BackendKind::Json => {
                Arc::new(run_blocking(move || JsonBackend::load(&path, &factory)).await?)
            }
            BackendKind::Graph => {
                Arc::new(run_blocking(move || GraphBackend::load(&path, &factory)).await?)
            }
            BackendKind::Blob => {
                Arc::new(run_blocking(move || BlobBackend::load(&path, &factory)).await?)
            }
        };
        Ok(backend)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn transformer_for(
    project_root: Option<&str>,
    factory: &UriTransformerFactory,
) -> UriTransformer {
    match project_root {
        Some(root) => factory(root),
        None => UriTransformer::noop(),
    }
}

pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LsifError::Storage(format!("blocking task failed: {}", e)))?
}

pub(crate) fn document_not_found(path: &str) -> LsifError {
    LsifError::NotFound(format!("no document {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_split_into_kind_and_base() {
        assert_eq!(
            BackendKind::split_file_name("repo@abc.graph.db"),
            Some((BackendKind::Graph, "repo@abc"))
        );
        assert_eq!(
            BackendKind::split_file_name("repo@abc.lsif"),
            Some((BackendKind::Json, "repo@abc"))
        );
        assert_eq!(BackendKind::split_file_name("xrepo.db"), None);
        assert_eq!(BackendKind::split_file_name(".lsif"), None);
    }
}
