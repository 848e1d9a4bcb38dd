//! Queries against one repository@commit.

use crate::blob_cache::BlobCache;
use crate::registry::DatabaseResolver;
use async_trait::async_trait;
use lsif_cache::Dispose;
use lsif_core::{Hover, Location, MonikerKind, Position, RepositoryCommit, Result};
use lsif_storage::{
    BackendKind, CrossRepoIndex, DocumentBlob, LoadedBackend, MonikerData, ResultProperty,
    StorageBackend,
};
use serde::Serialize;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// A definition query answer: local results come as a list, a remote
/// definition as the single first match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Definitions {
    One(Location),
    Many(Vec<Location>),
}

impl Definitions {
    pub fn into_vec(self) -> Vec<Location> {
        match self {
            Definitions::One(location) => vec![location],
            Definitions::Many(locations) => locations,
        }
    }
}

/// Producers disagree on the second segment of npm moniker identifiers, so it
/// is blanked before looking the identifier up in another dump:
/// `b:lib/util:bar` is queried as `b::bar`.
// FIXME: drop once moniker identifiers agree between exporting and importing dumps.
pub fn blank_second_segment(identifier: &str) -> String {
    let mut parts: Vec<&str> = identifier.split(':').collect();
    if parts.len() > 1 {
        parts[1] = "";
    } else {
        parts.push("");
    }
    parts.join(":")
}

pub struct Database {
    target: RepositoryCommit,
    file: String,
    kind: BackendKind,
    backend: Arc<dyn StorageBackend>,
    blobs: Arc<BlobCache>,
    xrepo: Arc<dyn CrossRepoIndex>,
    resolver: Weak<dyn DatabaseResolver>,
}

impl Database {
    pub fn new(
        target: RepositoryCommit,
        loaded: LoadedBackend,
        blobs: Arc<BlobCache>,
        xrepo: Arc<dyn CrossRepoIndex>,
        resolver: Weak<dyn DatabaseResolver>,
    ) -> Self {
        Self {
            target,
            file: loaded.path.display().to_string(),
            kind: loaded.kind,
            backend: loaded.backend,
            blobs,
            xrepo,
            resolver,
        }
    }

    pub fn target(&self) -> &RepositoryCommit {
        &self.target
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.backend.exists(path).await
    }

    async fn blob(&self, path: &str) -> Result<Arc<DocumentBlob>> {
        let key = BlobCache::key(&self.file, path);
        self.blobs
            .get_or_decode(&key, || self.backend.document_blob(path))
            .await
    }

    /// `None` when nothing sits at `position` or no definition can be resolved.
    pub async fn definitions(&self, path: &str, position: Position) -> Result<Option<Definitions>> {
        let blob = self.blob(path).await?;
        let Some(range) = blob.find_range(position) else {
            return Ok(None);
        };

        if let Some(result) = blob.find_result(
            &blob.definition_results,
            &range.chain,
            ResultProperty::Definition,
        ) {
            return Ok(Some(Definitions::Many(blob.locations(path, &result.values))));
        }

        for moniker in blob.find_monikers(&range.chain) {
            if moniker.kind == MonikerKind::Import {
                return Ok(self
                    .remote_definition(&blob, moniker)
                    .await
                    .map(Definitions::One));
            }
            let local = self
                .backend
                .definitions_by_moniker(&moniker.scheme, &moniker.identifier)
                .await?;
            if !local.is_empty() {
                return Ok(Some(Definitions::Many(local)));
            }
        }
        Ok(None)
    }

    pub async fn references(&self, path: &str, position: Position) -> Result<Option<Vec<Location>>> {
        let blob = self.blob(path).await?;
        let Some(range) = blob.find_range(position) else {
            return Ok(None);
        };

        let result = blob.find_result(
            &blob.reference_results,
            &range.chain,
            ResultProperty::Reference,
        );
        let monikers = blob.find_monikers(&range.chain);

        let mut locations = match result {
            Some(result) => {
                let mut locations = blob.locations(path, &result.definitions);
                locations.extend(blob.locations(path, &result.references));
                locations
            }
            None => self.local_references(&monikers).await?,
        };

        if let Some(moniker) = monikers.iter().find(|m| m.kind == MonikerKind::Export) {
            locations.extend(self.remote_references(&blob, moniker).await);
        }
        Ok(Some(locations))
    }

    pub async fn hover(&self, path: &str, position: Position) -> Result<Option<Hover>> {
        let blob = self.blob(path).await?;
        Ok(blob
            .find_range(position)
            .and_then(|range| blob.find_result(&blob.hovers, &range.chain, ResultProperty::Hover))
            .cloned())
    }

    pub async fn definitions_by_moniker(&self, scheme: &str, identifier: &str) -> Result<Vec<Location>> {
        self.backend.definitions_by_moniker(scheme, identifier).await
    }

    pub async fn references_by_moniker(&self, scheme: &str, identifier: &str) -> Result<Vec<Location>> {
        self.backend.references_by_moniker(scheme, identifier).await
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }

    /// Stops at the first moniker with any reference rows.
    async fn local_references(&self, monikers: &[&MonikerData]) -> Result<Vec<Location>> {
        for moniker in monikers {
            let references = self
                .backend
                .references_by_moniker(&moniker.scheme, &moniker.identifier)
                .await?;
            if !references.is_empty() {
                return Ok(references);
            }
        }
        Ok(Vec::new())
    }

    async fn remote_definition(&self, blob: &DocumentBlob, moniker: &MonikerData) -> Option<Location> {
        let package = blob.package_for(moniker)?;
        let model = match self
            .xrepo
            .get_package(&moniker.scheme, &package.name, &package.version)
            .await
        {
            Ok(found) => found?,
            Err(e) => {
                warn!(package = %package.name, error = %e, "Package lookup failed");
                return None;
            }
        };

        let remote = self.remote(&model.repository, &model.commit).await?;
        let identifier = blank_second_segment(&moniker.identifier);
        match remote.definitions_by_moniker(&moniker.scheme, &identifier).await {
            Ok(definitions) => definitions.into_iter().next().map(|location| {
                Location::remote(&model.repository, &model.commit, &location.uri, location.range)
            }),
            Err(e) => {
                warn!(database = %remote.target(), error = %e, "Remote definition lookup failed");
                None
            }
        }
    }

    async fn remote_references(&self, blob: &DocumentBlob, moniker: &MonikerData) -> Vec<Location> {
        let Some(package) = blob.package_for(moniker) else {
            return Vec::new();
        };
        let references = match self
            .xrepo
            .get_references(
                &moniker.scheme,
                &package.name,
                &package.version,
                &moniker.identifier,
            )
            .await
        {
            Ok(references) => references,
            Err(e) => {
                warn!(package = %package.name, error = %e, "Reference lookup failed");
                return Vec::new();
            }
        };

        let identifier = blank_second_segment(&moniker.identifier);
        let mut locations = Vec::new();
        for reference in references {
            let Some(remote) = self.remote(&reference.repository, &reference.commit).await else {
                continue;
            };
            match remote.references_by_moniker(&moniker.scheme, &identifier).await {
                Ok(found) => locations.extend(found.into_iter().map(|location| {
                    Location::remote(
                        &reference.repository,
                        &reference.commit,
                        &location.uri,
                        location.range,
                    )
                })),
                Err(e) => {
                    warn!(database = %remote.target(), error = %e, "Remote reference lookup failed")
                }
            }
        }
        locations
    }

    async fn remote(&self, repository: &str, commit: &str) -> Option<Arc<Database>> {
        let resolver = self.resolver.upgrade()?;
        let target = RepositoryCommit {
            repository: repository.to_string(),
            commit: commit.to_string(),
        };
        match resolver.resolve(&target).await {
            Ok(database) => Some(database),
            Err(e) => {
                warn!(database = %target, error = %e, "Remote database unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl Dispose for Database {
    async fn dispose(&self) {
        debug!(database = %self.target, backend = %self.kind, "Closing database");
        if let Err(e) = self.close().await {
            warn!(database = %self.target, error = %e, "Failed to close database");
        }
    }
}
