use super::{document_not_found, transformer_for, BackendKind, StorageBackend};
use crate::codec::encode_blob;
use crate::dump::{LsifDump, MonikerRow};
use crate::uri::{UriTransformer, UriTransformerFactory};
use async_trait::async_trait;
use lsif_core::{Location, LsifError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

type MonikerIndex = HashMap<(String, String), Vec<Location>>;

struct JsonData {
    dump: LsifDump,
    definitions: MonikerIndex,
    references: MonikerIndex,
}

/// Serves a raw dump held entirely in memory.
pub struct JsonBackend {
    transformer: UriTransformer,
    data: RwLock<Option<Arc<JsonData>>>,
}

impl JsonBackend {
    pub fn load(path: &Path, factory: &UriTransformerFactory) -> Result<Self> {
        let dump = LsifDump::from_path(path)?;
        debug!(path = %path.display(), "Loaded raw dump");
        Ok(Self::from_dump(dump, factory))
    }

    pub fn from_dump(dump: LsifDump, factory: &UriTransformerFactory) -> Self {
        let transformer = transformer_for(dump.project_root(), factory);
        let definitions = index_rows(dump.definition_rows(), &transformer);
        let references = index_rows(dump.reference_rows(), &transformer);
        Self {
            transformer,
            data: RwLock::new(Some(Arc::new(JsonData {
                dump,
                definitions,
                references,
            }))),
        }
    }

    fn data(&self) -> Result<Arc<JsonData>> {
        self.data
            .read()
            .clone()
            .ok_or_else(|| LsifError::Storage("dump is closed".into()))
    }

    fn lookup(index: &MonikerIndex, scheme: &str, identifier: &str) -> Vec<Location> {
        index
            .get(&(scheme.to_string(), identifier.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

fn index_rows(rows: Vec<MonikerRow>, transformer: &UriTransformer) -> MonikerIndex {
    let mut index = MonikerIndex::new();
    for row in rows {
        index
            .entry((row.scheme, row.identifier))
            .or_default()
            .push(Location::new(transformer.from_database(&row.document_uri), row.range));
    }
    index
}

#[async_trait]
impl StorageBackend for JsonBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Json
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let uri = self.transformer.to_database(path);
        Ok(self.data()?.dump.document_id(&uri).is_some())
    }

    async fn document_blob(&self, path: &str) -> Result<Vec<u8>> {
        let data = self.data()?;
        let uri = self.transformer.to_database(path);
        let blob = data
            .dump
            .document_id(&uri)
            .and_then(|id| data.dump.document_blob(id))
            .ok_or_else(|| document_not_found(path))?;
        encode_blob(&blob)
    }

    async fn definitions_by_moniker(
        &self,
        scheme: &str,
        identifier: &str,
    ) -> Result<Vec<Location>> {
        Ok(Self::lookup(&self.data()?.definitions, scheme, identifier))
    }

    async fn references_by_moniker(&self, scheme: &str, identifier: &str) -> Result<Vec<Location>> {
        Ok(Self::lookup(&self.data()?.references, scheme, identifier))
    }

    async fn close(&self) -> Result<()> {
        self.data.write().take();
        Ok(())
    }
}
