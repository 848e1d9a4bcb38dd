use super::sqlite::{
    create_output, document_exists, write_meta, write_moniker_rows, MonikerTable,
    SqliteHandle,
};
use super::{document_not_found, transformer_for, BackendKind, StorageBackend};
use crate::codec::encode_blob;
use crate::dump::LsifDump;
use crate::uri::{UriTransformer, UriTransformerFactory};
use async_trait::async_trait;
use lsif_core::{Location, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

const FORMAT: &str = "blob";

const SCHEMA: &str = r#"
    CREATE TABLE documents (
        uri TEXT PRIMARY KEY,
        hash TEXT NOT NULL
    );

    CREATE TABLE blobs (
        hash TEXT PRIMARY KEY,
        content BLOB NOT NULL
    );
"#;

/// Write pre-encoded document blobs. Identical blobs are stored once.
pub fn write_blob_database(path: &Path, dump: &LsifDump) -> Result<()> {
    let mut conn = create_output(path, SCHEMA)?;
    let tx = conn.transaction()?;
    write_meta(&tx, FORMAT, dump.project_root())?;
    let mut distinct = 0usize;
    {
        let mut insert_blob =
            tx.prepare("INSERT OR IGNORE INTO blobs (hash, content) VALUES (?1, ?2)")?;
        let mut insert_document =
            tx.prepare("INSERT OR REPLACE INTO documents (uri, hash) VALUES (?1, ?2)")?;
        for (id, uri) in dump.documents() {
            let Some(blob) = dump.document_blob(id) else {
                continue;
            };
            let content = encode_blob(&blob)?;
            let hash = format!("{:x}", Sha256::digest(&content));
            distinct += insert_blob.execute(params![hash, content])?;
            insert_document.execute(params![uri, hash])?;
        }
    }
    write_moniker_rows(&tx, MonikerTable::Defs, &dump.definition_rows())?;
    write_moniker_rows(&tx, MonikerTable::Refs, &dump.reference_rows())?;
    tx.commit()?;
    debug!(path = %path.display(), blobs = distinct, "Wrote blob database");
    Ok(())
}

/// Serves pre-encoded document blobs.
pub struct BlobBackend {
    db: SqliteHandle,
    transformer: UriTransformer,
}

impl BlobBackend {
    pub fn load(path: &Path, factory: &UriTransformerFactory) -> Result<Self> {
        let (db, project_root) = SqliteHandle::open(path, FORMAT)?;
        Ok(Self {
            db,
            transformer: transformer_for(project_root.as_deref(), factory),
        })
    }
}

#[async_trait]
impl StorageBackend for BlobBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Blob
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let uri = self.transformer.to_database(path);
        self.db.read(move |conn| document_exists(conn, &uri)).await
    }

    async fn document_blob(&self, path: &str) -> Result<Vec<u8>> {
        let uri = self.transformer.to_database(path);
        let path = path.to_string();
        self.db
            .read(move |conn| {
                conn.query_row(
                    "SELECT b.content FROM documents d JOIN blobs b ON b.hash = d.hash WHERE d.uri = ?1",
                    params![uri],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?
                .ok_or_else(|| document_not_found(&path))
            })
            .await
    }

    async fn definitions_by_moniker(
        &self,
        scheme: &str,
        identifier: &str,
    ) -> Result<Vec<Location>> {
        self.db
            .moniker_locations(MonikerTable::Defs, scheme, identifier, &self.transformer)
            .await
    }

    async fn references_by_moniker(&self, scheme: &str, identifier: &str) -> Result<Vec<Location>> {
        self.db
            .moniker_locations(MonikerTable::Refs, scheme, identifier, &self.transformer)
            .await
    }

    async fn close(&self) -> Result<()> {
        self.db.close().await
    }
}
