use super::sqlite::{
    create_output, document_exists, write_meta, write_moniker_rows, MonikerTable,
    SqliteHandle,
};
use super::{document_not_found, transformer_for, BackendKind, StorageBackend};
use crate::codec::encode_blob;
use crate::dump::{Edge, Element, LsifDump};
use crate::model::Id;
use crate::uri::{UriTransformer, UriTransformerFactory};
use async_trait::async_trait;
use lsif_core::{Location, LsifError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::path::Path;

const FORMAT: &str = "graph";

const SCHEMA: &str = r#"
    CREATE TABLE vertices (
        id TEXT PRIMARY KEY,
        label TEXT NOT NULL,
        value TEXT NOT NULL
    );

    CREATE TABLE edges (
        out_v TEXT NOT NULL,
        in_v TEXT NOT NULL,
        label TEXT NOT NULL,
        document TEXT,
        property TEXT
    );
    CREATE INDEX idx_edges_out_v ON edges(out_v);

    CREATE TABLE documents (
        uri TEXT PRIMARY KEY,
        id TEXT NOT NULL
    );
"#;

/// Write the vertex/edge encoding of a dump.
pub fn write_graph_database(path: &Path, elements: &[Element], dump: &LsifDump) -> Result<()> {
    let mut conn = create_output(path, SCHEMA)?;
    let tx = conn.transaction()?;
    write_meta(&tx, FORMAT, dump.project_root())?;
    {
        let mut insert_vertex =
            tx.prepare("INSERT OR REPLACE INTO vertices (id, label, value) VALUES (?1, ?2, ?3)")?;
        let mut insert_edge = tx.prepare(
            "INSERT INTO edges (out_v, in_v, label, document, property) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for element in elements {
            match element {
                Element::Vertex { id, label, value } => {
                    insert_vertex.execute(params![id.as_str(), label, value.to_string()])?;
                }
                Element::Edge(edge) => {
                    for target in edge.targets() {
                        insert_edge.execute(params![
                            edge.out_v.as_str(),
                            target.as_str(),
                            edge.label,
                            edge.document.as_ref().map(Id::as_str),
                            edge.property,
                        ])?;
                    }
                }
            }
        }

        let mut insert_document =
            tx.prepare("INSERT OR REPLACE INTO documents (uri, id) VALUES (?1, ?2)")?;
        for (id, uri) in dump.documents() {
            insert_document.execute(params![uri, id.as_str()])?;
        }
    }
    write_moniker_rows(&tx, MonikerTable::Defs, &dump.definition_rows())?;
    write_moniker_rows(&tx, MonikerTable::Refs, &dump.reference_rows())?;
    tx.commit()?;
    Ok(())
}

/// Serves a vertex/edge database, correlating one document's sub-graph per request.
pub struct GraphBackend {
    db: SqliteHandle,
    transformer: UriTransformer,
}

impl GraphBackend {
    pub fn load(path: &Path, factory: &UriTransformerFactory) -> Result<Self> {
        let (db, project_root) = SqliteHandle::open(path, FORMAT)?;
        Ok(Self {
            db,
            transformer: transformer_for(project_root.as_deref(), factory),
        })
    }
}

/// Edges walked outward from a document. `contains` is only followed from the
/// document itself and `item` edges are kept but never followed, so ranges of
/// other documents stay out of the sub-graph.
fn follows(label: &str) -> bool {
    matches!(
        label,
        "next"
            | "textDocument/definition"
            | "textDocument/references"
            | "textDocument/hover"
            | "moniker"
            | "packageInformation"
    )
}

fn collect_subgraph(conn: &Connection, document: &Id) -> Result<Vec<Element>> {
    let mut vertex_stmt = conn.prepare_cached("SELECT label, value FROM vertices WHERE id = ?1")?;
    let mut edge_stmt = conn.prepare_cached(
        "SELECT label, in_v, document, property FROM edges WHERE out_v = ?1 ORDER BY rowid",
    )?;

    let mut elements = Vec::new();
    let mut seen = HashSet::from([document.clone()]);
    let mut queue = VecDeque::from([document.clone()]);

    while let Some(id) = queue.pop_front() {
        let vertex: Option<(String, String)> = vertex_stmt
            .query_row(params![id.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((label, raw)) = vertex else {
            continue;
        };
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| LsifError::Decode(format!("vertex {}: {}", id, e)))?;
        elements.push(Element::Vertex {
            id: id.clone(),
            label,
            value,
        });

        let edges = edge_stmt
            .query_map(params![id.as_str()], |row| {
                Ok(Edge {
                    label: row.get(0)?,
                    out_v: id.clone(),
                    in_v: Some(Id::new(row.get::<_, String>(1)?)),
                    in_vs: Vec::new(),
                    document: row.get::<_, Option<String>>(2)?.map(Id::new),
                    property: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for edge in edges {
            let walk = follows(&edge.label) || (edge.label == "contains" && id == *document);
            if walk {
                for target in edge.targets() {
                    if seen.insert(target.clone()) {
                        queue.push_back(target.clone());
                    }
                }
            }
            elements.push(Element::Edge(edge));
        }
    }
    Ok(elements)
}

#[async_trait]
impl StorageBackend for GraphBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let uri = self.transformer.to_database(path);
        self.db.read(move |conn| document_exists(conn, &uri)).await
    }

    async fn document_blob(&self, path: &str) -> Result<Vec<u8>> {
        let uri = self.transformer.to_database(path);
        let path = path.to_string();
        // the subgraph walk touches many rows, so it stays off the runtime threads
        let blob = self
            .db
            .read(move |conn| {
                let document: Option<String> = conn
                    .query_row(
                        "SELECT id FROM documents WHERE uri = ?1",
                        params![uri],
                        |row| row.get(0),
                    )
                    .optional()?;
                let document = Id::new(document.ok_or_else(|| document_not_found(&path))?);
                let elements = collect_subgraph(conn, &document)?;
                LsifDump::from_elements(&elements)?
                    .document_blob(&document)
                    .ok_or_else(|| document_not_found(&path))
            })
            .await?;
        encode_blob(&blob)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_blob;
    use crate::dump::parse_elements;
    use crate::uri::project_root_factory;
    use lsif_core::{Position, Range};
    use tempfile::TempDir;

    const REPO_A: &str = include_str!("../../tests/fixtures/repo-a.lsif");

    fn write_fixture(dir: &TempDir) -> std::path::PathBuf {
        let elements = parse_elements(REPO_A.as_bytes()).unwrap();
        let dump = LsifDump::from_elements(&elements).unwrap();
        let path = dir.path().join("a.graph.db");
        write_graph_database(&path, &elements, &dump).unwrap();
        path
    }

    #[tokio::test]
    async fn subgraph_blob_matches_the_in_memory_blob() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);
        let backend = GraphBackend::load(&path, &project_root_factory()).unwrap();

        let from_graph =
            decode_blob(&backend.document_blob("src/index.ts").await.unwrap()).unwrap();
        let dump = LsifDump::from_bytes(REPO_A.as_bytes()).unwrap();
        let id = dump.document_id("file:///a/src/index.ts").unwrap();
        let expected = dump.document_blob(id).unwrap();

        assert_eq!(from_graph, expected);
        assert!(from_graph.find_range(Position::new(2, 3)).is_some());
    }

    #[tokio::test]
    async fn moniker_tables_and_document_lookup() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);
        let backend = GraphBackend::load(&path, &project_root_factory()).unwrap();

        assert!(backend.exists("src/other.ts").await.unwrap());
        assert!(!backend.exists("nope.ts").await.unwrap());
        assert!(backend.document_blob("nope.ts").await.unwrap_err().is_not_found());
        assert_eq!(
            backend.definitions_by_moniker("tsc", "other:baz").await.unwrap(),
            vec![Location::new("src/other.ts", Range::new(0, 9, 0, 12))]
        );

        backend.close().await.unwrap();
        assert!(backend.exists("src/other.ts").await.is_err());
    }

    #[test]
    fn other_encodings_are_rejected() {
        let dir = TempDir::new().unwrap();
        let elements = parse_elements(REPO_A.as_bytes()).unwrap();
        let dump = LsifDump::from_elements(&elements).unwrap();
        let path = dir.path().join("a.blob.db");
        crate::backend::write_blob_database(&path, &dump).unwrap();
        assert!(GraphBackend::load(&path, &project_root_factory()).is_err());
    }
}
