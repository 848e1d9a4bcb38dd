use super::run_blocking;
use crate::dump::MonikerRow;
use crate::uri::UriTransformer;
use lsif_core::{Location, LsifError, Range, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Arc;

/// Tables shared by the graph and blob encodings.
pub(crate) const MONIKER_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS defs (
        scheme TEXT NOT NULL,
        identifier TEXT NOT NULL,
        document_uri TEXT NOT NULL,
        start_line INTEGER NOT NULL,
        start_character INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        end_character INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_defs_moniker ON defs(scheme, identifier);

    CREATE TABLE IF NOT EXISTS refs (
        scheme TEXT NOT NULL,
        identifier TEXT NOT NULL,
        document_uri TEXT NOT NULL,
        start_line INTEGER NOT NULL,
        start_character INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        end_character INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_refs_moniker ON refs(scheme, identifier);
"#;

#[derive(Debug, Clone, Copy)]
pub(crate) enum MonikerTable {
    Defs,
    Refs,
}

impl MonikerTable {
    fn name(self) -> &'static str {
        match self {
            MonikerTable::Defs => "defs",
            MonikerTable::Refs => "refs",
        }
    }
}

/// Start a fresh database at `path`, replacing any previous file.
pub(crate) fn create_output(path: &Path, schema: &str) -> Result<Connection> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(MONIKER_SCHEMA)?;
    conn.execute_batch(schema)?;
    Ok(conn)
}

pub(crate) fn write_meta(tx: &Transaction<'_>, format: &str, project_root: Option<&str>) -> Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('format', ?1)",
        params![format],
    )?;
    if let Some(root) = project_root {
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('projectRoot', ?1)",
            params![root],
        )?;
    }
    Ok(())
}

pub(crate) fn write_moniker_rows(
    tx: &Transaction<'_>,
    table: MonikerTable,
    rows: &[MonikerRow],
) -> Result<()> {
    let mut insert = tx.prepare(&format!(
        "INSERT INTO {} (scheme, identifier, document_uri, start_line, start_character, end_line, end_character)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        table.name()
    ))?;
    for row in rows {
        insert.execute(params![
            row.scheme,
            row.identifier,
            row.document_uri,
            row.range.start.line,
            row.range.start.character,
            row.range.end.line,
            row.range.end.character,
        ])?;
    }
    Ok(())
}

/// An open read-only database, checked to hold the expected encoding.
pub(crate) struct SqliteHandle {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteHandle {
    pub(crate) fn open(path: &Path, format: &str) -> Result<(Self, Option<String>)> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let stored = read_meta(&conn, "format")?;
        if stored.as_deref() != Some(format) {
            return Err(LsifError::Storage(format!(
                "{} is not a {} database",
                path.display(),
                format
            )));
        }
        let project_root = read_meta(&conn, "projectRoot")?;
        Ok((
            Self {
                conn: Arc::new(Mutex::new(Some(conn))),
            },
            project_root,
        ))
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn.lock();
            let conn = guard
                .as_ref()
                .ok_or_else(|| LsifError::Storage("database is closed".into()))?;
            f(conn)
        })
        .await
    }

    pub(crate) async fn moniker_locations(
        &self,
        table: MonikerTable,
        scheme: &str,
        identifier: &str,
        transformer: &UriTransformer,
    ) -> Result<Vec<Location>> {
        let (scheme, identifier) = (scheme.to_string(), identifier.to_string());
        let transformer = transformer.clone();
        self.read(move |conn| query_locations(conn, table, &scheme, &identifier, &transformer))
            .await
    }

    pub(crate) async fn close(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            if let Some(conn) = conn.lock().take() {
                conn.close().map_err(|(_, e)| LsifError::from(e))?;
            }
            Ok(())
        })
        .await
    }
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn document_exists(conn: &Connection, uri: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM documents WHERE uri = ?1",
            params![uri],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn query_locations(
    conn: &Connection,
    table: MonikerTable,
    scheme: &str,
    identifier: &str,
    transformer: &UriTransformer,
) -> Result<Vec<Location>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT document_uri, start_line, start_character, end_line, end_character
         FROM {} WHERE scheme = ?1 AND identifier = ?2 ORDER BY rowid",
        table.name()
    ))?;
    let locations = stmt
        .query_map(params![scheme, identifier], |row| {
            let uri: String = row.get(0)?;
            Ok(Location::new(
                transformer.from_database(&uri),
                Range::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(locations)
}
