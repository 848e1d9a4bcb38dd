//! Which repository@commit defines a package, and which ones reference it.

use crate::backend::run_blocking;
use crate::dump::LsifDump;
use async_trait::async_trait;
use lsif_core::{MonikerKind, RepositoryCommit, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A package and the repository@commit that provides it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageModel {
    pub scheme: String,
    pub name: String,
    pub version: String,
    pub repository: String,
    pub commit: String,
}

/// A repository@commit that uses symbols of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceModel {
    pub scheme: String,
    pub name: String,
    pub version: String,
    pub repository: String,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PackageEntry {
    pub scheme: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub package: PackageEntry,
    pub identifiers: Vec<String>,
}

#[async_trait]
pub trait CrossRepoIndex: Send + Sync {
    async fn get_package(
        &self,
        scheme: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<PackageModel>>;

    async fn get_references(
        &self,
        scheme: &str,
        name: &str,
        version: &str,
        identifier: &str,
    ) -> Result<Vec<ReferenceModel>>;

    /// Replace everything recorded for `target` with the given entries.
    async fn add_packages_and_references(
        &self,
        target: &RepositoryCommit,
        packages: &[PackageEntry],
        references: &[ReferenceEntry],
    ) -> Result<()>;
}

/// Packages exported by a dump and the imported packages with the identifiers used from each.
pub fn packages_and_references(dump: &LsifDump) -> (Vec<PackageEntry>, Vec<ReferenceEntry>) {
    let mut exported = BTreeSet::new();
    let mut imported: BTreeMap<PackageEntry, BTreeSet<String>> = BTreeMap::new();
    for (moniker, package) in dump.monikers_with_packages() {
        let Some(package) = package else {
            continue;
        };
        let entry = PackageEntry {
            scheme: moniker.scheme.clone(),
            name: package.name.clone(),
            version: package.version.clone(),
        };
        match moniker.kind {
            MonikerKind::Export => {
                exported.insert(entry);
            }
            MonikerKind::Import => {
                imported.entry(entry).or_default().insert(moniker.identifier);
            }
            MonikerKind::Local => {}
        }
    }

    let references = imported
        .into_iter()
        .map(|(package, identifiers)| ReferenceEntry {
            package,
            identifiers: identifiers.into_iter().collect(),
        })
        .collect();
    (exported.into_iter().collect(), references)
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS packages (
        scheme TEXT NOT NULL,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        repository TEXT NOT NULL,
        commit_hash TEXT NOT NULL,
        PRIMARY KEY (scheme, name, version)
    );

    CREATE TABLE IF NOT EXISTS package_references (
        scheme TEXT NOT NULL,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        identifier TEXT NOT NULL,
        repository TEXT NOT NULL,
        commit_hash TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_package_references_lookup
        ON package_references(scheme, name, version, identifier);
    CREATE INDEX IF NOT EXISTS idx_package_references_source
        ON package_references(repository, commit_hash);
"#;

/// Cross-repository index kept in a sqlite file next to the dumps.
pub struct SqliteCrossRepoIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCrossRepoIndex {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with the connection locked, on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || f(&mut conn.lock())).await
    }
}

#[async_trait]
impl CrossRepoIndex for SqliteCrossRepoIndex {
    async fn get_package(
        &self,
        scheme: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<PackageModel>> {
        let (scheme, name, version) = (scheme.to_string(), name.to_string(), version.to_string());
        self.call(move |conn| {
            let found = conn
                .query_row(
                    "SELECT repository, commit_hash FROM packages
                     WHERE scheme = ?1 AND name = ?2 AND version = ?3",
                    params![scheme, name, version],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            Ok(found.map(|(repository, commit)| PackageModel {
                scheme,
                name,
                version,
                repository,
                commit,
            }))
        })
        .await
    }

    async fn get_references(
        &self,
        scheme: &str,
        name: &str,
        version: &str,
        identifier: &str,
    ) -> Result<Vec<ReferenceModel>> {
        let (scheme, name, version) = (scheme.to_string(), name.to_string(), version.to_string());
        let identifier = identifier.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT repository, commit_hash FROM package_references
                 WHERE scheme = ?1 AND name = ?2 AND version = ?3 AND identifier = ?4
                 ORDER BY repository, commit_hash",
            )?;
            let rows = stmt
                .query_map(params![scheme, name, version, identifier], |row| {
                    Ok(ReferenceModel {
                        scheme: scheme.clone(),
                        name: name.clone(),
                        version: version.clone(),
                        repository: row.get(0)?,
                        commit: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn add_packages_and_references(
        &self,
        target: &RepositoryCommit,
        packages: &[PackageEntry],
        references: &[ReferenceEntry],
    ) -> Result<()> {
        let (package_count, reference_count) = (packages.len(), references.len());
        let owner = target.clone();
        let packages = packages.to_vec();
        let references = references.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM packages WHERE repository = ?1 AND commit_hash = ?2",
                params![owner.repository, owner.commit],
            )?;
            tx.execute(
                "DELETE FROM package_references WHERE repository = ?1 AND commit_hash = ?2",
                params![owner.repository, owner.commit],
            )?;
            {
                let mut insert_package = tx.prepare(
                    "INSERT OR REPLACE INTO packages (scheme, name, version, repository, commit_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for package in &packages {
                    insert_package.execute(params![
                        package.scheme,
                        package.name,
                        package.version,
                        owner.repository,
                        owner.commit,
                    ])?;
                }

                let mut insert_reference = tx.prepare(
                    "INSERT INTO package_references (scheme, name, version, identifier, repository, commit_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for reference in &references {
                    for identifier in &reference.identifiers {
                        insert_reference.execute(params![
                            reference.package.scheme,
                            reference.package.name,
                            reference.package.version,
                            identifier,
                            owner.repository,
                            owner.commit,
                        ])?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        info!(
            database = %target,
            packages = package_count,
            references = reference_count,
            "Updated cross-repository index"
        );
        Ok(())
    }
}
