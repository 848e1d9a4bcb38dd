//! Keeping the storage root under its soft size limit.

use lsif_core::Result;
use lsif_query::Databases;
use lsif_storage::BackendKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct QuotaReport {
    /// Bytes still stored after enforcement.
    pub total_bytes: u64,
    pub deleted: Vec<PathBuf>,
}

struct StoredFile {
    path: PathBuf,
    key: String,
    size: u64,
    accessed: SystemTime,
}

/// Dump files directly under `root`. The cross-repository index and the temp
/// directory never match a dump extension.
async fn stored_files(root: &Path) -> Result<Vec<StoredFile>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some((_, key)) = name.to_str().and_then(BackendKind::split_file_name) else {
            continue;
        };
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let accessed = metadata
            .accessed()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push(StoredFile {
            path: entry.path(),
            key: key.to_string(),
            size: metadata.len(),
            accessed,
        });
    }
    Ok(files)
}

/// Delete least recently accessed dump files until at most `max` bytes remain.
///
/// Resident databases are evicted before their files go away.
pub async fn enforce_disk_quota(databases: &Databases, max: u64) -> Result<QuotaReport> {
    let mut files = stored_files(databases.root()).await?;
    files.sort_by_key(|f| f.accessed);

    let mut total: u64 = files.iter().map(|f| f.size).sum();
    let mut deleted = Vec::new();
    for file in files {
        if total <= max {
            break;
        }
        databases.evict_key(&file.key).await;
        databases.invalidate_file(&file.path);

        info!(
            path = %file.path.display(),
            bytes = file.size,
            max,
            "Deleting dump to keep disk usage under the limit"
        );
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => {
                total = total.saturating_sub(file.size);
                deleted.push(file.path);
            }
            Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to delete dump"),
        }
    }

    Ok(QuotaReport {
        total_bytes: total,
        deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsif_core::CacheConfig;
    use lsif_storage::{MultiBackend, SqliteCrossRepoIndex};
    use std::fs::{File, FileTimes};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_aged(dir: &Path, name: &str, size: usize, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![b'x'; size]).unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_times(FileTimes::new().set_accessed(when).set_modified(when))
            .unwrap();
        path
    }

    fn databases(root: &Path) -> Arc<Databases> {
        Databases::new(
            root,
            MultiBackend::new(Default::default()),
            &CacheConfig::default(),
            Arc::new(SqliteCrossRepoIndex::in_memory().unwrap()),
        )
    }

    #[tokio::test]
    async fn oldest_dumps_are_deleted_first() {
        let dir = TempDir::new().unwrap();
        let oldest = write_aged(dir.path(), "a@1.lsif", 100, 300);
        let middle = write_aged(dir.path(), "a@1.blob.db", 100, 200);
        let newest = write_aged(dir.path(), "b@2.graph.db", 100, 100);
        let index = write_aged(dir.path(), "xrepo.db", 1000, 1000);
        std::fs::create_dir(dir.path().join("tmp")).unwrap();

        let report = enforce_disk_quota(&databases(dir.path()), 150).await.unwrap();
        assert_eq!(report.deleted, vec![oldest.clone(), middle.clone()]);
        assert_eq!(report.total_bytes, 100);
        assert!(!oldest.exists() && !middle.exists());
        assert!(newest.exists() && index.exists());
    }

    #[tokio::test]
    async fn nothing_is_deleted_under_the_limit() {
        let dir = TempDir::new().unwrap();
        write_aged(dir.path(), "a@1.lsif", 100, 10);
        let report = enforce_disk_quota(&databases(dir.path()), 100).await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.total_bytes, 100);
    }

    #[tokio::test]
    async fn a_zero_limit_empties_the_store() {
        let dir = TempDir::new().unwrap();
        write_aged(dir.path(), "a@1.lsif", 10, 10);
        write_aged(dir.path(), "a@1.graph.db", 10, 20);
        let report = enforce_disk_quota(&databases(dir.path()), 0).await.unwrap();
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.total_bytes, 0);
    }
}
