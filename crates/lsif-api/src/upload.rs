//! Receiving a dump and storing every enabled encoding of it.
//!
//! Everything is written under `<root>/tmp` first and renamed into place only
//! once all encodings exist, so a failed upload never replaces stored data.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use futures::StreamExt;
use lsif_core::{LsifError, RepositoryCommit, Result};
use lsif_storage::{dump_path, packages_and_references, BackendKind, LsifDump};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

pub const TMP_DIR: &str = "tmp";

pub fn temp_path(root: &Path, extension: &str) -> PathBuf {
    root.join(TMP_DIR).join(format!("{}{}", Uuid::new_v4(), extension))
}

pub fn too_large(size: u64, limit: u64, complete: bool) -> ApiError {
    let qualifier = if complete { "" } else { " so far" };
    ApiError::PayloadTooLarge(format!(
        "The size of the given LSIF file ({} bytes{}) exceeds the max of {}",
        size, qualifier, limit
    ))
}

/// Stream `body` into `dest`, giving up as soon as more than `limit` bytes arrive.
pub async fn receive(body: Body, dest: &Path, limit: u64) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(LsifError::from)?;
    let mut stream = body.into_data_stream();
    let mut received = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ApiError::Validation(format!("failed to read upload: {}", e)))?;
        received += chunk.len() as u64;
        if received > limit {
            return Err(too_large(received, limit, false));
        }
        file.write_all(&chunk).await.map_err(LsifError::from)?;
    }
    file.flush().await.map_err(LsifError::from)?;
    Ok(received)
}

/// Remove temporary files, ignoring any that are already gone.
pub async fn discard(paths: Vec<PathBuf>) {
    for path in paths {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %path.display(), error = %e, "Could not remove temporary file"),
        }
    }
}

/// Parse the staged dump; a gzip upload may not inflate past `limit`.
async fn validate(staged: &Path, limit: u64) -> Result<LsifDump> {
    let path = staged.to_path_buf();
    let parsed = tokio::task::spawn_blocking(move || LsifDump::from_path_limited(&path, limit))
        .await
        .map_err(|e| LsifError::Storage(format!("validation task failed: {}", e)))?;
    parsed.map_err(|e| match e {
        LsifError::Decode(_) | LsifError::Serialization(_) => {
            LsifError::Validation(format!("Invalid LSIF dump: {}", e))
        }
        other => other,
    })
}

/// Store the dump staged at `staged` for `target`.
///
/// The raw dump is moved into place when the json encoding is enabled; the
/// caller stays responsible for removing `staged` otherwise.
pub async fn store(
    state: &AppState,
    target: &RepositoryCommit,
    staged: &Path,
) -> Result<Vec<BackendKind>> {
    let dump = validate(staged, state.settings.storage.max_upload_bytes).await?;
    let databases = &state.databases;
    let base = databases.base_path(target);
    let kinds: Vec<BackendKind> = databases.backends().enabled().collect();

    let mut converted: Vec<(BackendKind, PathBuf)> = Vec::new();
    for &kind in kinds.iter().filter(|k| **k != BackendKind::Json) {
        let output = temp_path(databases.root(), kind.extension());
        if let Err(e) = state.converter.convert(staged, &output, kind).await {
            let mut stale: Vec<PathBuf> = converted.into_iter().map(|(_, p)| p).collect();
            stale.push(output);
            discard(stale).await;
            return Err(e);
        }
        converted.push((kind, output));
    }

    for (kind, output) in &converted {
        tokio::fs::rename(output, dump_path(&base, *kind)).await?;
    }
    if kinds.contains(&BackendKind::Json) {
        tokio::fs::rename(staged, dump_path(&base, BackendKind::Json)).await?;
    }

    databases.evict(target).await;
    let dropped = databases.invalidate_blobs(target);

    let (packages, references) = packages_and_references(&dump);
    databases
        .xrepo()
        .add_packages_and_references(target, &packages, &references)
        .await?;

    info!(
        database = %target,
        encodings = ?kinds,
        packages = packages.len(),
        references = references.len(),
        dropped_blobs = dropped,
        "Stored upload"
    );
    Ok(kinds)
}
