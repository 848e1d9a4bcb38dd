//! Turning an uploaded dump into the sqlite encodings.

use crate::backend::{run_blocking, write_blob_database, write_graph_database, BackendKind};
use crate::dump::{parse_elements, LsifDump};
use async_trait::async_trait;
use lsif_core::{LsifError, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::info;

#[async_trait]
pub trait Converter: Send + Sync {
    /// Write the `kind` encoding of the dump at `input` to `output`.
    async fn convert(&self, input: &Path, output: &Path, kind: BackendKind) -> Result<()>;
}

fn unsupported(kind: BackendKind) -> LsifError {
    LsifError::Conversion(format!("{} is stored as uploaded, not converted", kind))
}

/// Converts in process.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinConverter;

#[async_trait]
impl Converter for BuiltinConverter {
    async fn convert(&self, input: &Path, output: &Path, kind: BackendKind) -> Result<()> {
        if kind == BackendKind::Json {
            return Err(unsupported(kind));
        }
        let started = Instant::now();
        let input = input.to_path_buf();
        let target = output.to_path_buf();
        run_blocking(move || {
            let bytes = std::fs::read(&input)?;
            let elements = parse_elements(&bytes)?;
            let dump = LsifDump::from_elements(&elements)?;
            match kind {
                BackendKind::Graph => write_graph_database(&target, &elements, &dump),
                _ => write_blob_database(&target, &dump),
            }
        })
        .await?;
        let bytes = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        info!(
            backend = %kind,
            bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Converted dump"
        );
        Ok(())
    }
}

/// Runs `<binary> --in <dump> --out <file> [--format blob]`.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    binary: PathBuf,
}

impl ExternalConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Converter for ExternalConverter {
    async fn convert(&self, input: &Path, output: &Path, kind: BackendKind) -> Result<()> {
        if kind == BackendKind::Json {
            return Err(unsupported(kind));
        }
        let mut command = Command::new(&self.binary);
        command.arg("--in").arg(input).arg("--out").arg(output);
        if kind == BackendKind::Blob {
            command.arg("--format").arg("blob");
        }

        let started = Instant::now();
        let result = command.output().await.map_err(|e| {
            LsifError::Conversion(format!("failed to run {}: {}", self.binary.display(), e))
        })?;
        if !result.status.success() {
            return Err(LsifError::Conversion(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        info!(
            backend = %kind,
            binary = %self.binary.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Converted dump with external tool"
        );
        Ok(())
    }
}
