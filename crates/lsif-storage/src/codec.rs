use crate::model::DocumentBlob;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lsif_core::{LsifError, Result};
use std::borrow::Cow;
use std::io::{Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Inflate `bytes` when they carry a gzip header; plain input is borrowed as is.
pub fn maybe_gunzip(bytes: &[u8]) -> Result<Cow<'_, [u8]>> {
    maybe_gunzip_limited(bytes, u64::MAX)
}

/// [`maybe_gunzip`] that gives up once more than `limit` bytes come out of the stream.
pub fn maybe_gunzip_limited(bytes: &[u8], limit: u64) -> Result<Cow<'_, [u8]>> {
    if !is_gzip(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut out = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| LsifError::Decode(format!("invalid gzip stream: {}", e)))?;
    if out.len() as u64 > limit {
        return Err(LsifError::Validation(format!(
            "The decompressed LSIF file exceeds the max of {} bytes",
            limit
        )));
    }
    Ok(Cow::Owned(out))
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Serialize a blob as gzip-compressed JSON.
pub fn encode_blob(blob: &DocumentBlob) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(blob)?;
    gzip(&json)
}

/// Inverse of [`encode_blob`]. Uncompressed JSON is accepted too.
pub fn decode_blob(bytes: &[u8]) -> Result<DocumentBlob> {
    let json = maybe_gunzip(bytes)?;
    serde_json::from_slice(&json)
        .map_err(|e| LsifError::Decode(format!("malformed document blob: {}", e)))
}
