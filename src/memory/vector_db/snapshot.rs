//! On-disk index snapshots
//!
//! A snapshot is a directory holding:
//! - `manifest.json`: dimension, chunk texts and source ids
//! - `vectors.bin`: header followed by little-endian f32 embeddings
//!
//! Vectors are stored as raw bits, so a reloaded index answers every query
//! exactly as the saved one did. Each file is written to a temporary sibling
//! and renamed into place.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::index::{Chunk, VectorIndex};
use crate::errors::{RagError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const VECTORS_FILE: &str = "vectors.bin";

const MAGIC: &[u8; 4] = b"RBVX";
const FORMAT_VERSION: u32 = 1;
// magic + version + dimension + count
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    dimension: usize,
    saved_at: DateTime<Utc>,
    chunks: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    source_id: String,
    text: String,
}

/// Serialized snapshot, ready to be written
pub struct EncodedSnapshot {
    manifest: Vec<u8>,
    vectors: Bytes,
}

/// Encode an index in memory
pub fn encode(index: &VectorIndex) -> Result<EncodedSnapshot> {
    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        dimension: index.dimension(),
        saved_at: Utc::now(),
        chunks: index
            .chunks()
            .iter()
            .map(|c| ManifestEntry {
                source_id: c.source_id.clone(),
                text: c.text.clone(),
            })
            .collect(),
    };

    let mut buf = BytesMut::with_capacity(HEADER_LEN + index.len() * index.dimension() * 4);
    buf.put_slice(MAGIC);
    buf.put_u32_le(FORMAT_VERSION);
    buf.put_u32_le(index.dimension() as u32);
    buf.put_u64_le(index.len() as u64);
    for chunk in index.chunks() {
        for value in &chunk.embedding {
            buf.put_f32_le(*value);
        }
    }

    Ok(EncodedSnapshot {
        manifest: serde_json::to_vec_pretty(&manifest)?,
        vectors: buf.freeze(),
    })
}

/// Write an encoded snapshot into `location`, creating it if needed
pub async fn write(location: &Path, snapshot: EncodedSnapshot) -> Result<()> {
    tokio::fs::create_dir_all(location).await?;

    // Vectors first: a manifest never points at a half-written vector file.
    replace_file(&location.join(VECTORS_FILE), &snapshot.vectors).await?;
    replace_file(&location.join(MANIFEST_FILE), &snapshot.manifest).await?;

    Ok(())
}

async fn replace_file(target: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_sibling(target);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

fn temp_sibling(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Save an index to `location`
pub async fn save(index: &VectorIndex, location: &Path) -> Result<()> {
    let encoded = encode(index)?;
    write(location, encoded).await
}

/// Load a snapshot from `location`
pub async fn load(location: &Path) -> Result<VectorIndex> {
    let manifest_path = location.join(MANIFEST_FILE);
    let vectors_path = location.join(VECTORS_FILE);

    if !tokio::fs::try_exists(&manifest_path).await.unwrap_or(false) {
        return Err(RagError::NotFound(format!(
            "No index snapshot at {}",
            location.display()
        )));
    }

    let manifest_bytes = tokio::fs::read(&manifest_path).await?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| RagError::CorruptSnapshot(format!("manifest: {}", e)))?;

    let vectors = tokio::fs::read(&vectors_path)
        .await
        .map_err(|e| RagError::CorruptSnapshot(format!("{}: {}", VECTORS_FILE, e)))?;

    decode(manifest, Bytes::from(vectors))
}

fn decode(manifest: Manifest, mut vectors: Bytes) -> Result<VectorIndex> {
    if manifest.format_version != FORMAT_VERSION {
        return Err(RagError::CorruptSnapshot(format!(
            "unsupported format version {}",
            manifest.format_version
        )));
    }

    if vectors.len() < HEADER_LEN || &vectors[..4] != MAGIC {
        return Err(RagError::CorruptSnapshot("bad vector file header".to_string()));
    }
    vectors.advance(4);

    let version = vectors.get_u32_le();
    let dimension = vectors.get_u32_le() as usize;
    let count = vectors.get_u64_le() as usize;

    if version != FORMAT_VERSION || dimension != manifest.dimension || count != manifest.chunks.len() {
        return Err(RagError::CorruptSnapshot(format!(
            "vector file ({} x {}) does not match manifest ({} x {})",
            count,
            dimension,
            manifest.chunks.len(),
            manifest.dimension
        )));
    }

    let expected_len = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RagError::CorruptSnapshot("vector count overflow".to_string()))?;
    if vectors.remaining() != expected_len {
        return Err(RagError::CorruptSnapshot(format!(
            "expected {} vector bytes, found {}",
            expected_len,
            vectors.remaining()
        )));
    }

    let chunks = manifest
        .chunks
        .into_iter()
        .map(|entry| {
            let embedding = (0..dimension).map(|_| vectors.get_f32_le()).collect();
            Chunk {
                text: entry.text,
                source_id: entry.source_id,
                embedding,
            }
        })
        .collect();

    VectorIndex::from_chunks(dimension, chunks)
}
