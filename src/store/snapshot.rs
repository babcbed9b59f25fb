//! zstd-compressed JSON snapshot of the active document
//!
//! Written to a temp file and renamed into place so a crash mid-write never
//! leaves a truncated snapshot behind.

use super::{DocumentInfo, StoredChunk};
use crate::error::{FolioError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Bumped whenever the snapshot layout changes
pub const SNAPSHOT_VERSION: u32 = 1;

/// zstd level used for snapshots
const COMPRESSION_LEVEL: i32 = 3;

/// File name inside the data directory
pub const SNAPSHOT_FILE: &str = "active.json.zst";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub info: DocumentInfo,
    pub chunks: Vec<StoredChunk>,
    pub embeddings: Vec<Vec<f32>>,
}

/// Snapshot location for a data directory
pub fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a snapshot atomically
pub fn write(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_vec(snapshot).map_err(|e| FolioError::Json {
        source: e,
        context: "Failed to serialize document snapshot".to_string(),
    })?;

    let compressed = zstd::encode_all(&json[..], COMPRESSION_LEVEL).map_err(|e| FolioError::Io {
        source: e,
        context: "Failed to compress document snapshot".to_string(),
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to create data directory: {}", parent.display()),
        })?;
    }

    let temp = temp_path(path);
    let mut file = fs::File::create(&temp).map_err(|e| FolioError::Io {
        source: e,
        context: format!("Failed to create temp snapshot: {}", temp.display()),
    })?;
    file.write_all(&compressed).map_err(|e| FolioError::Io {
        source: e,
        context: format!("Failed to write snapshot: {}", temp.display()),
    })?;
    file.sync_all().map_err(|e| FolioError::Io {
        source: e,
        context: format!("Failed to sync snapshot: {}", temp.display()),
    })?;
    drop(file);

    fs::rename(&temp, path).map_err(|e| FolioError::Io {
        source: e,
        context: format!(
            "Failed to move snapshot into place: {} -> {}",
            temp.display(),
            path.display()
        ),
    })?;

    Ok(())
}

/// Read a snapshot, `None` if there is none
pub fn read(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read(path).map_err(|e| FolioError::Io {
        source: e,
        context: format!("Failed to read snapshot: {}", path.display()),
    })?;

    let json = zstd::decode_all(&data[..]).map_err(|e| FolioError::Io {
        source: e,
        context: format!("Failed to decompress snapshot: {}", path.display()),
    })?;

    let snapshot: Snapshot = serde_json::from_slice(&json).map_err(|e| FolioError::Json {
        source: e,
        context: format!("Failed to parse snapshot: {}", path.display()),
    })?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(FolioError::Store(format!(
            "Unsupported snapshot version {} (expected {})",
            snapshot.version, SNAPSHOT_VERSION
        )));
    }

    if snapshot.chunks.len() != snapshot.embeddings.len() {
        return Err(FolioError::Store(format!(
            "Corrupt snapshot: {} chunks but {} embeddings",
            snapshot.chunks.len(),
            snapshot.embeddings.len()
        )));
    }

    Ok(Some(snapshot))
}

/// Delete the snapshot if present
pub fn remove(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to delete snapshot: {}", path.display()),
        })?;
    }
    Ok(())
}
