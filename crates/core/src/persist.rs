//! Crash-safe JSON files: write to a temporary file in the target directory, sync,
//! then rename over the target. A reader sees either the old file or the new one.

use crate::error::{BatchError, BatchOutcome};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> BatchOutcome<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| BatchError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let write_err = |source: std::io::Error| BatchError::FileWrite {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    // Same directory as the target so the rename stays on one filesystem.
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;
    tmp.write_all(b"\n").map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> BatchOutcome<T> {
    let bytes = std::fs::read(path).map_err(|source| BatchError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| BatchError::Deserialization {
        path: path.to_path_buf(),
        source,
    })
}
