//! Atomic JSON file helpers
//!
//! All store files are written via temp-file-then-rename so readers never
//! observe a partial write. Writers create missing parent directories.

use crate::error::{Result, TeamsError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Read and parse a JSON file, returning `None` when it does not exist.
///
/// Parse failures surface as [`TeamsError::Json`]; callers that want to
/// treat corrupt content as absent use [`read_json_or_default`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TeamsError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    let value = serde_json::from_slice(&bytes).map_err(|e| TeamsError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Some(value))
}

/// Read a JSON file, falling back to `T::default()` on missing or invalid
/// content. Used by readers that repair rather than fail (mailboxes, team
/// config consumers).
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => T::default(),
    }
}

/// Read a JSON array of raw values; missing or invalid files yield `[]`.
pub fn read_json_array(path: &Path) -> Vec<serde_json::Value> {
    read_json_or_default(path)
}

/// Write raw bytes atomically: temp file in the same directory, then rename.
pub fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TeamsError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let tmp_name = format!(
        "{}.tmp.{}.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string()),
        std::process::id(),
        nanos,
    );
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, bytes).map_err(|e| TeamsError::Io {
        path: tmp_path.clone(),
        source: e,
    })?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        TeamsError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| TeamsError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_atomic_bytes(path, &bytes)
}
