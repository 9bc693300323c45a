//! Filesystem utilities.
//!
//! Crash-tolerant write primitives. Project files and settings are replaced
//! atomically, and rendered output is staged in a sibling temp file that is
//! only renamed into place once the render has finished.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{CoreError, CoreResult};

/// Validates an output path for write operations.
///
/// Creates missing parent directories and rejects directory targets.
pub fn validate_output_path(path: &Path) -> CoreResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::Internal("output path is empty".to_string()));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    if path.is_dir() {
        return Err(CoreError::Internal(format!(
            "output path points to a directory: {}",
            path.display()
        )));
    }

    Ok(path.to_path_buf())
}

/// Write bytes to `path` using an atomic replace pattern.
///
/// The bytes go to a sibling temporary file that is flushed, synced and then
/// renamed over the destination.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = tmp_path_for(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    finalize_into_place(&tmp_path, path)
}

/// Write a JSON file atomically with pretty formatting.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// Staging path for a rendered file.
///
/// The extension is preserved (`out.mp4` -> `.out.<tag>.partial.mp4`) so the
/// encoder still picks the right container from the file name.
pub fn staging_path_for(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let name = match path.extension() {
        Some(ext) => format!(".{stem}.{tag}.partial.{}", ext.to_string_lossy()),
        None => format!(".{stem}.{tag}.partial"),
    };
    path.with_file_name(name)
}

/// Removes a file if present. Missing files are not an error.
pub fn remove_if_exists(path: &Path) -> CoreResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::IoError(e)),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "tmp".to_string());
    tmp.set_file_name(format!("{file_name}.tmp"));
    tmp
}

fn bak_path_for(path: &Path) -> PathBuf {
    let mut bak = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "bak".to_string());
    bak.set_file_name(format!("{file_name}.bak"));
    bak
}

/// Moves a finished temp file over `dest`.
///
/// When `dest` already exists it is moved aside first and restored if the
/// swap fails, so `dest` is always either the old or the new content.
pub fn finalize_into_place(src_tmp: &Path, dest: &Path) -> CoreResult<()> {
    if !dest.exists() {
        if let Err(e) = std::fs::rename(src_tmp, dest) {
            let _ = std::fs::remove_file(src_tmp);
            return Err(CoreError::IoError(e));
        }
        return Ok(());
    }

    let bak = bak_path_for(dest);
    let _ = std::fs::remove_file(&bak);

    std::fs::rename(dest, &bak)?;
    match std::fs::rename(src_tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&bak, dest);
            let _ = std::fs::remove_file(src_tmp);
            Err(CoreError::IoError(e))
        }
    }
}
