//! FFmpeg Detection Module
//!
//! Finds ffmpeg/ffprobe either at an explicit path from settings or on the
//! system PATH.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{FFmpegError, FFmpegResult};

/// Information about a detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
}

/// Detects FFmpeg, preferring an explicit `ffmpeg` path when given.
///
/// With an override, ffprobe is looked up next to it.
pub fn detect_ffmpeg(ffmpeg_override: Option<&Path>) -> FFmpegResult<FFmpegInfo> {
    match ffmpeg_override {
        Some(ffmpeg_path) => {
            if !ffmpeg_path.is_file() {
                return Err(FFmpegError::NotFound);
            }
            let ffprobe_path = ffmpeg_path
                .parent()
                .map(|dir| dir.join(binary_name("ffprobe")))
                .filter(|p| p.is_file())
                .map(Ok)
                .unwrap_or_else(|| find_binary("ffprobe"))?;
            let version = get_ffmpeg_version(ffmpeg_path)?;
            Ok(FFmpegInfo {
                ffmpeg_path: ffmpeg_path.to_path_buf(),
                ffprobe_path,
                version,
            })
        }
        None => detect_system_ffmpeg(),
    }
}

/// Detect FFmpeg from system PATH
pub fn detect_system_ffmpeg() -> FFmpegResult<FFmpegInfo> {
    let ffmpeg_path = find_binary("ffmpeg")?;
    let ffprobe_path = find_binary("ffprobe")?;
    let version = get_ffmpeg_version(&ffmpeg_path)?;

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

fn binary_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// Finds a binary in common install locations, then via `which`/`where`.
fn find_binary(base: &str) -> FFmpegResult<PathBuf> {
    let name = binary_name(base);

    for dir in get_common_ffmpeg_paths() {
        let candidate = dir.join(&name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    let locator = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };

    let output = Command::new(locator)
        .arg(base)
        .output()
        .map_err(|_| FFmpegError::NotFound)?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(first_line) = stdout.lines().next() {
            let trimmed = first_line.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }
    }

    Err(FFmpegError::NotFound)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            paths.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Get FFmpeg version string
fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    parse_version_line(&String::from_utf8_lossy(&output.stdout))
}

/// Parses "ffmpeg version X.Y.Z ..." from the first line of `-version` output.
fn parse_version_line(output: &str) -> FFmpegResult<String> {
    let first_line = output
        .lines()
        .next()
        .ok_or_else(|| FFmpegError::ParseError("Could not parse FFmpeg version".to_string()))?;

    Ok(first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or(first_line)
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_paths_not_empty() {
        if cfg!(any(target_os = "windows", target_os = "macos", target_os = "linux")) {
            assert!(!get_common_ffmpeg_paths().is_empty());
        }
    }

    #[test]
    fn test_parse_version_line() {
        let out = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023\nbuilt with gcc";
        assert_eq!(parse_version_line(out).unwrap(), "6.1.1-3ubuntu5");
        assert_eq!(parse_version_line("custom build").unwrap(), "custom build");
        assert!(parse_version_line("").is_err());
    }

    #[test]
    fn test_detect_ffmpeg_rejects_missing_override() {
        let result = detect_ffmpeg(Some(Path::new("/definitely/not/here/ffmpeg")));
        assert!(matches!(result, Err(FFmpegError::NotFound)));
    }
}
