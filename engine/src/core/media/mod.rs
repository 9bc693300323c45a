//! Media Sources
//!
//! Resolved references to the audio, video and image files a timeline uses.
//! A resolved [`MediaSource`] never changes afterwards and is shared through
//! `Arc` by every item that references it.

mod fingerprint;

pub use fingerprint::content_fingerprint;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{ffmpeg::FFmpegRunner, CoreError, CoreResult, MediaId, TimeSec};

// =============================================================================
// Media Kind
// =============================================================================

/// Kind of media a source holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

impl MediaKind {
    /// Infers the kind from a file extension (case-insensitive)
    pub fn from_path(path: &Path) -> CoreResult<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "mp4" | "mov" | "mkv" | "webm" | "avi" | "m4v" => Ok(MediaKind::Video),
            "wav" | "mp3" | "m4a" | "aac" | "flac" | "ogg" | "opus" => Ok(MediaKind::Audio),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" => Ok(MediaKind::Image),
            _ => Err(CoreError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Whether the source carries an audio stream worth mixing or transcribing
    pub fn has_audio(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }
}

// =============================================================================
// Media Source
// =============================================================================

/// A resolved media file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSource {
    pub id: MediaId,
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Duration in seconds; `None` for still images or when not probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<TimeSec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Whether an audio stream was found; `None` when not probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<bool>,
}

impl MediaSource {
    /// Resolves a file on disk into a media source.
    ///
    /// Fails with `MediaNotFound` when the file is missing and
    /// `UnsupportedFormat` when its extension is not recognized.
    pub fn resolve(id: impl Into<MediaId>, path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(CoreError::MediaNotFound(path.display().to_string()));
        }
        let kind = MediaKind::from_path(&path)?;

        Ok(Self {
            id: id.into(),
            path,
            kind,
            duration_sec: None,
            width: None,
            height: None,
            has_audio: None,
        })
    }

    /// Resolves and fills duration/dimensions from ffprobe.
    ///
    /// A failed probe is not fatal; the source is returned unprobed.
    pub async fn resolve_probed(
        id: impl Into<MediaId>,
        path: impl Into<PathBuf>,
        runner: &FFmpegRunner,
    ) -> CoreResult<Self> {
        let mut source = Self::resolve(id, path)?;

        match runner.probe(&source.path).await {
            Ok(info) => {
                if source.kind != MediaKind::Image && info.duration_sec > 0.0 {
                    source.duration_sec = Some(info.duration_sec);
                }
                if source.kind != MediaKind::Audio {
                    source.width = info.width;
                    source.height = info.height;
                }
                if source.kind.has_audio() {
                    source.has_audio = Some(info.has_audio);
                }
            }
            Err(e) => {
                debug!(path = %source.path.display(), error = %e, "Probe failed, keeping unprobed source");
            }
        }

        Ok(source)
    }

    /// Whether the renderer can mix this source's audio.
    ///
    /// Audio files always can; video only when a probe found a stream.
    pub fn mixable_audio(&self) -> bool {
        match self.kind {
            MediaKind::Audio => self.has_audio != Some(false),
            MediaKind::Video => self.has_audio == Some(true),
            MediaKind::Image => false,
        }
    }

    /// Re-checks that the file is still present and readable as its kind.
    pub fn check_available(&self) -> CoreResult<()> {
        if !self.path.is_file() {
            return Err(CoreError::MediaNotFound(self.path.display().to_string()));
        }
        let kind = MediaKind::from_path(&self.path)?;
        if kind != self.kind {
            return Err(CoreError::UnsupportedFormat(format!(
                "{} is {:?}, expected {:?}",
                self.path.display(),
                kind,
                self.kind
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Media Library
// =============================================================================

/// Resolved media sources keyed by id
#[derive(Clone, Debug, Default)]
pub struct MediaLibrary {
    sources: HashMap<MediaId, Arc<MediaSource>>,
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: MediaSource) -> Arc<MediaSource> {
        let shared = Arc::new(source);
        self.sources.insert(shared.id.clone(), Arc::clone(&shared));
        shared
    }

    pub fn get(&self, id: &str) -> Option<Arc<MediaSource>> {
        self.sources.get(id).cloned()
    }

    /// Looks up a source, failing with `UnknownMedia` when absent
    pub fn require(&self, id: &str) -> CoreResult<Arc<MediaSource>> {
        self.get(id)
            .ok_or_else(|| CoreError::UnknownMedia(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources sorted by id, for stable serialization
    pub fn sorted(&self) -> Vec<Arc<MediaSource>> {
        let mut all: Vec<_> = self.sources.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl FromIterator<MediaSource> for MediaLibrary {
    fn from_iter<I: IntoIterator<Item = MediaSource>>(iter: I) -> Self {
        let mut library = MediaLibrary::new();
        for source in iter {
            library.insert(source);
        }
        library
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_media_kind_from_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a.MP4")).unwrap(), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("b.wav")).unwrap(), MediaKind::Audio);
        assert_eq!(MediaKind::from_path(Path::new("c.jpeg")).unwrap(), MediaKind::Image);
        assert!(matches!(
            MediaKind::from_path(Path::new("d.docx")),
            Err(CoreError::UnsupportedFormat(_))
        ));
        assert!(MediaKind::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_resolve_missing_file() {
        let result = MediaSource::resolve("m1", "/nope/missing.mp4");
        assert!(matches!(result, Err(CoreError::MediaNotFound(_))));
    }

    #[test]
    fn test_resolve_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("voice.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        let source = MediaSource::resolve("voice", &path).unwrap();
        assert_eq!(source.kind, MediaKind::Audio);
        assert!(source.check_available().is_ok());

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            source.check_available(),
            Err(CoreError::MediaNotFound(_))
        ));
    }

    #[test]
    fn test_library_shares_sources() {
        let mut library = MediaLibrary::new();
        let inserted = library.insert(MediaSource {
            id: "img".to_string(),
            path: PathBuf::from("logo.png"),
            kind: MediaKind::Image,
            duration_sec: None,
            width: Some(64),
            height: Some(64),
            has_audio: None,
        });

        let fetched = library.require("img").unwrap();
        assert!(Arc::ptr_eq(&inserted, &fetched));
        assert!(matches!(
            library.require("other"),
            Err(CoreError::UnknownMedia(_))
        ));
    }
}
