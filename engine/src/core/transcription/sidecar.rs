//! Sidecar transcript backend.
//!
//! Degraded fallback that needs no model: it reads an SRT transcript
//! stored next to the audio file and spreads each segment's words evenly
//! across the segment.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{TranscriptionBackend, TranscriptionResult, WordTiming};
use crate::core::{captions::parse_srt, captions::Cue, CoreError, CoreResult};

pub const SIDECAR_BACKEND_ID: &str = "sidecar";

#[derive(Debug, Default, Clone)]
pub struct SidecarBackend;

impl SidecarBackend {
    pub fn new() -> Self {
        Self
    }

    /// Candidate transcript locations for `audio`: `clip.srt` then `clip.wav.srt`
    pub fn candidates(audio: &Path) -> Vec<PathBuf> {
        let mut with_suffix = audio.as_os_str().to_os_string();
        with_suffix.push(".srt");
        vec![audio.with_extension("srt"), PathBuf::from(with_suffix)]
    }
}

/// Splits every cue into words with equal shares of its span
pub fn words_from_segments(cues: &[Cue]) -> Vec<WordTiming> {
    let mut words = Vec::new();
    for cue in cues {
        let tokens: Vec<&str> = cue.text.split_whitespace().collect();
        if tokens.is_empty() || cue.duration() <= 0.0 {
            continue;
        }
        let step = cue.duration() / tokens.len() as f64;
        for (i, token) in tokens.iter().enumerate() {
            let start = cue.start_sec + step * i as f64;
            words.push(WordTiming::new(token, start, start + step));
        }
    }
    words
}

#[async_trait]
impl TranscriptionBackend for SidecarBackend {
    fn id(&self) -> &str {
        SIDECAR_BACKEND_ID
    }

    async fn transcribe(
        &self,
        audio: &Path,
        language: Option<&str>,
    ) -> CoreResult<TranscriptionResult> {
        let Some(path) = Self::candidates(audio).into_iter().find(|p| p.is_file()) else {
            return Err(CoreError::BackendUnavailable {
                backend: SIDECAR_BACKEND_ID.to_string(),
                reason: format!("no transcript next to {}", audio.display()),
            });
        };

        let content = tokio::fs::read_to_string(&path).await?;
        let cues = parse_srt(&content).map_err(|e| {
            CoreError::TranscriptionFailed(format!("{}: {}", path.display(), e))
        })?;

        let words = words_from_segments(&cues);
        debug!(
            transcript = %path.display(),
            segments = cues.len(),
            words = words.len(),
            "Loaded sidecar transcript"
        );

        let duration_sec = cues.iter().map(|c| c.end_sec).fold(0.0, f64::max);
        Ok(TranscriptionResult {
            words,
            language: language.map(str::to_string),
            duration_sec,
        })
    }
}
