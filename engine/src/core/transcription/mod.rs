//! Transcription Module
//!
//! Pluggable speech-to-text with word-level timestamps.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  models.rs      - WordTiming, TranscriptionResult               │
//! │  adapter.rs     - Backend selection, fallback, warnings         │
//! │  cache.rs       - Fingerprint-keyed result cache                │
//! │  model_slot.rs  - Lazily loaded shared model handle             │
//! │  whisper.rs     - whisper.cpp backend (feature `whisper`)       │
//! │  sidecar.rs     - SRT transcript fallback backend               │
//! │  audio.rs       - 16 kHz mono WAV loading                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod adapter;
pub mod audio;
mod cache;
mod model_slot;
mod models;
mod sidecar;
mod whisper;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

pub use adapter::{BackendWarning, TranscriptionAdapter, TranscriptionOutcome};
pub use cache::{CacheKey, TranscriptionCache};
pub use model_slot::ModelSlot;
pub use models::{TranscriptionResult, WordTiming};
pub use sidecar::{words_from_segments, SidecarBackend, SIDECAR_BACKEND_ID};
pub use whisper::{
    default_models_dir, is_whisper_available, shared_model_slot, WhisperBackend, WhisperEngine,
    WHISPER_BACKEND_ID,
};

use crate::core::{ffmpeg::FFmpegRunner, CoreResult};

/// A speech-to-text implementation
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Stable identifier used in settings and cache keys
    fn id(&self) -> &str;

    /// Transcribes an audio (or audio-bearing video) file.
    ///
    /// Returns `BackendUnavailable` when the backend cannot initialize.
    async fn transcribe(
        &self,
        audio: &Path,
        language: Option<&str>,
    ) -> CoreResult<TranscriptionResult>;
}

/// Backends selectable by id
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn TranscriptionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `whisper` and `sidecar` backends
    pub fn with_builtin(
        model_path: Option<PathBuf>,
        threads: u32,
        ffmpeg: Option<FFmpegRunner>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WhisperBackend::new(model_path, threads, ffmpeg)));
        registry.register(Arc::new(SidecarBackend::new()));
        registry
    }

    /// Registers a backend, replacing any with the same id
    pub fn register(&mut self, backend: Arc<dyn TranscriptionBackend>) {
        self.backends.insert(backend.id().to_string(), backend);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn TranscriptionBackend>> {
        self.backends.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }
}
