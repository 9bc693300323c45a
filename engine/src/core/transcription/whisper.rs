//! Whisper Transcription Backend
//!
//! Local speech-to-text through whisper.cpp (`whisper-rs`). The model is
//! compiled in only with the `whisper` feature; without it the backend
//! reports itself unavailable so the adapter can fall back.
//!
//! The loaded model lives in a process-wide [`ModelSlot`] shared by every
//! backend instance, so concurrent exports reuse one context.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::audio::{is_speech_wav, load_audio_samples};
use super::model_slot::ModelSlot;
use super::{TranscriptionBackend, TranscriptionResult};
use crate::core::{ffmpeg::FFmpegRunner, fs::remove_if_exists, CoreError, CoreResult};

pub const WHISPER_BACKEND_ID: &str = "whisper";

/// Returns the process-wide Whisper model slot
pub fn shared_model_slot() -> Arc<ModelSlot<WhisperEngine>> {
    static SLOT: OnceLock<Arc<ModelSlot<WhisperEngine>>> = OnceLock::new();
    Arc::clone(SLOT.get_or_init(|| Arc::new(ModelSlot::new())))
}

/// Checks if whisper transcription is compiled in
pub fn is_whisper_available() -> bool {
    cfg!(feature = "whisper")
}

/// Default location for downloaded models
pub fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipweave")
        .join("models")
        .join("whisper")
}

fn unavailable(reason: impl Into<String>) -> CoreError {
    CoreError::BackendUnavailable {
        backend: WHISPER_BACKEND_ID.to_string(),
        reason: reason.into(),
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A loaded Whisper model
pub struct WhisperEngine {
    model_path: PathBuf,
    #[cfg(feature = "whisper")]
    context: whisper_rs::WhisperContext,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl WhisperEngine {
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[cfg(feature = "whisper")]
impl WhisperEngine {
    /// Loads a ggml model file
    pub fn load(model_path: &Path) -> CoreResult<Self> {
        use whisper_rs::{WhisperContext, WhisperContextParameters};

        if !model_path.is_file() {
            return Err(unavailable(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let path = model_path
            .to_str()
            .ok_or_else(|| unavailable("model path is not valid UTF-8"))?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| unavailable(format!("failed to load model: {}", e)))?;

        Ok(Self {
            model_path: model_path.to_path_buf(),
            context,
        })
    }

    /// Runs inference with one segment per word
    pub fn transcribe(
        &self,
        samples: &[f32],
        language: Option<&str>,
        threads: u32,
    ) -> CoreResult<TranscriptionResult> {
        use super::audio::samples_duration_sec;
        use super::WordTiming;
        use whisper_rs::{FullParams, SamplingStrategy};

        let failed = |e: whisper_rs::WhisperError| CoreError::TranscriptionFailed(e.to_string());

        let mut state = self.context.create_state().map_err(failed)?;
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        if let Some(lang) = language.filter(|l| *l != "auto") {
            params.set_language(Some(lang));
        }
        params.set_translate(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_token_timestamps(true);
        params.set_split_on_word(true);
        params.set_max_len(1);
        if threads > 0 {
            params.set_n_threads(threads as i32);
        }

        state.full(params, samples).map_err(failed)?;

        let num_segments = state.full_n_segments().map_err(failed)?;
        let mut words = Vec::with_capacity(num_segments as usize);
        for i in 0..num_segments {
            let start = state.full_get_segment_t0(i).map_err(failed)? as f64 / 100.0;
            let end = state.full_get_segment_t1(i).map_err(failed)? as f64 / 100.0;
            let text = state.full_get_segment_text(i).map_err(failed)?;
            words.push(WordTiming::new(text.trim(), start, end));
        }

        Ok(TranscriptionResult {
            words,
            language: language.map(str::to_string),
            duration_sec: samples_duration_sec(samples),
        })
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperEngine {
    pub fn load(_model_path: &Path) -> CoreResult<Self> {
        Err(unavailable("built without the `whisper` feature"))
    }

    pub fn transcribe(
        &self,
        _samples: &[f32],
        _language: Option<&str>,
        _threads: u32,
    ) -> CoreResult<TranscriptionResult> {
        Err(unavailable("built without the `whisper` feature"))
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Whisper implementation of [`TranscriptionBackend`]
pub struct WhisperBackend {
    model_path: Option<PathBuf>,
    threads: u32,
    ffmpeg: Option<FFmpegRunner>,
    scratch_dir: PathBuf,
    slot: Arc<ModelSlot<WhisperEngine>>,
}

impl WhisperBackend {
    pub fn new(model_path: Option<PathBuf>, threads: u32, ffmpeg: Option<FFmpegRunner>) -> Self {
        Self {
            model_path,
            threads,
            ffmpeg,
            scratch_dir: std::env::temp_dir(),
            slot: shared_model_slot(),
        }
    }

    /// Directory for extracted speech audio
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Uses a private slot instead of the process-wide one
    pub fn with_slot(mut self, slot: Arc<ModelSlot<WhisperEngine>>) -> Self {
        self.slot = slot;
        self
    }

    async fn engine(&self) -> CoreResult<Arc<WhisperEngine>> {
        if !is_whisper_available() {
            return Err(unavailable("built without the `whisper` feature"));
        }
        let model_path = self
            .model_path
            .clone()
            .ok_or_else(|| unavailable("no model path configured"))?;

        if let Some(engine) = self.slot.get() {
            if engine.model_path() == model_path.as_path() {
                return Ok(engine);
            }
            info!(
                old = %engine.model_path().display(),
                new = %model_path.display(),
                "Whisper model path changed, reloading"
            );
            self.slot.teardown();
        }

        self.slot
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || WhisperEngine::load(&model_path))
                    .await
                    .map_err(|e| CoreError::Internal(format!("model load task failed: {}", e)))?
            })
            .await
    }

    /// Produces a speech WAV for `audio`, extracting one when needed.
    ///
    /// Returns the WAV path and whether it is a temporary to delete.
    async fn speech_wav(&self, audio: &Path) -> CoreResult<(PathBuf, bool)> {
        if is_speech_wav(audio) {
            return Ok((audio.to_path_buf(), false));
        }

        let ffmpeg = self
            .ffmpeg
            .as_ref()
            .ok_or_else(|| unavailable("FFmpeg is required to extract speech audio"))?;

        std::fs::create_dir_all(&self.scratch_dir)?;
        let wav = self.scratch_dir.join(format!("clipweave-speech-{}.wav", ulid::Ulid::new()));
        ffmpeg
            .extract_speech_audio(audio, &wav, 0.0, None)
            .await
            .map_err(|e| CoreError::TranscriptionFailed(e.to_string()))?;
        Ok((wav, true))
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperBackend {
    fn id(&self) -> &str {
        WHISPER_BACKEND_ID
    }

    async fn transcribe(
        &self,
        audio: &Path,
        language: Option<&str>,
    ) -> CoreResult<TranscriptionResult> {
        let engine = self.engine().await?;
        let (wav, temporary) = self.speech_wav(audio).await?;

        let threads = self.threads;
        let language_owned = language.map(str::to_string);
        let wav_for_task = wav.clone();
        let result = tokio::task::spawn_blocking(move || {
            let samples = load_audio_samples(&wav_for_task)
                .map_err(|e| CoreError::TranscriptionFailed(e.to_string()))?;
            engine.transcribe(&samples, language_owned.as_deref(), threads)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("transcription task failed: {}", e)));

        if temporary {
            if let Err(e) = remove_if_exists(&wav) {
                warn!(path = %wav.display(), error = %e, "Failed to remove temporary speech audio");
            }
        }

        let result = result??;
        debug!(
            words = result.words.len(),
            audio = %audio.display(),
            "Whisper transcription finished"
        );
        Ok(result)
    }
}
