//! Engine Settings
//!
//! Persistent engine configuration with:
//! - Atomic file writes under an advisory lock
//! - Tolerant loading (bad values are corrected, unreadable files fall back to defaults)
//!
//! Storage location: {config_dir}/clipweave/settings.json

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{
    captions::{CaptionMode, TimingPolicy},
    ffmpeg::{detect_ffmpeg, FFmpegError, FFmpegRunner},
    fs::atomic_write_json_pretty,
    jobs::ExportServiceConfig,
    pipeline::ExportPipeline,
    render::FFmpegRenderBackend,
    timeline::TextStyle,
    transcription::{
        BackendRegistry, TranscriptionAdapter, TranscriptionCache, WhisperBackend,
        SIDECAR_BACKEND_ID, WHISPER_BACKEND_ID,
    },
    CoreError, CoreResult,
};

/// Settings schema version
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub version: u32,
    pub transcription: TranscriptionSettings,
    pub captions: CaptionSettings,
    pub render: RenderSettings,
    pub general: GeneralSettings,
}

/// Speech-to-text backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionSettings {
    pub preferred_backend: String,
    /// Tried only when the preferred backend is unavailable
    pub fallback_backend: Option<String>,
    /// Whisper ggml model file
    pub model_path: Option<PathBuf>,
    /// Spoken language hint (e.g. "en"); `None` auto-detects
    pub language: Option<String>,
    /// Inference threads, 0 means auto
    pub threads: u32,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            preferred_backend: WHISPER_BACKEND_ID.to_string(),
            fallback_backend: Some(SIDECAR_BACKEND_ID.to_string()),
            model_path: None,
            language: None,
            threads: 0,
        }
    }
}

/// Defaults for generated captions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptionSettings {
    pub mode: CaptionMode,
    /// Overrides the mode's built-in timing rules
    pub policy: Option<TimingPolicy>,
    pub style: TextStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderSettings {
    /// Explicit FFmpeg binary; otherwise searched on PATH
    pub ffmpeg_path: Option<PathBuf>,
    pub progress_interval_ms: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            progress_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    /// Scratch directory for extracted speech audio
    pub temp_dir: Option<PathBuf>,
    pub max_concurrent_exports: u32,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_concurrent_exports: num_cpus::get().clamp(1, 32) as u32,
        }
    }
}

impl EngineSettings {
    /// Corrects out-of-range values in place.
    ///
    /// Never fails so that an old or hand-edited file still loads.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let t = &mut self.transcription;
        t.preferred_backend = normalize_backend(&t.preferred_backend, WHISPER_BACKEND_ID);
        if let Some(fallback) = t.fallback_backend.as_deref() {
            let fallback = fallback.trim().to_ascii_lowercase();
            t.fallback_backend = if fallback.is_empty() || fallback == t.preferred_backend {
                None
            } else {
                Some(fallback)
            };
        }
        t.language = t
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != "auto")
            .map(str::to_ascii_lowercase);
        t.threads = t.threads.min(64);

        if let Some(policy) = self.captions.policy.as_mut() {
            policy.normalize();
        }
        if let Err(reason) = self.captions.style.validate() {
            warn!(reason = %reason, "Invalid caption style in settings, using default");
            self.captions.style = TextStyle::default();
        }

        self.render.progress_interval_ms = self.render.progress_interval_ms.clamp(50, 5_000);
        self.general.max_concurrent_exports = self.general.max_concurrent_exports.clamp(1, 32);
    }

    pub fn normalized_defaults() -> Self {
        let mut settings = Self::default();
        settings.normalize();
        settings
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.render.progress_interval_ms)
    }

    pub fn service_config(&self) -> ExportServiceConfig {
        ExportServiceConfig {
            max_concurrent_exports: self.general.max_concurrent_exports as usize,
        }
    }

    /// Builds the transcription adapter for the configured backends
    pub fn transcription_adapter(&self, ffmpeg: Option<FFmpegRunner>) -> CoreResult<TranscriptionAdapter> {
        let t = &self.transcription;
        let mut registry = BackendRegistry::with_builtin(t.model_path.clone(), t.threads, ffmpeg.clone());
        if let Some(dir) = &self.general.temp_dir {
            registry.register(Arc::new(
                WhisperBackend::new(t.model_path.clone(), t.threads, ffmpeg).with_scratch_dir(dir.clone()),
            ));
        }
        TranscriptionAdapter::from_registry(
            &registry,
            &t.preferred_backend,
            t.fallback_backend.as_deref(),
            Arc::new(TranscriptionCache::new()),
        )
    }

    /// Builds an FFmpeg-backed export pipeline from these settings
    pub fn build_pipeline(&self) -> CoreResult<ExportPipeline> {
        let info = detect_ffmpeg(self.render.ffmpeg_path.as_deref()).map_err(|e| match e {
            FFmpegError::NotFound => CoreError::BackendUnavailable {
                backend: "ffmpeg".to_string(),
                reason: e.to_string(),
            },
            other => CoreError::Internal(other.to_string()),
        })?;
        let runner = FFmpegRunner::new(info);

        let renderer =
            FFmpegRenderBackend::new(runner.clone()).with_stats_period(self.progress_interval());
        let mut pipeline = ExportPipeline::new(Arc::new(renderer))
            .with_transcriber(self.transcription_adapter(Some(runner))?)
            .with_caption_style(self.captions.style.clone());
        if let Some(policy) = &self.captions.policy {
            pipeline = pipeline.with_caption_policy(policy.clone());
        }
        Ok(pipeline)
    }
}

fn normalize_backend(value: &str, fallback: &str) -> String {
    let value = value.trim().to_ascii_lowercase();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Default settings directory
pub fn default_settings_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipweave")
}

/// Loads, saves and resets the settings file
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Settings stored in `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self {
            settings_path: dir.join(SETTINGS_FILE),
        }
    }

    /// Settings stored at an explicit file path
    pub fn at_path(path: PathBuf) -> Self {
        Self {
            settings_path: path,
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Loads settings, returning defaults when the file is missing or unreadable
    pub fn load(&self) -> EngineSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(EngineSettings::normalized_defaults());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings: EngineSettings = serde_json::from_str(&content)?;
            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                EngineSettings::normalized_defaults()
            }
        }
    }

    /// Normalizes and writes settings, returning what was stored
    pub fn save(&self, settings: &EngineSettings) -> CoreResult<EngineSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();
            atomic_write_json_pretty(&self.settings_path, &normalized)?;
            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Deletes the settings file and returns defaults
    pub fn reset(&self) -> CoreResult<EngineSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(EngineSettings::normalized_defaults())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());
        let settings = manager.load();

        assert_eq!(settings.transcription.preferred_backend, "whisper");
        assert_eq!(settings.transcription.fallback_backend.as_deref(), Some("sidecar"));
        assert_eq!(settings.captions.mode, CaptionMode::Phrase);
        assert!(settings.general.max_concurrent_exports >= 1);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());

        let mut settings = EngineSettings::default();
        settings.transcription.language = Some("EN".into());
        settings.captions.mode = CaptionMode::WordByWord;
        settings.general.max_concurrent_exports = 2;

        let saved = manager.save(&settings).unwrap();
        assert_eq!(saved.transcription.language.as_deref(), Some("en"));

        let loaded = manager.load();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.service_config().max_concurrent_exports, 2);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());
        fs::write(manager.settings_path(), "{ broken").unwrap();

        let settings = manager.load();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.transcription.preferred_backend, "whisper");
    }

    #[test]
    fn test_normalize_clamps_values() {
        let mut settings: EngineSettings = serde_json::from_str(
            r#"{
                "transcription": {"preferredBackend": " Sidecar ", "fallbackBackend": "sidecar", "language": "auto"},
                "render": {"progressIntervalMs": 1},
                "general": {"maxConcurrentExports": 0}
            }"#,
        )
        .unwrap();
        settings.captions.style.font_size = 0;
        settings.normalize();

        assert_eq!(settings.transcription.preferred_backend, "sidecar");
        assert_eq!(settings.transcription.fallback_backend, None);
        assert_eq!(settings.transcription.language, None);
        assert_eq!(settings.render.progress_interval_ms, 50);
        assert_eq!(settings.general.max_concurrent_exports, 1);
        assert_eq!(settings.captions.style, TextStyle::default());
    }

    #[test]
    fn test_reset_removes_file() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());
        manager.save(&EngineSettings::default()).unwrap();
        assert!(manager.settings_path().exists());

        manager.reset().unwrap();
        assert!(!manager.settings_path().exists());
    }

    #[test]
    fn test_transcription_adapter_from_settings() {
        let mut settings = EngineSettings::default();
        settings.transcription.preferred_backend = "sidecar".into();
        settings.normalize();
        let adapter = settings.transcription_adapter(None).unwrap();
        assert_eq!(adapter.preferred_id(), "sidecar");

        settings.transcription.preferred_backend = "cloud".into();
        assert!(matches!(
            settings.transcription_adapter(None),
            Err(CoreError::BackendUnavailable { .. })
        ));
    }
}
