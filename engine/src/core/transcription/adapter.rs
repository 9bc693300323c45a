//! Transcription Adapter
//!
//! Front door for speech-to-text: fingerprints the audio, consults the
//! cache, and calls the preferred backend. When that backend reports
//! `BackendUnavailable` the registered fallback is tried; if nothing can
//! transcribe, captioning is skipped with a single warning naming every
//! backend tried. Every degradation is returned as a
//! [`BackendWarning`] and logged.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::cache::{CacheKey, TranscriptionCache};
use super::{BackendRegistry, TranscriptionBackend, TranscriptionResult};
use crate::core::{media::content_fingerprint, CoreError, CoreResult};

/// A backend that could not be used
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendWarning {
    pub backend: String,
    pub reason: String,
}

/// Result of a transcription attempt
#[derive(Clone, Debug)]
pub enum TranscriptionOutcome {
    Transcribed {
        result: Arc<TranscriptionResult>,
        /// Backend that produced the result
        backend: String,
        warnings: Vec<BackendWarning>,
    },
    /// No backend could transcribe; captions are skipped
    Skipped { warnings: Vec<BackendWarning> },
}

impl TranscriptionOutcome {
    pub fn warnings(&self) -> &[BackendWarning] {
        match self {
            TranscriptionOutcome::Transcribed { warnings, .. }
            | TranscriptionOutcome::Skipped { warnings } => warnings,
        }
    }

    pub fn result(&self) -> Option<&Arc<TranscriptionResult>> {
        match self {
            TranscriptionOutcome::Transcribed { result, .. } => Some(result),
            TranscriptionOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct TranscriptionAdapter {
    preferred: Arc<dyn TranscriptionBackend>,
    fallback: Option<Arc<dyn TranscriptionBackend>>,
    cache: Arc<TranscriptionCache>,
}

impl TranscriptionAdapter {
    pub fn new(preferred: Arc<dyn TranscriptionBackend>, cache: Arc<TranscriptionCache>) -> Self {
        Self {
            preferred,
            fallback: None,
            cache,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn TranscriptionBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Selects backends from a registry by id
    pub fn from_registry(
        registry: &BackendRegistry,
        preferred: &str,
        fallback: Option<&str>,
        cache: Arc<TranscriptionCache>,
    ) -> CoreResult<Self> {
        let preferred = registry.get(preferred).ok_or_else(|| CoreError::BackendUnavailable {
            backend: preferred.to_string(),
            reason: format!(
                "not registered (known: {})",
                registry.ids().join(", ")
            ),
        })?;

        let mut adapter = Self::new(preferred, cache);
        if let Some(id) = fallback {
            match registry.get(id) {
                Some(backend) => adapter = adapter.with_fallback(backend),
                None => warn!(backend = %id, "Fallback transcription backend is not registered"),
            }
        }
        Ok(adapter)
    }

    pub fn preferred_id(&self) -> &str {
        self.preferred.id()
    }

    pub fn cache(&self) -> &Arc<TranscriptionCache> {
        &self.cache
    }

    /// Transcribes through one backend, using the cache
    pub async fn transcribe_with(
        &self,
        backend: &Arc<dyn TranscriptionBackend>,
        audio: &Path,
        fingerprint: &str,
        language: Option<&str>,
    ) -> CoreResult<Arc<TranscriptionResult>> {
        let key = CacheKey::new(fingerprint, backend.id(), language);
        self.cache
            .get_or_compute(&key, || async {
                let result = backend.transcribe(audio, language).await?;
                Ok(result.normalized())
            })
            .await
    }

    /// Transcribes `audio`, falling back or skipping instead of failing
    pub async fn transcribe(&self, audio: &Path, language: Option<&str>) -> TranscriptionOutcome {
        let mut warnings = Vec::new();

        let fingerprint = match fingerprint_async(audio).await {
            Ok(fp) => fp,
            Err(e) => {
                record(&mut warnings, self.preferred.id(), &e);
                return TranscriptionOutcome::Skipped { warnings };
            }
        };

        let mut candidates = vec![Arc::clone(&self.preferred)];
        candidates.extend(self.fallback.iter().cloned());

        for backend in &candidates {
            match self.transcribe_with(backend, audio, &fingerprint, language).await {
                Ok(result) => {
                    info!(
                        backend = %backend.id(),
                        fingerprint = %fingerprint,
                        words = result.words.len(),
                        "Transcription ready"
                    );
                    return TranscriptionOutcome::Transcribed {
                        result,
                        backend: backend.id().to_string(),
                        warnings,
                    };
                }
                Err(e @ CoreError::BackendUnavailable { .. }) => {
                    record(&mut warnings, backend.id(), &e);
                }
                Err(e) => {
                    // Only an unavailable backend hands over to the fallback.
                    record(&mut warnings, backend.id(), &e);
                    break;
                }
            }
        }

        TranscriptionOutcome::Skipped {
            warnings: collapse(warnings),
        }
    }
}

/// Folds the warnings of an exhausted backend chain into one
fn collapse(mut warnings: Vec<BackendWarning>) -> Vec<BackendWarning> {
    if warnings.len() < 2 {
        return warnings;
    }
    let reason = warnings
        .iter()
        .map(|w| format!("{}: {}", w.backend, w.reason))
        .collect::<Vec<_>>()
        .join("; ");
    let first = warnings.swap_remove(0);
    vec![BackendWarning {
        backend: first.backend,
        reason: format!("no transcription backend could run ({})", reason),
    }]
}

fn record(warnings: &mut Vec<BackendWarning>, backend: &str, error: &CoreError) {
    let reason = match error {
        CoreError::BackendUnavailable { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    warn!(backend = %backend, reason = %reason, "Transcription backend degraded");
    warnings.push(BackendWarning {
        backend: backend.to_string(),
        reason,
    });
}

async fn fingerprint_async(path: &Path) -> CoreResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || content_fingerprint(&path))
        .await
        .map_err(|e| CoreError::Internal(format!("fingerprint task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transcription::WordTiming;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeBackend {
        id: &'static str,
        outcome: fn() -> CoreResult<TranscriptionResult>,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(id: &'static str, outcome: fn() -> CoreResult<TranscriptionResult>) -> Arc<Self> {
            Arc::new(Self {
                id,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TranscriptionBackend for FakeBackend {
        fn id(&self) -> &str {
            self.id
        }

        async fn transcribe(
            &self,
            _audio: &Path,
            _language: Option<&str>,
        ) -> CoreResult<TranscriptionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn words() -> CoreResult<TranscriptionResult> {
        Ok(TranscriptionResult::new(vec![
            WordTiming::new("b", 1.0, 1.5),
            WordTiming::new("a", 0.0, 0.5),
        ]))
    }

    fn unavailable() -> CoreResult<TranscriptionResult> {
        Err(CoreError::BackendUnavailable {
            backend: "fake".to_string(),
            reason: "no model".to_string(),
        })
    }

    fn broken() -> CoreResult<TranscriptionResult> {
        Err(CoreError::TranscriptionFailed("decoder crashed".to_string()))
    }

    fn audio_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("voice.wav");
        std::fs::write(&path, b"same bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn test_preferred_backend_result_is_normalized_and_cached() {
        let dir = TempDir::new().unwrap();
        let audio = audio_file(&dir);
        let backend = FakeBackend::new("fake", words);
        let adapter = TranscriptionAdapter::new(backend.clone(), Arc::new(TranscriptionCache::new()));

        let first = adapter.transcribe(&audio, None).await;
        let second = adapter.transcribe(&audio, None).await;

        let result = first.result().unwrap();
        assert_eq!(result.words[0].text, "a");
        assert!(first.warnings().is_empty());
        assert!(Arc::ptr_eq(result, second.result().unwrap()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend_uses_fallback_with_warning() {
        let dir = TempDir::new().unwrap();
        let audio = audio_file(&dir);
        let adapter = TranscriptionAdapter::new(
            FakeBackend::new("primary", unavailable),
            Arc::new(TranscriptionCache::new()),
        )
        .with_fallback(FakeBackend::new("backup", words));

        match adapter.transcribe(&audio, Some("en")).await {
            TranscriptionOutcome::Transcribed {
                backend, warnings, ..
            } => {
                assert_eq!(backend, "backup");
                assert_eq!(
                    warnings,
                    vec![BackendWarning {
                        backend: "primary".to_string(),
                        reason: "no model".to_string(),
                    }]
                );
            }
            other => panic!("expected fallback result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_backend_available_skips_with_one_warning() {
        let dir = TempDir::new().unwrap();
        let audio = audio_file(&dir);
        let adapter = TranscriptionAdapter::new(
            FakeBackend::new("primary", unavailable),
            Arc::new(TranscriptionCache::new()),
        );

        let outcome = adapter.transcribe(&audio, None).await;
        assert!(outcome.result().is_none());
        assert_eq!(outcome.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_fallback_chain_yields_one_warning() {
        let dir = TempDir::new().unwrap();
        let audio = audio_file(&dir);
        let adapter = TranscriptionAdapter::new(
            FakeBackend::new("primary", unavailable),
            Arc::new(TranscriptionCache::new()),
        )
        .with_fallback(FakeBackend::new("backup", unavailable));

        let outcome = adapter.transcribe(&audio, None).await;
        assert!(outcome.result().is_none());
        assert_eq!(outcome.warnings().len(), 1);
        let warning = &outcome.warnings()[0];
        assert_eq!(warning.backend, "primary");
        assert!(warning.reason.contains("primary: no model"));
        assert!(warning.reason.contains("backup: no model"));
    }

    #[tokio::test]
    async fn test_default_registry_without_model_or_transcript_warns_once() {
        let dir = TempDir::new().unwrap();
        let audio = audio_file(&dir);
        let registry = BackendRegistry::with_builtin(None, 0, None);
        let adapter = TranscriptionAdapter::from_registry(
            &registry,
            crate::core::transcription::WHISPER_BACKEND_ID,
            Some(crate::core::transcription::SIDECAR_BACKEND_ID),
            Arc::new(TranscriptionCache::new()),
        )
        .unwrap();

        let outcome = adapter.transcribe(&audio, Some("en")).await;
        assert!(matches!(outcome, TranscriptionOutcome::Skipped { .. }));
        assert_eq!(outcome.warnings().len(), 1);
        let warning = &outcome.warnings()[0];
        assert_eq!(warning.backend, "whisper");
        assert!(warning.reason.contains("whisper:"));
        assert!(warning.reason.contains("sidecar:"));
    }

    #[tokio::test]
    async fn test_failure_other_than_unavailable_does_not_fall_back() {
        let dir = TempDir::new().unwrap();
        let audio = audio_file(&dir);
        let fallback = FakeBackend::new("backup", words);
        let adapter = TranscriptionAdapter::new(
            FakeBackend::new("primary", broken),
            Arc::new(TranscriptionCache::new()),
        )
        .with_fallback(fallback.clone());

        let outcome = adapter.transcribe(&audio, None).await;
        assert!(matches!(outcome, TranscriptionOutcome::Skipped { .. }));
        assert!(outcome.warnings()[0].reason.contains("decoder crashed"));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_audio_skips() {
        let adapter = TranscriptionAdapter::new(
            FakeBackend::new("fake", words),
            Arc::new(TranscriptionCache::new()),
        );
        let outcome = adapter.transcribe(Path::new("/nonexistent/voice.wav"), None).await;
        assert!(matches!(outcome, TranscriptionOutcome::Skipped { .. }));
    }

    #[test]
    fn test_from_registry_unknown_backend() {
        let registry = BackendRegistry::new();
        let err = TranscriptionAdapter::from_registry(
            &registry,
            "whisper",
            None,
            Arc::new(TranscriptionCache::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, CoreError::BackendUnavailable { .. }));
    }
}
