//! Export pipeline integration tests.
//!
//! Drives the export pipeline end to end with in-process render and
//! transcription backends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use clipweave_lib::core::{
    captions::{parse_srt, CaptionMode},
    jobs::{ExportService, ExportServiceConfig},
    media::{MediaLibrary, MediaSource},
    pipeline::{
        CancelToken, ExportPipeline, ExportRequest, PipelineStage, ProgressReporter,
        ProgressUpdate, StageProgress,
    },
    render::{CompositionPlan, ExportSettings, RenderBackend, RenderOutput},
    resolver::TextSource,
    timeline::{TextStyle, Timeline, TimelineItem},
    transcription::{
        TranscriptionAdapter, TranscriptionBackend, TranscriptionCache, TranscriptionResult,
        WordTiming,
    },
    CoreError, CoreResult,
};

// =============================================================================
// Mock Implementations
// =============================================================================

/// Transcriber returning a fixed word list, counting invocations.
struct ScriptedTranscriber {
    id: &'static str,
    words: Vec<(&'static str, f64, f64)>,
    delay: Duration,
    unavailable: bool,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    fn new(id: &'static str, words: &[(&'static str, f64, f64)]) -> Self {
        Self {
            id,
            words: words.to_vec(),
            delay: Duration::ZERO,
            unavailable: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn unavailable(id: &'static str) -> Self {
        Self {
            unavailable: true,
            ..Self::new(id, &[])
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionBackend for ScriptedTranscriber {
    fn id(&self) -> &str {
        self.id
    }

    async fn transcribe(
        &self,
        _audio: &Path,
        _language: Option<&str>,
    ) -> CoreResult<TranscriptionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.unavailable {
            return Err(CoreError::BackendUnavailable {
                backend: self.id.to_string(),
                reason: "model file missing".to_string(),
            });
        }
        Ok(TranscriptionResult::new(
            self.words
                .iter()
                .map(|(text, start, end)| WordTiming::new(text, *start, *end))
                .collect(),
        ))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum RenderBehavior {
    /// Writes the output and succeeds
    Succeed,
    /// Writes part of the output, then fails
    Fail,
    /// Writes part of the output, then waits for cancellation
    Stall,
}

/// Render backend recording every plan it receives.
struct RecordingRenderer {
    behavior: RenderBehavior,
    plans: Mutex<Vec<CompositionPlan>>,
}

impl RecordingRenderer {
    fn new(behavior: RenderBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            plans: Mutex::new(Vec::new()),
        })
    }

    fn last_plan(&self) -> CompositionPlan {
        self.plans.lock().unwrap().last().cloned().expect("no plan rendered")
    }
}

#[async_trait]
impl RenderBackend for RecordingRenderer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn render(
        &self,
        plan: &CompositionPlan,
        _settings: &ExportSettings,
        output: &Path,
        progress: &StageProgress,
        cancel: &CancelToken,
    ) -> CoreResult<RenderOutput> {
        self.plans.lock().unwrap().push(plan.clone());
        std::fs::write(output, b"partial")?;
        progress.fraction(0.25, Some("encoding".to_string()));

        match self.behavior {
            RenderBehavior::Succeed => {
                std::fs::write(output, b"rendered video")?;
                progress.fraction(1.0, None);
                Ok(RenderOutput { file_size: 14 })
            }
            RenderBehavior::Fail => Err(CoreError::Internal(
                "encoder exited with status 1".to_string(),
            )),
            RenderBehavior::Stall => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(CoreError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {
                        Ok(RenderOutput { file_size: 7 })
                    }
                }
            }
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

const SPEECH_WORDS: &[(&str, f64, f64)] = &[
    ("hel-lo", 0.0, 0.5),
    ("wor-ld", 0.6, 1.1),
    ("again", 1.3, 1.8),
    ("bye", 2.0, 2.2),
];

/// A 10s video, its audio left unprobed, with a 10s speech track.
fn fixture(dir: &Path, speech_file: &str) -> (Timeline, MediaLibrary) {
    let clip = dir.join("clip.mp4");
    let speech = dir.join(speech_file);
    std::fs::write(&clip, b"video bytes").unwrap();
    std::fs::write(&speech, b"identical speech bytes").unwrap();

    let media: MediaLibrary = [
        MediaSource::resolve("clip", &clip).unwrap(),
        MediaSource::resolve("speech", &speech).unwrap(),
    ]
        .into_iter()
        .collect();

    let mut timeline = Timeline::new();
    timeline
        .add(TimelineItem::video("v1", "clip", 0.0, 10.0))
        .unwrap();
    timeline
        .add(TimelineItem::audio("a1", "speech", 0.0, 10.0))
        .unwrap();
    (timeline, media)
}

fn request(dir: &Path, speech_file: &str, output: &str, settings: ExportSettings) -> ExportRequest {
    let (timeline, media) = fixture(dir, speech_file);
    ExportRequest {
        timeline,
        media,
        settings,
        output_path: dir.join(output),
    }
}

fn captioned_settings(mode: CaptionMode) -> ExportSettings {
    ExportSettings {
        auto_captions: true,
        caption_mode: mode,
        ..ExportSettings::default()
    }
}

fn adapter(preferred: Arc<ScriptedTranscriber>) -> TranscriptionAdapter {
    TranscriptionAdapter::new(preferred, Arc::new(TranscriptionCache::new()))
}

fn caption_spans(plan: &CompositionPlan) -> Vec<(String, f64, f64)> {
    plan.texts
        .iter()
        .filter(|t| t.source == TextSource::Caption)
        .map(|t| (t.text.clone(), t.start_sec, t.end_sec))
        .collect()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressUpdate>) -> Vec<ProgressUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

/// Files in `dir` other than the fixture inputs.
fn leftovers(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            let name = p.file_name().unwrap().to_string_lossy();
            name != "clip.mp4" && !name.ends_with(".wav")
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_word_by_word_captions_reach_the_render_plan() {
    let dir = TempDir::new().unwrap();
    let renderer = RecordingRenderer::new(RenderBehavior::Succeed);
    let transcriber = Arc::new(ScriptedTranscriber::new("scripted", SPEECH_WORDS));
    let pipeline = ExportPipeline::new(renderer.clone()).with_transcriber(adapter(transcriber));

    let mut settings = captioned_settings(CaptionMode::WordByWord);
    settings.export_subtitles = true;
    let request = request(dir.path(), "speech.wav", "out.mp4", settings);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = pipeline
        .run(&request, &ProgressReporter::channel(tx), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.generated_captions, 4);
    assert_eq!(report.caption_count, 4);
    assert!(report.warnings.is_empty());
    assert_eq!(report.last_completed_stage, PipelineStage::Rendering);
    assert_eq!(
        report.stages,
        vec![
            PipelineStage::Idle,
            PipelineStage::Validating,
            PipelineStage::Captioning,
            PipelineStage::Resolving,
            PipelineStage::Rendering,
            PipelineStage::Done,
        ]
    );
    assert_eq!(std::fs::read(&report.output_path).unwrap(), b"rendered video");

    let spans = caption_spans(&renderer.last_plan());
    let expected = [
        ("hel-lo", 0.0, 0.6),
        ("wor-ld", 0.6, 1.3),
        ("again", 1.3, 2.0),
        ("bye", 2.0, 2.3),
    ];
    assert_eq!(spans.len(), expected.len());
    for ((text, start, end), (want_text, want_start, want_end)) in spans.iter().zip(expected) {
        assert_eq!(text, want_text);
        assert!(approx(*start, want_start) && approx(*end, want_end), "{text}: {start}..{end}");
    }
    for pair in spans.windows(2) {
        assert!(pair[0].2 <= pair[1].1 + 1e-9);
    }

    let srt_path = report.subtitle_path.expect("subtitle sidecar");
    assert_eq!(srt_path, dir.path().join("out.srt"));
    let cues = parse_srt(&std::fs::read_to_string(srt_path).unwrap()).unwrap();
    assert_eq!(cues.len(), 4);
    assert_eq!(cues[0].text, "hel-lo");

    let updates = drain(&mut rx);
    for pair in updates.windows(2) {
        assert!(pair[1].percent >= pair[0].percent);
    }
    let last = updates.last().unwrap();
    assert_eq!(last.stage, PipelineStage::Done);
    assert_eq!(last.percent, 100.0);
}

#[tokio::test]
async fn test_only_overlay_audio_is_captioned() {
    let dir = TempDir::new().unwrap();
    let renderer = RecordingRenderer::new(RenderBehavior::Succeed);
    let transcriber = Arc::new(ScriptedTranscriber::new("scripted", SPEECH_WORDS));
    let pipeline =
        ExportPipeline::new(renderer.clone()).with_transcriber(adapter(transcriber.clone()));

    let mut request = request(
        dir.path(),
        "speech.wav",
        "out.mp4",
        captioned_settings(CaptionMode::WordByWord),
    );
    assert_eq!(request.media.get("clip").unwrap().has_audio, None);

    let narration = dir.path().join("narration.wav");
    std::fs::write(&narration, b"different speech bytes").unwrap();
    request.media.insert(MediaSource::resolve("narration", &narration).unwrap());
    request
        .timeline
        .add(TimelineItem::audio("a2", "narration", 5.0, 5.0))
        .unwrap();

    let report = pipeline
        .run(&request, &ProgressReporter::silent(), &CancelToken::new())
        .await
        .unwrap();

    // One run per audio item; the video clip is never transcribed.
    assert_eq!(transcriber.calls(), 2);
    assert_eq!(report.generated_captions, 8);

    let spans = caption_spans(&renderer.last_plan());
    let texts: Vec<_> = spans.iter().map(|(text, _, _)| text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["hel-lo", "wor-ld", "again", "bye", "hel-lo", "wor-ld", "again", "bye"]
    );
    assert!(approx(spans[0].1, 0.0) && approx(spans[3].2, 2.3));
    assert!(approx(spans[4].1, 5.0) && approx(spans[7].2, 7.3));
}

#[tokio::test]
async fn test_manual_text_suppresses_overlapping_captions() {
    let dir = TempDir::new().unwrap();
    let renderer = RecordingRenderer::new(RenderBehavior::Succeed);
    let pipeline = ExportPipeline::new(renderer.clone());

    let mut request = request(dir.path(), "speech.wav", "out.mp4", ExportSettings::default());
    let style = TextStyle::default();
    for item in [
        TimelineItem::text("title", "Chapter One", 2.0, 3.0),
        TimelineItem::caption("cc", "inside", 4.0, 0.8, style.clone()).with_id("inside"),
        TimelineItem::caption("cc", "before", 1.0, 1.5, style.clone()).with_id("before"),
        TimelineItem::caption("cc", "after", 5.5, 1.0, style).with_id("after"),
    ] {
        request.timeline.add(item).unwrap();
    }

    let report = pipeline
        .run(&request, &ProgressReporter::silent(), &CancelToken::new())
        .await
        .unwrap();

    let plan = renderer.last_plan();
    let spans = caption_spans(&plan);
    assert_eq!(
        spans,
        vec![
            ("before".to_string(), 1.0, 2.0),
            ("after".to_string(), 5.5, 6.5),
        ]
    );
    assert_eq!(report.caption_count, 2);
    assert_eq!(plan.overlay_stats.captions_dropped, 1);
    assert_eq!(plan.overlay_stats.captions_truncated, 1);

    let manual: Vec<_> = plan
        .texts
        .iter()
        .filter(|t| t.source == TextSource::Manual)
        .collect();
    assert_eq!(manual.len(), 1);
    for caption in plan.texts.iter().filter(|t| t.source == TextSource::Caption) {
        assert!(caption.end_sec <= 2.0 + 1e-9 || caption.start_sec >= 5.0 - 1e-9);
    }
}

#[tokio::test]
async fn test_unavailable_backend_still_exports_without_captions() {
    let dir = TempDir::new().unwrap();
    let renderer = RecordingRenderer::new(RenderBehavior::Succeed);
    let transcriber = Arc::new(ScriptedTranscriber::unavailable("whisper"));
    let pipeline =
        ExportPipeline::new(renderer.clone()).with_transcriber(adapter(transcriber.clone()));

    let request = request(
        dir.path(),
        "speech.wav",
        "out.mp4",
        captioned_settings(CaptionMode::Phrase),
    );
    let report = pipeline
        .run(&request, &ProgressReporter::silent(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.caption_count, 0);
    assert_eq!(report.warnings.len(), 1);
    let warning = &report.warnings[0];
    assert_eq!(warning.stage, PipelineStage::Captioning);
    assert_eq!(warning.backend.as_deref(), Some("whisper"));
    assert!(warning.reason.contains("model file missing"));

    assert_eq!(transcriber.calls(), 1);
    assert!(caption_spans(&renderer.last_plan()).is_empty());
    assert!(report.output_path.exists());
}

#[tokio::test]
async fn test_fallback_backend_used_when_preferred_unavailable() {
    let dir = TempDir::new().unwrap();
    let renderer = RecordingRenderer::new(RenderBehavior::Succeed);
    let preferred = Arc::new(ScriptedTranscriber::unavailable("whisper"));
    let fallback = Arc::new(ScriptedTranscriber::new("sidecar", SPEECH_WORDS));
    let pipeline = ExportPipeline::new(renderer.clone())
        .with_transcriber(adapter(preferred).with_fallback(fallback.clone()));

    let request = request(
        dir.path(),
        "speech.wav",
        "out.mp4",
        captioned_settings(CaptionMode::WordByWord),
    );
    let report = pipeline
        .run(&request, &ProgressReporter::silent(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(fallback.calls(), 1);
    assert_eq!(report.caption_count, 4);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].backend.as_deref(), Some("whisper"));
}

#[tokio::test]
async fn test_exhausted_fallback_chain_warns_once() {
    let dir = TempDir::new().unwrap();
    let renderer = RecordingRenderer::new(RenderBehavior::Succeed);
    let preferred = Arc::new(ScriptedTranscriber::unavailable("whisper"));
    let fallback = Arc::new(ScriptedTranscriber::unavailable("sidecar"));
    let pipeline = ExportPipeline::new(renderer.clone())
        .with_transcriber(adapter(preferred).with_fallback(fallback.clone()));

    let request = request(
        dir.path(),
        "speech.wav",
        "out.mp4",
        captioned_settings(CaptionMode::Phrase),
    );
    let report = pipeline
        .run(&request, &ProgressReporter::silent(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(fallback.calls(), 1);
    assert_eq!(report.caption_count, 0);
    assert_eq!(report.warnings.len(), 1);
    let reason = &report.warnings[0].reason;
    assert!(reason.contains("whisper") && reason.contains("sidecar"), "{reason}");
    assert!(report.output_path.exists());
}

#[tokio::test]
async fn test_auto_captions_without_transcriber_warns() {
    let dir = TempDir::new().unwrap();
    let pipeline = ExportPipeline::new(RecordingRenderer::new(RenderBehavior::Succeed));

    let request = request(
        dir.path(),
        "speech.wav",
        "out.mp4",
        captioned_settings(CaptionMode::Phrase),
    );
    let report = pipeline
        .run(&request, &ProgressReporter::silent(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.caption_count, 0);
    assert_eq!(report.warnings.len(), 1);
    assert!(!report.stages.contains(&PipelineStage::Captioning));
}

#[tokio::test]
async fn test_identical_audio_is_transcribed_once_across_concurrent_exports() {
    let dir = TempDir::new().unwrap();
    let transcriber = Arc::new(
        ScriptedTranscriber::new("scripted", SPEECH_WORDS).with_delay(Duration::from_millis(100)),
    );
    let pipeline = ExportPipeline::new(RecordingRenderer::new(RenderBehavior::Succeed))
        .with_transcriber(adapter(transcriber.clone()));
    let service = ExportService::new(
        pipeline,
        ExportServiceConfig {
            max_concurrent_exports: 2,
        },
    );

    let settings = captioned_settings(CaptionMode::WordByWord);
    let first = service.spawn_export(request(dir.path(), "speech_a.wav", "a.mp4", settings.clone()));
    let second = service.spawn_export(request(dir.path(), "speech_b.wav", "b.mp4", settings));

    let (a, b) = tokio::join!(first.join(), second.join());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(transcriber.calls(), 1);
    assert_eq!(a.generated_captions, 4);
    assert_eq!(b.generated_captions, 4);
    assert!(dir.path().join("a.mp4").exists());
    assert!(dir.path().join("b.mp4").exists());
}

#[tokio::test]
async fn test_cancelled_render_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let pipeline = ExportPipeline::new(RecordingRenderer::new(RenderBehavior::Stall));
    let request = request(dir.path(), "speech.wav", "out.mp4", ExportSettings::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reporter = ProgressReporter::channel(tx);
    let cancel = CancelToken::new();

    let canceller = async {
        while let Some(update) = rx.recv().await {
            if update.stage == PipelineStage::Rendering && update.percent > 30.0 {
                cancel.cancel();
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(pipeline.run(&request, &reporter, &cancel), canceller);

    assert!(matches!(result, Err(CoreError::Cancelled)));
    assert!(!request.output_path.exists());
    assert!(leftovers(dir.path()).is_empty(), "{:?}", leftovers(dir.path()));

    // The renderer keeps its plans; dropping it must release every media handle.
    drop(pipeline);
    let clip = request.media.get("clip").unwrap();
    assert_eq!(Arc::strong_count(&clip), 2);
}

#[tokio::test]
async fn test_render_failure_reports_last_completed_stage() {
    let dir = TempDir::new().unwrap();
    let pipeline = ExportPipeline::new(RecordingRenderer::new(RenderBehavior::Fail));
    let request = request(dir.path(), "speech.wav", "out.mp4", ExportSettings::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = pipeline
        .run(&request, &ProgressReporter::channel(tx), &CancelToken::new())
        .await
        .unwrap_err();

    match err {
        CoreError::RenderFailure {
            last_completed_stage,
            message,
        } => {
            assert_eq!(last_completed_stage, PipelineStage::Resolving);
            assert!(message.contains("status 1"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!request.output_path.exists());
    assert!(leftovers(dir.path()).is_empty());

    let updates = drain(&mut rx);
    assert_eq!(updates.last().unwrap().stage, PipelineStage::Failed);
}

#[tokio::test]
async fn test_invalid_timeline_fails_before_rendering() {
    let dir = TempDir::new().unwrap();
    let renderer = RecordingRenderer::new(RenderBehavior::Succeed);
    let pipeline = ExportPipeline::new(renderer.clone());

    let mut request = request(dir.path(), "speech.wav", "out.mp4", ExportSettings::default());
    request
        .timeline
        .add(TimelineItem::image("logo", "missing", 0.0, 2.0))
        .unwrap();

    let err = pipeline
        .run(&request, &ProgressReporter::silent(), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UnknownMedia(id) if id == "missing"));
    assert!(renderer.plans.lock().unwrap().is_empty());
    assert!(!request.output_path.exists());
}
