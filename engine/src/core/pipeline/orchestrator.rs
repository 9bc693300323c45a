//! Export Orchestrator
//!
//! Runs one export through its stages in strict order:
//!
//! - `Validating`: settings, timeline invariants and media references.
//!   Nothing expensive starts before this passes.
//! - `Captioning`: only with auto captions on and an overlay audio item
//!   present. Transcription trouble becomes a warning and the export
//!   continues without generated captions.
//! - `Resolving`: overlay resolution and the composition plan.
//! - `Rendering`: the render backend writes a staging file that is renamed
//!   over the output only after success. Failure or cancellation removes it.
//! - `Done`: returns an [`ExportReport`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{CancelToken, PipelineStage, ProgressReporter, StageTracker};
use crate::core::{
    captions::{write_srt, CaptionCueBuilder, Cue, TimingPolicy},
    fs::{finalize_into_place, remove_if_exists, staging_path_for, validate_output_path},
    media::{MediaLibrary, MediaSource},
    render::{check_media_references, CompositionPlan, ExportSettings, RenderBackend},
    resolver::{OverlayResolver, TextSource},
    timeline::{ItemContent, TextStyle, Timeline, TimelineItem, TrackKind},
    transcription::TranscriptionAdapter,
    CoreError, CoreResult, TimeSec, TIME_EPSILON,
};

/// A non-fatal problem met during an export
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineWarning {
    pub stage: PipelineStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub reason: String,
}

/// Everything one export needs, owned so it can move onto a task
#[derive(Clone, Debug)]
pub struct ExportRequest {
    pub timeline: Timeline,
    pub media: MediaLibrary,
    pub settings: ExportSettings,
    pub output_path: PathBuf,
}

/// Outcome of a finished export
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_path: Option<PathBuf>,
    pub duration_sec: TimeSec,
    /// Caption cues built from transcription
    pub generated_captions: usize,
    /// Caption pieces drawn after manual text took precedence
    pub caption_count: usize,
    pub warnings: Vec<PipelineWarning>,
    pub last_completed_stage: PipelineStage,
    pub stages: Vec<PipelineStage>,
    pub encoding_time_sec: f64,
    /// RFC 3339 completion time
    pub finished_at: String,
}

/// Sequences the export stages over shared, read-only services
#[derive(Clone)]
pub struct ExportPipeline {
    renderer: Arc<dyn RenderBackend>,
    transcriber: Option<TranscriptionAdapter>,
    resolver: OverlayResolver,
    caption_policy: Option<TimingPolicy>,
    caption_style: TextStyle,
}

struct Run<'a> {
    tracker: StageTracker,
    progress: &'a ProgressReporter,
    cancel: &'a CancelToken,
    warnings: Vec<PipelineWarning>,
}

impl Run<'_> {
    /// Enters `stage` after a cancellation check
    fn enter(&mut self, stage: PipelineStage) -> CoreResult<()> {
        self.cancel.check()?;
        self.tracker.advance(stage)?;
        info!(stage = %stage, "Export stage started");
        self.progress.enter(stage);
        Ok(())
    }

    fn finish_stage(&self) {
        self.progress.stage(self.tracker.current()).fraction(1.0, None);
    }

    fn warn(&mut self, stage: PipelineStage, backend: Option<&str>, reason: String) {
        warn!(
            backend = backend.unwrap_or("none"),
            reason = %reason,
            stage = stage.label(),
            "Export degraded"
        );
        self.warnings.push(PipelineWarning {
            stage,
            backend: backend.map(str::to_string),
            reason,
        });
    }
}

impl ExportPipeline {
    pub fn new(renderer: Arc<dyn RenderBackend>) -> Self {
        Self {
            renderer,
            transcriber: None,
            resolver: OverlayResolver::default(),
            caption_policy: None,
            caption_style: TextStyle::default(),
        }
    }

    pub fn with_transcriber(mut self, transcriber: TranscriptionAdapter) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_resolver(mut self, resolver: OverlayResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Timing policy used instead of the per-mode defaults
    pub fn with_caption_policy(mut self, policy: TimingPolicy) -> Self {
        self.caption_policy = Some(policy);
        self
    }

    /// Caption style used when the export settings carry none
    pub fn with_caption_style(mut self, style: TextStyle) -> Self {
        self.caption_style = style;
        self
    }

    /// Runs the export to completion, failure or cancellation
    pub async fn run(
        &self,
        request: &ExportRequest,
        progress: &ProgressReporter,
        cancel: &CancelToken,
    ) -> CoreResult<ExportReport> {
        let started = Instant::now();
        let mut run = Run {
            tracker: StageTracker::new(),
            progress,
            cancel,
            warnings: Vec::new(),
        };

        match self.run_stages(request, &mut run).await {
            Ok(mut report) => {
                report.encoding_time_sec = started.elapsed().as_secs_f64();
                info!(
                    output = %report.output_path.display(),
                    captions = report.caption_count,
                    warnings = report.warnings.len(),
                    elapsed_sec = report.encoding_time_sec,
                    "Export finished"
                );
                Ok(report)
            }
            Err(e) => {
                let failed_in = run.tracker.current();
                run.tracker.fail();
                if matches!(e, CoreError::Cancelled) {
                    warn!(stage = %failed_in, "Export cancelled");
                } else {
                    error!(stage = %failed_in, error = %e, "Export failed");
                }
                progress.report(PipelineStage::Failed, progress.percent(), Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_stages(&self, request: &ExportRequest, run: &mut Run<'_>) -> CoreResult<ExportReport> {
        let ExportRequest {
            timeline,
            media,
            settings,
            output_path,
        } = request;

        // Validating
        run.enter(PipelineStage::Validating)?;
        settings.validate()?;
        timeline.validate()?;
        check_media_references(timeline, media)?;
        let output_path = validate_output_path(output_path)?;
        run.finish_stage();

        // Captioning
        let generated = if settings.auto_captions {
            self.generate_captions(timeline, media, settings, run).await?
        } else {
            Vec::new()
        };

        // Resolving
        run.enter(PipelineStage::Resolving)?;
        let manual = timeline.items_of_kind(TrackKind::TextOverlay);
        let mut captions = timeline.items_of_kind(TrackKind::Caption);
        captions.extend(generated.iter());
        captions.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));

        let overlays = self.resolver.resolve(&manual, &captions)?;
        debug!(stats = ?overlays.stats, "Overlays resolved");
        let plan = CompositionPlan::build(timeline, media, overlays, settings)?;
        run.finish_stage();

        // Rendering
        run.enter(PipelineStage::Rendering)?;
        self.render(&plan, settings, &output_path, run).await?;

        let subtitle_path = if settings.export_subtitles {
            self.write_subtitles(&plan, &output_path, run)
        } else {
            None
        };

        // Done
        run.tracker.advance(PipelineStage::Done)?;
        run.progress.enter(PipelineStage::Done);

        Ok(ExportReport {
            output_path,
            subtitle_path,
            duration_sec: plan.duration_sec,
            generated_captions: generated.len(),
            caption_count: plan.caption_count(),
            warnings: std::mem::take(&mut run.warnings),
            last_completed_stage: run.tracker.last_completed(),
            stages: run.tracker.history().to_vec(),
            encoding_time_sec: 0.0,
            finished_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Transcribes each overlay audio item and builds its caption items.
    ///
    /// Cues are built per source so overlapping speech never interleaves
    /// words. Only caption construction errors escape; transcription
    /// problems are recorded as warnings.
    async fn generate_captions(
        &self,
        timeline: &Timeline,
        media: &MediaLibrary,
        settings: &ExportSettings,
        run: &mut Run<'_>,
    ) -> CoreResult<Vec<TimelineItem>> {
        let sources = speech_sources(timeline, media);
        if sources.is_empty() {
            debug!("Auto captions requested but no overlay audio is present");
            return Ok(Vec::new());
        }
        let Some(transcriber) = &self.transcriber else {
            run.warn(
                PipelineStage::Captioning,
                None,
                "no transcription backend is configured".to_string(),
            );
            return Ok(Vec::new());
        };

        run.enter(PipelineStage::Captioning)?;
        let stage = run.progress.stage(PipelineStage::Captioning);
        let language = settings.language.as_deref();

        let mode = settings.caption_mode;
        let policy = self
            .caption_policy
            .clone()
            .unwrap_or_else(|| TimingPolicy::for_mode(mode));
        let style = settings
            .caption_style
            .clone()
            .unwrap_or_else(|| self.caption_style.clone());
        let builder = CaptionCueBuilder::new(mode, policy, style);

        let mut items = Vec::new();
        for (i, source) in sources.iter().enumerate() {
            run.cancel.check()?;
            let outcome = transcriber.transcribe(&source.media.path, language).await;
            for warning in outcome.warnings() {
                run.warn(
                    PipelineStage::Captioning,
                    Some(&warning.backend),
                    warning.reason.clone(),
                );
            }
            if let Some(result) = outcome.result() {
                let mapped =
                    result.mapped_to_timeline(source.source_in_sec, source.duration_sec, source.start_sec);
                if !mapped.words.is_empty() {
                    items.extend(builder.build(&mapped)?);
                }
            }
            stage.fraction((i + 1) as f64 / sources.len() as f64, None);
        }

        if !items.is_empty() {
            info!(cues = items.len(), sources = sources.len(), mode = ?mode, "Generated captions");
        }
        Ok(items)
    }

    async fn render(
        &self,
        plan: &CompositionPlan,
        settings: &ExportSettings,
        output_path: &Path,
        run: &mut Run<'_>,
    ) -> CoreResult<()> {
        let staging = staging_path_for(output_path, &ulid::Ulid::new().to_string());
        let stage = run.progress.stage(PipelineStage::Rendering);

        debug!(
            renderer = self.renderer.name(),
            staging = %staging.display(),
            media = plan.media_sources().len(),
            "Rendering"
        );

        let rendered = self
            .renderer
            .render(plan, settings, &staging, &stage, run.cancel)
            .await
            .and_then(|_| run.cancel.check());

        if let Err(e) = rendered {
            discard_staging(&staging);
            return Err(match e {
                e @ (CoreError::Cancelled | CoreError::RenderFailure { .. }) => e,
                other => CoreError::RenderFailure {
                    last_completed_stage: run.tracker.last_completed(),
                    message: other.to_string(),
                },
            });
        }

        finalize_into_place(&staging, output_path).map_err(|e| {
            discard_staging(&staging);
            CoreError::RenderFailure {
                last_completed_stage: run.tracker.last_completed(),
                message: format!("could not move output into place: {}", e),
            }
        })
    }

    /// Writes drawn captions next to the output; failure only warns
    fn write_subtitles(
        &self,
        plan: &CompositionPlan,
        output_path: &Path,
        run: &mut Run<'_>,
    ) -> Option<PathBuf> {
        let cues = subtitle_cues(plan);
        if cues.is_empty() {
            return None;
        }
        let path = output_path.with_extension("srt");
        match write_srt(&path, &cues) {
            Ok(()) => Some(path),
            Err(e) => {
                run.warn(
                    PipelineStage::Rendering,
                    None,
                    format!("subtitle file not written: {}", e),
                );
                None
            }
        }
    }
}

fn discard_staging(staging: &Path) {
    if let Err(e) = remove_if_exists(staging) {
        warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
    }
}

/// An overlay audio item to transcribe
struct SpeechSource {
    media: Arc<MediaSource>,
    start_sec: TimeSec,
    duration_sec: TimeSec,
    source_in_sec: TimeSec,
}

/// Overlay audio items in start order. Video clip audio is never captioned.
fn speech_sources(timeline: &Timeline, media: &MediaLibrary) -> Vec<SpeechSource> {
    timeline
        .items_of_kind(TrackKind::Audio)
        .into_iter()
        .filter_map(|item| {
            let ItemContent::AudioTrack {
                media_id,
                source_in_sec,
                ..
            } = &item.content
            else {
                return None;
            };
            let source = media.get(media_id)?;
            (source.kind.has_audio() && source.has_audio != Some(false)).then(|| SpeechSource {
                media: source,
                start_sec: item.start_sec,
                duration_sec: item.duration_sec,
                source_in_sec: *source_in_sec,
            })
        })
        .collect()
}

/// Caption pieces in start order, trimmed so none overlaps the next
fn subtitle_cues(plan: &CompositionPlan) -> Vec<Cue> {
    let mut pieces: Vec<_> = plan
        .texts
        .iter()
        .filter(|t| t.source == TextSource::Caption)
        .collect();
    pieces.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));

    let mut cues: Vec<Cue> = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let end = pieces
            .get(i + 1)
            .map_or(piece.end_sec, |next| piece.end_sec.min(next.start_sec));
        if end - piece.start_sec > TIME_EPSILON {
            cues.push(Cue::new(piece.start_sec, end, &piece.text));
        }
    }
    cues
}
