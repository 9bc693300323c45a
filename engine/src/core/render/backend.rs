//! Render Backends
//!
//! The render stage hands a [`CompositionPlan`] to a [`RenderBackend`].
//! [`FFmpegRenderBackend`] turns the plan into one FFmpeg invocation with a
//! single filter graph:
//!
//! ```text
//! base clips + black filler ──concat──► overlay (video tracks, images)
//!     ──► drawtext (manual text, captions) ──► [outv]
//! audio sources ──atrim/volume/adelay──► amix ──► [outa]
//! ```

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

use super::{
    calculate_export_progress, parse_ffmpeg_progress_line, BaseSegment, CompositionPlan,
    ExportSettings, FFmpegProgressData,
};
use crate::core::{
    ffmpeg::{new_command, FFmpegRunner},
    pipeline::{CancelToken, PipelineStage, StageProgress},
    resolver::TextInstruction,
    CoreError, CoreResult, TimeSec,
};

/// What a finished render produced
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOutput {
    pub file_size: u64,
}

/// Produces a media file from a composition plan.
///
/// Implementations write to `output` only; the caller owns moving it into
/// place. Progress goes through `progress` as a 0.0..=1.0 fraction and
/// `cancel` must be honored within a bounded interval.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn render(
        &self,
        plan: &CompositionPlan,
        settings: &ExportSettings,
        output: &Path,
        progress: &StageProgress,
        cancel: &CancelToken,
    ) -> CoreResult<RenderOutput>;
}

fn render_failure(message: impl Into<String>) -> CoreError {
    CoreError::RenderFailure {
        last_completed_stage: PipelineStage::Resolving,
        message: message.into(),
    }
}

// =============================================================================
// Filter Escaping
// =============================================================================

/// Escapes a value placed inside a filter option.
///
/// `:` and `,` separate options and filters, `;` and brackets separate
/// chains and labels, and `\` escapes.
fn escape_filter_value(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | ':' | ',' | '\'' | ';' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// drawtext expands `%{...}`; user text is literal.
fn escape_drawtext_value(raw: &str) -> String {
    escape_filter_value(raw).replace('%', r"\%")
}

fn enable_window(start_sec: TimeSec, end_sec: TimeSec) -> String {
    format!("enable='gte(t,{:.3})*lt(t,{:.3})'", start_sec, end_sec)
}

// =============================================================================
// Filter Graph
// =============================================================================

#[derive(Default)]
struct GraphBuilder {
    args: Vec<String>,
    chains: Vec<String>,
    inputs: usize,
}

impl GraphBuilder {
    fn input(&mut self, pre_args: &[String], path: &Path) -> usize {
        self.args.extend(pre_args.iter().cloned());
        self.args.push("-i".to_string());
        self.args.push(path.to_string_lossy().to_string());
        self.inputs += 1;
        self.inputs - 1
    }

    fn chain(&mut self, chain: String) {
        self.chains.push(chain);
    }
}

/// Scales and pads any source to the output frame
fn fit_frame(plan: &CompositionPlan) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}",
        w = plan.width,
        h = plan.height,
        fps = plan.fps
    )
}

fn drawtext_filter(text: &TextInstruction) -> String {
    let style = &text.style;
    let mut opts = vec![format!("text={}", escape_drawtext_value(&text.text))];

    match &style.font_path {
        Some(path) => opts.push(format!(
            "fontfile={}",
            escape_filter_value(&path.to_string_lossy())
        )),
        None => opts.push(format!("font={}", escape_filter_value(&style.font_family))),
    }
    opts.push(format!("fontsize={}", style.font_size));
    opts.push(format!("fontcolor={}", style.color.to_ffmpeg()));
    if let Some(outline) = &style.outline_color {
        if style.outline_width > 0.0 {
            opts.push(format!("borderw={}", style.outline_width));
            opts.push(format!("bordercolor={}", outline.to_ffmpeg()));
        }
    }
    if let Some(background) = &style.background_color {
        opts.push("box=1".to_string());
        opts.push(format!("boxcolor={}", background.to_ffmpeg()));
        opts.push("boxborderw=10".to_string());
    }
    opts.push("x=(w-text_w)/2".to_string());
    opts.push(format!("y=h*{:.4}-text_h/2", style.vertical_position));
    opts.push(enable_window(text.start_sec, text.end_sec));

    format!("drawtext={}", opts.join(":"))
}

/// Builds the complete FFmpeg argument list for `plan`, ending with `output`
pub fn build_render_args(
    plan: &CompositionPlan,
    settings: &ExportSettings,
    output: &Path,
    stats_period: Duration,
) -> Vec<String> {
    let mut graph = GraphBuilder::default();
    graph.args.extend(
        ["-y", "-hide_banner", "-nostdin", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string()),
    );

    // Base video: clips and black filler, concatenated
    let mut base_labels = Vec::with_capacity(plan.base_video.len());
    for (i, segment) in plan.base_video.iter().enumerate() {
        let label = format!("b{}", i);
        match segment {
            BaseSegment::Clip(clip) => {
                let idx = graph.input(&[], &clip.media.path);
                graph.chain(format!(
                    "[{idx}:v]trim=start={:.3}:duration={:.3},setpts=PTS-STARTPTS,{},format=yuv420p[{label}]",
                    clip.source_in_sec,
                    clip.duration_sec,
                    fit_frame(plan)
                ));
            }
            BaseSegment::Gap { duration_sec, .. } => {
                graph.chain(format!(
                    "color=c=black:s={}x{}:r={}:d={:.3},format=yuv420p[{label}]",
                    plan.width, plan.height, plan.fps, duration_sec
                ));
            }
        }
        base_labels.push(format!("[{label}]"));
    }

    let mut current = "base".to_string();
    if base_labels.len() == 1 {
        graph.chain(format!("{}null[{current}]", base_labels[0]));
    } else {
        graph.chain(format!(
            "{}concat=n={}:v=1:a=0[{current}]",
            base_labels.join(""),
            base_labels.len()
        ));
    }

    let mut next_label = {
        let mut n = 0usize;
        move || {
            n += 1;
            format!("v{}", n)
        }
    };

    // Further video tracks
    for (i, overlay) in plan.video_overlays.iter().enumerate() {
        let idx = graph.input(&[], &overlay.media.path);
        let src = format!("ov{}", i);
        graph.chain(format!(
            "[{idx}:v]trim=start={:.3}:duration={:.3},setpts=PTS-STARTPTS+{:.3}/TB,{}[{src}]",
            overlay.source_in_sec,
            overlay.duration_sec,
            overlay.start_sec,
            fit_frame(plan)
        ));
        let out = next_label();
        graph.chain(format!(
            "[{current}][{src}]overlay=0:0:eof_action=pass:{}[{out}]",
            enable_window(overlay.start_sec, overlay.start_sec + overlay.duration_sec)
        ));
        current = out;
    }

    // Images
    let loop_args = [
        "-loop".to_string(),
        "1".to_string(),
        "-t".to_string(),
        format!("{:.3}", plan.duration_sec),
    ];
    for (i, image) in plan.images.iter().enumerate() {
        let idx = graph.input(&loop_args, &image.media.path);
        let src = format!("img{}", i);
        graph.chain(format!(
            "[{idx}:v]format=rgba,scale=iw*{s}:ih*{s},colorchannelmixer=aa={:.3}[{src}]",
            image.opacity,
            s = image.scale
        ));
        let (x, y) = image.position.overlay_xy();
        let out = next_label();
        graph.chain(format!(
            "[{current}][{src}]overlay={x}:{y}:{}[{out}]",
            enable_window(image.start_sec, image.end_sec)
        ));
        current = out;
    }

    // Text, bottom to top
    for text in &plan.texts {
        let out = next_label();
        graph.chain(format!("[{current}]{}[{out}]", drawtext_filter(text)));
        current = out;
    }
    graph.chain(format!("[{current}]null[outv]"));

    // Audio
    let mut audio_labels = Vec::with_capacity(plan.audio.len());
    for (i, audio) in plan.audio.iter().enumerate() {
        let idx = graph.input(&[], &audio.media.path);
        let label = format!("a{}", i);
        let delay_ms = (audio.start_sec * 1000.0).round() as u64;
        graph.chain(format!(
            "[{idx}:a]atrim=start={:.3}:duration={:.3},asetpts=PTS-STARTPTS,volume={:.3},adelay={delay_ms}:all=1[{label}]",
            audio.source_in_sec, audio.duration_sec, audio.volume
        ));
        audio_labels.push(format!("[{label}]"));
    }
    match audio_labels.len() {
        0 => {}
        1 => graph.chain(format!("{}anull[outa]", audio_labels[0])),
        n => graph.chain(format!(
            "{}amix=inputs={n}:normalize=0:duration=longest[outa]",
            audio_labels.join("")
        )),
    }

    let GraphBuilder {
        mut args, chains, ..
    } = graph;
    args.push("-filter_complex".to_string());
    args.push(chains.join(";"));
    args.extend(["-map".to_string(), "[outv]".to_string()]);
    if !audio_labels.is_empty() {
        args.extend(["-map".to_string(), "[outa]".to_string()]);
    }

    args.extend(["-c:v".to_string(), settings.video_codec.encoder().to_string()]);
    if let Some(bitrate) = &settings.video_bitrate {
        args.extend(["-b:v".to_string(), bitrate.clone()]);
    }
    if let Some(crf) = settings.crf {
        if settings.video_codec.supports_crf() {
            args.extend(["-crf".to_string(), crf.to_string()]);
        }
    }
    if !audio_labels.is_empty() {
        args.extend(["-c:a".to_string(), settings.audio_codec.encoder().to_string()]);
        if let Some(bitrate) = &settings.audio_bitrate {
            args.extend(["-b:a".to_string(), bitrate.clone()]);
        }
    }

    args.extend([
        "-t".to_string(),
        format!("{:.3}", plan.duration_sec),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-stats_period".to_string(),
        format!("{:.3}", stats_period.as_secs_f64()),
        output.to_string_lossy().to_string(),
    ]);
    args
}

// =============================================================================
// FFmpeg Backend
// =============================================================================

pub const DEFAULT_STATS_PERIOD: Duration = Duration::from_millis(500);

/// Renders with the system FFmpeg
#[derive(Debug, Clone)]
pub struct FFmpegRenderBackend {
    runner: FFmpegRunner,
    stats_period: Duration,
}

impl FFmpegRenderBackend {
    pub fn new(runner: FFmpegRunner) -> Self {
        Self {
            runner,
            stats_period: DEFAULT_STATS_PERIOD,
        }
    }

    /// How often FFmpeg reports progress
    pub fn with_stats_period(mut self, period: Duration) -> Self {
        self.stats_period = period.max(Duration::from_millis(50));
        self
    }
}

#[async_trait]
impl RenderBackend for FFmpegRenderBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn render(
        &self,
        plan: &CompositionPlan,
        settings: &ExportSettings,
        output: &Path,
        progress: &StageProgress,
        cancel: &CancelToken,
    ) -> CoreResult<RenderOutput> {
        cancel.check()?;

        let args = build_render_args(plan, settings, output, self.stats_period);
        let total_frames = (plan.duration_sec * plan.fps) as u64;
        debug!(args = ?args, "Spawning FFmpeg render");

        let mut child = new_command(&self.runner.info().ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| render_failure(format!("Failed to spawn FFmpeg: {}", e)))?;

        // Drain stderr concurrently so a full pipe cannot stall FFmpeg.
        let stderr_handle = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).to_string()
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| render_failure("FFmpeg stdout was not captured"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut data = FFmpegProgressData::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(output = %output.display(), "Render cancelled, stopping FFmpeg");
                    let _ = child.kill().await;
                    return Err(CoreError::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if parse_ffmpeg_progress_line(&line, &mut data) {
                            let update = calculate_export_progress(&data, plan.duration_sec, total_frames);
                            progress.fraction(f64::from(update.percent) / 100.0, Some(update.message));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "FFmpeg progress stream ended");
                        break;
                    }
                }
            }
        }

        let waited = tokio::select! {
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };
        let Some(status) = waited else {
            let _ = child.kill().await;
            return Err(CoreError::Cancelled);
        };
        let status =
            status.map_err(|e| render_failure(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !status.success() {
            let stderr = match stderr_handle {
                Some(handle) => handle
                    .await
                    .unwrap_or_else(|_| "Failed to read stderr".to_string()),
                None => String::new(),
            };
            let detail = stderr.trim();
            return Err(render_failure(if detail.is_empty() {
                format!("FFmpeg exited with status: {}", status)
            } else {
                format!("FFmpeg exited with status {}: {}", status, detail)
            }));
        }

        let file_size = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .map_err(|e| render_failure(format!("FFmpeg produced no output: {}", e)))?;
        info!(output = %output.display(), file_size, "FFmpeg render finished");

        Ok(RenderOutput { file_size })
    }
}
