//! Export Settings and Progress Parsing
//!
//! Per-project output settings and the parser for FFmpeg's
//! `-progress pipe:1` key/value stream.

use serde::{Deserialize, Serialize};

use crate::core::{captions::CaptionMode, timeline::TextStyle, CoreError, CoreResult};

// =============================================================================
// Types
// =============================================================================

/// Video codec selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Vp9,
}

impl VideoCodec {
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
        }
    }

    /// Whether `-crf` applies to this encoder
    pub fn supports_crf(&self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265)
    }
}

/// Audio codec selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    #[default]
    Aac,
    Opus,
    Mp3,
}

impl AudioCodec {
    pub fn encoder(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "libopus",
            AudioCodec::Mp3 => "libmp3lame",
        }
    }
}

/// Export settings stored with a project
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSettings {
    /// Output frame width
    pub width: u32,
    /// Output frame height
    pub height: u32,
    /// Output frame rate
    pub fps: f64,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Video bitrate (e.g., "8M")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<String>,
    /// Audio bitrate (e.g., "192k")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
    /// CRF value for quality-based encoding (lower = better quality)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crf: Option<u8>,
    /// Generate captions from the timeline's audio
    pub auto_captions: bool,
    pub caption_mode: CaptionMode,
    /// Style for generated captions; engine settings apply when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption_style: Option<TextStyle>,
    /// Language hint passed to transcription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Also write the generated captions as `<output>.srt`
    pub export_subtitles: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30.0,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            video_bitrate: Some("8M".to_string()),
            audio_bitrate: Some("192k".to_string()),
            crf: Some(23),
            auto_captions: false,
            caption_mode: CaptionMode::Phrase,
            caption_style: None,
            language: None,
            export_subtitles: false,
        }
    }
}

impl ExportSettings {
    /// Rejects settings no encoder can honor
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: String| Err(CoreError::InvalidSettings(msg));

        if self.width == 0 || self.height == 0 {
            return invalid(format!("frame size {}x{} must be positive", self.width, self.height));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return invalid(format!(
                "frame size {}x{} must use even dimensions",
                self.width, self.height
            ));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 || self.fps > 240.0 {
            return invalid(format!("frame rate {} outside (0, 240]", self.fps));
        }
        if let Some(crf) = self.crf {
            if crf > 51 {
                return invalid(format!("crf {} above 51", crf));
            }
        }
        for bitrate in [&self.video_bitrate, &self.audio_bitrate].into_iter().flatten() {
            if !is_bitrate(bitrate) {
                return invalid(format!("bitrate '{}' is not a number with optional k/M suffix", bitrate));
            }
        }
        if let Some(style) = &self.caption_style {
            style.validate().map_err(CoreError::InvalidSettings)?;
        }
        Ok(())
    }
}

fn is_bitrate(value: &str) -> bool {
    let digits = value.trim_end_matches(['k', 'K', 'm', 'M']);
    !digits.is_empty() && digits.parse::<f64>().is_ok_and(|v| v > 0.0)
}

/// Encoding progress decoded from FFmpeg output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    /// Current frame number
    pub frame: u64,
    /// Total frames
    pub total_frames: u64,
    /// Progress percentage (0-100)
    pub percent: f32,
    /// Current encoding FPS
    pub fps: f32,
    /// Estimated time remaining in seconds
    pub eta_seconds: u64,
    /// Current status message
    pub message: String,
}

// =============================================================================
// Progress Parsing
// =============================================================================

/// Parsed FFmpeg progress line data
#[derive(Debug, Clone, Default)]
pub struct FFmpegProgressData {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f32,
    /// Current time in seconds
    pub time_sec: f64,
    /// Bitrate in kbps
    pub bitrate_kbps: Option<f32>,
    /// Speed multiplier (e.g., 2.5x)
    pub speed: Option<f32>,
    /// Set once `progress=end` is seen
    pub finished: bool,
}

/// Parse FFmpeg progress output line
///
/// FFmpeg progress output format (when using -progress pipe:1):
/// ```text
/// frame=100
/// fps=30.0
/// out_time_ms=3333333
/// bitrate=1234.5kbits/s
/// speed=2.5x
/// progress=continue
/// ```
///
/// Returns true when the line ends a progress block.
pub fn parse_ffmpeg_progress_line(line: &str, data: &mut FFmpegProgressData) -> bool {
    let line = line.trim();
    let Some((key, value)) = line.split_once('=') else {
        return false;
    };
    let value = value.trim();

    match key {
        "frame" => data.frame = value.parse().unwrap_or(data.frame),
        "fps" => data.fps = value.parse().unwrap_or(data.fps),
        // out_time_ms is in microseconds despite the name
        "out_time_ms" | "out_time_us" => {
            if let Ok(us) = value.parse::<u64>() {
                data.time_sec = us as f64 / 1_000_000.0;
            }
        }
        // "1234.5kbits/s" or "N/A"
        "bitrate" => {
            data.bitrate_kbps = value
                .strip_suffix("kbits/s")
                .and_then(|n| n.trim().parse().ok());
        }
        // "2.5x" or "N/A"
        "speed" => data.speed = value.strip_suffix('x').and_then(|n| n.trim().parse().ok()),
        "progress" => {
            data.finished = value == "end";
            return true;
        }
        _ => {}
    }
    false
}

/// Calculate export progress from parsed data
pub fn calculate_export_progress(
    data: &FFmpegProgressData,
    total_duration_sec: f64,
    total_frames: u64,
) -> ExportProgress {
    let percent = if total_duration_sec > 0.0 {
        ((data.time_sec / total_duration_sec) * 100.0).clamp(0.0, 100.0) as f32
    } else if total_frames > 0 {
        ((data.frame as f64 / total_frames as f64) * 100.0).min(100.0) as f32
    } else {
        0.0
    };

    let remaining = (total_duration_sec - data.time_sec).max(0.0);
    let eta_seconds = match data.speed {
        Some(speed) if speed > 0.0 => (remaining / speed as f64) as u64,
        _ => 0,
    };

    ExportProgress {
        frame: data.frame,
        total_frames,
        percent,
        fps: data.fps,
        eta_seconds,
        message: format!("Encoding frame {} ({:.1} fps)", data.frame, data.fps),
    }
}
