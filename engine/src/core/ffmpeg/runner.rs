//! FFmpeg Runner Module
//!
//! Executes the short-lived FFmpeg/FFprobe invocations: probing and speech
//! audio extraction. The long-running render lives in `render::backend`.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};

use super::{FFmpegError, FFmpegInfo, FFmpegResult};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Builds a tokio command for an FFmpeg binary.
///
/// The child is killed when its handle is dropped, and on Windows no console
/// window is opened.
pub fn new_command(program: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.kill_on_drop(true);
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Media information extracted by FFprobe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration_sec: f64,
    /// Frame width of the first video stream
    pub width: Option<u32>,
    /// Frame height of the first video stream
    pub height: Option<u32>,
    /// Whether an audio stream is present
    pub has_audio: bool,
    /// Container format
    pub format: String,
}

/// Runs FFmpeg/FFprobe for one detected installation
#[derive(Debug, Clone)]
pub struct FFmpegRunner {
    info: FFmpegInfo,
}

impl FFmpegRunner {
    pub fn new(info: FFmpegInfo) -> Self {
        Self { info }
    }

    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    /// Probe media file to get information
    pub async fn probe(&self, input: &Path) -> FFmpegResult<MediaInfo> {
        if !input.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        let output = new_command(&self.info.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ProbeError(format!("FFprobe failed: {}", stderr)));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Extracts the first audio stream as 16 kHz mono PCM WAV.
    ///
    /// `start_sec`/`duration_sec` limit extraction to the used part of the
    /// source.
    pub async fn extract_speech_audio(
        &self,
        input: &Path,
        output: &Path,
        start_sec: f64,
        duration_sec: Option<f64>,
    ) -> FFmpegResult<()> {
        if !input.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        let mut cmd = new_command(&self.info.ffmpeg_path);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error"]);
        if start_sec > 0.0 {
            cmd.args(["-ss", &format!("{:.3}", start_sec)]);
        }
        cmd.arg("-i").arg(input);
        if let Some(duration) = duration_sec {
            cmd.args(["-t", &format!("{:.3}", duration)]);
        }
        cmd.args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"])
            .arg(output)
            .stdin(Stdio::null());

        let result = cmd.output().await?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(FFmpegError::ExecutionFailed(format!(
                "Audio extraction failed: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Parse FFprobe JSON output
fn parse_probe_output(json_str: &str) -> FFmpegResult<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| FFmpegError::ParseError("Missing format info".to_string()))?;

    let duration_sec = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let format_name = format
        .get("format_name")
        .and_then(|f| f.as_str())
        .unwrap_or("unknown")
        .to_string();

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|c| c.as_str()) == Some("video"));
    let has_audio = streams
        .iter()
        .any(|s| s.get("codec_type").and_then(|c| c.as_str()) == Some("audio"));

    let dimension = |key: &str| {
        video
            .and_then(|v| v.get(key))
            .and_then(|w| w.as_u64())
            .map(|w| w as u32)
    };

    Ok(MediaInfo {
        duration_sec,
        width: dimension("width"),
        height: dimension("height"),
        has_audio,
        format: format_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output_video() {
        let json = r#"{
            "format": {"duration": "12.500000", "format_name": "mov,mp4,m4a"},
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080},
                {"codec_type": "audio", "sample_rate": "48000"}
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.duration_sec, 12.5);
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert!(info.has_audio);
        assert_eq!(info.format, "mov,mp4,m4a");
    }

    #[test]
    fn test_parse_probe_output_audio_only() {
        let json = r#"{
            "format": {"duration": "3.0", "format_name": "wav"},
            "streams": [{"codec_type": "audio"}]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, None);
        assert!(info.has_audio);
    }

    #[test]
    fn test_parse_probe_output_missing_format() {
        assert!(parse_probe_output(r#"{"streams": []}"#).is_err());
        assert!(parse_probe_output("not json").is_err());
    }
}
