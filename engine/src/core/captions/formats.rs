//! Caption Format Parsers and Exporters
//!
//! SRT (SubRip) parsing and export, and WebVTT export.

use std::path::Path;

use thiserror::Error;

use super::Cue;
use crate::core::{fs::atomic_write_bytes, CoreError, CoreResult, TIME_EPSILON};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during caption parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Invalid timestamp format
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// Invalid caption format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// Missing required data
    #[error("Missing data: {0}")]
    MissingData(String),
    /// Unexpected end of input
    #[error("Unexpected end of input")]
    UnexpectedEnd,
}

// =============================================================================
// SRT Format
// =============================================================================

/// Parses SRT (SubRip) content into cues
///
/// ```text
/// 1
/// 00:00:01,000 --> 00:00:04,000
/// First caption text
///
/// 2
/// 00:00:05,500 --> 00:00:08,000
/// Second caption text
/// with multiple lines
/// ```
pub fn parse_srt(content: &str) -> Result<Vec<Cue>, ParseError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut cues = Vec::new();
    let mut lines = content.lines().peekable();

    loop {
        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
        }

        let Some(first) = lines.next() else {
            break;
        };

        // The sequence number is optional in files seen in the wild.
        let timestamp_line = if first.contains("-->") {
            first
        } else {
            lines.next().ok_or(ParseError::UnexpectedEnd)?
        };
        let (start_sec, end_sec) = parse_srt_timestamp_line(timestamp_line)?;

        let mut text_lines = Vec::new();
        while let Some(line) = lines.next_if(|l| !l.trim().is_empty()) {
            text_lines.push(line.trim_end());
        }

        if text_lines.is_empty() {
            return Err(ParseError::MissingData(format!(
                "caption text after '{}'",
                timestamp_line.trim()
            )));
        }

        cues.push(Cue::new(start_sec, end_sec, &text_lines.join("\n")));
    }

    Ok(cues)
}

/// Parses an SRT timestamp line (e.g., "00:00:01,000 --> 00:00:04,000")
fn parse_srt_timestamp_line(line: &str) -> Result<(f64, f64), ParseError> {
    let (start, end) = line.split_once("-->").ok_or_else(|| {
        ParseError::InvalidFormat(format!("Expected 'start --> end' format: {}", line))
    })?;

    let start = parse_srt_timestamp(start.trim())?;
    let end = parse_srt_timestamp(end.split_whitespace().next().unwrap_or_default())?;

    if end < start {
        return Err(ParseError::InvalidFormat(format!(
            "End precedes start: {}",
            line
        )));
    }

    Ok((start, end))
}

/// Parses an SRT timestamp (e.g., "00:01:23,456") into seconds
fn parse_srt_timestamp(ts: &str) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidTimestamp(ts.to_string());

    let normalized = ts.replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }

    let hours: u64 = parts[0].parse().map_err(|_| invalid())?;
    let minutes: u64 = parts[1].parse().map_err(|_| invalid())?;
    let seconds: f64 = parts[2].parse().map_err(|_| invalid())?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    Ok(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Exports cues to SRT format
pub fn export_srt(cues: &[Cue]) -> String {
    let mut output = String::new();

    for (index, cue) in cues.iter().enumerate() {
        output.push_str(&format!("{}\n", index + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_timestamp(cue.start_sec),
            format_srt_timestamp(cue.end_sec)
        ));
        output.push_str(&cue.text);
        output.push_str("\n\n");
    }

    output
}

/// Formats seconds as SRT timestamp (00:00:00,000)
pub fn format_srt_timestamp(seconds: f64) -> String {
    let (hours, mins, secs, ms) = split_millis(seconds);
    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, ms)
}

fn split_millis(seconds: f64) -> (u64, u64, u64, u64) {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    (total_mins / 60, total_mins % 60, secs, ms)
}

/// Checks that cues are ordered by start and never overlap
pub fn check_cue_order(cues: &[Cue]) -> CoreResult<()> {
    for (i, cue) in cues.iter().enumerate() {
        if !cue.start_sec.is_finite() || !cue.end_sec.is_finite() || cue.end_sec <= cue.start_sec
        {
            return Err(CoreError::CaptionInvariant(format!(
                "cue {} has invalid span {}~{}",
                i + 1,
                cue.start_sec,
                cue.end_sec
            )));
        }
        if let Some(prev) = i.checked_sub(1).map(|p| &cues[p]) {
            if cue.start_sec < prev.start_sec {
                return Err(CoreError::CaptionInvariant(format!(
                    "cue {} starts before cue {}",
                    i + 1,
                    i
                )));
            }
            if cue.start_sec < prev.end_sec - TIME_EPSILON {
                return Err(CoreError::CaptionInvariant(format!(
                    "cue {} overlaps cue {} ({:.3} < {:.3})",
                    i + 1,
                    i,
                    cue.start_sec,
                    prev.end_sec
                )));
            }
        }
    }
    Ok(())
}

/// Writes an SRT file atomically after checking cue order
pub fn write_srt(path: &Path, cues: &[Cue]) -> CoreResult<()> {
    check_cue_order(cues)?;
    atomic_write_bytes(path, export_srt(cues).as_bytes())
}

// =============================================================================
// VTT Format
// =============================================================================

/// Exports cues to WebVTT format
pub fn export_vtt(cues: &[Cue]) -> String {
    let mut output = String::from("WEBVTT\n\n");

    for cue in cues {
        output.push_str(&format!(
            "{} --> {}\n",
            format_vtt_timestamp(cue.start_sec),
            format_vtt_timestamp(cue.end_sec)
        ));
        output.push_str(&cue.text);
        output.push_str("\n\n");
    }

    output
}

/// Formats seconds as VTT timestamp (00:00:00.000)
fn format_vtt_timestamp(seconds: f64) -> String {
    let (hours, mins, secs, ms) = split_millis(seconds);
    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
}

// =============================================================================
// Tests
// =============================================================================
