//! Clipweave Core Type Definitions
//!
//! Defines fundamental types used throughout the engine.

use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// ID Types
// =============================================================================

/// Timeline item unique identifier (ULID)
pub type ItemId = String;

/// Track unique identifier
pub type TrackId = String;

/// Media source unique identifier
pub type MediaId = String;

/// Export job unique identifier (ULID)
pub type JobId = String;

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

/// Tolerance used when comparing timeline positions.
pub const TIME_EPSILON: TimeSec = 1e-6;

/// Time range, half-open: `[start_sec, end_sec)`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_sec: TimeSec,
    pub end_sec: TimeSec,
}

impl TimeRange {
    pub fn new(start_sec: TimeSec, end_sec: TimeSec) -> Self {
        if start_sec > end_sec {
            warn!(
                "TimeRange created with start > end ({} > {}), swapping",
                start_sec, end_sec
            );
            return Self {
                start_sec: end_sec,
                end_sec: start_sec,
            };
        }
        Self { start_sec, end_sec }
    }

    /// Returns duration in seconds
    pub fn duration(&self) -> TimeSec {
        self.end_sec - self.start_sec
    }

    /// Checks if a given time is within `[start, end)`
    pub fn contains(&self, time: TimeSec) -> bool {
        time >= self.start_sec && time < self.end_sec
    }

    /// Checks if two ranges overlap. Touching ranges do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_sec < other.end_sec - TIME_EPSILON
            && other.start_sec < self.end_sec - TIME_EPSILON
    }

    /// Returns the overlapping part of two ranges, if any
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        if !self.overlaps(other) {
            return None;
        }
        Some(TimeRange {
            start_sec: self.start_sec.max(other.start_sec),
            end_sec: self.end_sec.min(other.end_sec),
        })
    }

    /// Removes every range in `holes` (sorted, non-overlapping) from `self`.
    pub fn subtract_all(&self, holes: &[TimeRange]) -> Vec<TimeRange> {
        let mut remaining = Vec::new();
        let mut cursor = self.start_sec;

        for hole in holes {
            if hole.end_sec <= cursor {
                continue;
            }
            if hole.start_sec >= self.end_sec {
                break;
            }
            if hole.start_sec > cursor {
                remaining.push(TimeRange::new(cursor, hole.start_sec));
            }
            cursor = cursor.max(hole.end_sec);
        }

        if cursor < self.end_sec {
            remaining.push(TimeRange::new(cursor, self.end_sec));
        }

        remaining
    }
}

/// Merges ranges into a sorted list of disjoint ranges.
pub fn merge_ranges(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    ranges.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));

    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start_sec <= last.end_sec => {
                last.end_sec = last.end_sec.max(range.end_sec);
            }
            _ => merged.push(range),
        }
    }
    merged
}

// =============================================================================
// Color
// =============================================================================

/// Color (RGBA, 0.0 ~ 1.0 per channel)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<f32>,
}

impl Color {
    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self {
            r: r.clamp(0.0, 1.0),
            g: g.clamp(0.0, 1.0),
            b: b.clamp(0.0, 1.0),
            a: None,
        }
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            a: Some(a.clamp(0.0, 1.0)),
            ..Self::rgb(r, g, b)
        }
    }

    pub fn white() -> Self {
        Self::rgb(1.0, 1.0, 1.0)
    }

    pub fn black() -> Self {
        Self::rgb(0.0, 0.0, 0.0)
    }

    pub fn yellow() -> Self {
        Self::rgb(1.0, 1.0, 0.0)
    }

    /// Parses a color name (`white`, `black`, `yellow`, ...) or a hex string
    /// (`#RRGGBB`, `#RRGGBBAA`, `#RGB`).
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(Self::white()),
            "black" => Ok(Self::black()),
            "yellow" => Ok(Self::yellow()),
            "red" => Ok(Self::rgb(1.0, 0.0, 0.0)),
            "green" => Ok(Self::rgb(0.0, 1.0, 0.0)),
            "blue" => Ok(Self::rgb(0.0, 0.0, 1.0)),
            _ => Self::try_from_hex(value),
        }
    }

    /// Parses a hex color string.
    pub fn try_from_hex(hex: &str) -> Result<Self, String> {
        let hex = hex.trim().trim_start_matches('#');

        let channel = |s: &str| -> Result<f32, String> {
            u8::from_str_radix(s, 16)
                .map(|v| v as f32 / 255.0)
                .map_err(|e| e.to_string())
        };

        match hex.len() {
            3 => {
                let expand = |i: usize| channel(&hex[i..i + 1].repeat(2));
                Ok(Self::rgb(expand(0)?, expand(1)?, expand(2)?))
            }
            6 => Ok(Self::rgb(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            8 => Ok(Self::rgba(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                channel(&hex[6..8])?,
            )),
            len => Err(format!("Invalid hex color length: {}", len)),
        }
    }

    /// Formats as an FFmpeg color expression (`0xRRGGBB@alpha`)
    pub fn to_ffmpeg(&self) -> String {
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "0x{:02X}{:02X}{:02X}@{:.2}",
            to_u8(self.r),
            to_u8(self.g),
            to_u8(self.b),
            self.a.unwrap_or(1.0)
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::white()
    }
}

// =============================================================================
// Position
// =============================================================================

/// Position presets for image overlays
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    #[default]
    Center,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Position {
    /// Returns the FFmpeg overlay `x:y` expressions for this preset
    pub fn overlay_xy(&self) -> (&'static str, &'static str) {
        match self {
            Position::Center => ("(W-w)/2", "(H-h)/2"),
            Position::Top => ("(W-w)/2", "0"),
            Position::Bottom => ("(W-w)/2", "H-h"),
            Position::Left => ("0", "(H-h)/2"),
            Position::Right => ("W-w", "(H-h)/2"),
            Position::TopLeft => ("0", "0"),
            Position::TopRight => ("W-w", "0"),
            Position::BottomLeft => ("0", "H-h"),
            Position::BottomRight => ("W-w", "H-h"),
        }
    }
}
