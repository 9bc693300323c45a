//! Caption Data Models
//!
//! Cue timing, display modes and the timing policy used to turn word
//! timestamps into on-screen captions.

use serde::{Deserialize, Serialize};

use crate::core::{TimeRange, TimeSec};

// =============================================================================
// Cue
// =============================================================================

/// One displayed unit of caption text
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    pub start_sec: TimeSec,
    pub end_sec: TimeSec,
    /// Caption text (may contain line breaks)
    pub text: String,
}

impl Cue {
    pub fn new(start_sec: TimeSec, end_sec: TimeSec, text: &str) -> Self {
        Self {
            start_sec,
            end_sec,
            text: text.to_string(),
        }
    }

    /// Returns the duration of this cue in seconds
    pub fn duration(&self) -> TimeSec {
        self.end_sec - self.start_sec
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start_sec: self.start_sec,
            end_sec: self.end_sec,
        }
    }
}

// =============================================================================
// Mode and Timing Policy
// =============================================================================

/// How words are grouped into cues
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptionMode {
    /// One cue per spoken word
    WordByWord,
    /// Consecutive words grouped into readable phrases
    #[default]
    Phrase,
}

impl std::str::FromStr for CaptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "word" | "words" | "word-by-word" | "wordbyword" | "word_by_word" => {
                Ok(CaptionMode::WordByWord)
            }
            "phrase" | "phrases" => Ok(CaptionMode::Phrase),
            other => Err(format!("Unknown caption mode: {}", other)),
        }
    }
}

/// Duration and gap rules for cue construction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingPolicy {
    /// Shortest time a cue stays on screen when the next cue allows it
    pub min_cue_sec: TimeSec,
    /// Longest a word-by-word cue lasts, or a phrase may span
    pub max_cue_sec: TimeSec,
    /// Blank time kept between consecutive cues
    pub inter_cue_gap_sec: TimeSec,
    /// Time a phrase stays up after its last word ends
    pub trailing_pad_sec: TimeSec,
    /// Silence between words that starts a new phrase
    pub sentence_gap_sec: TimeSec,
    /// Phrase line wrapping width
    pub max_chars_per_line: usize,
    /// Phrase line count limit
    pub max_lines: usize,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self::phrase()
    }
}

impl TimingPolicy {
    /// Defaults for word-by-word captions
    pub fn word_by_word() -> Self {
        Self {
            min_cue_sec: 0.3,
            max_cue_sec: 1.0,
            inter_cue_gap_sec: 0.0,
            trailing_pad_sec: 0.0,
            sentence_gap_sec: 0.6,
            max_chars_per_line: 40,
            max_lines: 2,
        }
    }

    /// Defaults for phrase captions
    pub fn phrase() -> Self {
        Self {
            min_cue_sec: 0.3,
            max_cue_sec: 3.0,
            inter_cue_gap_sec: 0.0,
            trailing_pad_sec: 0.15,
            sentence_gap_sec: 0.6,
            max_chars_per_line: 40,
            max_lines: 2,
        }
    }

    pub fn for_mode(mode: CaptionMode) -> Self {
        match mode {
            CaptionMode::WordByWord => Self::word_by_word(),
            CaptionMode::Phrase => Self::phrase(),
        }
    }

    /// Clamps values into usable ranges
    pub fn normalize(&mut self) {
        let finite_or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };
        let defaults = Self::phrase();

        self.min_cue_sec = finite_or(self.min_cue_sec, defaults.min_cue_sec).clamp(0.05, 10.0);
        self.max_cue_sec = finite_or(self.max_cue_sec, defaults.max_cue_sec)
            .clamp(self.min_cue_sec, 30.0);
        self.inter_cue_gap_sec = finite_or(self.inter_cue_gap_sec, 0.0).clamp(0.0, 1.0);
        self.trailing_pad_sec = finite_or(self.trailing_pad_sec, 0.0).clamp(0.0, 2.0);
        self.sentence_gap_sec =
            finite_or(self.sentence_gap_sec, defaults.sentence_gap_sec).clamp(0.05, 10.0);
        self.max_chars_per_line = self.max_chars_per_line.clamp(8, 200);
        self.max_lines = self.max_lines.clamp(1, 6);
    }
}
