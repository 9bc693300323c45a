//! Transcription result types.

use serde::{Deserialize, Serialize};

use crate::core::{TimeSec, TIME_EPSILON};

/// One recognized word with its timestamps
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTiming {
    pub text: String,
    pub start_sec: TimeSec,
    pub end_sec: TimeSec,
}

impl WordTiming {
    pub fn new(text: &str, start_sec: TimeSec, end_sec: TimeSec) -> Self {
        Self {
            text: text.to_string(),
            start_sec,
            end_sec,
        }
    }
}

/// Word-level transcript of one audio source
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    pub words: Vec<WordTiming>,
    /// Detected or requested language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Duration of the transcribed audio in seconds
    #[serde(default)]
    pub duration_sec: TimeSec,
}

impl TranscriptionResult {
    pub fn new(words: Vec<WordTiming>) -> Self {
        Self {
            words,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Gets the full text of the transcription
    pub fn full_text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Cleans backend output into strictly ordered, non-overlapping words.
    ///
    /// Whitespace is trimmed and empty or non-finite words dropped. Words
    /// are sorted by start; words sharing a start are merged into one;
    /// each end is clamped into `[start, next.start]`.
    pub fn normalized(&self) -> TranscriptionResult {
        let mut words: Vec<WordTiming> = self
            .words
            .iter()
            .filter(|w| w.start_sec.is_finite() && w.end_sec.is_finite())
            .filter_map(|w| {
                let text = w.text.trim();
                if text.is_empty() {
                    return None;
                }
                Some(WordTiming {
                    text: text.to_string(),
                    start_sec: w.start_sec.max(0.0),
                    end_sec: w.end_sec.max(w.start_sec.max(0.0)),
                })
            })
            .collect();

        words.sort_by(|a, b| {
            a.start_sec
                .total_cmp(&b.start_sec)
                .then_with(|| a.end_sec.total_cmp(&b.end_sec))
        });

        let mut merged: Vec<WordTiming> = Vec::with_capacity(words.len());
        for word in words {
            match merged.last_mut() {
                Some(last) if (word.start_sec - last.start_sec).abs() < TIME_EPSILON => {
                    last.text.push(' ');
                    last.text.push_str(&word.text);
                    last.end_sec = last.end_sec.max(word.end_sec);
                }
                _ => merged.push(word),
            }
        }

        for i in 1..merged.len() {
            let next_start = merged[i].start_sec;
            let prev = &mut merged[i - 1];
            if prev.end_sec > next_start {
                prev.end_sec = next_start;
            }
        }

        let duration_sec = merged
            .last()
            .map(|w| w.end_sec)
            .unwrap_or(0.0)
            .max(self.duration_sec);

        TranscriptionResult {
            words: merged,
            language: self.language.clone(),
            duration_sec,
        }
    }

    /// Shifts words from source time onto the timeline.
    ///
    /// Words outside `[source_in, source_in + duration)` are dropped and the
    /// rest moved so `source_in` lands on `timeline_start`.
    pub fn mapped_to_timeline(
        &self,
        source_in_sec: TimeSec,
        duration_sec: TimeSec,
        timeline_start_sec: TimeSec,
    ) -> TranscriptionResult {
        let source_out = source_in_sec + duration_sec;
        let offset = timeline_start_sec - source_in_sec;

        let words = self
            .words
            .iter()
            .filter(|w| w.start_sec >= source_in_sec && w.start_sec < source_out)
            .map(|w| WordTiming {
                text: w.text.clone(),
                start_sec: w.start_sec + offset,
                end_sec: w.end_sec.min(source_out) + offset,
            })
            .collect();

        TranscriptionResult {
            words,
            language: self.language.clone(),
            duration_sec,
        }
    }
}
