//! Caption Cue Builder
//!
//! Turns a word-level transcript into display cues, either one cue per
//! word or greedy phrases, and emits them as caption items on a timeline
//! track.
//!
//! Construction guarantees cues are ordered by start and never overlap;
//! the result is re-checked before it is returned and a failure there is
//! reported as `CaptionInvariant`.

use tracing::debug;

use super::formats::check_cue_order;
use super::{CaptionMode, Cue, TimingPolicy};
use crate::core::{
    timeline::{TextStyle, TimelineItem},
    transcription::{TranscriptionResult, WordTiming},
    CoreResult, TimeSec,
};

/// Track id used for generated caption items
pub const GENERATED_CAPTION_TRACK: &str = "captions.generated";

const SENTENCE_END: [char; 3] = ['.', '!', '?'];

/// Builds caption cues from transcripts
#[derive(Clone, Debug)]
pub struct CaptionCueBuilder {
    mode: CaptionMode,
    policy: TimingPolicy,
    style: TextStyle,
    track_id: String,
}

impl CaptionCueBuilder {
    pub fn new(mode: CaptionMode, policy: TimingPolicy, style: TextStyle) -> Self {
        Self {
            mode,
            policy,
            style,
            track_id: GENERATED_CAPTION_TRACK.to_string(),
        }
    }

    /// Builder with the mode's default policy and the default style
    pub fn for_mode(mode: CaptionMode) -> Self {
        Self::new(mode, TimingPolicy::for_mode(mode), TextStyle::default())
    }

    pub fn with_track_id(mut self, track_id: &str) -> Self {
        self.track_id = track_id.to_string();
        self
    }

    pub fn mode(&self) -> CaptionMode {
        self.mode
    }

    pub fn policy(&self) -> &TimingPolicy {
        &self.policy
    }

    /// Builds plain cues, checked for order and non-overlap
    pub fn build_cues(&self, transcript: &TranscriptionResult) -> CoreResult<Vec<Cue>> {
        let words = transcript.normalized().words;

        let cues = match self.mode {
            CaptionMode::WordByWord => self.word_cues(&words),
            CaptionMode::Phrase => self.phrase_cues(&words),
        };

        check_cue_order(&cues)?;
        debug!(
            mode = ?self.mode,
            words = words.len(),
            cues = cues.len(),
            "Built caption cues"
        );
        Ok(cues)
    }

    /// Builds cues as caption items on the builder's track
    pub fn build(&self, transcript: &TranscriptionResult) -> CoreResult<Vec<TimelineItem>> {
        Ok(self
            .build_cues(transcript)?
            .into_iter()
            .map(|cue| self.to_item(&cue))
            .collect())
    }

    pub fn to_item(&self, cue: &Cue) -> TimelineItem {
        TimelineItem::caption(
            &self.track_id,
            &cue.text,
            cue.start_sec,
            cue.duration(),
            self.style.clone(),
        )
    }

    fn word_cues(&self, words: &[WordTiming]) -> Vec<Cue> {
        words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                let next_start = words.get(i + 1).map(|w| w.start_sec);
                let target = next_start.unwrap_or(word.end_sec);
                let end = target
                    .min(word.start_sec + self.policy.max_cue_sec)
                    .max(word.start_sec + self.policy.min_cue_sec);
                let end = self.clamp_to_next(word.start_sec, end, next_start);
                Cue::new(word.start_sec, end, &word.text)
            })
            .collect()
    }

    fn phrase_cues(&self, words: &[WordTiming]) -> Vec<Cue> {
        let groups = self.group_phrases(words);

        groups
            .iter()
            .enumerate()
            .map(|(g, group)| {
                let first = &group[0];
                let last = &group[group.len() - 1];
                let next_start = groups.get(g + 1).map(|next| next[0].start_sec);

                let end = (last.end_sec + self.policy.trailing_pad_sec)
                    .max(first.start_sec + self.policy.min_cue_sec);
                let end = self.clamp_to_next(first.start_sec, end, next_start);

                let text = group
                    .iter()
                    .map(|w| w.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                Cue::new(
                    first.start_sec,
                    end,
                    &wrap_lines(&text, self.policy.max_chars_per_line, self.policy.max_lines),
                )
            })
            .collect()
    }

    /// Greedy grouping: a phrase closes when adding the next word would
    /// exceed the maximum span or text capacity, when the silence before
    /// it exceeds the sentence gap, or after sentence-ending punctuation.
    fn group_phrases<'a>(&self, words: &'a [WordTiming]) -> Vec<&'a [WordTiming]> {
        let capacity = self.policy.max_chars_per_line * self.policy.max_lines;
        let mut groups = Vec::new();
        let mut start = 0;
        let mut chars = 0;

        for (i, word) in words.iter().enumerate() {
            if i > start {
                let prev = &words[i - 1];
                let span = word.end_sec - words[start].start_sec;
                let silence = word.start_sec - prev.end_sec;
                let closes = span > self.policy.max_cue_sec
                    || silence > self.policy.sentence_gap_sec
                    || prev.text.ends_with(SENTENCE_END)
                    || chars + 1 + word.text.chars().count() > capacity;

                if closes {
                    groups.push(&words[start..i]);
                    start = i;
                    chars = 0;
                }
            }
            chars += usize::from(i > start) + word.text.chars().count();
        }

        if start < words.len() {
            groups.push(&words[start..]);
        }
        groups
    }

    /// Keeps `end` at or before the next cue's start minus the gap.
    ///
    /// Non-overlap takes priority over the minimum duration. When the gap
    /// would leave no time at all, the cue runs up to the next start.
    fn clamp_to_next(&self, start: TimeSec, end: TimeSec, next_start: Option<TimeSec>) -> TimeSec {
        match next_start {
            Some(next) => {
                let gapped = next - self.policy.inter_cue_gap_sec;
                let limit = if gapped > start { gapped } else { next };
                end.min(limit)
            }
            None => end,
        }
    }
}

/// Wraps text at word boundaries into at most `max_lines` lines.
///
/// Overlong words are split; text past the last line is cut with "...".
pub fn wrap_lines(text: &str, max_chars_per_line: usize, max_lines: usize) -> String {
    let width = max_chars_per_line.max(4);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        let current_len = current.chars().count();

        if current_len > 0 && current_len + 1 + word.len() <= width {
            current.push(' ');
            current.extend(word.iter());
            continue;
        }
        if current_len > 0 {
            lines.push(std::mem::take(&mut current));
        }
        while word.len() > width {
            lines.push(word.drain(..width).collect());
        }
        current = word.into_iter().collect();
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if lines.len() > max_lines.max(1) {
        lines.truncate(max_lines.max(1));
        if let Some(last) = lines.last_mut() {
            let kept: String = last.chars().take(width - 3).collect();
            *last = format!("{}...", kept.trim_end());
        }
    }

    lines.join("\n")
}
