//! Overlay Resolver
//!
//! Merges manual text overlays and generated caption cues into one
//! start-ordered stream of text render instructions.
//!
//! Manual text always wins: a caption is cut out wherever any manual
//! overlay is active. A truncated caption keeps only the pieces that last
//! at least the minimum legible duration; untouched captions pass through
//! whatever their length.
//!
//! Stacking is by layer, then z-order: images, manual text, captions.
//! Captions never share an instant with manual text, so placing them on
//! the top layer cannot hide manual text.
//!
//! The resolver performs no I/O.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{
    merge_ranges,
    timeline::{ItemContent, TextStyle, TimelineItem},
    CoreError, CoreResult, ItemId, TimeRange, TimeSec, TIME_EPSILON,
};

/// Shortest caption remainder worth showing
pub const DEFAULT_MIN_LEGIBLE_SEC: TimeSec = 0.3;

/// Render layer, bottom to top
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Layer {
    Image,
    ManualText,
    Caption,
}

/// Where a text instruction came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextSource {
    Manual,
    Caption,
}

/// One piece of text to draw over `[start_sec, end_sec)`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInstruction {
    /// Originating timeline item
    pub item_id: ItemId,
    pub source: TextSource,
    pub start_sec: TimeSec,
    pub end_sec: TimeSec,
    pub text: String,
    pub style: TextStyle,
    pub layer: Layer,
    pub z_order: i32,
}

impl TextInstruction {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start_sec: self.start_sec,
            end_sec: self.end_sec,
        }
    }

    pub fn duration(&self) -> TimeSec {
        self.end_sec - self.start_sec
    }

    /// Sort key for drawing order; later draws on top
    pub fn stacking_key(&self) -> (Layer, i32) {
        (self.layer, self.z_order)
    }
}

/// Counts of captions changed by manual-text precedence
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveStats {
    pub captions_in: usize,
    pub captions_kept: usize,
    pub captions_truncated: usize,
    pub captions_dropped: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedOverlays {
    /// Ordered by start, then stacking key, then item id
    pub instructions: Vec<TextInstruction>,
    pub stats: ResolveStats,
}

impl ResolvedOverlays {
    pub fn captions(&self) -> impl Iterator<Item = &TextInstruction> {
        self.instructions
            .iter()
            .filter(|i| i.source == TextSource::Caption)
    }

    pub fn manual(&self) -> impl Iterator<Item = &TextInstruction> {
        self.instructions
            .iter()
            .filter(|i| i.source == TextSource::Manual)
    }
}

#[derive(Clone, Debug)]
pub struct OverlayResolver {
    min_legible_sec: TimeSec,
}

impl Default for OverlayResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LEGIBLE_SEC)
    }
}

impl OverlayResolver {
    pub fn new(min_legible_sec: TimeSec) -> Self {
        let min_legible_sec = if min_legible_sec.is_finite() {
            min_legible_sec.max(0.0)
        } else {
            DEFAULT_MIN_LEGIBLE_SEC
        };
        Self { min_legible_sec }
    }

    pub fn min_legible_sec(&self) -> TimeSec {
        self.min_legible_sec
    }

    /// Resolves manual overlays against caption cues.
    ///
    /// `manual` must hold text overlay items and `captions` caption cue
    /// items; anything else, or a malformed item, fails with `InvalidItem`.
    pub fn resolve(
        &self,
        manual: &[&TimelineItem],
        captions: &[&TimelineItem],
    ) -> CoreResult<ResolvedOverlays> {
        let mut instructions = Vec::with_capacity(manual.len() + captions.len());
        let mut stats = ResolveStats {
            captions_in: captions.len(),
            ..Default::default()
        };

        for item in manual {
            let (text, style) = text_of(item, TextSource::Manual)?;
            instructions.push(TextInstruction {
                item_id: item.id.clone(),
                source: TextSource::Manual,
                start_sec: item.start_sec,
                end_sec: item.end_sec(),
                text: text.to_string(),
                style: style.clone(),
                layer: Layer::ManualText,
                z_order: item.z_order,
            });
        }

        let blocked = merge_ranges(manual.iter().map(|item| item.range()).collect());

        for item in captions {
            let (text, style) = text_of(item, TextSource::Caption)?;
            let range = item.range();
            let remainder = range.subtract_all(&blocked);

            let untouched = remainder.len() == 1
                && (remainder[0].start_sec - range.start_sec).abs() < TIME_EPSILON
                && (remainder[0].end_sec - range.end_sec).abs() < TIME_EPSILON;

            // Only pieces cut by manual text face the legibility floor.
            let pieces: Vec<TimeRange> = remainder
                .into_iter()
                .filter(|piece| {
                    untouched || piece.duration() + TIME_EPSILON >= self.min_legible_sec
                })
                .filter(|piece| piece.duration() > TIME_EPSILON)
                .collect();

            if pieces.is_empty() {
                stats.captions_dropped += 1;
                debug!(item_id = %item.id, "Caption suppressed by manual text");
                continue;
            }
            if untouched {
                stats.captions_kept += 1;
            } else {
                stats.captions_truncated += 1;
                debug!(item_id = %item.id, pieces = pieces.len(), "Caption truncated by manual text");
            }

            for piece in pieces {
                instructions.push(TextInstruction {
                    item_id: item.id.clone(),
                    source: TextSource::Caption,
                    start_sec: piece.start_sec,
                    end_sec: piece.end_sec,
                    text: text.to_string(),
                    style: style.clone(),
                    layer: Layer::Caption,
                    z_order: item.z_order,
                });
            }
        }

        instructions.sort_by(|a, b| {
            a.start_sec
                .total_cmp(&b.start_sec)
                .then_with(|| a.stacking_key().cmp(&b.stacking_key()))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        Ok(ResolvedOverlays {
            instructions,
            stats,
        })
    }
}

fn text_of(item: &TimelineItem, expected: TextSource) -> CoreResult<(&str, &TextStyle)> {
    item.check()?;
    match (&item.content, expected) {
        (ItemContent::TextOverlay { text, style }, TextSource::Manual)
        | (ItemContent::CaptionCue { text, style }, TextSource::Caption) => Ok((text, style)),
        (other, _) => Err(CoreError::InvalidItem {
            item_id: item.id.clone(),
            reason: format!(
                "expected {} item, found {}",
                match expected {
                    TextSource::Manual => "text overlay",
                    TextSource::Caption => "caption cue",
                },
                other.track_kind()
            ),
        }),
    }
}
