//! Timeline Model Definitions
//!
//! Defines Track, TimelineItem and the item content variants.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::{Color, CoreError, CoreResult, ItemId, MediaId, Position, TimeRange, TimeSec, TrackId};

/// Default vertical position of text, as a fraction of frame height from the top
pub const DEFAULT_VERTICAL_POSITION: f64 = 0.70;

// =============================================================================
// Text Style
// =============================================================================

/// Style shared by manual text overlays and generated caption cues
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    /// Font family name
    pub font_family: String,
    /// Font file, when the renderer cannot resolve the family by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
    /// Font size in pixels
    pub font_size: u32,
    /// Text color
    pub color: Color,
    /// Outline/stroke color (None = no outline)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline_color: Option<Color>,
    /// Outline width in pixels
    #[serde(default)]
    pub outline_width: f32,
    /// Background/box color (None = transparent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Color>,
    /// Vertical position of the text center, 0.0 (top) to 1.0 (bottom)
    pub vertical_position: f64,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "Arial".to_string(),
            font_path: None,
            font_size: 32,
            color: Color::white(),
            outline_color: Some(Color::black()),
            outline_width: 2.0,
            background_color: None,
            vertical_position: DEFAULT_VERTICAL_POSITION,
        }
    }
}

impl TextStyle {
    /// White text on a translucent box, no outline
    pub fn with_background() -> Self {
        Self {
            background_color: Some(Color::rgba(0.0, 0.0, 0.0, 0.7)),
            outline_color: None,
            outline_width: 0.0,
            ..Default::default()
        }
    }

    /// Yellow subtitle style
    pub fn yellow_subtitle() -> Self {
        Self {
            color: Color::yellow(),
            ..Default::default()
        }
    }

    /// Returns a copy placed at the given vertical fraction
    pub fn at_vertical(mut self, fraction: f64) -> Self {
        self.vertical_position = fraction;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.vertical_position) {
            return Err(format!(
                "vertical position {} outside 0.0..=1.0",
                self.vertical_position
            ));
        }
        if self.font_size == 0 {
            return Err("font size must be positive".to_string());
        }
        if !self.outline_width.is_finite() || self.outline_width < 0.0 {
            return Err("outline width must be a non-negative number".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Track
// =============================================================================

/// Track type/kind enumeration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    Video,
    Audio,
    ImageOverlay,
    TextOverlay,
    Caption,
}

impl TrackKind {
    /// Exclusive tracks never hold two items that overlap in time
    pub fn is_exclusive(&self) -> bool {
        matches!(self, TrackKind::Video | TrackKind::Audio)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::ImageOverlay => "image overlay",
            TrackKind::TextOverlay => "text overlay",
            TrackKind::Caption => "caption",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Track holding items of one kind, always ordered by start time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub kind: TrackKind,
    pub name: String,
    pub items: Vec<TimelineItem>,
}

impl Track {
    pub fn new(id: &str, kind: TrackKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            name: id.to_string(),
            items: vec![],
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Gets an item by ID
    pub fn get_item(&self, item_id: &str) -> Option<&TimelineItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Returns the end of the last item on the track
    pub fn end_sec(&self) -> TimeSec {
        self.items
            .iter()
            .map(TimelineItem::end_sec)
            .fold(0.0, f64::max)
    }

    /// Sorts items by start, then id, so equal starts order deterministically
    pub(crate) fn sort_items(&mut self) {
        self.items.sort_by(|a, b| {
            a.start_sec
                .total_cmp(&b.start_sec)
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    /// First item that overlaps `range`, skipping `ignore_item_id`
    pub(crate) fn find_overlap(
        &self,
        range: &TimeRange,
        ignore_item_id: Option<&str>,
    ) -> Option<&TimelineItem> {
        self.items.iter().find(|existing| {
            if ignore_item_id.is_some_and(|id| id == existing.id) {
                return false;
            }
            existing.range().overlaps(range)
        })
    }
}

// =============================================================================
// Timeline Item
// =============================================================================

/// Variant-specific payload of a timeline item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ItemContent {
    #[serde(rename_all = "camelCase")]
    VideoClip {
        media_id: MediaId,
        /// Offset into the source where playback starts
        #[serde(default)]
        source_in_sec: TimeSec,
        #[serde(default = "default_volume")]
        volume: f32,
    },
    #[serde(rename_all = "camelCase")]
    AudioTrack {
        media_id: MediaId,
        #[serde(default)]
        source_in_sec: TimeSec,
        #[serde(default = "default_volume")]
        volume: f32,
    },
    #[serde(rename_all = "camelCase")]
    ImageOverlay {
        media_id: MediaId,
        #[serde(default)]
        position: Position,
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default = "default_opacity")]
        opacity: f64,
    },
    #[serde(rename_all = "camelCase")]
    TextOverlay { text: String, style: TextStyle },
    #[serde(rename_all = "camelCase")]
    CaptionCue { text: String, style: TextStyle },
}

fn default_volume() -> f32 {
    1.0
}

fn default_scale() -> f64 {
    1.0
}

fn default_opacity() -> f64 {
    1.0
}

impl ItemContent {
    /// The track kind this content belongs on
    pub fn track_kind(&self) -> TrackKind {
        match self {
            ItemContent::VideoClip { .. } => TrackKind::Video,
            ItemContent::AudioTrack { .. } => TrackKind::Audio,
            ItemContent::ImageOverlay { .. } => TrackKind::ImageOverlay,
            ItemContent::TextOverlay { .. } => TrackKind::TextOverlay,
            ItemContent::CaptionCue { .. } => TrackKind::Caption,
        }
    }

    /// Referenced media source, for media variants
    pub fn media_id(&self) -> Option<&MediaId> {
        match self {
            ItemContent::VideoClip { media_id, .. }
            | ItemContent::AudioTrack { media_id, .. }
            | ItemContent::ImageOverlay { media_id, .. } => Some(media_id),
            ItemContent::TextOverlay { .. } | ItemContent::CaptionCue { .. } => None,
        }
    }

    /// Text and style, for text variants
    pub fn text(&self) -> Option<(&str, &TextStyle)> {
        match self {
            ItemContent::TextOverlay { text, style } | ItemContent::CaptionCue { text, style } => {
                Some((text.as_str(), style))
            }
            _ => None,
        }
    }
}

/// An item placed on the timeline at `[start_sec, start_sec + duration_sec)`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    pub id: ItemId,
    pub track_id: TrackId,
    pub start_sec: TimeSec,
    pub duration_sec: TimeSec,
    /// Render priority within the item's layer; higher draws on top
    #[serde(default)]
    pub z_order: i32,
    pub content: ItemContent,
}

impl TimelineItem {
    /// Creates an item with a generated ULID
    pub fn new(track_id: &str, start_sec: TimeSec, duration_sec: TimeSec, content: ItemContent) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            track_id: track_id.to_string(),
            start_sec,
            duration_sec,
            z_order: 0,
            content,
        }
    }

    pub fn video(track_id: &str, media_id: &str, start_sec: TimeSec, duration_sec: TimeSec) -> Self {
        Self::new(
            track_id,
            start_sec,
            duration_sec,
            ItemContent::VideoClip {
                media_id: media_id.to_string(),
                source_in_sec: 0.0,
                volume: 1.0,
            },
        )
    }

    pub fn audio(track_id: &str, media_id: &str, start_sec: TimeSec, duration_sec: TimeSec) -> Self {
        Self::new(
            track_id,
            start_sec,
            duration_sec,
            ItemContent::AudioTrack {
                media_id: media_id.to_string(),
                source_in_sec: 0.0,
                volume: 1.0,
            },
        )
    }

    pub fn image(track_id: &str, media_id: &str, start_sec: TimeSec, duration_sec: TimeSec) -> Self {
        Self::new(
            track_id,
            start_sec,
            duration_sec,
            ItemContent::ImageOverlay {
                media_id: media_id.to_string(),
                position: Position::default(),
                scale: 1.0,
                opacity: 1.0,
            },
        )
    }

    pub fn text(track_id: &str, text: &str, start_sec: TimeSec, duration_sec: TimeSec) -> Self {
        Self::new(
            track_id,
            start_sec,
            duration_sec,
            ItemContent::TextOverlay {
                text: text.to_string(),
                style: TextStyle::default(),
            },
        )
    }

    pub fn caption(
        track_id: &str,
        text: &str,
        start_sec: TimeSec,
        duration_sec: TimeSec,
        style: TextStyle,
    ) -> Self {
        Self::new(
            track_id,
            start_sec,
            duration_sec,
            ItemContent::CaptionCue {
                text: text.to_string(),
                style,
            },
        )
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_z_order(mut self, z_order: i32) -> Self {
        self.z_order = z_order;
        self
    }

    pub fn end_sec(&self) -> TimeSec {
        self.start_sec + self.duration_sec
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start_sec: self.start_sec,
            end_sec: self.end_sec(),
        }
    }

    /// Whether `time_sec` falls inside `[start, end)`
    pub fn contains_time(&self, time_sec: TimeSec) -> bool {
        self.range().contains(time_sec)
    }

    /// Checks timing and content well-formedness of this single item
    pub fn check(&self) -> CoreResult<()> {
        self.check_timing()
            .and_then(|_| self.check_content())
            .map_err(|reason| CoreError::InvalidItem {
                item_id: self.id.clone(),
                reason,
            })
    }

    pub(crate) fn check_timing(&self) -> Result<(), String> {
        if !self.start_sec.is_finite() || self.start_sec < 0.0 {
            return Err(format!("start {} must be finite and >= 0", self.start_sec));
        }
        if !self.duration_sec.is_finite() || self.duration_sec <= 0.0 {
            return Err(format!("duration {} must be finite and > 0", self.duration_sec));
        }
        Ok(())
    }

    pub(crate) fn check_content(&self) -> Result<(), String> {
        match &self.content {
            ItemContent::VideoClip {
                media_id,
                source_in_sec,
                volume,
            }
            | ItemContent::AudioTrack {
                media_id,
                source_in_sec,
                volume,
            } => {
                if media_id.trim().is_empty() {
                    return Err("media id is empty".to_string());
                }
                if !source_in_sec.is_finite() || *source_in_sec < 0.0 {
                    return Err(format!("source in {} must be >= 0", source_in_sec));
                }
                if !volume.is_finite() || *volume < 0.0 {
                    return Err(format!("volume {} must be >= 0", volume));
                }
                Ok(())
            }
            ItemContent::ImageOverlay {
                media_id,
                scale,
                opacity,
                ..
            } => {
                if media_id.trim().is_empty() {
                    return Err("media id is empty".to_string());
                }
                if !scale.is_finite() || *scale <= 0.0 {
                    return Err(format!("scale {} must be > 0", scale));
                }
                if !(0.0..=1.0).contains(opacity) {
                    return Err(format!("opacity {} outside 0.0..=1.0", opacity));
                }
                Ok(())
            }
            ItemContent::TextOverlay { text, style } | ItemContent::CaptionCue { text, style } => {
                if text.trim().is_empty() {
                    return Err("text is empty".to_string());
                }
                style.validate()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_kind_exclusivity() {
        assert!(TrackKind::Video.is_exclusive());
        assert!(TrackKind::Audio.is_exclusive());
        assert!(!TrackKind::ImageOverlay.is_exclusive());
        assert!(!TrackKind::TextOverlay.is_exclusive());
        assert!(!TrackKind::Caption.is_exclusive());
    }

    #[test]
    fn test_item_range_is_half_open() {
        let item = TimelineItem::video("v1", "clip", 5.0, 10.0);
        assert_eq!(item.end_sec(), 15.0);
        assert!(item.contains_time(5.0));
        assert!(item.contains_time(14.99));
        assert!(!item.contains_time(15.0));
    }

    #[test]
    fn test_content_track_kind_and_accessors() {
        let image = TimelineItem::image("img", "logo", 0.0, 1.0);
        assert_eq!(image.content.track_kind(), TrackKind::ImageOverlay);
        assert_eq!(image.content.media_id().map(String::as_str), Some("logo"));
        assert!(image.content.text().is_none());

        let text = TimelineItem::text("txt", "Hello", 0.0, 1.0);
        let (body, style) = text.content.text().unwrap();
        assert_eq!(body, "Hello");
        assert_eq!(style.vertical_position, DEFAULT_VERTICAL_POSITION);
        assert!(text.content.media_id().is_none());
    }

    #[test]
    fn test_check_rejects_bad_timing() {
        let zero = TimelineItem::video("v1", "clip", 0.0, 0.0);
        assert!(matches!(zero.check(), Err(CoreError::InvalidItem { .. })));

        let negative = TimelineItem::video("v1", "clip", -1.0, 2.0);
        assert!(negative.check().is_err());

        let nan = TimelineItem::video("v1", "clip", f64::NAN, 2.0);
        assert!(nan.check().is_err());
    }

    #[test]
    fn test_check_rejects_bad_content() {
        let empty_text = TimelineItem::text("txt", "   ", 0.0, 1.0);
        assert!(empty_text.check().is_err());

        let mut off_screen = TimelineItem::text("txt", "Hi", 0.0, 1.0);
        if let ItemContent::TextOverlay { style, .. } = &mut off_screen.content {
            style.vertical_position = 1.5;
        }
        assert!(off_screen.check().is_err());

        let mut faded = TimelineItem::image("img", "logo", 0.0, 1.0);
        if let ItemContent::ImageOverlay { opacity, .. } = &mut faded.content {
            *opacity = 2.0;
        }
        assert!(faded.check().is_err());
    }

    #[test]
    fn test_item_serialization_is_tagged() {
        let item = TimelineItem::audio("a1", "voice", 1.0, 4.0).with_id("item-1");
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["content"]["type"], "audioTrack");
        assert_eq!(json["content"]["mediaId"], "voice");
        assert_eq!(json["trackId"], "a1");

        let parsed: TimelineItem = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_item_deserialization_applies_defaults() {
        let json = r#"{
            "id": "i1", "trackId": "img", "startSec": 0.0, "durationSec": 2.0,
            "content": {"type": "imageOverlay", "mediaId": "logo"}
        }"#;
        let item: TimelineItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.z_order, 0);
        match item.content {
            ItemContent::ImageOverlay {
                position,
                scale,
                opacity,
                ..
            } => {
                assert_eq!(position, Position::Center);
                assert_eq!(scale, 1.0);
                assert_eq!(opacity, 1.0);
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_track_sort_is_deterministic() {
        let mut track = Track::new("txt", TrackKind::TextOverlay);
        track.items.push(TimelineItem::text("txt", "b", 1.0, 1.0).with_id("b"));
        track.items.push(TimelineItem::text("txt", "a", 1.0, 1.0).with_id("a"));
        track.items.push(TimelineItem::text("txt", "z", 0.0, 1.0).with_id("z"));
        track.sort_items();

        let ids: Vec<_> = track.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
        assert_eq!(track.end_sec(), 2.0);
    }
}
