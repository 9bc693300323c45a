//! Composition Plan
//!
//! The flattened, render-ordered description of one export. Built from a
//! validated timeline, the media library and the resolved text overlays;
//! never persisted and rebuilt for every export.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::ExportSettings;
use crate::core::{
    media::{MediaKind, MediaLibrary, MediaSource},
    resolver::{ResolveStats, ResolvedOverlays, TextInstruction},
    timeline::{ItemContent, Timeline, TimelineItem, TrackKind},
    CoreError, CoreResult, ItemId, Position, TimeSec, TIME_EPSILON,
};

/// A stretch of source video placed on the timeline
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSegment {
    pub item_id: ItemId,
    pub media: Arc<MediaSource>,
    pub start_sec: TimeSec,
    pub duration_sec: TimeSec,
    pub source_in_sec: TimeSec,
    pub z_order: i32,
}

/// One piece of the base video: a clip or black filler
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BaseSegment {
    Clip(VideoSegment),
    #[serde(rename_all = "camelCase")]
    Gap {
        start_sec: TimeSec,
        duration_sec: TimeSec,
    },
}

impl BaseSegment {
    pub fn start_sec(&self) -> TimeSec {
        match self {
            BaseSegment::Clip(clip) => clip.start_sec,
            BaseSegment::Gap { start_sec, .. } => *start_sec,
        }
    }

    pub fn duration_sec(&self) -> TimeSec {
        match self {
            BaseSegment::Clip(clip) => clip.duration_sec,
            BaseSegment::Gap { duration_sec, .. } => *duration_sec,
        }
    }
}

/// Audio to mix in at `start_sec`
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSegment {
    pub item_id: ItemId,
    pub media: Arc<MediaSource>,
    pub start_sec: TimeSec,
    pub duration_sec: TimeSec,
    pub source_in_sec: TimeSec,
    pub volume: f32,
}

/// A still image drawn over `[start_sec, end_sec)`
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePlacement {
    pub item_id: ItemId,
    pub media: Arc<MediaSource>,
    pub start_sec: TimeSec,
    pub end_sec: TimeSec,
    pub position: Position,
    pub scale: f64,
    pub opacity: f64,
    pub z_order: i32,
}

/// Everything the render backend needs for one export
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionPlan {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_sec: TimeSec,
    /// Gapless, start-ordered base video covering `[0, duration_sec)`
    pub base_video: Vec<BaseSegment>,
    /// Clips from further video tracks, bottom to top
    pub video_overlays: Vec<VideoSegment>,
    pub audio: Vec<AudioSegment>,
    /// Bottom to top
    pub images: Vec<ImagePlacement>,
    /// Bottom to top; manual text and captions never share an instant
    pub texts: Vec<TextInstruction>,
    pub overlay_stats: ResolveStats,
}

impl CompositionPlan {
    /// Builds the plan for a validated timeline.
    ///
    /// Every media reference must resolve in `library`; text is taken from
    /// `overlays` only, so caption and text tracks are not read again here.
    pub fn build(
        timeline: &Timeline,
        library: &MediaLibrary,
        overlays: ResolvedOverlays,
        settings: &ExportSettings,
    ) -> CoreResult<Self> {
        // Captions follow the program; they never lengthen it.
        let duration_sec = timeline
            .tracks()
            .filter(|t| t.kind != TrackKind::Caption)
            .map(|t| t.end_sec())
            .fold(0.0, f64::max);
        if duration_sec <= TIME_EPSILON {
            return Err(CoreError::InvalidSettings("timeline is empty".to_string()));
        }

        let mut video_tracks = timeline
            .tracks()
            .filter(|t| t.kind == TrackKind::Video && !t.items.is_empty());

        let base_clips = match video_tracks.next() {
            Some(track) => track
                .items
                .iter()
                .map(|item| video_segment(item, library))
                .collect::<CoreResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        let mut video_overlays = Vec::new();
        for track in video_tracks {
            for item in &track.items {
                video_overlays.push(video_segment(item, library)?);
            }
        }

        let mut audio = Vec::new();
        for item in timeline
            .items_of_kind(TrackKind::Video)
            .into_iter()
            .chain(timeline.items_of_kind(TrackKind::Audio))
        {
            if let Some(segment) = audio_segment(item, library)? {
                audio.push(segment);
            }
        }
        audio.sort_by(|a, b| {
            a.start_sec
                .total_cmp(&b.start_sec)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        let mut images = Vec::new();
        for item in timeline.items_of_kind(TrackKind::ImageOverlay) {
            images.push(image_placement(item, library)?);
        }
        images.sort_by(|a, b| {
            a.z_order
                .cmp(&b.z_order)
                .then_with(|| a.start_sec.total_cmp(&b.start_sec))
        });

        let ResolvedOverlays {
            instructions,
            stats,
        } = overlays;
        let mut texts: Vec<TextInstruction> = instructions
            .into_iter()
            .filter(|t| t.start_sec < duration_sec - TIME_EPSILON)
            .map(|mut t| {
                t.end_sec = t.end_sec.min(duration_sec);
                t
            })
            .collect();
        // Stable: equal stacking keys keep start order.
        texts.sort_by_key(|t| t.stacking_key());

        let base_video = fill_gaps(base_clips, duration_sec);
        debug!(
            duration_sec,
            base_segments = base_video.len(),
            video_overlays = video_overlays.len(),
            audio = audio.len(),
            images = images.len(),
            texts = texts.len(),
            "Composition plan built"
        );

        Ok(Self {
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            duration_sec,
            base_video,
            video_overlays,
            audio,
            images,
            texts,
            overlay_stats: stats,
        })
    }

    /// Distinct media sources the plan reads, sorted by id
    pub fn media_sources(&self) -> Vec<Arc<MediaSource>> {
        let mut sources: BTreeMap<&str, &Arc<MediaSource>> = BTreeMap::new();
        let base = self.base_video.iter().filter_map(|s| match s {
            BaseSegment::Clip(clip) => Some(&clip.media),
            BaseSegment::Gap { .. } => None,
        });
        for media in base
            .chain(self.video_overlays.iter().map(|v| &v.media))
            .chain(self.audio.iter().map(|a| &a.media))
            .chain(self.images.iter().map(|i| &i.media))
        {
            sources.insert(media.id.as_str(), media);
        }
        sources.into_values().cloned().collect()
    }

    pub fn caption_count(&self) -> usize {
        self.texts
            .iter()
            .filter(|t| t.source == crate::core::resolver::TextSource::Caption)
            .count()
    }
}

/// Checks that every media reference resolves, is still on disk and has a
/// kind its item can use.
pub fn check_media_references(timeline: &Timeline, library: &MediaLibrary) -> CoreResult<()> {
    for track in timeline.tracks() {
        for item in &track.items {
            let Some(media_id) = item.content.media_id() else {
                continue;
            };
            let media = library.require(media_id)?;
            media.check_available()?;
            check_kind(item, &media)?;
        }
    }
    Ok(())
}

fn check_kind(item: &TimelineItem, media: &MediaSource) -> CoreResult<()> {
    let accepted = match item.content {
        ItemContent::VideoClip { .. } => media.kind == MediaKind::Video,
        ItemContent::AudioTrack { .. } => media.kind.has_audio(),
        ItemContent::ImageOverlay { .. } => media.kind == MediaKind::Image,
        ItemContent::TextOverlay { .. } | ItemContent::CaptionCue { .. } => true,
    };
    if accepted {
        Ok(())
    } else {
        Err(CoreError::UnsupportedFormat(format!(
            "item {} on a {} track cannot use {:?} media {}",
            item.id,
            item.content.track_kind(),
            media.kind,
            media.path.display()
        )))
    }
}

fn video_segment(item: &TimelineItem, library: &MediaLibrary) -> CoreResult<VideoSegment> {
    match &item.content {
        ItemContent::VideoClip {
            media_id,
            source_in_sec,
            ..
        } => {
            let media = library.require(media_id)?;
            check_kind(item, &media)?;
            Ok(VideoSegment {
                item_id: item.id.clone(),
                media,
                start_sec: item.start_sec,
                duration_sec: item.duration_sec,
                source_in_sec: *source_in_sec,
                z_order: item.z_order,
            })
        }
        other => Err(CoreError::InvalidItem {
            item_id: item.id.clone(),
            reason: format!("{} item on a video track", other.track_kind()),
        }),
    }
}

fn audio_segment(item: &TimelineItem, library: &MediaLibrary) -> CoreResult<Option<AudioSegment>> {
    let (media_id, source_in_sec, volume) = match &item.content {
        ItemContent::VideoClip {
            media_id,
            source_in_sec,
            volume,
        }
        | ItemContent::AudioTrack {
            media_id,
            source_in_sec,
            volume,
        } => (media_id, *source_in_sec, *volume),
        _ => return Ok(None),
    };

    let media = library.require(media_id)?;
    if !media.mixable_audio() || volume <= 0.0 {
        return Ok(None);
    }
    Ok(Some(AudioSegment {
        item_id: item.id.clone(),
        media,
        start_sec: item.start_sec,
        duration_sec: item.duration_sec,
        source_in_sec,
        volume,
    }))
}

fn image_placement(item: &TimelineItem, library: &MediaLibrary) -> CoreResult<ImagePlacement> {
    match &item.content {
        ItemContent::ImageOverlay {
            media_id,
            position,
            scale,
            opacity,
        } => {
            let media = library.require(media_id)?;
            check_kind(item, &media)?;
            Ok(ImagePlacement {
                item_id: item.id.clone(),
                media,
                start_sec: item.start_sec,
                end_sec: item.end_sec(),
                position: *position,
                scale: *scale,
                opacity: *opacity,
                z_order: item.z_order,
            })
        }
        other => Err(CoreError::InvalidItem {
            item_id: item.id.clone(),
            reason: format!("{} item on an image overlay track", other.track_kind()),
        }),
    }
}

/// Pads start-ordered, non-overlapping clips with black filler out to `duration_sec`
fn fill_gaps(clips: Vec<VideoSegment>, duration_sec: TimeSec) -> Vec<BaseSegment> {
    let mut segments = Vec::with_capacity(clips.len() * 2 + 1);
    let mut cursor = 0.0;

    for clip in clips {
        if clip.start_sec - cursor > TIME_EPSILON {
            segments.push(BaseSegment::Gap {
                start_sec: cursor,
                duration_sec: clip.start_sec - cursor,
            });
        }
        cursor = clip.start_sec + clip.duration_sec;
        segments.push(BaseSegment::Clip(clip));
    }

    if duration_sec - cursor > TIME_EPSILON {
        segments.push(BaseSegment::Gap {
            start_sec: cursor,
            duration_sec: duration_sec - cursor,
        });
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::OverlayResolver;
    use crate::core::timeline::TextStyle;
    use std::path::PathBuf;

    fn source(id: &str, kind: MediaKind, has_audio: Option<bool>) -> MediaSource {
        let ext = match kind {
            MediaKind::Video => "mp4",
            MediaKind::Audio => "wav",
            MediaKind::Image => "png",
        };
        MediaSource {
            id: id.to_string(),
            path: PathBuf::from(format!("/media/{id}.{ext}")),
            kind,
            duration_sec: None,
            width: None,
            height: None,
            has_audio,
        }
    }

    fn library() -> MediaLibrary {
        [
            source("cam", MediaKind::Video, Some(true)),
            source("screen", MediaKind::Video, Some(false)),
            source("voice", MediaKind::Audio, None),
            source("logo", MediaKind::Image, None),
        ]
        .into_iter()
        .collect()
    }

    fn resolve(timeline: &Timeline) -> ResolvedOverlays {
        let manual = timeline.items_of_kind(TrackKind::TextOverlay);
        let captions = timeline.items_of_kind(TrackKind::Caption);
        OverlayResolver::default().resolve(&manual, &captions).unwrap()
    }

    #[test]
    fn test_base_video_gaps_are_filled() {
        let mut timeline = Timeline::new();
        timeline.add(TimelineItem::video("v1", "cam", 2.0, 3.0).with_id("a")).unwrap();
        timeline.add(TimelineItem::video("v1", "screen", 6.0, 2.0).with_id("b")).unwrap();
        timeline.add(TimelineItem::audio("a1", "voice", 0.0, 10.0)).unwrap();

        let plan = CompositionPlan::build(
            &timeline,
            &library(),
            resolve(&timeline),
            &ExportSettings::default(),
        )
        .unwrap();

        assert_eq!(plan.duration_sec, 10.0);
        let spans: Vec<_> = plan
            .base_video
            .iter()
            .map(|s| (matches!(s, BaseSegment::Clip(_)), s.start_sec(), s.duration_sec()))
            .collect();
        assert_eq!(
            spans,
            vec![
                (false, 0.0, 2.0),
                (true, 2.0, 3.0),
                (false, 5.0, 1.0),
                (true, 6.0, 2.0),
                (false, 8.0, 2.0),
            ]
        );
    }

    #[test]
    fn test_audio_only_from_sources_with_sound() {
        let mut timeline = Timeline::new();
        timeline.add(TimelineItem::video("v1", "cam", 0.0, 3.0).with_id("cam")).unwrap();
        timeline.add(TimelineItem::video("v1", "screen", 3.0, 3.0).with_id("screen")).unwrap();
        timeline.add(TimelineItem::audio("a1", "voice", 1.0, 2.0).with_id("voice")).unwrap();

        let plan = CompositionPlan::build(
            &timeline,
            &library(),
            resolve(&timeline),
            &ExportSettings::default(),
        )
        .unwrap();

        let ids: Vec<_> = plan.audio.iter().map(|a| a.item_id.as_str()).collect();
        assert_eq!(ids, vec!["cam", "voice"]);
        assert_eq!(plan.media_sources().len(), 3);
    }

    #[test]
    fn test_second_video_track_becomes_overlay() {
        let mut timeline = Timeline::new();
        timeline.add(TimelineItem::video("v1", "cam", 0.0, 4.0)).unwrap();
        timeline.add(TimelineItem::video("v2", "screen", 1.0, 1.0).with_id("pip")).unwrap();

        let plan = CompositionPlan::build(
            &timeline,
            &library(),
            resolve(&timeline),
            &ExportSettings::default(),
        )
        .unwrap();
        assert_eq!(plan.base_video.len(), 1);
        assert_eq!(plan.video_overlays[0].item_id, "pip");
    }

    #[test]
    fn test_texts_are_stacked_and_clipped_to_duration() {
        let mut timeline = Timeline::new();
        timeline.add(TimelineItem::video("v1", "cam", 0.0, 4.0)).unwrap();
        timeline
            .add(TimelineItem::caption("cc", "late", 3.5, 2.0, TextStyle::default()).with_id("cc"))
            .unwrap();
        timeline.add(TimelineItem::text("txt", "title", 0.0, 1.0).with_id("title")).unwrap();

        let plan = CompositionPlan::build(
            &timeline,
            &library(),
            resolve(&timeline),
            &ExportSettings::default(),
        )
        .unwrap();

        let order: Vec<_> = plan.texts.iter().map(|t| (t.item_id.as_str(), t.end_sec)).collect();
        assert_eq!(order, vec![("title", 1.0), ("cc", 4.0)]);
        assert_eq!(plan.caption_count(), 1);
    }

    #[test]
    fn test_image_overlay_with_video_media_is_rejected() {
        let mut timeline = Timeline::new();
        timeline.add(TimelineItem::video("v1", "cam", 0.0, 4.0)).unwrap();
        timeline.add(TimelineItem::image("img", "cam", 0.0, 1.0)).unwrap();

        let err = CompositionPlan::build(
            &timeline,
            &library(),
            resolve(&timeline),
            &ExportSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_unknown_media_reference() {
        let mut timeline = Timeline::new();
        timeline.add(TimelineItem::audio("a1", "missing", 0.0, 1.0)).unwrap();

        let err = check_media_references(&timeline, &library()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMedia(id) if id == "missing"));
    }

    #[test]
    fn test_empty_timeline_has_no_plan() {
        let timeline = Timeline::new();
        let err = CompositionPlan::build(
            &timeline,
            &library(),
            ResolvedOverlays::default(),
            &ExportSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSettings(_)));
    }
}
