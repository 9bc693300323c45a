//! Full-timeline invariant checks.

use serde::{Deserialize, Serialize};

use crate::core::{ItemId, TimeRange, TimeSec, TrackId};

use super::{ItemContent, TimelineItem, Track, TrackKind};

/// Two manual text overlays closer than this (fraction of frame height)
/// are considered to occupy the same screen position.
pub const MANUAL_COLLISION_BAND: f64 = 0.05;

/// One broken timeline invariant
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TrackViolation {
    /// Two items overlap on an exclusive track
    #[serde(rename_all = "camelCase")]
    Overlap {
        track_id: TrackId,
        first_item_id: ItemId,
        second_item_id: ItemId,
        overlap_start: TimeSec,
        overlap_end: TimeSec,
    },
    /// Start/duration out of range, or malformed content
    #[serde(rename_all = "camelCase")]
    InvalidItem {
        track_id: TrackId,
        item_id: ItemId,
        reason: String,
    },
    /// Item content does not belong on its track's kind
    #[serde(rename_all = "camelCase")]
    KindMismatch {
        track_id: TrackId,
        item_id: ItemId,
        track_kind: TrackKind,
        item_kind: TrackKind,
    },
    /// An item's `track_id` disagrees with the track holding it
    #[serde(rename_all = "camelCase")]
    TrackIdMismatch {
        track_id: TrackId,
        item_id: ItemId,
    },
    /// The same item id appears more than once
    #[serde(rename_all = "camelCase")]
    DuplicateItemId { item_id: ItemId },
    /// Two manual text overlays share a screen position at the same time
    #[serde(rename_all = "camelCase")]
    ManualOverlayCollision {
        first_item_id: ItemId,
        second_item_id: ItemId,
        overlap_start: TimeSec,
        overlap_end: TimeSec,
    },
}

impl TrackViolation {
    /// Track the violation belongs to, when it concerns a single track
    pub fn track_id(&self) -> Option<&TrackId> {
        match self {
            TrackViolation::Overlap { track_id, .. }
            | TrackViolation::InvalidItem { track_id, .. }
            | TrackViolation::KindMismatch { track_id, .. }
            | TrackViolation::TrackIdMismatch { track_id, .. } => Some(track_id),
            TrackViolation::DuplicateItemId { .. }
            | TrackViolation::ManualOverlayCollision { .. } => None,
        }
    }
}

impl std::fmt::Display for TrackViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackViolation::Overlap {
                track_id,
                first_item_id,
                second_item_id,
                overlap_start,
                overlap_end,
            } => write!(
                f,
                "track {track_id}: items {first_item_id} and {second_item_id} overlap at {overlap_start:.3}~{overlap_end:.3}s"
            ),
            TrackViolation::InvalidItem {
                track_id,
                item_id,
                reason,
            } => write!(f, "track {track_id}: item {item_id} is invalid: {reason}"),
            TrackViolation::KindMismatch {
                track_id,
                item_id,
                track_kind,
                item_kind,
            } => write!(
                f,
                "track {track_id}: {item_kind} item {item_id} placed on a {track_kind} track"
            ),
            TrackViolation::TrackIdMismatch { track_id, item_id } => {
                write!(f, "track {track_id}: item {item_id} names a different track")
            }
            TrackViolation::DuplicateItemId { item_id } => {
                write!(f, "item id {item_id} is used more than once")
            }
            TrackViolation::ManualOverlayCollision {
                first_item_id,
                second_item_id,
                overlap_start,
                overlap_end,
            } => write!(
                f,
                "text overlays {first_item_id} and {second_item_id} collide at {overlap_start:.3}~{overlap_end:.3}s"
            ),
        }
    }
}

/// Collects every violation across all tracks.
pub(crate) fn collect_violations(tracks: &[Track]) -> Vec<TrackViolation> {
    let mut violations = Vec::new();
    let mut seen_ids = std::collections::HashSet::new();

    for track in tracks {
        for item in &track.items {
            if !seen_ids.insert(item.id.as_str()) {
                violations.push(TrackViolation::DuplicateItemId {
                    item_id: item.id.clone(),
                });
            }
            if item.track_id != track.id {
                violations.push(TrackViolation::TrackIdMismatch {
                    track_id: track.id.clone(),
                    item_id: item.id.clone(),
                });
            }
            let item_kind = item.content.track_kind();
            if item_kind != track.kind {
                violations.push(TrackViolation::KindMismatch {
                    track_id: track.id.clone(),
                    item_id: item.id.clone(),
                    track_kind: track.kind,
                    item_kind,
                });
            }
            if let Err(reason) = item.check_timing().and_then(|_| item.check_content()) {
                violations.push(TrackViolation::InvalidItem {
                    track_id: track.id.clone(),
                    item_id: item.id.clone(),
                    reason,
                });
            }
        }

        if track.kind.is_exclusive() {
            violations.extend(exclusive_overlaps(track));
        }
    }

    violations.extend(manual_collisions(tracks));
    violations
}

/// Sweep over a start-sorted copy of the track, comparing each item with
/// every earlier item still running.
fn exclusive_overlaps(track: &Track) -> Vec<TrackViolation> {
    let mut sorted: Vec<&TimelineItem> = track.items.iter().collect();
    sorted.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));

    let mut violations = Vec::new();
    for (i, later) in sorted.iter().enumerate() {
        for earlier in &sorted[..i] {
            if let Some(overlap) = earlier.range().intersection(&later.range()) {
                violations.push(TrackViolation::Overlap {
                    track_id: track.id.clone(),
                    first_item_id: earlier.id.clone(),
                    second_item_id: later.id.clone(),
                    overlap_start: overlap.start_sec,
                    overlap_end: overlap.end_sec,
                });
            }
        }
    }
    violations
}

fn manual_collisions(tracks: &[Track]) -> Vec<TrackViolation> {
    let manual: Vec<(&TimelineItem, f64)> = tracks
        .iter()
        .flat_map(|t| t.items.iter())
        .filter_map(|item| match &item.content {
            ItemContent::TextOverlay { style, .. } => Some((item, style.vertical_position)),
            _ => None,
        })
        .collect();

    let mut violations = Vec::new();
    for (i, (a, a_pos)) in manual.iter().enumerate() {
        for (b, b_pos) in &manual[i + 1..] {
            if (a_pos - b_pos).abs() >= MANUAL_COLLISION_BAND {
                continue;
            }
            if let Some(TimeRange {
                start_sec,
                end_sec,
            }) = a.range().intersection(&b.range())
            {
                violations.push(TrackViolation::ManualOverlayCollision {
                    first_item_id: a.id.clone(),
                    second_item_id: b.id.clone(),
                    overlap_start: start_sec,
                    overlap_end: end_sec,
                });
            }
        }
    }
    violations
}
