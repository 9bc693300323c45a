//! Timeline container and its mutation operations.
//!
//! Every mutation checks the owning track's invariant before touching state,
//! so a failed `add` or `move_item` leaves the timeline exactly as it was.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{CoreError, CoreResult, TimeRange, TimeSec, TrackId};

use super::validation::collect_violations;
use super::{TimelineItem, Track, TrackKind, TrackViolation};

/// Items grouped by track, each track iterated in start order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredTimeline")]
pub struct Timeline {
    tracks: Vec<Track>,
}

/// On-disk shape; items may be stored in any order
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTimeline {
    tracks: Vec<Track>,
}

impl From<StoredTimeline> for Timeline {
    fn from(stored: StoredTimeline) -> Self {
        Timeline::from_tracks(stored.tracks)
    }
}

fn conflict(track: &Track, existing: &TimelineItem, range: &TimeRange) -> CoreError {
    CoreError::Conflict {
        track_id: track.id.clone(),
        existing_item_id: existing.id.clone(),
        new_start: range.start_sec,
        new_end: range.end_sec,
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a timeline from stored tracks without re-checking invariants.
    ///
    /// Items are re-sorted; call [`Timeline::validate`] before relying on
    /// the content.
    pub fn from_tracks(mut tracks: Vec<Track>) -> Self {
        for track in &mut tracks {
            track.sort_items();
        }
        Self { tracks }
    }

    /// Declares a track explicitly. Re-declaring with the same kind is a no-op.
    pub fn add_track(&mut self, track_id: &str, kind: TrackKind) -> CoreResult<&Track> {
        if let Some(idx) = self.track_index(track_id) {
            let existing = &self.tracks[idx];
            if existing.kind != kind {
                return Err(CoreError::InvalidItem {
                    item_id: track_id.to_string(),
                    reason: format!("track already exists as a {} track", existing.kind),
                });
            }
            return Ok(&self.tracks[idx]);
        }

        self.tracks.push(Track::new(track_id, kind));
        Ok(&self.tracks[self.tracks.len() - 1])
    }

    /// Inserts an item, creating its track from the item's kind when missing.
    ///
    /// Fails with `Conflict` when the track is exclusive and the item's range
    /// intersects an existing item.
    pub fn add(&mut self, item: TimelineItem) -> CoreResult<()> {
        item.check()?;

        if self.get(&item.id).is_some() {
            return Err(CoreError::InvalidItem {
                item_id: item.id.clone(),
                reason: "an item with this id already exists".to_string(),
            });
        }

        let kind = item.content.track_kind();
        let idx = match self.track_index(&item.track_id) {
            Some(idx) => idx,
            None => {
                self.tracks.push(Track::new(&item.track_id, kind));
                self.tracks.len() - 1
            }
        };
        let track = &mut self.tracks[idx];

        if track.kind != kind {
            return Err(CoreError::InvalidItem {
                item_id: item.id.clone(),
                reason: format!("{} item cannot go on {} track {}", kind, track.kind, track.id),
            });
        }

        if track.kind.is_exclusive() {
            let range = item.range();
            if let Some(existing) = track.find_overlap(&range, None) {
                return Err(conflict(track, existing, &range));
            }
        }

        debug!(item_id = %item.id, track_id = %track.id, start = item.start_sec, "Adding timeline item");
        track.items.push(item);
        track.sort_items();
        Ok(())
    }

    /// Removes an item and returns it
    pub fn remove(&mut self, item_id: &str) -> CoreResult<TimelineItem> {
        let (track_idx, item_idx) = self
            .locate(item_id)
            .ok_or_else(|| CoreError::ItemNotFound(item_id.to_string()))?;

        let track = &mut self.tracks[track_idx];
        let removed = track.items.remove(item_idx);
        debug!(item_id = %removed.id, track_id = %track.id, "Removed timeline item");
        Ok(removed)
    }

    /// Moves an item to a new start time, keeping its duration.
    ///
    /// On an exclusive track a move onto another item fails with `Conflict`
    /// and leaves the item where it was.
    pub fn move_item(&mut self, item_id: &str, new_start: TimeSec) -> CoreResult<()> {
        let (track_idx, item_idx) = self
            .locate(item_id)
            .ok_or_else(|| CoreError::ItemNotFound(item_id.to_string()))?;

        if !new_start.is_finite() || new_start < 0.0 {
            return Err(CoreError::InvalidItem {
                item_id: item_id.to_string(),
                reason: format!("start {} must be finite and >= 0", new_start),
            });
        }

        let track = &mut self.tracks[track_idx];
        let candidate = TimeRange {
            start_sec: new_start,
            end_sec: new_start + track.items[item_idx].duration_sec,
        };

        if track.kind.is_exclusive() {
            if let Some(existing) = track.find_overlap(&candidate, Some(item_id)) {
                return Err(conflict(track, existing, &candidate));
            }
        }

        track.items[item_idx].start_sec = new_start;
        track.sort_items();
        Ok(())
    }

    /// Items on `track_id` whose `[start, end)` contains `time_sec`
    pub fn items_at(&self, track_id: &str, time_sec: TimeSec) -> Vec<&TimelineItem> {
        self.track(track_id)
            .map(|track| {
                track
                    .items
                    .iter()
                    .take_while(|item| item.start_sec <= time_sec)
                    .filter(|item| item.contains_time(time_sec))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Items on `track_id` that intersect `[start_sec, end_sec)`
    pub fn items_in_range(
        &self,
        track_id: &str,
        start_sec: TimeSec,
        end_sec: TimeSec,
    ) -> Vec<&TimelineItem> {
        let window = TimeRange::new(start_sec, end_sec);
        self.track(track_id)
            .map(|track| {
                track
                    .items
                    .iter()
                    .filter(|item| item.range().overlaps(&window))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, item_id: &str) -> Option<&TimelineItem> {
        self.locate(item_id)
            .map(|(t, i)| &self.tracks[t].items[i])
    }

    pub fn track(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// All items of one kind across tracks, in start order
    pub fn items_of_kind(&self, kind: TrackKind) -> Vec<&TimelineItem> {
        let mut items: Vec<&TimelineItem> = self
            .tracks
            .iter()
            .filter(|t| t.kind == kind)
            .flat_map(|t| t.items.iter())
            .collect();
        items.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));
        items
    }

    pub fn item_count(&self) -> usize {
        self.tracks.iter().map(|t| t.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// End of the last item on any track
    pub fn duration(&self) -> TimeSec {
        self.tracks.iter().map(Track::end_sec).fold(0.0, f64::max)
    }

    /// Lists every broken invariant without failing
    pub fn violations(&self) -> Vec<TrackViolation> {
        collect_violations(&self.tracks)
    }

    /// Full-timeline check; fails with `TimelineInvalid` listing every violation
    pub fn validate(&self) -> CoreResult<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CoreError::TimelineInvalid(violations))
        }
    }

    fn track_index(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    fn locate(&self, item_id: &str) -> Option<(usize, usize)> {
        self.tracks.iter().enumerate().find_map(|(t, track)| {
            track
                .items
                .iter()
                .position(|item| item.id == item_id)
                .map(|i| (t, i))
        })
    }

    /// Ids of the tracks holding at least one item
    pub fn populated_track_ids(&self) -> Vec<TrackId> {
        self.tracks
            .iter()
            .filter(|t| !t.items.is_empty())
            .map(|t| t.id.clone())
            .collect()
    }
}
