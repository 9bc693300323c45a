//! Timeline Module
//!
//! Typed, time-anchored items grouped by track. Video and audio tracks are
//! exclusive (no overlap); overlay and caption tracks layer freely and are
//! reconciled later by the overlay resolver.

mod editing;
mod models;
mod validation;

pub use editing::Timeline;
pub use models::{ItemContent, TextStyle, TimelineItem, Track, TrackKind, DEFAULT_VERTICAL_POSITION};
pub use validation::{TrackViolation, MANUAL_COLLISION_BAND};
