//! Clipweave Error Definitions
//!
//! Defines error types used throughout the engine.

use thiserror::Error;

use super::{
    pipeline::PipelineStage, timeline::TrackViolation, ItemId, MediaId, TimeSec, TrackId,
};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Project Errors
    // =========================================================================
    #[error("Project file corrupted: {0}")]
    ProjectCorrupted(String),

    // =========================================================================
    // Media Errors
    // =========================================================================
    #[error("Media not found: {0}")]
    MediaNotFound(String),

    #[error("Unsupported media format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown media reference: {0}")]
    UnknownMedia(MediaId),

    // =========================================================================
    // Timeline Errors
    // =========================================================================
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Invalid item {item_id}: {reason}")]
    InvalidItem { item_id: ItemId, reason: String },

    #[error(
        "Item overlap on track {track_id}: {new_start:.3}~{new_end:.3}s conflicts with item {existing_item_id}"
    )]
    Conflict {
        track_id: TrackId,
        existing_item_id: ItemId,
        new_start: TimeSec,
        new_end: TimeSec,
    },

    #[error("Timeline invalid: {}", describe_violations(.0))]
    TimelineInvalid(Vec<TrackViolation>),

    // =========================================================================
    // Caption Errors
    // =========================================================================
    #[error("Transcription backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Caption cue invariant violated: {0}")]
    CaptionInvariant(String),

    // =========================================================================
    // Render Errors
    // =========================================================================
    #[error("Render failed after stage {last_completed_stage}: {message}")]
    RenderFailure {
        last_completed_stage: PipelineStage,
        message: String,
    },

    #[error("Invalid export settings: {0}")]
    InvalidSettings(String),

    #[error("Export cancelled")]
    Cancelled,

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

fn describe_violations(violations: &[TrackViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    /// Whether the caller can recover by retrying with adjusted input
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::Conflict { .. } | CoreError::BackendUnavailable { .. }
        )
    }
}
