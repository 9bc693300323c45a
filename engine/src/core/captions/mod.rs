//! Caption Module
//!
//! Word timestamps in, display cues out.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  models.rs   - Cue, caption mode and timing policy              │
//! │  builder.rs  - Word-by-word and phrase cue construction         │
//! │  formats.rs  - SRT parse/export, WebVTT export                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod formats;
mod models;

pub use builder::{wrap_lines, CaptionCueBuilder, GENERATED_CAPTION_TRACK};
pub use formats::{
    check_cue_order, export_srt, export_vtt, format_srt_timestamp, parse_srt, write_srt,
    ParseError,
};
pub use models::{CaptionMode, Cue, TimingPolicy};
