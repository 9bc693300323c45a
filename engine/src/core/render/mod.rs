//! Render Module
//!
//! Export settings, the composition plan built for each export, and the
//! backends that turn a plan into a media file.
//!
//! # Modules
//!
//! - `export`: Export settings and FFmpeg progress parsing
//! - `plan`: Composition plan construction
//! - `backend`: Render backend trait and the FFmpeg implementation

mod backend;
mod export;
mod plan;

pub use backend::{
    build_render_args, FFmpegRenderBackend, RenderBackend, RenderOutput, DEFAULT_STATS_PERIOD,
};
pub use export::*;
pub use plan::{
    check_media_references, AudioSegment, BaseSegment, CompositionPlan, ImagePlacement,
    VideoSegment,
};
