//! Clipweave Core Engine
//!
//! Timeline model, transcription, captions, overlay resolution,
//! rendering and the export pipeline.

pub mod captions;
pub mod ffmpeg;
pub mod fs;
pub mod jobs;
pub mod media;
pub mod pipeline;
pub mod project;
pub mod render;
pub mod resolver;
pub mod settings;
pub mod timeline;
pub mod transcription;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
