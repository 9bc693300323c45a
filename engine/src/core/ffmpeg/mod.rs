//! FFmpeg Integration Module
//!
//! Locates the system FFmpeg installation and wraps the handful of
//! invocations the engine needs: probing media, extracting speech audio
//! and running the final composition render.

mod detection;
mod runner;

pub use detection::*;
pub use runner::{new_command, FFmpegRunner, MediaInfo};

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg or set render.ffmpegPath in settings.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;
