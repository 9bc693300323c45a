//! Speech audio loading.
//!
//! Backends expect 16 kHz mono PCM, produced by
//! [`FFmpegRunner::extract_speech_audio`](crate::core::ffmpeg::FFmpegRunner::extract_speech_audio).

use std::path::Path;

use thiserror::Error;

/// Sample rate required by speech models
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;

/// Errors that can occur while reading speech audio
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to open WAV file {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Expected 16kHz sample rate, got {0} Hz")]
    SampleRate(u32),

    #[error("Expected mono audio, got {0} channels")]
    Channels(u16),

    #[error("Unsupported bit depth: {0}")]
    BitDepth(u16),
}

pub type AudioResult<T> = Result<T, AudioError>;

/// Returns true when the file is already in the speech WAV layout
pub fn is_speech_wav(path: &Path) -> bool {
    hound::WavReader::open(path)
        .map(|reader| {
            let spec = reader.spec();
            spec.sample_rate == SPEECH_SAMPLE_RATE && spec.channels == 1
        })
        .unwrap_or(false)
}

/// Loads samples from a 16 kHz mono WAV file as f32 in [-1.0, 1.0].
pub fn load_audio_samples(wav_path: &Path) -> AudioResult<Vec<f32>> {
    let reader = hound::WavReader::open(wav_path).map_err(|e| AudioError::Open {
        path: wav_path.to_string_lossy().to_string(),
        reason: e.to_string(),
    })?;

    let spec = reader.spec();
    if spec.sample_rate != SPEECH_SAMPLE_RATE {
        return Err(AudioError::SampleRate(spec.sample_rate));
    }
    if spec.channels != 1 {
        return Err(AudioError::Channels(spec.channels));
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (hound::SampleFormat::Int, 32) => reader
            .into_samples::<i32>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / 2147483648.0)
            .collect(),
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .filter_map(Result::ok)
            .map(|s| s.clamp(-1.0, 1.0))
            .collect(),
        (_, bits) => return Err(AudioError::BitDepth(bits)),
    };

    Ok(samples)
}

/// Duration in seconds of a speech sample buffer
pub fn samples_duration_sec(samples: &[f32]) -> f64 {
    samples.len() as f64 / SPEECH_SAMPLE_RATE as f64
}
