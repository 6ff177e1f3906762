use thiserror::Error;

/// Failures at the crate's I/O edges: track files, config files, WAV audio.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("segment {index}: {reason}")]
    InvalidSegment { index: usize, reason: String },

    #[error("track has no segments")]
    EmptyTrack,

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("audio output: {0}")]
    AudioOutput(String),
}

/// Synthesis failures. These never leave the audio engine: they are logged
/// and turned into "no sound".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthError {
    #[error("invalid clip duration {0}s")]
    InvalidDuration(f64),

    #[error("non-finite samples while rendering {0}")]
    NonFinite(String),
}
