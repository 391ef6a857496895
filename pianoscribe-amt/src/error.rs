//! Error types for pianoscribe-amt organized by processing stage.

use ndarray::ShapeError;
use ndarray_stats::errors::MinMaxError;
use thiserror::Error;

/// Transcription pipeline error variants organized by processing stage.
///
/// Every variant is fatal to the transcription that raised it. Nothing is
/// retried and no partial result is returned.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration stage error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Audio decoding and conditioning stage error
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// The signal is too short to produce a single feature frame
    #[error("audio produced no feature frames")]
    EmptyAudio,

    /// Model loading or inference stage error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Piano roll and timestamp lengths disagree
    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Configuration errors (profiles, chunking, model location).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Chunk size must be at least one frame
    #[error("invalid chunk size: {0} frames (minimum 1)")]
    InvalidChunkSize(usize),

    /// Context window must hold at least one frame
    #[error("invalid context window: {0} frames (minimum 1)")]
    InvalidWindow(usize),

    /// Mel band edges outside of the representable range
    #[error("invalid mel range: {f_min}Hz..{f_max}Hz at {sample_rate}Hz")]
    InvalidMelRange {
        f_min: f32,
        f_max: f32,
        sample_rate: u32,
    },

    /// Filter cutoff must lie strictly between 0 and Nyquist
    #[error("invalid filter cutoff: {cutoff}Hz (nyquist {nyquist}Hz)")]
    InvalidCutoff { cutoff: f32, nyquist: f32 },

    /// Key range maps past the highest MIDI pitch
    #[error("pitch range {lowest}..={highest} exceeds MIDI 127")]
    InvalidPitchRange { lowest: u8, highest: usize },
}

/// Audio loading, decoding and resampling errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Channel count validation failed
    #[error("invalid channel count: {0}")]
    InvalidChannels(usize),

    /// Sample rate reported as zero or missing
    #[error("invalid sample rate: {0}Hz")]
    InvalidSampleRate(u32),

    /// Decoded samples contain NaN or infinity
    #[error("non-finite sample at index {0}")]
    NonFiniteSample(usize),

    /// Container has no track that can be decoded
    #[error("no decodable audio track")]
    NoTrack,

    /// IO error during audio loading
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// WAV file format error
    #[error(transparent)]
    Hound(#[from] hound::Error),

    /// Compressed container or codec error
    #[error(transparent)]
    Symphonia(#[from] symphonia::core::errors::Error),

    /// Resampler could not be constructed
    #[error(transparent)]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    /// Resampler failed while processing
    #[error(transparent)]
    Resample(#[from] rubato::ResampleError),
}

/// Model loading and inference errors (ONNX, ndarray operations).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Model artifact missing or could not be loaded
    #[error("model unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },

    /// Missing expected output tensor
    #[error("missing model output: {name}")]
    MissingOutput { name: String },

    /// Output tensor has the wrong shape
    #[error("unexpected {name} shape: expected {expected:?}, got {got:?}")]
    UnexpectedShape {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// ONNX Runtime error
    #[error(transparent)]
    Ort(#[from] ort::Error),

    /// ndarray shape error
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// ndarray-stats min/max error
    #[error(transparent)]
    MinMax(#[from] MinMaxError),
}

/// Result type alias for pianoscribe-amt operations.
pub type Result<T> = std::result::Result<T, Error>;

// Nested From implementations for automatic error conversion chains

// hound::Error → AudioError → Error
impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::Audio(AudioError::Hound(e))
    }
}

// std::io::Error → AudioError → Error
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Audio(AudioError::Io(e))
    }
}

// symphonia Error → AudioError → Error
impl From<symphonia::core::errors::Error> for Error {
    fn from(e: symphonia::core::errors::Error) -> Self {
        Error::Audio(AudioError::Symphonia(e))
    }
}

// rubato errors → AudioError → Error
impl From<rubato::ResamplerConstructionError> for Error {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        Error::Audio(AudioError::ResamplerConstruction(e))
    }
}

impl From<rubato::ResampleError> for Error {
    fn from(e: rubato::ResampleError) -> Self {
        Error::Audio(AudioError::Resample(e))
    }
}

// ort::Error → ModelError → Error
impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Error::Model(ModelError::Ort(e))
    }
}

// ShapeError → ModelError → Error
impl From<ShapeError> for Error {
    fn from(e: ShapeError) -> Self {
        Error::Model(ModelError::Shape(e))
    }
}

// MinMaxError → ModelError → Error
impl From<MinMaxError> for Error {
    fn from(e: MinMaxError) -> Self {
        Error::Model(ModelError::MinMax(e))
    }
}
