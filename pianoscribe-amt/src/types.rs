//! Core types for pianoscribe-amt

use crate::error::{Error, Result};
use eyre::{OptionExt, WrapErr};
use hf_hub::CacheRepo;
use hf_hub::api::sync::ApiRepo;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Number of piano keys predicted per frame.
pub const NUM_KEYS: usize = 88;

/// MIDI number of the lowest piano key (A0).
pub const LOWEST_PITCH: u8 = 21;

/// A decoded note.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI pitch
    pub pitch: u8,
    /// Start time in seconds
    pub start: f32,
    /// End time in seconds, strictly after `start`
    pub end: f32,
    /// MIDI velocity
    pub velocity: u8,
}

impl NoteEvent {
    pub fn new(pitch: u8, start: f32, end: f32, velocity: u8) -> Self {
        Self {
            pitch,
            start,
            end,
            velocity,
        }
    }

    pub fn duration(&self) -> f32 {
        self.end - self.start
    }
}

/// Summary metrics of a transcription.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSummary {
    pub total_frames: usize,
    /// Timestamp of the last frame in seconds
    pub duration_secs: f32,
    pub note_count: usize,
}

/// Notes in decoding order (grouped by pitch, not sorted by time) plus summary.
///
/// An empty note list is a successful transcription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub notes: Vec<NoteEvent>,
    pub summary: TranscriptionSummary,
}

/// Framewise onset and sustain probabilities `(frames, NUM_KEYS)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityRoll {
    pub onsets: Array2<f32>,
    pub sustain: Array2<f32>,
}

impl ProbabilityRoll {
    pub fn num_frames(&self) -> usize {
        self.onsets.nrows()
    }

    /// Threshold both rolls independently (`p > threshold`).
    pub fn binarize(&self, onset_threshold: f32, sustain_threshold: f32) -> PianoRoll {
        PianoRoll {
            onsets: self.onsets.mapv(|p| p > onset_threshold),
            sustain: self.sustain.mapv(|p| p > sustain_threshold),
        }
    }
}

/// Binarized onset and sustain rolls `(frames, keys)`.
#[derive(Clone, Debug, PartialEq)]
pub struct PianoRoll {
    pub onsets: Array2<bool>,
    pub sustain: Array2<bool>,
}

impl PianoRoll {
    /// Pair two rolls, checking that their shapes agree.
    pub fn new(onsets: Array2<bool>, sustain: Array2<bool>) -> Result<Self> {
        if onsets.dim() != sustain.dim() {
            return Err(Error::ShapeMismatch {
                what: "onset/sustain rolls",
                expected: onsets.len(),
                got: sustain.len(),
            });
        }
        Ok(Self { onsets, sustain })
    }

    pub fn num_frames(&self) -> usize {
        self.onsets.nrows()
    }

    pub fn num_keys(&self) -> usize {
        self.onsets.ncols()
    }
}

/// Model repository sources.
#[derive(Debug)]
pub enum ModelRepo {
    /// Local filesystem path
    Path(PathBuf),
    /// HuggingFace cache repository
    Cache(CacheRepo),
    /// HuggingFace API repository
    Api(ApiRepo),
}

impl ModelRepo {
    /// Resolve a file name to its full path in this repository.
    pub fn resolve(&self, file_name: &str) -> eyre::Result<PathBuf> {
        match self {
            ModelRepo::Path(path) => path
                .join(file_name)
                .canonicalize()
                .wrap_err(format!("failed to resolve model: {file_name}")),
            ModelRepo::Cache(cache_repo) => cache_repo
                .get(file_name)
                .ok_or_eyre(format!("model not found in cache: {file_name}")),
            ModelRepo::Api(api_repo) => api_repo
                .get(file_name)
                .wrap_err(format!("failed to download from api: {file_name}")),
        }
    }

    /// Try resolving multiple file names, return first successful match.
    pub fn resolve_any(&self, candidates: &[&str]) -> eyre::Result<PathBuf> {
        candidates
            .iter()
            .find_map(|name| self.resolve(name).ok())
            .ok_or_eyre("no model found from candidates")
    }
}
