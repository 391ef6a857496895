//! Windowed inference over long feature sequences.
//!
//! Every frame is predicted from a fixed-length context window centered on
//! it. Windows are built and evaluated one chunk at a time so only a single
//! chunk's window tensor is alive at any point.

use crate::chunk::ChunkConfig;
use crate::error::{ConfigError, ModelError, Result};
use crate::features::FeatureMatrix;
use crate::traits::NoteModel;
use crate::types::{NUM_KEYS, PianoRoll, ProbabilityRoll};
use ndarray::{Array2, Array3, Axis, s};
use ndarray_stats::QuantileExt;

/// Default context window length in frames.
const DEFAULT_WINDOW: usize = 100;

/// Onset and sustain binarization thresholds (`p > threshold`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub onset: f32,
    pub sustain: f32,
}

impl Thresholds {
    /// Thresholds tuned for the mel + derivatives model.
    pub const MEL_DELTA: Self = Self {
        onset: 0.35,
        sustain: 0.40,
    };

    /// Thresholds tuned for the plain mel model.
    pub const MEL_BASE: Self = Self {
        onset: 0.15,
        sustain: 0.30,
    };
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::MEL_DELTA
    }
}

/// Context window and binarization parameters of a trained model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowConfig {
    /// Frames per context window
    pub length: usize,
    pub thresholds: Thresholds,
}

impl WindowConfig {
    pub const MEL_DELTA: Self = Self {
        length: DEFAULT_WINDOW,
        thresholds: Thresholds::MEL_DELTA,
    };

    pub const MEL_BASE: Self = Self {
        length: DEFAULT_WINDOW,
        thresholds: Thresholds::MEL_BASE,
    };

    /// Index of the predicted frame inside a window (`length / 2`).
    pub fn center(&self) -> usize {
        self.length / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(ConfigError::InvalidWindow(self.length).into());
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::MEL_DELTA
    }
}

/// Sliding-window inference engine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindowedInference {
    pub window: WindowConfig,
    pub chunk: ChunkConfig,
}

impl WindowedInference {
    pub fn new(window: WindowConfig, chunk: ChunkConfig) -> Self {
        Self { window, chunk }
    }

    /// Run the model over every frame and binarize the result.
    pub fn infer<M: NoteModel>(
        &self,
        model: &mut M,
        features: &FeatureMatrix,
        on_chunk: impl FnMut(usize, usize, &str),
    ) -> Result<PianoRoll> {
        let probs = self.predict(model, features, on_chunk)?;
        let thresholds = self.window.thresholds;
        let roll = probs.binarize(thresholds.onset, thresholds.sustain);

        tracing::debug!(
            onsets = roll.onsets.iter().filter(|&&b| b).count(),
            sustained = roll.sustain.iter().filter(|&&b| b).count(),
            "binarized rolls"
        );

        Ok(roll)
    }

    /// Run the model over every frame, returning raw center-frame probabilities.
    ///
    /// `on_chunk(completed, total, message)` is called after each chunk.
    ///
    /// # Errors
    ///
    /// Any model failure aborts the whole run; no partial roll is returned.
    pub fn predict<M: NoteModel>(
        &self,
        model: &mut M,
        features: &FeatureMatrix,
        mut on_chunk: impl FnMut(usize, usize, &str),
    ) -> Result<ProbabilityRoll> {
        self.window.validate()?;
        self.chunk.validate()?;

        let num_frames = features.num_frames();
        let width = features.width();
        let half = self.window.center();

        let padded = self.pad(features)?;

        let mut onsets = Array2::<f32>::zeros((num_frames, NUM_KEYS));
        let mut sustain = Array2::<f32>::zeros((num_frames, NUM_KEYS));

        let total = self.chunk.chunk_count(num_frames);

        for (i, range) in self.chunk.iter_ranges(num_frames).enumerate() {
            tracing::debug!(chunk = i + 1, total, frames = range.len(), "running chunk");

            let mut batch = Array3::<f32>::zeros((range.len(), self.window.length, width));
            for (row, t) in range.clone().enumerate() {
                batch
                    .index_axis_mut(Axis(0), row)
                    .assign(&padded.slice(s![t..t + self.window.length, ..]));
            }

            let (chunk_onsets, chunk_sustain) = model.predict(batch.view())?;
            drop(batch);

            let expected = [range.len(), self.window.length, NUM_KEYS];
            check_shape("onsets", chunk_onsets.shape(), &expected)?;
            check_shape("sustain", chunk_sustain.shape(), &expected)?;

            onsets
                .slice_mut(s![range.clone(), ..])
                .assign(&chunk_onsets.index_axis(Axis(1), half));
            sustain
                .slice_mut(s![range, ..])
                .assign(&chunk_sustain.index_axis(Axis(1), half));

            on_chunk(i + 1, total, &format!("processing chunk {}/{}", i + 1, total));
        }

        Ok(ProbabilityRoll { onsets, sustain })
    }

    /// Pad both ends with `center()` frames holding the matrix minimum.
    fn pad(&self, features: &FeatureMatrix) -> Result<Array2<f32>> {
        let half = self.window.center();
        let values = features.features();
        let floor = *values.min()?;

        let mut padded = Array2::from_elem((values.nrows() + 2 * half, values.ncols()), floor);
        padded
            .slice_mut(s![half..half + values.nrows(), ..])
            .assign(&values);

        Ok(padded)
    }
}

fn check_shape(name: &str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(ModelError::UnexpectedShape {
            name: name.to_string(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
        .into());
    }
    Ok(())
}
