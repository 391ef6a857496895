//! Core traits for transcription pipeline components.

use crate::error::Result;
use ndarray::{Array3, ArrayView3};

/// Opaque onset/sustain model.
///
/// Any backend that maps a batch of context windows to per-frame key
/// probabilities can drive the pipeline.
pub trait NoteModel {
    /// Predict onset and sustain probabilities for a batch of windows.
    ///
    /// `batch` has shape `(batch, window, feature_width)`; both outputs have
    /// shape `(batch, window, NUM_KEYS)` with values in `[0, 1]`.
    ///
    /// Note: Takes `&mut self` because ONNX Runtime's Session::run requires it.
    fn predict(&mut self, batch: ArrayView3<'_, f32>) -> Result<(Array3<f32>, Array3<f32>)>;
}

impl<M: NoteModel + ?Sized> NoteModel for &mut M {
    fn predict(&mut self, batch: ArrayView3<'_, f32>) -> Result<(Array3<f32>, Array3<f32>)> {
        (**self).predict(batch)
    }
}

impl<M: NoteModel + ?Sized> NoteModel for Box<M> {
    fn predict(&mut self, batch: ArrayView3<'_, f32>) -> Result<(Array3<f32>, Array3<f32>)> {
        (**self).predict(batch)
    }
}

/// Best-effort observer for coarse pipeline progress.
///
/// Delivery is optional: the pipeline never depends on a listener being
/// present or on what it does with an update. Percentages passed to one
/// listener never decrease.
pub trait ProgressListener {
    fn on_progress(&self, percent: u8, message: &str);
}

impl<F> ProgressListener for F
where
    F: Fn(u8, &str),
{
    fn on_progress(&self, percent: u8, message: &str) {
        self(percent, message)
    }
}

/// Listener that drops every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct Silent;

impl ProgressListener for Silent {
    fn on_progress(&self, _percent: u8, _message: &str) {}
}
