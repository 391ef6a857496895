//! ONNX Runtime onset/sustain model.

use crate::error::{ModelError, Result};
use crate::traits::NoteModel;
use crate::types::{ModelRepo, NUM_KEYS};
use ndarray::{Array3, ArrayView3, Ix3, s};
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::{inputs, value::Tensor};
use std::path::Path;

/// Model file names tried in order when loading from a repository.
pub const MODEL_FILES: &[&str] = &["model.onnx", "model.int8.onnx"];

/// Default number of windows per session run.
const DEFAULT_BATCH_SIZE: usize = 32;

/// Tensor names of the exported graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnnxNames {
    pub input: String,
    pub onsets: String,
    pub sustain: String,
}

impl Default for OnnxNames {
    fn default() -> Self {
        Self {
            input: "input".to_string(),
            onsets: "onsets".to_string(),
            sustain: "frames".to_string(),
        }
    }
}

/// Onset/sustain model backed by an ONNX Runtime session.
///
/// Each [`NoteModel::predict`] call is split into runs of at most
/// `batch_size` windows.
pub struct OnnxNoteModel {
    pub session: Session,
    pub names: OnnxNames,
    pub batch_size: usize,
}

impl OnnxNoteModel {
    pub fn new(session: Session, names: OnnxNames) -> Self {
        Self {
            session,
            names,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the number of windows per session run (at least one).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Load the model graph from a file.
    pub fn from_file(path: impl AsRef<Path>, session_builder: SessionBuilder) -> Result<Self> {
        let path = path.as_ref();

        let session = session_builder
            .commit_from_file(path)
            .map_err(|e| ModelError::Unavailable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(path = %path.display(), "loaded onnx model");

        Ok(Self::new(session, OnnxNames::default()))
    }

    /// Load the model graph from a model repository.
    pub fn from_repo(repo: &ModelRepo, session_builder: SessionBuilder) -> Result<Self> {
        let path = repo
            .resolve_any(MODEL_FILES)
            .map_err(|e| ModelError::Unavailable {
                path: MODEL_FILES.join(" | "),
                reason: format!("{e:#}"),
            })?;

        Self::from_file(path, session_builder)
    }

    fn run(&mut self, windows: ArrayView3<'_, f32>) -> Result<(Array3<f32>, Array3<f32>)> {
        let input = Tensor::from_array(windows.as_standard_layout().into_owned())?;

        let mut outputs = self
            .session
            .run(inputs!(self.names.input.as_str() => input))?;

        let onsets = outputs
            .remove(self.names.onsets.as_str())
            .ok_or_else(|| ModelError::MissingOutput {
                name: self.names.onsets.clone(),
            })?;

        let sustain = outputs
            .remove(self.names.sustain.as_str())
            .ok_or_else(|| ModelError::MissingOutput {
                name: self.names.sustain.clone(),
            })?;

        let onsets = onsets
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix3>()?;

        let sustain = sustain
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix3>()?;

        Ok((onsets, sustain))
    }
}

impl NoteModel for OnnxNoteModel {
    fn predict(&mut self, batch: ArrayView3<'_, f32>) -> Result<(Array3<f32>, Array3<f32>)> {
        let (num_windows, window, _) = batch.dim();

        let mut onsets = Array3::<f32>::zeros((num_windows, window, NUM_KEYS));
        let mut sustain = Array3::<f32>::zeros((num_windows, window, NUM_KEYS));

        for start in (0..num_windows).step_by(self.batch_size.max(1)) {
            let end = (start + self.batch_size.max(1)).min(num_windows);

            let (sub_onsets, sub_sustain) = self.run(batch.slice(s![start..end, .., ..]))?;

            let expected = vec![end - start, window, NUM_KEYS];
            for (name, got) in [
                (&self.names.onsets, sub_onsets.shape()),
                (&self.names.sustain, sub_sustain.shape()),
            ] {
                if got != expected.as_slice() {
                    return Err(ModelError::UnexpectedShape {
                        name: name.clone(),
                        expected,
                        got: got.to_vec(),
                    }
                    .into());
                }
            }

            onsets.slice_mut(s![start..end, .., ..]).assign(&sub_onsets);
            sustain.slice_mut(s![start..end, .., ..]).assign(&sub_sustain);

            tracing::trace!(start, end, "ran onnx batch");
        }

        Ok((onsets, sustain))
    }
}
