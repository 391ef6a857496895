//! High-level transcription pipeline.

use crate::audio::{self, AudioSignal, SignalConfig};
use crate::chunk::ChunkConfig;
use crate::decode::DecoderConfig;
use crate::error::Result;
use crate::features::MelSpectrogram;
use crate::inference::{WindowConfig, WindowedInference};
use crate::models::OnnxNoteModel;
use crate::traits::{NoteModel, ProgressListener};
use crate::types::{ModelRepo, TranscriptionResult, TranscriptionSummary};
use ort::session::builder::SessionBuilder;
use std::path::Path;

/// Progress reported once inference starts.
const INFERENCE_START: u8 = 30;

/// Progress reported once the last chunk finishes.
const INFERENCE_END: u8 = 85;

/// One coherent set of parameters a model was trained with.
///
/// Parameters of different profiles must never be mixed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelProfile {
    pub signal: SignalConfig,
    pub mel: MelSpectrogram,
    pub window: WindowConfig,
    pub decoder: DecoderConfig,
}

impl ModelProfile {
    /// Mel + first/second derivatives, scaled features.
    pub const MEL_DELTA: Self = Self {
        signal: SignalConfig::PIANO,
        mel: MelSpectrogram::MEL_DELTA,
        window: WindowConfig::MEL_DELTA,
        decoder: DecoderConfig::PIANO,
    };

    /// Plain mel in dB.
    pub const MEL_BASE: Self = Self {
        signal: SignalConfig::MEL_BASE,
        mel: MelSpectrogram::MEL_BASE,
        window: WindowConfig::MEL_BASE,
        decoder: DecoderConfig::PIANO,
    };
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::MEL_DELTA
    }
}

/// Audio to notes: conditioning, features, windowed inference, decoding.
///
/// Every call is independent; nothing is cached between transcriptions.
pub struct PianoTranscriber<M> {
    pub profile: ModelProfile,
    pub chunk: ChunkConfig,
    pub model: M,
}

impl PianoTranscriber<OnnxNoteModel> {
    /// Load the ONNX model from a model repository.
    pub fn from_repo(
        repo: &ModelRepo,
        session_builder: SessionBuilder,
        profile: ModelProfile,
    ) -> Result<Self> {
        let model = OnnxNoteModel::from_repo(repo, session_builder)?;
        Ok(Self::new(model, profile))
    }
}

impl<M: NoteModel> PianoTranscriber<M> {
    pub fn new(model: M, profile: ModelProfile) -> Self {
        Self {
            profile,
            chunk: ChunkConfig::default(),
            model,
        }
    }

    pub fn with_chunk(mut self, chunk: ChunkConfig) -> Self {
        self.chunk = chunk;
        self
    }

    /// Transcribe an audio file.
    ///
    /// # Errors
    ///
    /// Fails on undecodable or empty audio and on any model error. A result
    /// with no notes is a success.
    pub fn transcribe_file(
        &mut self,
        path: impl AsRef<Path>,
        progress: &dyn ProgressListener,
    ) -> Result<TranscriptionResult> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "transcribing");

        progress.on_progress(10, "loading audio");
        let signal = audio::condition(path, &self.profile.signal)?;

        self.transcribe_signal(&signal, progress)
    }

    /// Transcribe in-memory mono samples recorded at `sample_rate`.
    pub fn transcribe_samples(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        progress: &dyn ProgressListener,
    ) -> Result<TranscriptionResult> {
        progress.on_progress(10, "conditioning audio");
        let signal = audio::condition_samples(samples, sample_rate, &self.profile.signal)?;

        self.transcribe_signal(&signal, progress)
    }

    /// Transcribe an already conditioned signal.
    pub fn transcribe_signal(
        &mut self,
        signal: &AudioSignal,
        progress: &dyn ProgressListener,
    ) -> Result<TranscriptionResult> {
        progress.on_progress(20, "extracting features");
        let features = self.profile.mel.apply(signal)?;

        tracing::info!(
            frames = features.num_frames(),
            duration = features.duration_secs(),
            "extracted features"
        );

        progress.on_progress(INFERENCE_START, "running inference");
        let engine = WindowedInference::new(self.profile.window, self.chunk);
        let roll = engine.infer(&mut self.model, &features, |done, total, message| {
            progress.on_progress(chunk_percent(done, total), message);
        })?;

        progress.on_progress(90, "decoding notes");
        let notes = self
            .profile
            .decoder
            .decode(&roll, features.timestamps(), features.hop_secs())?;

        let summary = TranscriptionSummary {
            total_frames: features.num_frames(),
            duration_secs: features.duration_secs(),
            note_count: notes.len(),
        };

        tracing::info!(notes = summary.note_count, "transcription finished");
        progress.on_progress(100, "done");

        Ok(TranscriptionResult { notes, summary })
    }
}

/// Map chunk completion linearly onto the inference share of progress.
fn chunk_percent(done: usize, total: usize) -> u8 {
    let span = (INFERENCE_END - INFERENCE_START) as usize;
    INFERENCE_START + (span * done / total.max(1)).min(span) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::error::{Error, ModelError};
    use crate::traits::Silent;
    use crate::types::NUM_KEYS;
    use ndarray::{Array3, ArrayView3, s};
    use std::cell::RefCell;

    /// Key of middle C (MIDI 60).
    const MIDDLE_C: usize = 39;

    /// Scaled log-mel level of -15dB relative to the loudest bin.
    const LOUD: f32 = 1.0 - 15.0 / 80.0;

    /// Treats a frame as sounding middle C when any base mel band is loud.
    /// Sustain follows loudness at the window center, onsets fire on the
    /// first loud frame.
    struct LoudnessModel;

    impl LoudnessModel {
        fn loud(batch: &ArrayView3<'_, f32>, b: usize, p: usize) -> bool {
            batch
                .slice(s![b, p, ..128])
                .iter()
                .any(|&x| x > LOUD)
        }
    }

    impl NoteModel for LoudnessModel {
        fn predict(&mut self, batch: ArrayView3<'_, f32>) -> Result<(Array3<f32>, Array3<f32>)> {
            let (n, w, _) = batch.dim();
            let c = w / 2;
            let mut onsets = Array3::zeros((n, w, NUM_KEYS));
            let mut sustain = Array3::zeros((n, w, NUM_KEYS));

            for b in 0..n {
                let now = Self::loud(&batch, b, c);
                let before = Self::loud(&batch, b, c - 1);
                if now {
                    sustain[[b, c, MIDDLE_C]] = 1.0;
                }
                if now && !before {
                    onsets[[b, c, MIDDLE_C]] = 1.0;
                }
            }

            Ok((onsets, sustain))
        }
    }

    struct BrokenModel;

    impl NoteModel for BrokenModel {
        fn predict(&mut self, _batch: ArrayView3<'_, f32>) -> Result<(Array3<f32>, Array3<f32>)> {
            Err(ModelError::MissingOutput {
                name: "onsets".to_string(),
            }
            .into())
        }
    }

    /// Two seconds of silence with a 200ms middle C burst at 0.8s.
    fn burst_signal() -> Vec<f32> {
        let sr = SAMPLE_RATE as f32;
        let (start, end) = ((0.8 * sr) as usize, (1.0 * sr) as usize);
        (0..2 * SAMPLE_RATE as usize)
            .map(|i| {
                if (start..end).contains(&i) {
                    0.5 * (2.0 * std::f32::consts::PI * 261.63 * i as f32 / sr).sin()
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn burst_decodes_to_single_middle_c() {
        let mut transcriber = PianoTranscriber::new(LoudnessModel, ModelProfile::MEL_DELTA);
        let hop = ModelProfile::MEL_DELTA.mel.hop_secs();

        let result = transcriber
            .transcribe_samples(burst_signal(), SAMPLE_RATE, &Silent)
            .unwrap();

        assert_eq!(result.notes.len(), 1);
        let note = result.notes[0];
        assert_eq!(note.pitch, 60);
        assert_eq!(note.velocity, 80);
        assert!((note.start - 0.8).abs() < hop, "start {}", note.start);
        assert!((note.end - 1.0).abs() < hop, "end {}", note.end);

        assert_eq!(result.summary.note_count, 1);
        assert_eq!(result.summary.total_frames, 1 + 2 * SAMPLE_RATE as usize / 512);
    }

    #[test]
    fn chunk_size_does_not_change_notes() {
        let whole = PianoTranscriber::new(LoudnessModel, ModelProfile::MEL_DELTA)
            .transcribe_samples(burst_signal(), SAMPLE_RATE, &Silent)
            .unwrap();
        let chunked = PianoTranscriber::new(LoudnessModel, ModelProfile::MEL_DELTA)
            .with_chunk(ChunkConfig::new(7))
            .transcribe_samples(burst_signal(), SAMPLE_RATE, &Silent)
            .unwrap();

        assert_eq!(whole, chunked);
    }

    #[test]
    fn silence_is_successful_empty_result() {
        let mut transcriber = PianoTranscriber::new(LoudnessModel, ModelProfile::MEL_BASE);

        let result = transcriber
            .transcribe_samples(vec![0.0; SAMPLE_RATE as usize], SAMPLE_RATE, &Silent)
            .unwrap();

        assert!(result.notes.is_empty());
        assert_eq!(result.summary.note_count, 0);
        assert_eq!(result.summary.total_frames, 1 + SAMPLE_RATE as usize / 512);
    }

    #[test]
    fn empty_audio_fails() {
        let mut transcriber = PianoTranscriber::new(LoudnessModel, ModelProfile::MEL_DELTA);

        let result = transcriber.transcribe_samples(Vec::new(), SAMPLE_RATE, &Silent);

        assert!(matches!(result, Err(Error::EmptyAudio)));
    }

    #[test]
    fn model_errors_propagate() {
        let mut transcriber = PianoTranscriber::new(BrokenModel, ModelProfile::MEL_DELTA);

        let result = transcriber.transcribe_samples(burst_signal(), SAMPLE_RATE, &Silent);

        assert!(matches!(result, Err(Error::Model(_))));
    }

    #[test]
    fn progress_is_monotonic_and_complete() {
        let seen = RefCell::new(Vec::new());
        let listener = |percent: u8, _message: &str| seen.borrow_mut().push(percent);

        PianoTranscriber::new(LoudnessModel, ModelProfile::MEL_DELTA)
            .with_chunk(ChunkConfig::new(20))
            .transcribe_samples(burst_signal(), SAMPLE_RATE, &listener)
            .unwrap();

        let seen = seen.into_inner();
        assert_eq!(seen.first(), Some(&10));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.contains(&INFERENCE_END));
    }

    #[test]
    fn chunk_percent_spans_inference_share() {
        assert_eq!(chunk_percent(0, 4), 30);
        assert_eq!(chunk_percent(2, 4), 57);
        assert_eq!(chunk_percent(4, 4), 85);
        assert_eq!(chunk_percent(1, 0), 85);
    }

    #[test]
    fn profiles_are_distinct() {
        let delta = ModelProfile::MEL_DELTA;
        let base = ModelProfile::MEL_BASE;

        assert_eq!(delta.mel.feature_width(), 384);
        assert_eq!(base.mel.feature_width(), 128);
        assert_eq!(delta.window.thresholds.onset, 0.35);
        assert_eq!(base.window.thresholds.sustain, 0.30);
        assert_eq!(delta.decoder.min_note_frames, 5);
        assert_eq!(ModelProfile::default(), delta);
    }

    #[test]
    fn filter_cutoff_matches_mel_ceiling() {
        for profile in [ModelProfile::MEL_DELTA, ModelProfile::MEL_BASE] {
            assert_eq!(profile.signal.cutoff_hz, profile.mel.f_max);
        }
    }
}
