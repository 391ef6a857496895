//! pianoscribe-amt: offline automatic piano transcription.
//!
//! Turns a piano recording into note events in four forward-only stages:
//!
//! 1. [`audio`]: decode, resample, downmix, peak-normalize and low-pass
//! 2. [`features`]: log-mel spectrogram with optional time derivatives
//! 3. [`inference`]: chunked sliding-window inference with an opaque
//!    [`traits::NoteModel`], binarized into onset and sustain rolls
//! 4. [`decode`]: per-key state machine turning rolls into [`types::NoteEvent`]s
//!
//! # Quick Start
//!
//! ```ignore
//! use pianoscribe_amt::pipelines::{ModelProfile, PianoTranscriber};
//! use pianoscribe_amt::traits::Silent;
//! use pianoscribe_amt::types::ModelRepo;
//! use ort::session::Session;
//!
//! let repo = ModelRepo::Path("model_dir".into());
//! let mut transcriber =
//!     PianoTranscriber::from_repo(&repo, Session::builder()?, ModelProfile::MEL_DELTA)?;
//!
//! let result = transcriber.transcribe_file("recording.wav", &Silent)?;
//! println!("{} notes", result.summary.note_count);
//! ```

pub mod audio;
pub mod chunk;
pub mod decode;
pub mod error;
pub mod features;
pub mod filter;
pub mod inference;
pub mod models;
pub mod pipelines;
pub mod tasks;
pub mod traits;
pub mod types;
