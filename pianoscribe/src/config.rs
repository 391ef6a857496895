//! Configuration types for resolved CLI arguments.
//!
//! This module contains Config structs and their TryFrom implementations.
//! Args structs (for CLI parsing) remain in cli.rs.

use crate::cli::{ModelArgs, ModelSource, TranscribeArgs};
use eyre::{Result, WrapErr, ensure};
use hf_hub::Cache;
use hf_hub::api::sync::Api;
use pianoscribe_amt::chunk::ChunkConfig;
use pianoscribe_amt::models::OnnxNoteModel;
use pianoscribe_amt::pipelines::{ModelProfile, PianoTranscriber};
use pianoscribe_amt::types::ModelRepo;
#[allow(unused_imports)]
use ort::execution_providers::*;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Resolved model configuration.
///
/// Converted from ModelArgs via TryFrom.
/// Contains the ModelRepo enum ready for use.
#[derive(Debug)]
pub struct ModelConfig {
    pub repo: ModelRepo,
}

impl TryFrom<ModelArgs> for ModelConfig {
    type Error = eyre::Error;

    fn try_from(args: ModelArgs) -> Result<Self> {
        let repo = match args.model_source {
            ModelSource::Auto => {
                let path = PathBuf::from(&args.model_id);
                if path.is_dir() {
                    ModelRepo::Path(path)
                } else {
                    let api = Api::new()?;
                    ModelRepo::Api(api.model(args.model_id))
                }
            }
            ModelSource::Path => ModelRepo::Path(PathBuf::from(args.model_id)),
            ModelSource::Cache => ModelRepo::Cache(Cache::from_env().model(args.model_id)),
            ModelSource::Api => ModelRepo::Api(Api::new()?.model(args.model_id)),
        };

        Ok(Self { repo })
    }
}

/// Resolved transcription parameters: a profile with overrides applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TranscribeConfig {
    pub profile: ModelProfile,
    pub chunk_config: ChunkConfig,
}

impl TryFrom<TranscribeArgs> for TranscribeConfig {
    type Error = eyre::Error;

    fn try_from(args: TranscribeArgs) -> Result<Self> {
        let mut profile = ModelProfile::from(args.profile);

        if let Some(onset) = args.onset_threshold {
            ensure!((0.0..=1.0).contains(&onset), "onset threshold {onset} outside 0..=1");
            profile.window.thresholds.onset = onset;
        }
        if let Some(sustain) = args.sustain_threshold {
            ensure!(
                (0.0..=1.0).contains(&sustain),
                "sustain threshold {sustain} outside 0..=1"
            );
            profile.window.thresholds.sustain = sustain;
        }
        if let Some(frames) = args.min_note_frames {
            profile.decoder.min_note_frames = frames;
        }
        if let Some(velocity) = args.velocity {
            profile.decoder.velocity = velocity;
        }

        args.chunk_config
            .validate()
            .wrap_err("invalid --chunk-frames")?;

        Ok(Self {
            profile,
            chunk_config: args.chunk_config,
        })
    }
}

/// Build a session builder with execution providers configured by Cargo features.
///
/// The first available provider is used; CPU is always available as fallback.
///
/// # Execution Providers
///
/// Enabled via Cargo features:
/// - `cuda` - NVIDIA CUDA
/// - `tensorrt` - NVIDIA TensorRT
/// - `openvino` - Intel OpenVINO
/// - `directml` - DirectML (Windows)
/// - `coreml` - CoreML (macOS)
pub fn session_builder() -> Result<SessionBuilder> {
    let builder = Session::builder()?.with_execution_providers([
        #[cfg(feature = "cuda")]
        CUDAExecutionProvider::default().build(),
        #[cfg(feature = "tensorrt")]
        TensorRTExecutionProvider::default().build(),
        #[cfg(feature = "openvino")]
        OpenVINOExecutionProvider::default()
            .with_device_type("HETERO:GPU,CPU")
            .with_cache_dir(".cache/ort")
            .build(),
        #[cfg(feature = "directml")]
        DirectMLExecutionProvider::default().build(),
        #[cfg(feature = "coreml")]
        CoreMLExecutionProvider::default().build(),
    ])?;

    Ok(builder)
}

/// Load the model and wrap it in a transcriber.
pub fn load_transcriber(
    model: &ModelConfig,
    config: &TranscribeConfig,
) -> Result<PianoTranscriber<OnnxNoteModel>> {
    tracing::info!(repo = ?model.repo, "loading model");

    let s = Instant::now();

    let transcriber = PianoTranscriber::from_repo(&model.repo, session_builder()?, config.profile)
        .wrap_err("failed to load model")?
        .with_chunk(config.chunk_config);

    tracing::info!(duration = %format_secs(s.elapsed().as_secs_f32()), "model loaded");

    Ok(transcriber)
}

/// Load the model from an already resolved file and wrap it in a transcriber.
pub fn load_transcriber_from_file(
    path: &Path,
    config: &TranscribeConfig,
) -> Result<PianoTranscriber<OnnxNoteModel>> {
    let s = Instant::now();

    let model = OnnxNoteModel::from_file(path, session_builder()?)
        .wrap_err_with(|| format!("failed to load model: {:?}", path.display()))?;
    let transcriber = PianoTranscriber::new(model, config.profile).with_chunk(config.chunk_config);

    tracing::info!(duration = %format_secs(s.elapsed().as_secs_f32()), "model loaded");

    Ok(transcriber)
}

/// Format seconds as a string with two decimal places.
pub fn format_secs(secs: f32) -> String {
    format!("{:.2}s", secs)
}
