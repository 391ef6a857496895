//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Result;
use pianoscribe_amt::chunk::ChunkConfig;
use pianoscribe_amt::pipelines::ModelProfile;

#[derive(Debug, Parser)]
#[command(name = "pscribe")]
#[command(about = "Transcribe piano recordings to MIDI")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Transcribe one recording to a MIDI file
    Run(crate::run::Args),

    /// Transcribe several recordings concurrently
    Batch(crate::batch::Args),
}

/// Where to load the model from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ModelSource {
    /// Local directory if it exists, otherwise HuggingFace Hub
    #[default]
    Auto,
    /// Local directory
    Path,
    /// HuggingFace cache only
    Cache,
    /// HuggingFace Hub download
    Api,
}

/// Model location arguments.
#[derive(clap::Args, Debug)]
pub struct ModelArgs {
    /// Model directory or HuggingFace repository id containing model.onnx
    #[arg(short, long = "model")]
    pub model_id: String,

    #[arg(long, value_enum, default_value_t = ModelSource::Auto)]
    pub model_source: ModelSource,
}

/// Parameter set the model was trained with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProfileArg {
    /// 384 features: mel + first/second derivatives
    #[default]
    MelDelta,
    /// 128 features: plain mel in dB
    MelBase,
}

impl From<ProfileArg> for ModelProfile {
    fn from(profile: ProfileArg) -> Self {
        match profile {
            ProfileArg::MelDelta => ModelProfile::MEL_DELTA,
            ProfileArg::MelBase => ModelProfile::MEL_BASE,
        }
    }
}

/// Transcription tuning shared by all commands.
#[derive(clap::Args, Debug)]
pub struct TranscribeArgs {
    #[arg(long, value_enum, default_value_t = ProfileArg::MelDelta)]
    pub profile: ProfileArg,

    #[command(flatten)]
    pub chunk_config: ChunkConfig,

    /// Override the profile's onset threshold
    #[arg(long)]
    pub onset_threshold: Option<f32>,

    /// Override the profile's sustain threshold
    #[arg(long)]
    pub sustain_threshold: Option<f32>,

    /// Override the minimum note length in frames
    #[arg(long)]
    pub min_note_frames: Option<usize>,

    /// Override the note velocity
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=127))]
    pub velocity: Option<u8>,
}

/// Execute CLI command - separated for testing.
pub fn run_cli(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Run(args) => crate::run::execute(args.try_into()?),
        Commands::Batch(args) => crate::batch::execute(args.try_into()?),
    }
}
