//! Run subcommand - transcribe one recording to MIDI.

use crate::cli::{ModelArgs, TranscribeArgs};
use crate::config::{ModelConfig, TranscribeConfig, format_secs, load_transcriber};
use crate::midi;
use eyre::{Context, Result};
use pianoscribe_amt::types::TranscriptionResult;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// CLI arguments for single-file transcription.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path to input audio file (WAV, MP3, AAC, M4A/ALAC)
    pub path: PathBuf,

    /// Output MIDI path (default: same as input with .mid extension)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write the notes and summary as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Print the first and last notes to stdout
    #[arg(long)]
    pub preview: bool,

    #[command(flatten)]
    pub model_args: ModelArgs,

    #[command(flatten)]
    pub transcribe_args: TranscribeArgs,
}

/// Resolved configuration for single-file transcription.
#[derive(Debug)]
pub struct Config {
    pub path: PathBuf,
    pub output: PathBuf,
    pub json: Option<PathBuf>,
    pub preview: bool,
    pub model: ModelConfig,
    pub transcribe: TranscribeConfig,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let output = args
            .output
            .unwrap_or_else(|| args.path.with_extension("mid"));

        Ok(Self {
            path: args.path,
            output,
            json: args.json,
            preview: args.preview,
            model: args.model_args.try_into()?,
            transcribe: args.transcribe_args.try_into()?,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    tracing::info!(
        input = ?config.path.display(),
        output = ?config.output.display(),
        "transcribing"
    );

    let mut transcriber = load_transcriber(&config.model, &config.transcribe)?;

    let s = Instant::now();

    let log_progress =
        |percent: u8, message: &str| tracing::info!(percent, stage = message, "progress");
    let result = transcriber
        .transcribe_file(&config.path, &log_progress)
        .wrap_err_with(|| format!("failed to transcribe {:?}", config.path.display()))?;

    tracing::info!(
        duration = %format_secs(s.elapsed().as_secs_f32()),
        frames = result.summary.total_frames,
        notes = result.summary.note_count,
        "transcription completed"
    );

    if result.notes.is_empty() {
        tracing::info!("no notes detected");
    }

    write_outputs(&result, &config.output, config.json.as_deref())?;

    if config.preview {
        println!("{}", midi::preview_notes(&result.notes, 5, 5));
    }

    Ok(())
}

/// Write the MIDI file and, if requested, the JSON result.
pub fn write_outputs(
    result: &TranscriptionResult,
    output: &Path,
    json: Option<&Path>,
) -> Result<()> {
    tracing::info!(path = ?output.display(), "write midi file");

    let bytes = midi::to_smf_bytes(&result.notes)?;
    std::fs::write(output, bytes)
        .wrap_err_with(|| format!("failed to write midi: {:?}", output.display()))?;

    if let Some(json) = json {
        tracing::info!(path = ?json.display(), "write json file");

        let text = serde_json::to_string_pretty(result)?;
        std::fs::write(json, text)
            .wrap_err_with(|| format!("failed to write json: {:?}", json.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pianoscribe_amt::types::{NoteEvent, TranscriptionSummary};

    #[test]
    fn writes_midi_and_json() {
        let dir = std::env::temp_dir().join("pianoscribe_run_outputs");
        std::fs::create_dir_all(&dir).unwrap();
        let output = dir.join("out.mid");
        let json = dir.join("out.json");

        let result = TranscriptionResult {
            notes: vec![NoteEvent::new(60, 0.8, 1.0, 80)],
            summary: TranscriptionSummary {
                total_frames: 87,
                duration_secs: 1.97,
                note_count: 1,
            },
        };

        write_outputs(&result, &output, Some(&json)).unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert!(midly::Smf::parse(&bytes).is_ok());

        let back: TranscriptionResult =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(back, result);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn defaults_output_next_to_input() {
        let args = Args {
            path: PathBuf::from("recordings/etude.wav"),
            output: None,
            json: None,
            preview: false,
            model_args: ModelArgs {
                model_id: "models/amt".to_string(),
                model_source: crate::cli::ModelSource::Path,
            },
            transcribe_args: TranscribeArgs {
                profile: crate::cli::ProfileArg::MelDelta,
                chunk_config: Default::default(),
                onset_threshold: None,
                sustain_threshold: None,
                min_note_frames: None,
                velocity: None,
            },
        };

        let config = Config::try_from(args).unwrap();

        assert_eq!(config.output, PathBuf::from("recordings/etude.mid"));
    }
}
