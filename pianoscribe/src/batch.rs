//! Batch subcommand - transcribe several recordings on worker threads.
//!
//! The model file is resolved once up front, then every worker loads its own
//! session from it and pulls files from a shared queue. Workers report
//! through a [`TaskStore`] which the main thread polls to log progress.

use crate::cli::{ModelArgs, TranscribeArgs};
use crate::config::{ModelConfig, TranscribeConfig, format_secs, load_transcriber_from_file};
use crate::run::write_outputs;
use eyre::{Result, WrapErr, bail, ensure};
use pianoscribe_amt::models::onnx::MODEL_FILES;
use pianoscribe_amt::pipelines::PianoTranscriber;
use pianoscribe_amt::tasks::{TaskHandle, TaskState, TaskStore};
use pianoscribe_amt::traits::NoteModel;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// How often the main thread logs task progress.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// CLI arguments for batch transcription.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Input audio files
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Directory for MIDI files (default: next to each input)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Number of worker threads, each with its own model session
    #[arg(short, long, default_value_t = 2)]
    pub jobs: usize,

    #[command(flatten)]
    pub model_args: ModelArgs,

    #[command(flatten)]
    pub transcribe_args: TranscribeArgs,
}

/// Resolved configuration for batch transcription.
#[derive(Debug)]
pub struct Config {
    pub paths: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub jobs: usize,
    pub model: ModelConfig,
    pub transcribe: TranscribeConfig,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        ensure!(args.jobs > 0, "--jobs must be at least 1");

        let mut outputs = HashSet::new();
        for path in &args.paths {
            let output = output_path(path, args.output_dir.as_deref());
            ensure!(
                outputs.insert(output.clone()),
                "{:?} would overwrite the output of another input: {:?}",
                path.display(),
                output.display()
            );
        }

        Ok(Self {
            jobs: args.jobs.min(args.paths.len()),
            paths: args.paths,
            output_dir: args.output_dir,
            model: args.model_args.try_into()?,
            transcribe: args.transcribe_args.try_into()?,
        })
    }
}

/// MIDI path for an input file.
fn output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    match (output_dir, input.file_name()) {
        (Some(dir), Some(name)) => dir.join(name).with_extension("mid"),
        _ => input.with_extension("mid"),
    }
}

type Queue = Mutex<VecDeque<(TaskHandle, PathBuf)>>;

fn next_job(queue: &Queue) -> Option<(TaskHandle, PathBuf)> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

/// Fail every job still queued. Returns how many were failed.
fn fail_remaining(queue: &Queue, reason: &str) -> usize {
    let mut count = 0;
    while let Some((handle, _)) = next_job(queue) {
        handle.fail(reason);
        count += 1;
    }
    count
}

/// Load a transcriber and drain the queue with it.
///
/// A worker whose load fails returns without touching the queue, so the
/// remaining workers can still process every job.
fn worker<M, F>(queue: &Queue, output_dir: Option<&Path>, load: F) -> Result<()>
where
    M: NoteModel,
    F: FnOnce() -> Result<PianoTranscriber<M>>,
{
    let mut transcriber = load().inspect_err(|e| {
        tracing::warn!(error = %format!("{e:#}"), "worker failed to load model");
    })?;

    while let Some((handle, path)) = next_job(queue) {
        let output = output_path(&path, output_dir);

        let outcome = transcriber
            .transcribe_file(&path, &handle)
            .map_err(eyre::Report::from)
            .and_then(|result| {
                write_outputs(&result, &output, None)?;
                Ok(result.summary)
            });

        match outcome {
            Ok(summary) => {
                handle.complete(summary);
            }
            Err(e) => {
                handle.fail(format!("{e:#}"));
            }
        }
    }

    Ok(())
}

pub fn execute(config: Config) -> Result<()> {
    if let Some(dir) = &config.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    // Download once; concurrent hub fetches contend for the same lock file.
    tracing::info!(repo = ?config.model.repo, "resolving model");
    let model_path = config
        .model
        .repo
        .resolve_any(MODEL_FILES)
        .wrap_err("failed to resolve model")?;

    let store = TaskStore::new();
    let queue: Queue = Mutex::new(
        config
            .paths
            .iter()
            .map(|path| {
                let id = store.create(path.display().to_string());
                (store.handle(id), path.clone())
            })
            .collect(),
    );

    tracing::info!(files = config.paths.len(), jobs = config.jobs, "starting batch");

    let s = Instant::now();

    let worker_errors: Vec<String> = thread::scope(|scope| {
        let workers: Vec<_> = (0..config.jobs)
            .map(|_| {
                scope.spawn(|| {
                    worker(&queue, config.output_dir.as_deref(), || {
                        load_transcriber_from_file(&model_path, &config.transcribe)
                    })
                })
            })
            .collect();

        while !store.all_finished() && !workers.iter().all(|w| w.is_finished()) {
            thread::sleep(POLL_INTERVAL);
            for task in store.snapshots() {
                if task.state == TaskState::Processing {
                    tracing::info!(file = %task.label, percent = task.percent, stage = %task.message);
                }
            }
        }

        workers
            .into_iter()
            .filter_map(|w| match w.join() {
                Ok(result) => result.err().map(|e| format!("{e:#}")),
                Err(_) => Some("worker panicked".to_string()),
            })
            .collect()
    });

    let reason = worker_errors
        .last()
        .map_or("no worker available", String::as_str);
    let orphaned = fail_remaining(&queue, reason);
    if orphaned > 0 {
        tracing::error!(orphaned, error = reason, "no worker could process the remaining files");
    }

    let snapshots = store.snapshots();
    let failed = snapshots
        .iter()
        .filter(|t| t.state == TaskState::Failed)
        .count();

    for task in &snapshots {
        match (&task.summary, &task.error) {
            (Some(summary), _) => {
                tracing::info!(file = %task.label, notes = summary.note_count, "completed")
            }
            (None, Some(error)) => tracing::error!(file = %task.label, %error, "failed"),
            (None, None) => {}
        }
    }

    tracing::info!(
        duration = %format_secs(s.elapsed().as_secs_f32()),
        completed = snapshots.len() - failed,
        failed,
        "batch finished"
    );

    if failed > 0 {
        bail!("{failed} of {} transcriptions failed", snapshots.len());
    }

    Ok(())
}
