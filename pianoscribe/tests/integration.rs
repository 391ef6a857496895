//! Integration tests for pianoscribe CLI.

use clap::Parser;
use pianoscribe::cli::{Cli, run_cli};
use std::path::{Path, PathBuf};

/// Write two seconds of a middle C burst as 44.1kHz stereo.
fn write_fixture(path: &Path) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("failed to create wav");
    for i in 0..88200 {
        let t = i as f32 / 44100.0;
        let x = if (0.8..1.0).contains(&t) {
            0.5 * (2.0 * std::f32::consts::PI * 261.63 * t).sin()
        } else {
            0.0
        };
        let s = (x * i16::MAX as f32) as i16;
        writer.write_sample(s).expect("failed to write sample");
        writer.write_sample(s).expect("failed to write sample");
    }
    writer.finalize().expect("failed to finalize wav");
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    if dir.exists() {
        std::fs::remove_dir_all(&dir).ok();
    }
    std::fs::create_dir_all(&dir).expect("failed to create temp dir");
    dir
}

#[test]
fn missing_model_directory_fails() {
    let dir = temp_dir("pianoscribe-missing-model");
    let wav = dir.join("burst.wav");
    write_fixture(&wav);

    let cli = Cli::parse_from([
        "pscribe",
        "run",
        wav.to_str().unwrap(),
        "-m",
        dir.join("no-model").to_str().unwrap(),
        "--model-source",
        "path",
    ]);

    assert!(run_cli(cli).is_err());
    assert!(!dir.join("burst.mid").exists());
}

#[test]
#[ignore = "exported piano model required in PIANOSCRIBE_MODEL"]
fn run_writes_midi_and_json() {
    let model = std::env::var("PIANOSCRIBE_MODEL").expect("PIANOSCRIBE_MODEL not set");
    let dir = temp_dir("pianoscribe-run");
    let wav = dir.join("burst.wav");
    let json = dir.join("burst.json");
    write_fixture(&wav);

    let cli = Cli::parse_from([
        "pscribe",
        "run",
        wav.to_str().unwrap(),
        "-m",
        &model,
        "--json",
        json.to_str().unwrap(),
    ]);

    run_cli(cli).expect("failed to transcribe");

    assert!(dir.join("burst.mid").exists());
    let text = std::fs::read_to_string(&json).expect("json not written");
    assert!(text.contains("\"summary\""));
}

#[test]
#[ignore = "exported piano model required in PIANOSCRIBE_MODEL"]
fn batch_transcribes_every_file() {
    let model = std::env::var("PIANOSCRIBE_MODEL").expect("PIANOSCRIBE_MODEL not set");
    let dir = temp_dir("pianoscribe-batch");
    let out = dir.join("midi");
    let inputs: Vec<PathBuf> = (0..3).map(|i| dir.join(format!("take{i}.wav"))).collect();
    for input in &inputs {
        write_fixture(input);
    }

    let mut args = vec![
        "pscribe".to_string(),
        "batch".to_string(),
        "-m".to_string(),
        model,
        "-o".to_string(),
        out.display().to_string(),
        "-j".to_string(),
        "2".to_string(),
    ];
    args.extend(inputs.iter().map(|p| p.display().to_string()));

    run_cli(Cli::parse_from(args)).expect("batch failed");

    for i in 0..3 {
        assert!(out.join(format!("take{i}.mid")).exists());
    }
}
