//! pianoscribe: command line piano transcription to MIDI.

pub mod batch;
pub mod cli;
pub mod config;
pub mod midi;
pub mod run;
