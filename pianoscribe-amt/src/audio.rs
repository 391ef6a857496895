//! Audio loading and signal conditioning.
//!
//! Decodes a recording, downmixes it to mono, resamples it to the profile
//! rate, peak-normalizes it and applies the zero-phase low-pass filter the
//! model was trained against.

use crate::error::{AudioError, Result};
use crate::filter::Butterworth;
use hound::{SampleFormat, WavReader};
use rubato::{FftFixedIn, Resampler};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Default sample rate the piano models are trained on (22.05kHz).
pub const SAMPLE_RATE: u32 = 22050;

/// Frames fed to the resampler per call.
const RESAMPLER_CHUNK: usize = 4096;

/// Signal conditioning parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignalConfig {
    /// Target sample rate in Hz
    pub sample_rate: u32,
    /// Low-pass cutoff in Hz
    pub cutoff_hz: f32,
    /// Butterworth filter order
    pub filter_order: usize,
}

impl SignalConfig {
    /// 22.05kHz with a 5th order 6kHz low-pass.
    pub const PIANO: Self = Self {
        sample_rate: SAMPLE_RATE,
        cutoff_hz: 6000.0,
        filter_order: 5,
    };

    /// 22.05kHz with a 5th order low-pass at C8 (4186Hz).
    pub const MEL_BASE: Self = Self {
        cutoff_hz: 4186.0,
        ..Self::PIANO
    };
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self::PIANO
    }
}

/// Conditioned mono audio.
///
/// Samples are peak-normalized into `[-1, 1]` and filtered.
#[derive(Clone, Debug)]
pub struct AudioSignal {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSignal {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decoded interleaved audio as stored in the container.
#[derive(Clone, Debug)]
pub struct RawAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Load, resample, normalize and filter a recording.
///
/// # Errors
///
/// Returns an `AudioError` if the file cannot be read or decoded.
pub fn condition(path: impl AsRef<Path>, config: &SignalConfig) -> Result<AudioSignal> {
    let path = path.as_ref();
    let raw = load_audio(path)?;

    tracing::debug!(
        path = %path.display(),
        sample_rate = raw.sample_rate,
        channels = raw.channels,
        frames = raw.samples.len() / raw.channels.max(1),
        "decoded audio"
    );

    let mono = downmix(&raw.samples, raw.channels)?;
    condition_samples(mono, raw.sample_rate, config)
}

/// Condition in-memory mono samples recorded at `sample_rate`.
///
/// # Errors
///
/// Rejects NaN or infinite samples before any processing.
pub fn condition_samples(
    samples: Vec<f32>,
    sample_rate: u32,
    config: &SignalConfig,
) -> Result<AudioSignal> {
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(AudioError::NonFiniteSample(index).into());
    }

    let mut samples = resample(samples, sample_rate, config.sample_rate)?;

    if let Some(peak) = normalize_peak(&mut samples) {
        tracing::trace!(peak, "normalized peak");
    }

    let filter = Butterworth::lowpass(config.filter_order, config.cutoff_hz, config.sample_rate)?;
    let samples = filter.filtfilt(&samples);

    Ok(AudioSignal {
        samples,
        sample_rate: config.sample_rate,
    })
}

/// Load interleaved samples from any supported container.
///
/// WAV files go through `hound`; everything else is probed with `symphonia`.
pub fn load_audio(path: impl AsRef<Path>) -> Result<RawAudio> {
    let path = path.as_ref();
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

    if is_wav {
        load_wav(path)
    } else {
        decode_container(path)
    }
}

/// Load a WAV file, scaling integer PCM by its bit depth.
pub fn load_wav(path: impl AsRef<Path>) -> Result<RawAudio> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<hound::Result<_>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<hound::Result<_>>()?
        }
    };

    Ok(RawAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels as usize,
    })
}

/// Decode a compressed or non-WAV container with symphonia.
fn decode_container(path: &Path) -> Result<RawAudio> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioError::NoTrack)?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(AudioError::InvalidSampleRate(0))?;
    let mut channels = track.codec_params.channels.map_or(0, |c| c.count());

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::warn!(msg, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count();

        let required = decoded.capacity() * channels;
        if buffer.as_ref().is_none_or(|buf| buf.capacity() < required) {
            buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(buf) = buffer.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    Ok(RawAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Average interleaved channels into a single channel.
pub fn downmix(samples: &[f32], channels: usize) -> Result<Vec<f32>> {
    match channels {
        0 => Err(AudioError::InvalidChannels(channels).into()),
        1 => Ok(samples.to_vec()),
        n => Ok(samples
            .chunks(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect()),
    }
}

/// Scale samples so the largest magnitude is exactly 1.0.
///
/// Returns the original peak, or `None` for silence (left unchanged).
pub fn normalize_peak(samples: &mut [f32]) -> Option<f32> {
    let peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));

    if peak > 0.0 {
        samples.iter_mut().for_each(|s| *s /= peak);
        Some(peak)
    } else {
        None
    }
}

/// Resample mono audio with an FFT-based synchronous resampler.
pub fn resample(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>> {
    if from == 0 {
        return Err(AudioError::InvalidSampleRate(from).into());
    }
    if from == to || samples.is_empty() {
        return Ok(samples);
    }

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLER_CHUNK, 2, 1)?;

    let expected = (samples.len() as u64 * to as u64).div_ceil(from as u64) as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay);

    let mut rest = samples.as_slice();
    while rest.len() >= resampler.input_frames_next() {
        let (chunk, tail) = rest.split_at(resampler.input_frames_next());
        let out = resampler.process(&[chunk], None)?;
        output.extend_from_slice(&out[0]);
        rest = tail;
    }

    if !rest.is_empty() {
        let out = resampler.process_partial(Some(&[rest][..]), None)?;
        output.extend_from_slice(&out[0]);
    }

    while output.len() < expected + delay {
        let out = resampler.process_partial::<&[f32]>(None, None)?;
        output.extend_from_slice(&out[0]);
    }

    output.drain(..delay);
    output.truncate(expected);

    tracing::debug!(from, to, frames = output.len(), "resampled audio");

    Ok(output)
}
