//! Log-mel feature extraction.
//!
//! Produces one feature row per hop together with the frame timestamps. All
//! parameters are part of the trained model's input contract.

use crate::audio::{AudioSignal, SAMPLE_RATE};
use crate::error::{ConfigError, Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis, concatenate, s};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f64::consts::PI;

/// Power floor before log compression.
const AMIN: f32 = 1e-10;

/// Dynamic range kept below the loudest bin, in dB.
const TOP_DB: f32 = 80.0;

/// Savitzky-Golay window used for time derivatives.
const DELTA_WIDTH: usize = 9;

/// Mel-spectrogram feature extractor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MelSpectrogram {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f32,
    pub f_max: f32,
    /// Append first and second time derivatives
    pub deltas: bool,
    /// Scale features as `x / span + 1`
    pub db_span: Option<f32>,
}

impl MelSpectrogram {
    /// 128 bands over 25Hz..6kHz with derivatives (384 features), scaled by 80dB.
    pub const MEL_DELTA: Self = Self {
        sample_rate: SAMPLE_RATE,
        n_fft: 2048,
        hop_length: 512,
        n_mels: 128,
        f_min: 25.0,
        f_max: 6000.0,
        deltas: true,
        db_span: Some(80.0),
    };

    /// 128 bands over the piano range A0..C8, raw dB.
    pub const MEL_BASE: Self = Self {
        sample_rate: SAMPLE_RATE,
        n_fft: 2048,
        hop_length: 512,
        n_mels: 128,
        f_min: 27.5,
        f_max: 4186.0,
        deltas: false,
        db_span: None,
    };

    /// Number of features per frame.
    pub fn feature_width(&self) -> usize {
        if self.deltas {
            self.n_mels * 3
        } else {
            self.n_mels
        }
    }

    /// Seconds between consecutive frames.
    pub fn hop_secs(&self) -> f32 {
        self.hop_length as f32 / self.sample_rate as f32
    }

    /// Timestamp of a frame index in seconds.
    pub fn frame_to_secs(&self, frame: usize) -> f32 {
        (frame * self.hop_length) as f32 / self.sample_rate as f32
    }

    /// Number of centered frames for a signal of `len` samples.
    pub fn num_frames(&self, len: usize) -> usize {
        if len == 0 { 0 } else { 1 + len / self.hop_length }
    }

    fn validate(&self) -> Result<()> {
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.f_min >= 0.0 && self.f_min < self.f_max && self.f_max <= nyquist) {
            return Err(ConfigError::InvalidMelRange {
                f_min: self.f_min,
                f_max: self.f_max,
                sample_rate: self.sample_rate,
            }
            .into());
        }
        Ok(())
    }

    /// Extract features from a conditioned signal.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyAudio` when the signal yields no frames.
    pub fn apply(&self, signal: &AudioSignal) -> Result<FeatureMatrix> {
        self.extract(signal.samples())
    }

    /// Extract features from mono samples at `self.sample_rate`.
    pub fn extract(&self, samples: &[f32]) -> Result<FeatureMatrix> {
        self.validate()?;

        if self.num_frames(samples.len()) == 0 {
            return Err(Error::EmptyAudio);
        }

        let mel = self.mel_power(samples);
        let db = power_to_db(mel);

        let mut features = if self.deltas {
            let d1 = savgol_delta(db.view(), 1);
            let d2 = savgol_delta(db.view(), 2);
            concatenate(Axis(1), &[db.view(), d1.view(), d2.view()])?
        } else {
            db
        };

        if let Some(span) = self.db_span {
            features.mapv_inplace(|x| x / span + 1.0);
        }

        let timestamps = (0..features.nrows()).map(|t| self.frame_to_secs(t)).collect();

        tracing::debug!(
            frames = features.nrows(),
            width = features.ncols(),
            "extracted features"
        );

        FeatureMatrix::new(features, timestamps, self.hop_secs())
    }

    /// Mel power spectrogram `(frames, n_mels)`.
    ///
    /// Each power spectrum is projected onto the mel bank as soon as it is
    /// computed so the linear spectrogram is never held in full.
    fn mel_power(&self, samples: &[f32]) -> Array2<f32> {
        let n_fft = self.n_fft;
        let pad = n_fft / 2;
        let num_frames = self.num_frames(samples.len());
        let freq_bins = n_fft / 2 + 1;

        let window = hann_window(n_fft);
        let filterbank = mel_filterbank(self);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        let mut mel = Array2::<f32>::zeros((num_frames, self.n_mels));
        let mut frame = vec![Complex::new(0.0, 0.0); n_fft];
        let mut power = Array1::<f32>::zeros(freq_bins);

        for frame_idx in 0..num_frames {
            let start = (frame_idx * self.hop_length) as isize - pad as isize;

            for (i, bin) in frame.iter_mut().enumerate() {
                let pos = start + i as isize;
                let sample = if pos >= 0 && (pos as usize) < samples.len() {
                    samples[pos as usize]
                } else {
                    0.0
                };
                *bin = Complex::new(sample * window[i], 0.0);
            }

            fft.process(&mut frame);

            for (k, p) in power.iter_mut().enumerate() {
                *p = frame[k].norm_sqr();
            }

            mel.row_mut(frame_idx).assign(&filterbank.dot(&power));
        }

        mel
    }
}

impl Default for MelSpectrogram {
    fn default() -> Self {
        Self::MEL_DELTA
    }
}

/// Per-frame feature rows with their timestamps.
#[derive(Clone, Debug)]
pub struct FeatureMatrix {
    features: Array2<f32>,
    timestamps: Vec<f32>,
    hop_secs: f32,
}

impl FeatureMatrix {
    /// Pair features `(frames, width)` with one timestamp per frame.
    pub fn new(features: Array2<f32>, timestamps: Vec<f32>, hop_secs: f32) -> Result<Self> {
        if features.nrows() != timestamps.len() {
            return Err(Error::ShapeMismatch {
                what: "feature timestamps",
                expected: features.nrows(),
                got: timestamps.len(),
            });
        }
        if features.nrows() == 0 {
            return Err(Error::EmptyAudio);
        }

        Ok(Self {
            features,
            timestamps,
            hop_secs,
        })
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    pub fn timestamps(&self) -> &[f32] {
        &self.timestamps
    }

    pub fn num_frames(&self) -> usize {
        self.features.nrows()
    }

    pub fn width(&self) -> usize {
        self.features.ncols()
    }

    pub fn hop_secs(&self) -> f32 {
        self.hop_secs
    }

    /// Timestamp of the last frame.
    pub fn duration_secs(&self) -> f32 {
        self.timestamps.last().copied().unwrap_or(0.0)
    }
}

/// Periodic Hann window.
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / length as f64).cos()) as f32)
        .collect()
}

/// Convert frequency in Hz to the Slaney mel scale.
fn hz_to_mel(freq: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f64.ln() / 27.0;

    if freq >= MIN_LOG_HZ {
        MIN_LOG_MEL + (freq / MIN_LOG_HZ).ln() / logstep
    } else {
        freq / F_SP
    }
}

/// Convert Slaney mel back to Hz.
fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f64.ln() / 27.0;

    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (logstep * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular mel filterbank `(n_mels, n_fft / 2 + 1)` with Slaney area normalization.
fn mel_filterbank(config: &MelSpectrogram) -> Array2<f32> {
    let freq_bins = config.n_fft / 2 + 1;
    let n_mels = config.n_mels;
    let mut filterbank = Array2::<f32>::zeros((n_mels, freq_bins));

    let min_mel = hz_to_mel(config.f_min as f64);
    let max_mel = hz_to_mel(config.f_max as f64);

    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let bin_width = config.sample_rate as f64 / config.n_fft as f64;

    for m in 0..n_mels {
        let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let enorm = 2.0 / (right - left);

        for k in 0..freq_bins {
            let freq = k as f64 * bin_width;
            let lower = (freq - left) / (center - left);
            let upper = (right - freq) / (right - center);
            let weight = lower.min(upper).max(0.0);
            filterbank[[m, k]] = (weight * enorm) as f32;
        }
    }

    filterbank
}

/// Power to dB relative to the maximum, clipped to `TOP_DB` below the peak.
fn power_to_db(power: Array2<f32>) -> Array2<f32> {
    let reference = power.iter().fold(AMIN, |acc, &p| acc.max(p));
    let offset = 10.0 * reference.log10();

    let db = power.mapv(|p| 10.0 * p.max(AMIN).log10() - offset);
    let floor = db.iter().fold(f32::NEG_INFINITY, |acc, &d| acc.max(d)) - TOP_DB;

    db.mapv(|d| d.max(floor))
}

/// Savitzky-Golay derivative of order `order` along the frame axis.
///
/// A polynomial of degree `order` is fitted over `DELTA_WIDTH` frames. The
/// first and last `DELTA_WIDTH / 2` frames reuse the fit of the outermost
/// full window. Inputs shorter than the window get zero derivatives.
fn savgol_delta(data: ArrayView2<f32>, order: usize) -> Array2<f32> {
    let frames = data.nrows();
    let half = DELTA_WIDTH / 2;
    let mut out = Array2::<f32>::zeros(data.raw_dim());

    if frames < DELTA_WIDTH {
        return out;
    }

    let coeffs = savgol_coeffs(order);

    for t in half..frames - half {
        let window = data.slice(s![t - half..=t + half, ..]);
        let mut row = out.row_mut(t);
        for (w, c) in window.axis_iter(Axis(0)).zip(&coeffs) {
            row.scaled_add(*c, &w);
        }
    }

    let head = out.row(half).to_owned();
    let tail = out.row(frames - half - 1).to_owned();
    for t in 0..half {
        out.row_mut(t).assign(&head);
        out.row_mut(frames - 1 - t).assign(&tail);
    }

    out
}

/// Derivative filter taps over `-half..=half` for first or second order fits.
fn savgol_coeffs(order: usize) -> Vec<f32> {
    let half = (DELTA_WIDTH / 2) as i32;
    let offsets = -half..=half;

    match order {
        1 => {
            let norm: i32 = offsets.clone().map(|k| k * k).sum();
            offsets.map(|k| k as f32 / norm as f32).collect()
        }
        _ => {
            // Second derivative of the least-squares quadratic: 2 * a2, with a2
            // projected on the centered basis k^2 - mean(k^2).
            let mean_sq = offsets.clone().map(|k| (k * k) as f32).sum::<f32>() / DELTA_WIDTH as f32;
            let basis: Vec<f32> = offsets.map(|k| (k * k) as f32 - mean_sq).collect();
            let norm: f32 = basis.iter().map(|b| b * b).sum();
            basis.iter().map(|b| 2.0 * b / norm).collect()
        }
    }
}
