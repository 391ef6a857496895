//! Butterworth low-pass design and zero-phase (forward-backward) filtering.

use crate::error::{ConfigError, Result};
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

/// Digital IIR filter as transfer function coefficients, normalized so `a[0] == 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct Butterworth {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

impl Butterworth {
    /// Design an `order`-th order low-pass filter with cutoff `cutoff_hz`.
    ///
    /// Analog prototype poles are scaled to the pre-warped cutoff and mapped
    /// with the bilinear transform; all zeros land on `z = -1`.
    pub fn lowpass(order: usize, cutoff_hz: f32, sample_rate: u32) -> Result<Self> {
        let nyquist = sample_rate as f32 / 2.0;
        if order == 0 || !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(ConfigError::InvalidCutoff {
                cutoff: cutoff_hz,
                nyquist,
            }
            .into());
        }

        let wn = cutoff_hz as f64 / nyquist as f64;
        // Bilinear transform with fs = 2, so 2 * fs = 4.
        let fs2 = Complex64::new(4.0, 0.0);
        let warped = 4.0 * (PI * wn / 2.0).tan();

        let n = order as f64;
        let poles: Vec<Complex64> = (0..order)
            .map(|k| {
                let theta = PI * (2.0 * k as f64 + n + 1.0) / (2.0 * n);
                Complex64::from_polar(1.0, theta) * warped
            })
            .collect();

        let gain_analog = warped.powi(order as i32);
        let denom: Complex64 = poles.iter().map(|&p| fs2 - p).product();
        let gain = gain_analog / denom.re;

        let digital_poles: Vec<Complex64> = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();
        let zeros = vec![Complex64::new(-1.0, 0.0); order];

        let b = poly(&zeros).into_iter().map(|c| c.re * gain).collect();
        let a = poly(&digital_poles).into_iter().map(|c| c.re).collect();

        Ok(Self { b, a })
    }

    /// Steady-state initial conditions for a unit step input.
    ///
    /// Transposed direct form II state that makes the output settle at
    /// `sum(b) / sum(a)` from the first sample.
    fn step_initial_state(&self) -> Vec<f64> {
        let n = self.a.len().max(self.b.len());
        let b = padded(&self.b, n);
        let a = padded(&self.a, n);

        let dc_gain = b.iter().sum::<f64>() / a.iter().sum::<f64>();
        let mut zi = vec![0.0; n - 1];

        let mut acc = 0.0;
        for i in (0..n - 1).rev() {
            acc += b[i + 1] - a[i + 1] * dc_gain;
            zi[i] = acc;
        }

        zi
    }

    /// Single forward pass in transposed direct form II.
    fn lfilter(&self, x: &[f64], mut state: Vec<f64>) -> Vec<f64> {
        let n = self.a.len().max(self.b.len());
        let b = padded(&self.b, n);
        let a = padded(&self.a, n);

        x.iter()
            .map(|&xi| {
                let yi = b[0] * xi + state.first().copied().unwrap_or(0.0);
                for i in 0..n - 1 {
                    let next = state.get(i + 1).copied().unwrap_or(0.0);
                    state[i] = b[i + 1] * xi + next - a[i + 1] * yi;
                }
                yi
            })
            .collect()
    }

    /// Zero-phase filtering: forward pass, then a backward pass over the result.
    ///
    /// The signal is extended at both ends by odd reflection before filtering
    /// and the extension is removed afterwards.
    pub fn filtfilt(&self, signal: &[f32]) -> Vec<f32> {
        if signal.is_empty() {
            return Vec::new();
        }

        let padlen = (3 * self.a.len().max(self.b.len())).min(signal.len() - 1);
        let extended = odd_extend(signal, padlen);
        let zi = self.step_initial_state();

        let scaled = |x0: f64| zi.iter().map(|z| z * x0).collect::<Vec<_>>();

        let forward = self.lfilter(&extended, scaled(extended[0]));

        let reversed: Vec<f64> = forward.into_iter().rev().collect();
        let backward = self.lfilter(&reversed, scaled(reversed[0]));

        backward
            .into_iter()
            .rev()
            .skip(padlen)
            .take(signal.len())
            .map(|y| y as f32)
            .collect()
    }
}

/// Polynomial coefficients (highest power first) with the given roots.
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &root in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (i, &c) in coeffs.iter().enumerate() {
            next[i] += c;
            next[i + 1] -= c * root;
        }
        coeffs = next;
    }
    coeffs
}

fn padded(coeffs: &[f64], n: usize) -> Vec<f64> {
    let mut out = coeffs.to_vec();
    out.resize(n, 0.0);
    out
}

/// Extend both ends by `padlen` samples of odd (point) reflection.
fn odd_extend(signal: &[f32], padlen: usize) -> Vec<f64> {
    let first = signal[0] as f64;
    let last = signal[signal.len() - 1] as f64;
    let n = signal.len();

    let head = (1..=padlen).rev().map(|i| 2.0 * first - signal[i] as f64);
    let body = signal.iter().map(|&s| s as f64);
    let tail = (1..=padlen).map(|i| 2.0 * last - signal[n - 1 - i] as f64);

    head.chain(body).chain(tail).collect()
}
