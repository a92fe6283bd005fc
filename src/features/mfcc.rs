//! MFCC matrix computation.
//!
//! Pipeline per recording:
//! 1. Zero-pad by `n_fft / 2` on both sides (centered frames)
//! 2. Hann-windowed frames every `hop_length` samples, FFT, power spectrum
//! 3. Mel filterbank energies
//! 4. Power to decibels, clipped `top_db` below the loudest cell
//! 5. Orthonormal DCT-II across mel bands, first `n_mfcc` coefficients

use super::mel::{hann_window, mel_filter_bank, MelFilter};
use super::MfccConfig;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// Floor applied before taking logarithms.
const AMIN: f64 = 1e-10;

/// Number of frames produced for a signal of `len` samples.
pub fn frame_count(len: usize, cfg: &MfccConfig) -> usize {
    let padded = if cfg.center { len + 2 * (cfg.n_fft / 2) } else { len };
    if padded <= cfg.n_fft {
        1
    } else {
        1 + (padded - cfg.n_fft) / cfg.hop_length
    }
}

/// Mel energies as `[T][n_mels]`.
///
/// Each frame's power spectrum is folded into the filterbank as soon as it is
/// computed, so memory grows with `n_mels` per frame rather than `n_fft / 2 + 1`.
/// The centering pad is virtual; `samples` is never copied.
fn mel_spectrogram(
    samples: &[f32],
    cfg: &MfccConfig,
    window: &[f64],
    bank: &[MelFilter],
) -> Vec<Vec<f64>> {
    let n_fft = cfg.n_fft;
    let pad = if cfg.center { n_fft / 2 } else { 0 };
    let num_frames = frame_count(samples.len(), cfg);
    let fft = FftPlanner::<f64>::new().plan_fft_forward(n_fft);
    let half_fft = n_fft / 2 + 1;

    let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
    let mut power = vec![0.0f64; half_fft];
    let mut frames = Vec::with_capacity(num_frames);

    for t in 0..num_frames {
        let start = t * cfg.hop_length;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let sample = (start + i)
                .checked_sub(pad)
                .and_then(|j| samples.get(j))
                .map_or(0.0, |&s| s as f64);
            *slot = Complex::new(sample * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for (p, c) in power.iter_mut().zip(&buffer[..half_fft]) {
            *p = c.norm_sqr();
        }
        frames.push(bank.iter().map(|filter| filter.apply(&power)).collect());
    }

    frames
}

/// Orthonormal DCT-II basis, `[n_mfcc][n_mels]`.
fn dct_basis(n_mfcc: usize, n_mels: usize) -> Vec<Vec<f64>> {
    let n = n_mels as f64;
    (0..n_mfcc)
        .map(|k| {
            let norm = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_mels)
                .map(|m| norm * (PI * k as f64 * (2.0 * m as f64 + 1.0) / (2.0 * n)).cos())
                .collect()
        })
        .collect()
}

/// Computes MFCC matrices for one configuration.
#[derive(Debug, Clone)]
pub struct MfccExtractor {
    cfg: MfccConfig,
    window: Vec<f64>,
    dct: Vec<Vec<f64>>,
}

impl MfccExtractor {
    pub fn new(cfg: MfccConfig) -> Self {
        let window = hann_window(cfg.n_fft);
        let dct = dct_basis(cfg.n_mfcc, cfg.n_mels);
        Self { cfg, window, dct }
    }

    pub fn config(&self) -> &MfccConfig {
        &self.cfg
    }

    fn filter_bank(&self, sample_rate: u32) -> Vec<MelFilter> {
        let sr = sample_rate as f64;
        let fmax = self.cfg.fmax.unwrap_or(sr / 2.0).min(sr / 2.0);
        mel_filter_bank(self.cfg.n_mels, self.cfg.n_fft, sr, self.cfg.fmin, fmax)
    }

    /// MFCCs as `[T][n_mfcc]`. An empty signal still yields one all-silent frame.
    pub fn mfcc(&self, samples: &[f32], sample_rate: u32) -> Vec<Vec<f64>> {
        let bank = self.filter_bank(sample_rate);
        let mut mel_db = mel_spectrogram(samples, &self.cfg, &self.window, &bank);
        for v in mel_db.iter_mut().flatten() {
            *v = 10.0 * v.max(AMIN).log10();
        }

        if let Some(top_db) = self.cfg.top_db {
            let peak = mel_db
                .iter()
                .flatten()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            let floor = peak - top_db;
            for v in mel_db.iter_mut().flatten() {
                *v = v.max(floor);
            }
        }

        mel_db
            .iter()
            .map(|frame| {
                self.dct
                    .iter()
                    .map(|basis| basis.iter().zip(frame).map(|(b, x)| b * x).sum())
                    .collect()
            })
            .collect()
    }

    /// Average every coefficient over time, giving one value per coefficient.
    pub fn mean_mfcc(&self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let frames = self.mfcc(samples, sample_rate);
        let t = frames.len().max(1) as f64;
        (0..self.cfg.n_mfcc)
            .map(|k| (frames.iter().map(|f| f[k]).sum::<f64>() / t) as f32)
            .collect()
    }
}
