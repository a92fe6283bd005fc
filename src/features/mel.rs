//! Slaney-style mel scale and triangular filterbank.

use std::f64::consts::PI;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Hz → mel on the Slaney scale (linear below 1 kHz, logarithmic above).
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Inverse of [`hz_to_mel`].
pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Periodic Hann window (the FFT-friendly variant, not the symmetric one).
pub fn hann_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// One triangular filter, stored from its first non-zero FFT bin.
#[derive(Debug, Clone)]
pub struct MelFilter {
    pub start: usize,
    pub weights: Vec<f64>,
}

impl MelFilter {
    /// Weighted sum of a power spectrum under this filter.
    pub fn apply(&self, power: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(&power[self.start..])
            .map(|(w, p)| w * p)
            .sum()
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Build `num_mels` area-normalized triangular filters over `[fmin, fmax]`.
///
/// Filters that fall entirely between two FFT bins come back empty; their
/// energy is simply zero.
pub fn mel_filter_bank(
    num_mels: usize,
    fft_size: usize,
    sample_rate: f64,
    fmin: f64,
    fmax: f64,
) -> Vec<MelFilter> {
    let half_fft = fft_size / 2 + 1;
    let fft_freqs = linspace(0.0, sample_rate / 2.0, half_fft);
    let mel_points: Vec<f64> = linspace(hz_to_mel(fmin), hz_to_mel(fmax), num_mels + 2)
        .into_iter()
        .map(mel_to_hz)
        .collect();

    (0..num_mels)
        .map(|m| {
            let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let enorm = 2.0 / (right - left);
            let dense: Vec<f64> = fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect();

            match dense.iter().position(|&w| w > 0.0) {
                Some(start) => {
                    let end = dense.iter().rposition(|&w| w > 0.0).unwrap_or(start);
                    MelFilter {
                        start,
                        weights: dense[start..=end].to_vec(),
                    }
                }
                None => MelFilter {
                    start: 0,
                    weights: Vec::new(),
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hz_mel_roundtrip() {
        for &hz in &[0.0, 100.0, 440.0, 1000.0, 4000.0, 8000.0, 22050.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((hz - back).abs() < 1e-6, "roundtrip failed for {} Hz", hz);
        }
        // Linear region and the 1 kHz break point
        assert!((hz_to_mel(200.0) - 3.0).abs() < 1e-12);
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_hann_window_is_periodic() {
        let w = hann_window(8);
        assert_eq!(w[0], 0.0);
        assert!((w[4] - 1.0).abs() < 1e-12);
        assert!((w[1] - w[7]).abs() < 1e-12);
    }

    #[test]
    fn test_filter_bank_shape() {
        let bank = mel_filter_bank(128, 2048, 22050.0, 0.0, 11025.0);
        assert_eq!(bank.len(), 128);
        for filter in &bank {
            assert!(filter.start + filter.weights.len() <= 1025);
            assert!(filter.weights.iter().all(|&w| w >= 0.0));
        }
        // High filters are wider and therefore flatter than low ones
        let peak = |f: &MelFilter| f.weights.iter().cloned().fold(0.0, f64::max);
        assert!(peak(&bank[10]) > peak(&bank[120]));
    }

    #[test]
    fn test_filter_apply() {
        let filter = MelFilter {
            start: 2,
            weights: vec![0.5, 1.0, 0.5],
        };
        let power = vec![9.0, 9.0, 1.0, 2.0, 3.0, 9.0];
        assert!((filter.apply(&power) - 4.0).abs() < 1e-12);
    }
}
