//! Timbral descriptors: MFCC, centroid, rolloff, flatness, zero crossings

use super::frames::{checkpoint, Spectrogram};
use crate::error::AnalysisResult;
use tokio_util::sync::CancellationToken;

pub const NUM_MEL_BANDS: usize = 40;
pub const NUM_MFCC: usize = 13;
const ROLLOFF_FRACTION: f32 = 0.85;
const LOG_FLOOR: f32 = 1e-10;

/// Per-clip spectral summary plus the per-frame series used by the
/// texture metric (each series normalized to [0, 1])
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralSummary {
    pub mfcc: Vec<f32>,
    /// Mean centroid in Hz
    pub centroid_hz: f32,
    /// Mean 85% rolloff in Hz
    pub rolloff_hz: f32,
    pub zero_crossing_rate: f32,
    pub centroid_series: Vec<f32>,
    pub rolloff_series: Vec<f32>,
    pub flatness_series: Vec<f32>,
    pub zcr_series: Vec<f32>,
}

/// Triangular mel filters over the FFT bins (HTK mel scale)
pub struct MelFilterbank {
    /// `(first_bin, weights)` per band
    filters: Vec<(usize, Vec<f32>)>,
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

impl MelFilterbank {
    pub fn new(num_bands: usize, num_bins: usize, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let bin_hz = nyquist / (num_bins - 1) as f32;
        let mel_max = hz_to_mel(nyquist);
        let edges: Vec<f32> = (0..num_bands + 2)
            .map(|i| mel_to_hz(mel_max * i as f32 / (num_bands + 1) as f32))
            .collect();

        let filters = (0..num_bands)
            .map(|band| {
                let (lo, center, hi) = (edges[band], edges[band + 1], edges[band + 2]);
                let first = (lo / bin_hz).floor() as usize;
                let last = ((hi / bin_hz).ceil() as usize).min(num_bins - 1);
                let weights = (first..=last)
                    .map(|k| {
                        let f = k as f32 * bin_hz;
                        if f <= lo || f >= hi {
                            0.0
                        } else if f <= center {
                            (f - lo) / (center - lo)
                        } else {
                            (hi - f) / (hi - center)
                        }
                    })
                    .collect();
                (first, weights)
            })
            .collect();

        Self { filters }
    }

    pub fn num_bands(&self) -> usize {
        self.filters.len()
    }

    /// Band energies of one magnitude frame
    pub fn apply(&self, magnitudes: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|(first, weights)| {
                weights
                    .iter()
                    .zip(&magnitudes[*first..])
                    .map(|(w, m)| w * m * m)
                    .sum()
            })
            .collect()
    }
}

/// Orthonormal DCT-II, first `num_coeffs` coefficients
pub fn dct_ortho(input: &[f32], num_coeffs: usize) -> Vec<f32> {
    let n = input.len() as f32;
    (0..num_coeffs)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            let sum: f32 = input
                .iter()
                .enumerate()
                .map(|(i, x)| {
                    x * (std::f32::consts::PI * k as f32 * (2 * i + 1) as f32 / (2.0 * n)).cos()
                })
                .sum();
            scale * sum
        })
        .collect()
}

fn spectral_centroid(spec: &Spectrogram, frame: &[f32]) -> f32 {
    let total: f32 = frame.iter().sum();
    if total <= LOG_FLOOR {
        return 0.0;
    }
    frame
        .iter()
        .enumerate()
        .map(|(k, m)| spec.bin_frequency(k) * m)
        .sum::<f32>()
        / total
}

fn spectral_rolloff(spec: &Spectrogram, frame: &[f32]) -> f32 {
    let total: f32 = frame.iter().sum();
    if total <= LOG_FLOOR {
        return 0.0;
    }
    let target = ROLLOFF_FRACTION * total;
    let mut cumulative = 0.0;
    for (k, m) in frame.iter().enumerate() {
        cumulative += m;
        if cumulative >= target {
            return spec.bin_frequency(k);
        }
    }
    spec.bin_frequency(frame.len() - 1)
}

/// Geometric over arithmetic mean of the power spectrum, in [0, 1]
fn spectral_flatness(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let n = frame.len() as f32;
    let power: Vec<f32> = frame.iter().map(|m| m * m + LOG_FLOOR).collect();
    let log_mean = power.iter().map(|p| p.ln()).sum::<f32>() / n;
    let arith_mean = power.iter().sum::<f32>() / n;
    (log_mean.exp() / arith_mean).clamp(0.0, 1.0)
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

pub fn analyze_spectrum(
    spec: &Spectrogram,
    cancel: &CancellationToken,
) -> AnalysisResult<SpectralSummary> {
    let nyquist = spec.sample_rate as f32 / 2.0;
    let filterbank = MelFilterbank::new(NUM_MEL_BANDS, spec.num_bins(), spec.sample_rate);

    let mut mfcc_sum = vec![0.0f64; NUM_MFCC];
    let mut centroids = Vec::with_capacity(spec.num_frames());
    let mut rolloffs = Vec::with_capacity(spec.num_frames());
    let mut flatness = Vec::with_capacity(spec.num_frames());

    for (i, frame) in spec.magnitudes.iter().enumerate() {
        checkpoint(cancel, i)?;
        let log_mel: Vec<f32> = filterbank
            .apply(frame)
            .into_iter()
            .map(|e| (e + LOG_FLOOR).ln())
            .collect();
        for (acc, c) in mfcc_sum.iter_mut().zip(dct_ortho(&log_mel, NUM_MFCC)) {
            *acc += c as f64;
        }
        centroids.push(spectral_centroid(spec, frame));
        rolloffs.push(spectral_rolloff(spec, frame));
        flatness.push(spectral_flatness(frame));
    }

    let frames = spec.num_frames().max(1) as f64;
    let mfcc = mfcc_sum.iter().map(|s| (s / frames) as f32).collect();

    Ok(SpectralSummary {
        mfcc,
        centroid_hz: mean(&centroids),
        rolloff_hz: mean(&rolloffs),
        zero_crossing_rate: mean(&spec.zcr),
        centroid_series: centroids.iter().map(|c| (c / nyquist).clamp(0.0, 1.0)).collect(),
        rolloff_series: rolloffs.iter().map(|r| (r / nyquist).clamp(0.0, 1.0)).collect(),
        flatness_series: flatness,
        zcr_series: spec.zcr.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::extractors::frames::compute_spectrogram;

    #[test]
    fn test_mel_roundtrip() {
        for hz in [0.0f32, 440.0, 4000.0, 11025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 0.5);
        }
    }

    #[test]
    fn test_filterbank_shape() {
        let fb = MelFilterbank::new(NUM_MEL_BANDS, 1025, 22_050);
        assert_eq!(fb.num_bands(), NUM_MEL_BANDS);
        let energies = fb.apply(&vec![1.0; 1025]);
        assert!(energies.iter().all(|e| *e > 0.0));
    }

    #[test]
    fn test_dct_of_constant_is_dc_only() {
        let out = dct_ortho(&[2.0; 8], 4);
        assert!((out[0] - 2.0 * 8f32.sqrt()).abs() < 1e-4);
        assert!(out[1..].iter().all(|c| c.abs() < 1e-4));
    }

    #[test]
    fn test_flatness_extremes() {
        assert!(spectral_flatness(&[1.0; 64]) > 0.99);
        let mut peaky = vec![0.0f32; 64];
        peaky[10] = 1.0;
        assert!(spectral_flatness(&peaky) < 0.01);
    }

    #[test]
    fn test_sine_centroid_near_frequency() {
        let samples: Vec<f32> = (0..22_050)
            .map(|i| (2.0 * std::f32::consts::PI * 2000.0 * i as f32 / 22_050.0).sin() * 0.5)
            .collect();
        let spec = compute_spectrogram(&samples, 22_050, &CancellationToken::new()).unwrap();
        let summary = analyze_spectrum(&spec, &CancellationToken::new()).unwrap();
        assert!((summary.centroid_hz - 2000.0).abs() < 150.0, "{}", summary.centroid_hz);
        assert!(summary.rolloff_hz >= 1900.0 && summary.rolloff_hz < 2300.0);
        assert_eq!(summary.mfcc.len(), NUM_MFCC);
        assert_eq!(summary.centroid_series.len(), spec.num_frames());
        assert!(summary.centroid_series.iter().all(|c| (0.0..=1.0).contains(c)));
    }

    #[test]
    fn test_cancelled_spectrum() {
        let samples = vec![0.25f32; 22_050];
        let spec = compute_spectrogram(&samples, 22_050, &CancellationToken::new()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = analyze_spectrum(&spec, &cancel);
        assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
    }
}
