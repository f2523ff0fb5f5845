//! Short-time framing and magnitude spectra
//!
//! Hann-windowed frames of [`FRAME_SIZE`] samples every [`HOP_SIZE`] samples,
//! transformed with rustfft. Time-domain per-frame statistics (RMS, zero
//! crossing rate) are computed in the same pass.

use super::{FRAME_SIZE, HOP_SIZE};
use crate::error::{AnalysisError, AnalysisResult};
use apodize::hanning_iter;
use rustfft::{num_complex::Complex, FftPlanner};
use tokio_util::sync::CancellationToken;

/// Loop iterations between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 256;

/// Return `Cancelled` on every [`CANCEL_CHECK_INTERVAL`]th iteration once `cancel` fires
pub(crate) fn checkpoint(cancel: &CancellationToken, iteration: usize) -> AnalysisResult<()> {
    if iteration % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }
    Ok(())
}

/// Magnitude spectrogram plus per-frame time-domain statistics
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// `frames × (FRAME_SIZE / 2 + 1)` magnitudes
    pub magnitudes: Vec<Vec<f32>>,
    /// Per-frame RMS of the unwindowed samples
    pub rms: Vec<f32>,
    /// Per-frame zero crossings per sample
    pub zcr: Vec<f32>,
    pub sample_rate: u32,
}

impl Spectrogram {
    pub fn num_frames(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn num_bins(&self) -> usize {
        FRAME_SIZE / 2 + 1
    }

    /// Center frequency of FFT bin `k` in Hz
    pub fn bin_frequency(&self, k: usize) -> f32 {
        k as f32 * self.sample_rate as f32 / FRAME_SIZE as f32
    }

    /// Frames per second
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / HOP_SIZE as f32
    }
}

/// Compute the spectrogram of mono samples
///
/// Input shorter than one frame is zero-padded to a single frame.
pub fn compute_spectrogram(
    samples: &[f32],
    sample_rate: u32,
    cancel: &CancellationToken,
) -> AnalysisResult<Spectrogram> {
    let num_frames = if samples.len() <= FRAME_SIZE {
        1
    } else {
        1 + (samples.len() - FRAME_SIZE) / HOP_SIZE
    };

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FRAME_SIZE);
    let mut buffer = vec![Complex::new(0.0f32, 0.0); FRAME_SIZE];
    let mut scratch = vec![Complex::new(0.0f32, 0.0); fft.get_inplace_scratch_len()];
    let window: Vec<f32> = hanning_iter(FRAME_SIZE).map(|x| x as f32).collect();

    let num_bins = FRAME_SIZE / 2 + 1;
    let mut magnitudes = Vec::with_capacity(num_frames);
    let mut rms = Vec::with_capacity(num_frames);
    let mut zcr = Vec::with_capacity(num_frames);

    for i in 0..num_frames {
        checkpoint(cancel, i)?;

        let start = i * HOP_SIZE;
        let end = (start + FRAME_SIZE).min(samples.len());
        let frame = &samples[start..end];

        for (j, slot) in buffer.iter_mut().enumerate() {
            let sample = frame.get(j).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * window[j], 0.0);
        }
        fft.process_with_scratch(&mut buffer, &mut scratch);

        magnitudes.push(buffer[..num_bins].iter().map(|c| c.norm()).collect());
        rms.push(frame_rms(frame));
        zcr.push(zero_crossing_rate(frame));
    }

    Ok(Spectrogram {
        magnitudes,
        rms,
        zcr,
        sample_rate,
    })
}

pub fn frame_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Sign changes per sample, in [0, 1]
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

/// RMS over consecutive non-overlapping windows of `window_len` samples
///
/// A trailing partial window is kept only when no full window exists.
pub fn rms_envelope(
    samples: &[f32],
    window_len: usize,
    cancel: &CancellationToken,
) -> AnalysisResult<Vec<f32>> {
    if window_len == 0 || samples.is_empty() {
        return Ok(Vec::new());
    }
    let mut envelope = Vec::with_capacity(samples.len() / window_len);
    for (i, window) in samples.chunks_exact(window_len).enumerate() {
        checkpoint(cancel, i)?;
        envelope.push(frame_rms(window));
    }
    if envelope.is_empty() {
        envelope.push(frame_rms(samples));
    }
    Ok(envelope)
}

/// Convert linear amplitude to dBFS
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.max(1e-10).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, secs: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * secs) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_frame_count() {
        let samples = vec![0.0f32; FRAME_SIZE + 3 * HOP_SIZE];
        let spec = compute_spectrogram(&samples, 22_050, &CancellationToken::new()).unwrap();
        assert_eq!(spec.num_frames(), 4);
        assert_eq!(spec.magnitudes[0].len(), spec.num_bins());
    }

    #[test]
    fn test_short_input_single_frame() {
        let samples = vec![0.5f32; 100];
        let spec = compute_spectrogram(&samples, 22_050, &CancellationToken::new()).unwrap();
        assert_eq!(spec.num_frames(), 1);
    }

    #[test]
    fn test_sine_peak_bin() {
        let samples = sine(1000.0, 22_050, 1.0);
        let spec = compute_spectrogram(&samples, 22_050, &CancellationToken::new()).unwrap();
        let frame = &spec.magnitudes[5];
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        assert!((spec.bin_frequency(peak) - 1000.0).abs() < spec.bin_frequency(1));
    }

    #[test]
    fn test_cancelled_spectrogram() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = compute_spectrogram(&[0.0; 4096], 22_050, &cancel);
        assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
    }

    #[test]
    fn test_zero_crossing_rate() {
        assert_eq!(zero_crossing_rate(&[1.0, -1.0, 1.0, -1.0, 1.0]), 1.0);
        assert_eq!(zero_crossing_rate(&[1.0, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_rms_envelope_windows() {
        let cancel = CancellationToken::new();
        let samples = vec![0.5f32; 2500];
        let env = rms_envelope(&samples, 1000, &cancel).unwrap();
        assert_eq!(env.len(), 2);
        assert!((env[0] - 0.5).abs() < 1e-6);
        assert_eq!(rms_envelope(&samples[..10], 1000, &cancel).unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_rms_envelope() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = rms_envelope(&[0.5; 4000], 1000, &cancel);
        assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
    }

    #[test]
    fn test_amplitude_to_db() {
        assert!((amplitude_to_db(1.0)).abs() < 1e-6);
        assert!((amplitude_to_db(0.001) + 60.0).abs() < 1e-3);
    }
}
