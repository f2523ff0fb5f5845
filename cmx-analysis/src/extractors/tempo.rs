//! Tempo, pulse and meter estimation
//!
//! Works on a log-compressed spectral-flux onset envelope. The beat period is
//! the autocorrelation lag in the 60–200 BPM range that scores best after
//! weighting by a log-normal tempo prior centered at 120 BPM (one octave
//! standard deviation), refined by parabolic interpolation.

use super::frames::{checkpoint, Spectrogram};
use crate::error::{AnalysisError, AnalysisResult};
use crate::models::TimeSignature;
use tokio_util::sync::CancellationToken;

pub const MIN_BPM: f32 = 60.0;
pub const MAX_BPM: f32 = 200.0;
pub const PRIOR_CENTER_BPM: f32 = 120.0;
/// Prior standard deviation in octaves
const PRIOR_SIGMA_OCTAVES: f32 = 1.0;

const LOCAL_WINDOW_SECS: f32 = 8.0;
const LOCAL_HOP_SECS: f32 = 4.0;
/// Tempo deviation (BPM) at which stability falls to 1/e
const STABILITY_SCALE_BPM: f32 = 4.0;

/// Flux log compression factor
const FLUX_COMPRESSION: f32 = 100.0;

const ONSET_THRESHOLD_SIGMAS: f32 = 0.5;
const ONSET_MIN_SPACING_FRAMES: usize = 3;

/// Triangular kernel applied before periodicity analysis
const SMOOTHING_KERNEL: [f32; 5] = [1.0, 2.0, 3.0, 2.0, 1.0];

/// Autocorrelation at three beats must beat four beats by this margin for 3/4
const TRIPLE_METER_MARGIN: f32 = 0.10;

#[derive(Debug, Clone, PartialEq)]
pub struct RhythmAnalysis {
    pub bpm: f32,
    /// Normalized autocorrelation at the beat period, in [0, 1]
    pub pulse_clarity: f32,
    /// `exp(-σ / 4 BPM)` over the 8 s local tempo estimates
    pub tempo_stability: f32,
    /// Onsets per second
    pub onset_density: f32,
    pub time_signature: TimeSignature,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PeriodEstimate {
    lag: f32,
    bpm: f32,
    clarity: f32,
}

pub fn analyze_rhythm(
    spec: &Spectrogram,
    duration_secs: f64,
    cancel: &CancellationToken,
) -> AnalysisResult<RhythmAnalysis> {
    let frame_rate = spec.frame_rate();
    let envelope = onset_envelope(spec, cancel)?;
    let smoothed = smooth(&envelope);

    let global = estimate_period(&smoothed, frame_rate);
    let (local_tempo_variance, tempo_stability) =
        local_tempo_stability(&smoothed, frame_rate, cancel)?;
    let onset_density = onset_density(&envelope, duration_secs);

    let (bpm, pulse_clarity, time_signature) = match global {
        Some(est) => (
            est.bpm,
            est.clarity,
            detect_time_signature(&smoothed, est.lag),
        ),
        None => (PRIOR_CENTER_BPM, 0.0, TimeSignature::COMMON),
    };

    tracing::debug!(
        bpm,
        pulse_clarity,
        local_tempo_variance,
        tempo_stability,
        onset_density,
        time_signature = %time_signature,
        "Rhythm analysis complete"
    );

    Ok(RhythmAnalysis {
        bpm,
        pulse_clarity,
        tempo_stability,
        onset_density,
        time_signature,
    })
}

/// Half-wave rectified log-magnitude difference between consecutive frames
pub fn onset_envelope(spec: &Spectrogram, cancel: &CancellationToken) -> AnalysisResult<Vec<f32>> {
    let mut envelope = Vec::with_capacity(spec.num_frames());
    let mut previous: Option<Vec<f32>> = None;

    for (i, frame) in spec.magnitudes.iter().enumerate() {
        checkpoint(cancel, i)?;
        let compressed: Vec<f32> = frame
            .iter()
            .map(|&m| (1.0 + FLUX_COMPRESSION * m).ln())
            .collect();
        let flux = match &previous {
            Some(prev) => compressed
                .iter()
                .zip(prev)
                .map(|(c, p)| (c - p).max(0.0))
                .sum(),
            None => 0.0,
        };
        envelope.push(flux);
        previous = Some(compressed);
    }

    Ok(envelope)
}

fn smooth(envelope: &[f32]) -> Vec<f32> {
    let half = SMOOTHING_KERNEL.len() / 2;
    let norm: f32 = SMOOTHING_KERNEL.iter().sum();
    (0..envelope.len())
        .map(|t| {
            SMOOTHING_KERNEL
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    (t + k)
                        .checked_sub(half)
                        .and_then(|i| envelope.get(i))
                        .map(|x| x * w)
                })
                .sum::<f32>()
                / norm
        })
        .collect()
}

/// Mean-removed autocorrelation normalized by lag 0
///
/// Returns `None` when the signal has no variance.
fn autocorrelation(signal: &[f32], max_lag: usize) -> Option<Vec<f32>> {
    if signal.len() < 2 {
        return None;
    }
    let mean = signal.iter().map(|&x| x as f64).sum::<f64>() / signal.len() as f64;
    let centered: Vec<f64> = signal.iter().map(|&x| x as f64 - mean).collect();

    let energy: f64 = centered.iter().map(|x| x * x).sum();
    if energy <= 1e-12 {
        return None;
    }

    let max_lag = max_lag.min(centered.len() - 1);
    let ac = (0..=max_lag)
        .map(|lag| {
            let sum: f64 = centered[..centered.len() - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum();
            (sum / energy) as f32
        })
        .collect();
    Some(ac)
}

fn lag_to_bpm(lag: f32, frame_rate: f32) -> f32 {
    60.0 * frame_rate / lag
}

fn tempo_prior(bpm: f32) -> f32 {
    let octaves = (bpm / PRIOR_CENTER_BPM).log2() / PRIOR_SIGMA_OCTAVES;
    (-0.5 * octaves * octaves).exp()
}

fn estimate_period(envelope: &[f32], frame_rate: f32) -> Option<PeriodEstimate> {
    let min_lag = ((60.0 * frame_rate / MAX_BPM).floor() as usize).max(1);
    let max_lag = (60.0 * frame_rate / MIN_BPM).ceil() as usize;
    if envelope.len() <= min_lag + 2 {
        return None;
    }

    let ac = autocorrelation(envelope, max_lag + 1)?;
    let max_lag = max_lag.min(ac.len() - 1);

    let weighted: Vec<f32> = (0..ac.len())
        .map(|lag| {
            if lag == 0 {
                0.0
            } else {
                ac[lag] * tempo_prior(lag_to_bpm(lag as f32, frame_rate))
            }
        })
        .collect();

    let mut best_lag = min_lag;
    for lag in min_lag..=max_lag {
        if weighted[lag] > weighted[best_lag] {
            best_lag = lag;
        }
    }
    if weighted[best_lag] <= 0.0 {
        return None;
    }

    let refined = if best_lag > 0 && best_lag + 1 < weighted.len() {
        let (y0, y1, y2) = (
            weighted[best_lag - 1],
            weighted[best_lag],
            weighted[best_lag + 1],
        );
        let denom = y0 - 2.0 * y1 + y2;
        if denom < 0.0 {
            best_lag as f32 + (0.5 * (y0 - y2) / denom).clamp(-0.5, 0.5)
        } else {
            best_lag as f32
        }
    } else {
        best_lag as f32
    };

    Some(PeriodEstimate {
        lag: refined,
        bpm: lag_to_bpm(refined, frame_rate).clamp(MIN_BPM, MAX_BPM),
        clarity: ac[best_lag].clamp(0.0, 1.0),
    })
}

/// Variance of local tempo estimates and the derived stability in (0, 1]
fn local_tempo_stability(
    envelope: &[f32],
    frame_rate: f32,
    cancel: &CancellationToken,
) -> AnalysisResult<(f32, f32)> {
    let window = (LOCAL_WINDOW_SECS * frame_rate).round() as usize;
    let hop = ((LOCAL_HOP_SECS * frame_rate).round() as usize).max(1);

    let local: Vec<f32> = if envelope.len() <= window {
        estimate_period(envelope, frame_rate)
            .map(|e| vec![e.bpm])
            .unwrap_or_default()
    } else {
        let mut estimates = Vec::new();
        for start in (0..=envelope.len() - window).step_by(hop) {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            if let Some(e) = estimate_period(&envelope[start..start + window], frame_rate) {
                estimates.push(e.bpm);
            }
        }
        estimates
    };

    if local.len() < 2 {
        return Ok((0.0, 1.0));
    }

    let mean = local.iter().sum::<f32>() / local.len() as f32;
    let variance = local.iter().map(|b| (b - mean).powi(2)).sum::<f32>() / local.len() as f32;
    let sigma = variance.sqrt();
    Ok((variance, (-sigma / STABILITY_SCALE_BPM).exp()))
}

/// Peaks above mean + 0.5σ, at least three frames apart, per second
fn onset_density(envelope: &[f32], duration_secs: f64) -> f32 {
    if envelope.len() < 3 || duration_secs <= 0.0 {
        return 0.0;
    }

    let n = envelope.len() as f32;
    let mean = envelope.iter().sum::<f32>() / n;
    let sigma = (envelope.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n).sqrt();
    let threshold = mean + ONSET_THRESHOLD_SIGMAS * sigma;

    let mut count = 0usize;
    let mut last_peak: Option<usize> = None;
    for t in 1..envelope.len() - 1 {
        let is_peak = envelope[t] > threshold
            && envelope[t] > envelope[t - 1]
            && envelope[t] >= envelope[t + 1];
        if !is_peak {
            continue;
        }
        if last_peak.map_or(true, |p| t - p >= ONSET_MIN_SPACING_FRAMES) {
            count += 1;
            last_peak = Some(t);
        }
    }

    (count as f64 / duration_secs) as f32
}

fn interpolate(values: &[f32], position: f32) -> Option<f32> {
    let index = position.floor() as usize;
    let frac = position - index as f32;
    let a = *values.get(index)?;
    let b = values.get(index + 1).copied().unwrap_or(a);
    Some(a + (b - a) * frac)
}

fn detect_time_signature(envelope: &[f32], beat_lag: f32) -> TimeSignature {
    let max_lag = (4.0 * beat_lag).ceil() as usize + 1;
    if max_lag >= envelope.len() {
        return TimeSignature::COMMON;
    }
    let Some(ac) = autocorrelation(envelope, max_lag) else {
        return TimeSignature::COMMON;
    };

    match (
        interpolate(&ac, 3.0 * beat_lag),
        interpolate(&ac, 4.0 * beat_lag),
    ) {
        (Some(three), Some(four)) if three > 0.0 && three > four + TRIPLE_METER_MARGIN * four.abs() => {
            TimeSignature::WALTZ
        }
        _ => TimeSignature::COMMON,
    }
}
