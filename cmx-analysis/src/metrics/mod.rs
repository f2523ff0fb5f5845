//! Custom metric calculator
//!
//! Pure functions over [`RawDescriptors`]. Each metric carries a methodology
//! tag naming the formula and its constants, so stored values stay
//! interpretable after the formulas evolve.

use crate::extractors::key::{all_keys, key_template, l1_normalize};
use crate::extractors::spectral::SpectralSummary;
use crate::extractors::RawDescriptors;
use crate::models::{CustomMetrics, MetricValue};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DYNAMICS_QUOTIENT_METHOD: &str = "dq-v1:rms500ms-cv";
pub const MAD_DIVERGENCE_METHOD: &str = "mad-v1:kk24-tvd";
pub const TEXTURE_COMPLEXITY_METHOD: &str = "tc-v1:wvar-sat0.01";

/// Below this mean RMS the envelope is treated as silent
const DQ_MIN_MEAN: f32 = 1e-6;

/// Weighted variance at which texture complexity reaches 1 - 1/e
const TEXTURE_SATURATION: f32 = 0.01;
const TEXTURE_WEIGHT_CENTROID: f32 = 0.3;
const TEXTURE_WEIGHT_ROLLOFF: f32 = 0.2;
const TEXTURE_WEIGHT_FLATNESS: f32 = 0.3;
const TEXTURE_WEIGHT_ZCR: f32 = 0.2;

/// Interpretation band for a Dynamics Quotient value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicsBand {
    /// 0 – 0.3
    Static,
    /// 0.3 – 0.7
    Moderate,
    /// 0.7 – 1.2
    High,
    /// 1.2 and above
    Extreme,
}

impl DynamicsBand {
    pub fn from_value(dq: f32) -> Self {
        if dq < 0.3 {
            DynamicsBand::Static
        } else if dq < 0.7 {
            DynamicsBand::Moderate
        } else if dq < 1.2 {
            DynamicsBand::High
        } else {
            DynamicsBand::Extreme
        }
    }
}

impl fmt::Display for DynamicsBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DynamicsBand::Static => "static",
            DynamicsBand::Moderate => "moderate",
            DynamicsBand::High => "high",
            DynamicsBand::Extreme => "extreme",
        };
        f.write_str(s)
    }
}

fn mean_and_variance(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean as f32, variance as f32)
}

/// Coefficient of variation of the 0.5 s RMS envelope (not clamped)
pub fn dynamics_quotient(rms_envelope: &[f32]) -> MetricValue {
    let (mean, variance) = mean_and_variance(rms_envelope);
    let value = if mean < DQ_MIN_MEAN {
        0.0
    } else {
        variance.sqrt() / mean
    };
    MetricValue::new(value, DYNAMICS_QUOTIENT_METHOD)
}

/// Total variation distance to the nearest major/minor key profile
///
/// 0 = the chroma matches a key profile exactly; 1 = maximally distant.
/// An all-zero chroma scores 1.
pub fn mad_divergence(chroma: &[f32; 12]) -> MetricValue {
    let observed = l1_normalize(chroma);
    if observed.iter().all(|v| *v == 0.0) {
        return MetricValue::new(1.0, MAD_DIVERGENCE_METHOD);
    }

    let value = all_keys()
        .map(|key| {
            let template = l1_normalize(&key_template(key));
            0.5 * observed
                .iter()
                .zip(&template)
                .map(|(c, t)| (c - t).abs())
                .sum::<f32>()
        })
        .fold(1.0f32, f32::min);

    MetricValue::new(value.clamp(0.0, 1.0), MAD_DIVERGENCE_METHOD)
}

/// Saturating weighted variance of the normalized per-frame spectral series
pub fn texture_complexity(spectral: &SpectralSummary) -> MetricValue {
    let weighted = TEXTURE_WEIGHT_CENTROID * mean_and_variance(&spectral.centroid_series).1
        + TEXTURE_WEIGHT_ROLLOFF * mean_and_variance(&spectral.rolloff_series).1
        + TEXTURE_WEIGHT_FLATNESS * mean_and_variance(&spectral.flatness_series).1
        + TEXTURE_WEIGHT_ZCR * mean_and_variance(&spectral.zcr_series).1;
    let value = 1.0 - (-weighted / TEXTURE_SATURATION).exp();
    MetricValue::new(value.clamp(0.0, 1.0), TEXTURE_COMPLEXITY_METHOD)
}

/// All custom metrics for one extraction
pub fn calculate(raw: &RawDescriptors) -> CustomMetrics {
    let metrics = CustomMetrics {
        dynamics_quotient: dynamics_quotient(&raw.rms_envelope),
        mad_divergence: mad_divergence(&raw.chroma),
        texture_complexity: texture_complexity(&raw.spectral),
    };
    tracing::debug!(
        dq = metrics.dynamics_quotient.value,
        dq_band = %DynamicsBand::from_value(metrics.dynamics_quotient.value),
        mad = metrics.mad_divergence.value,
        texture = metrics.texture_complexity.value,
        "Custom metrics calculated"
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mode, MusicalKey};

    fn spectral_with_series(series: Vec<f32>) -> SpectralSummary {
        SpectralSummary {
            mfcc: vec![0.0; 13],
            centroid_hz: 0.0,
            rolloff_hz: 0.0,
            zero_crossing_rate: 0.0,
            centroid_series: series.clone(),
            rolloff_series: series.clone(),
            flatness_series: series.clone(),
            zcr_series: series,
        }
    }

    #[test]
    fn test_dq_constant_envelope_is_zero() {
        let dq = dynamics_quotient(&[0.4; 20]);
        assert!(dq.value.abs() < 1e-6);
        assert_eq!(dq.methodology, DYNAMICS_QUOTIENT_METHOD);
    }

    #[test]
    fn test_dq_near_silence_is_zero() {
        let dq = dynamics_quotient(&[1e-8, 5e-7, 0.0, 2e-7]);
        assert_eq!(dq.value, 0.0);
    }

    #[test]
    fn test_dq_alternating_envelope() {
        // mean 0.5, population sigma 0.5
        let dq = dynamics_quotient(&[0.0, 1.0, 0.0, 1.0]);
        assert!((dq.value - 1.0).abs() < 1e-6);
        assert_eq!(DynamicsBand::from_value(dq.value), DynamicsBand::High);
    }

    #[test]
    fn test_dynamics_bands() {
        assert_eq!(DynamicsBand::from_value(0.0), DynamicsBand::Static);
        assert_eq!(DynamicsBand::from_value(0.3), DynamicsBand::Moderate);
        assert_eq!(DynamicsBand::from_value(0.69), DynamicsBand::Moderate);
        assert_eq!(DynamicsBand::from_value(1.2), DynamicsBand::Extreme);
    }

    #[test]
    fn test_mad_zero_for_exact_profile() {
        let chroma = key_template(MusicalKey::new(5, Mode::Minor));
        let mad = mad_divergence(&chroma);
        assert!(mad.value < 1e-5, "mad = {}", mad.value);
    }

    #[test]
    fn test_mad_zero_chroma_is_maximal() {
        assert_eq!(mad_divergence(&[0.0; 12]).value, 1.0);
    }

    #[test]
    fn test_mad_single_pitch_is_divergent() {
        let mut chroma = [0.0f32; 12];
        chroma[3] = 1.0;
        let mad = mad_divergence(&chroma);
        assert!(mad.value > 0.8 && mad.value <= 1.0, "mad = {}", mad.value);
    }

    #[test]
    fn test_texture_constant_series_is_zero() {
        let tc = texture_complexity(&spectral_with_series(vec![0.25; 100]));
        assert!(tc.value.abs() < 1e-6);
        assert_eq!(tc.methodology, TEXTURE_COMPLEXITY_METHOD);
    }

    #[test]
    fn test_texture_saturates() {
        let series: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 0.0 } else { 1.0 }).collect();
        let tc = texture_complexity(&spectral_with_series(series));
        assert!(tc.value > 0.99);
        assert!(tc.value <= 1.0);
    }
}
