//! Chroma, key and tonal centroid
//!
//! Key estimation correlates the clip's chroma vector with the 24 rotations of
//! the Krumhansl–Kessler major and minor profiles.
//!
//! # Reference
//!
//! Krumhansl, C. L. (1990). *Cognitive Foundations of Musical Pitch*.
//! Harte, C., Sandler, M., & Gasser, M. (2006). Detecting Harmonic Change in
//! Musical Audio.

use super::frames::{checkpoint, Spectrogram};
use crate::error::AnalysisResult;
use crate::models::{Mode, MusicalKey};
use std::f32::consts::PI;
use tokio_util::sync::CancellationToken;

const CHROMA_MIN_HZ: f32 = 55.0;
const CHROMA_MAX_HZ: f32 = 5000.0;

pub const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
pub const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Tonal centroid circle radii: fifths, minor thirds, major thirds
const CENTROID_RADII: [f32; 3] = [1.0, 1.0, 0.5];

#[derive(Debug, Clone, PartialEq)]
pub struct KeyEstimate {
    pub key: MusicalKey,
    /// Pearson correlation of the winning template, floored at 0
    pub strength: f32,
}

/// Profile for `key`, rotated so index 0 is pitch class C
pub fn key_template(key: MusicalKey) -> [f32; 12] {
    let profile = match key.mode {
        Mode::Major => &MAJOR_PROFILE,
        Mode::Minor => &MINOR_PROFILE,
    };
    let mut template = [0.0f32; 12];
    for (degree, weight) in profile.iter().enumerate() {
        template[(key.pitch_class as usize + degree) % 12] = *weight;
    }
    template
}

/// All 24 keys: majors C..B, then minors C..B
pub fn all_keys() -> impl Iterator<Item = MusicalKey> {
    [Mode::Major, Mode::Minor]
        .into_iter()
        .flat_map(|mode| (0..12u8).map(move |pc| MusicalKey::new(pc, mode)))
}

/// Scale a vector to unit L1 norm; all-zero input stays zero
pub fn l1_normalize(values: &[f32; 12]) -> [f32; 12] {
    let sum: f32 = values.iter().map(|v| v.abs()).sum();
    if sum <= f32::EPSILON {
        return [0.0; 12];
    }
    values.map(|v| v / sum)
}

/// Accumulated pitch-class power between 55 Hz and 5 kHz, max-normalized
pub fn compute_chroma(spec: &Spectrogram, cancel: &CancellationToken) -> AnalysisResult<[f32; 12]> {
    let bin_classes: Vec<Option<usize>> = (0..spec.num_bins())
        .map(|k| {
            let freq = spec.bin_frequency(k);
            if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&freq) {
                return None;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            Some((midi.round() as i64).rem_euclid(12) as usize)
        })
        .collect();

    let mut chroma = [0.0f64; 12];
    for (i, frame) in spec.magnitudes.iter().enumerate() {
        checkpoint(cancel, i)?;
        for (mag, class) in frame.iter().zip(&bin_classes) {
            if let Some(pc) = class {
                chroma[*pc] += (*mag as f64).powi(2);
            }
        }
    }

    let max = chroma.iter().cloned().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return Ok([0.0; 12]);
    }
    Ok(chroma.map(|c| (c / max) as f32))
}

fn pearson(a: &[f32; 12], b: &[f32; 12]) -> f32 {
    let mean_a = a.iter().sum::<f32>() / 12.0;
    let mean_b = b.iter().sum::<f32>() / 12.0;
    let (mut cov, mut var_a, mut var_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        cov / denom
    }
}

/// Best-correlating key
///
/// Ties resolve to the first key in [`all_keys`] order (major before minor,
/// then lower pitch class).
pub fn estimate_key(chroma: &[f32; 12]) -> KeyEstimate {
    let mut best = MusicalKey::new(0, Mode::Major);
    let mut best_r = f32::NEG_INFINITY;

    for key in all_keys() {
        let r = pearson(chroma, &key_template(key));
        if r > best_r {
            best = key;
            best_r = r;
        }
    }

    KeyEstimate {
        key: best,
        strength: best_r.max(0.0),
    }
}

/// Harte 6-D tonal centroid of the L1-normalized chroma
pub fn tonal_centroid(chroma: &[f32; 12]) -> [f32; 6] {
    let weights = l1_normalize(chroma);
    let mut centroid = [0.0f32; 6];
    for (pc, w) in weights.iter().enumerate() {
        let l = pc as f32;
        let angles = [l * 7.0 * PI / 6.0, l * 3.0 * PI / 2.0, l * 2.0 * PI / 3.0];
        for (i, (angle, radius)) in angles.iter().zip(CENTROID_RADII).enumerate() {
            centroid[2 * i] += w * radius * angle.sin();
            centroid[2 * i + 1] += w * radius * angle.cos();
        }
    }
    centroid
}
