//! Compatibility scorer
//!
//! Pairwise, symmetric similarity between two analysis records, blended with
//! a named weight set. Every factor function is order-independent, so
//! `score(a, b) == score(b, a)` exactly.

use crate::config::{ScoringConfig, ScoringWeights};
use crate::models::{
    AnalysisRecord, CompatibilityScore, DeclaredAttributes, Factor, MusicalKey,
    RhythmicDescriptors, SpectralDescriptors, SubScore,
};
use crate::services::ANALYSIS_SAMPLE_RATE;
use std::collections::BTreeSet;

/// Identifies the factor formulas; combined with the weights into `scoring_version`
pub const SCORING_FORMULA_VERSION: &str = "cmx-score-2";

const RELATIVE_KEY_SIMILARITY: f32 = 0.9;
const DISTANT_KEY_CEILING: f32 = 0.8;
const MODE_MISMATCH_FACTOR: f32 = 0.9;

const SPECTRAL_MFCC_WEIGHT: f32 = 0.7;
const SPECTRAL_SHAPE_WEIGHT: f32 = 0.3;

const RHYTHM_BEAT_WEIGHT: f32 = 0.6;
const RHYTHM_STABILITY_WEIGHT: f32 = 0.4;

const DECLARED_GENRE_WEIGHT: f32 = 0.6;
const DECLARED_TAG_WEIGHT: f32 = 0.4;

/// Tempo similarity: 1 at equal tempo, falling linearly to 0 at `tolerance_bpm`
pub fn tempo_similarity(a_bpm: f32, b_bpm: f32, tolerance_bpm: f32) -> f32 {
    1.0 - ((a_bpm - b_bpm).abs() / tolerance_bpm).min(1.0)
}

/// Steps between two tonics around the circle of fifths, 0..=6
fn fifths_distance(a: u8, b: u8) -> u8 {
    let d = (7 * (a as i16 - b as i16)).rem_euclid(12) as u8;
    d.min(12 - d)
}

/// Key similarity
///
/// Identical keys score 1.0 and relative major/minor pairs 0.9. Other pairs
/// score by the circle-of-fifths distance between their relative-major tonics,
/// so neighboring keys (one accidental apart) rank above chromatic neighbors,
/// with a further reduction when the modes differ.
pub fn key_similarity(a: MusicalKey, b: MusicalKey) -> f32 {
    if a == b {
        return 1.0;
    }
    if a.is_relative_of(&b) {
        return RELATIVE_KEY_SIMILARITY;
    }
    let d = fifths_distance(a.relative_major_tonic(), b.relative_major_tonic()) as f32;
    let base = DISTANT_KEY_CEILING * (1.0 - d / 6.0);
    if a.mode != b.mode {
        base * MODE_MISMATCH_FACTOR
    } else {
        base
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    match (norm_a > f32::EPSILON, norm_b > f32::EPSILON) {
        (true, true) => (dot / (norm_a * norm_b)).clamp(-1.0, 1.0),
        (false, false) => 1.0,
        _ => 0.0,
    }
}

/// Timbre similarity from MFCC shape (coefficient 0 excluded) and
/// centroid/rolloff/zero-crossing differences
pub fn spectral_similarity(a: &SpectralDescriptors, b: &SpectralDescriptors) -> f32 {
    let mfcc_a = a.mfcc.get(1..).unwrap_or_default();
    let mfcc_b = b.mfcc.get(1..).unwrap_or_default();
    let mfcc_term = (1.0 + cosine(mfcc_a, mfcc_b)) / 2.0;

    let nyquist = ANALYSIS_SAMPLE_RATE as f32 / 2.0;
    let diffs = [
        ((a.spectral_centroid - b.spectral_centroid).abs() / nyquist).min(1.0),
        ((a.spectral_rolloff - b.spectral_rolloff).abs() / nyquist).min(1.0),
        (a.zero_crossing_rate - b.zero_crossing_rate).abs().min(1.0),
    ];
    let shape_term = 1.0 - diffs.iter().sum::<f32>() / diffs.len() as f32;

    (SPECTRAL_MFCC_WEIGHT * mfcc_term + SPECTRAL_SHAPE_WEIGHT * shape_term).clamp(0.0, 1.0)
}

pub fn rhythmic_similarity(a: &RhythmicDescriptors, b: &RhythmicDescriptors) -> f32 {
    let beat = 1.0 - (a.beat_strength - b.beat_strength).abs().min(1.0);
    let stability = 1.0 - (a.tempo_stability - b.tempo_stability).abs().min(1.0);
    RHYTHM_BEAT_WEIGHT * beat + RHYTHM_STABILITY_WEIGHT * stability
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

pub fn declared_similarity(a: &DeclaredAttributes, b: &DeclaredAttributes) -> f32 {
    DECLARED_GENRE_WEIGHT * jaccard(&a.genres, &b.genres)
        + DECLARED_TAG_WEIGHT * jaccard(&a.tags, &b.tags)
}

/// Version string derived from the formula version, weights and tolerance
pub fn scoring_version(config: &ScoringConfig) -> String {
    let w = &config.weights;
    format!(
        "{}/t{:.3}k{:.3}s{:.3}r{:.3}d{:.3}/tol{:.1}",
        SCORING_FORMULA_VERSION,
        w.tempo,
        w.key,
        w.spectral,
        w.rhythmic,
        w.declared,
        config.tempo_tolerance_bpm
    )
}

pub struct CompatibilityScorer {
    config: ScoringConfig,
    version: String,
}

impl CompatibilityScorer {
    /// # Errors
    /// `Error::Config` when the weights do not sum to 1 or thresholds are out of range
    pub fn new(config: ScoringConfig) -> cmx_common::Result<Self> {
        config.validate()?;
        let version = scoring_version(&config);
        Ok(Self { config, version })
    }

    pub fn scoring_version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Effective weights; the declared weight is redistributed when absent
    fn effective_weights(&self, has_declared: bool) -> ScoringWeights {
        let w = self.config.weights;
        if has_declared {
            return w;
        }
        let remaining = w.tempo + w.key + w.spectral + w.rhythmic;
        if remaining <= f32::EPSILON {
            return ScoringWeights {
                tempo: 0.25,
                key: 0.25,
                spectral: 0.25,
                rhythmic: 0.25,
                declared: 0.0,
            };
        }
        ScoringWeights {
            tempo: w.tempo / remaining,
            key: w.key / remaining,
            spectral: w.spectral / remaining,
            rhythmic: w.rhythmic / remaining,
            declared: 0.0,
        }
    }

    /// Score two records, optionally with their owners' declared attributes
    pub fn score(
        &self,
        a: &AnalysisRecord,
        b: &AnalysisRecord,
        declared: Option<(&DeclaredAttributes, &DeclaredAttributes)>,
    ) -> CompatibilityScore {
        let weights = self.effective_weights(declared.is_some());

        let mut factors = vec![
            (
                Factor::Tempo,
                tempo_similarity(
                    a.basic.tempo_bpm,
                    b.basic.tempo_bpm,
                    self.config.tempo_tolerance_bpm,
                ),
                weights.tempo,
            ),
            (
                Factor::Key,
                key_similarity(a.basic.key, b.basic.key),
                weights.key,
            ),
            (
                Factor::Spectral,
                spectral_similarity(&a.spectral, &b.spectral),
                weights.spectral,
            ),
            (
                Factor::Rhythmic,
                rhythmic_similarity(&a.rhythmic, &b.rhythmic),
                weights.rhythmic,
            ),
        ];
        if let Some((da, db)) = declared {
            factors.push((
                Factor::Declared,
                declared_similarity(da, db),
                weights.declared,
            ));
        }

        let sub_scores: Vec<SubScore> = factors
            .into_iter()
            .map(|(factor, score, weight)| SubScore {
                factor,
                score,
                weight,
                contribution: score * weight,
            })
            .collect();

        let overall = sub_scores
            .iter()
            .map(|s| s.contribution)
            .sum::<f32>()
            .clamp(0.0, 1.0);

        let reasons = self.reasons(&sub_scores, a, b, declared);
        let min_confidence = self.config.thresholds.min_confidence;
        let low_confidence = a.confidence < min_confidence || b.confidence < min_confidence;

        tracing::debug!(
            a = %a.fingerprint,
            b = %b.fingerprint,
            overall,
            low_confidence,
            "Compatibility scored"
        );

        CompatibilityScore {
            overall,
            sub_scores,
            reasons,
            low_confidence,
            scoring_version: self.version.clone(),
        }
    }

    fn reasons(
        &self,
        sub_scores: &[SubScore],
        a: &AnalysisRecord,
        b: &AnalysisRecord,
        declared: Option<(&DeclaredAttributes, &DeclaredAttributes)>,
    ) -> Vec<String> {
        let notable = self.config.thresholds.notable;
        let mut ranked: Vec<&SubScore> = sub_scores.iter().filter(|s| s.score > notable).collect();
        ranked.sort_by(|x, y| {
            y.contribution
                .total_cmp(&x.contribution)
                .then(x.factor.cmp(&y.factor))
        });

        ranked
            .into_iter()
            .map(|s| match s.factor {
                Factor::Tempo => {
                    let (lo, hi) = ordered(a.basic.tempo_bpm, b.basic.tempo_bpm);
                    format!("Similar tempo ({:.1} and {:.1} BPM)", lo, hi)
                }
                Factor::Key => {
                    let (ka, kb) = (a.basic.key, b.basic.key);
                    if ka == kb {
                        format!("Same key ({})", ka)
                    } else {
                        let (first, second) = ordered_names(ka.to_string(), kb.to_string());
                        if ka.is_relative_of(&kb) {
                            format!("Relative keys ({} and {})", first, second)
                        } else {
                            format!("Compatible keys ({} and {})", first, second)
                        }
                    }
                }
                Factor::Spectral => "Similar timbre and spectral balance".to_string(),
                Factor::Rhythmic => "Similar rhythmic feel (pulse strength and steadiness)".to_string(),
                Factor::Declared => match declared {
                    Some((da, db)) => {
                        let shared: Vec<&str> = da
                            .genres
                            .intersection(&db.genres)
                            .chain(da.tags.intersection(&db.tags))
                            .map(String::as_str)
                            .collect();
                        format!("Shared genres and tags: {}", shared.join(", "))
                    }
                    None => "Shared genres and tags".to_string(),
                },
            })
            .collect()
    }
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn ordered_names(a: String, b: String) -> (String, String) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
