//! Persisted analysis record
//!
//! One record per (fingerprint, model_version). Records are never mutated;
//! re-analysis under an upgraded algorithm produces a new record under the
//! new model version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub fingerprint: String,
    pub model_version: String,
}

impl RecordKey {
    pub fn new(fingerprint: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            model_version: model_version.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.fingerprint, self.model_version)
    }
}

/// Major or minor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

/// Detected key: tonic pitch class (0 = C … 11 = B) and mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MusicalKey {
    pub pitch_class: u8,
    pub mode: Mode,
}

const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

impl MusicalKey {
    pub fn new(pitch_class: u8, mode: Mode) -> Self {
        Self {
            pitch_class: pitch_class % 12,
            mode,
        }
    }

    /// Tonic of the relative major (the key itself when already major)
    pub fn relative_major_tonic(&self) -> u8 {
        match self.mode {
            Mode::Major => self.pitch_class,
            Mode::Minor => (self.pitch_class + 3) % 12,
        }
    }

    /// True for a relative major/minor pair (e.g. C major / A minor)
    pub fn is_relative_of(&self, other: &MusicalKey) -> bool {
        self.mode != other.mode && self.relative_major_tonic() == other.relative_major_tonic()
    }
}

impl fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = PITCH_NAMES[(self.pitch_class % 12) as usize];
        match self.mode {
            Mode::Major => write!(f, "{} major", name),
            Mode::Minor => write!(f, "{} minor", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats_per_bar: u8,
    pub beat_unit: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature {
        beats_per_bar: 4,
        beat_unit: 4,
    };
    pub const WALTZ: TimeSignature = TimeSignature {
        beats_per_bar: 3,
        beat_unit: 4,
    };
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats_per_bar, self.beat_unit)
    }
}

/// Whether the whole clip or a centered excerpt was analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    Full,
    Basic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicDescriptors {
    pub tempo_bpm: f32,
    pub key: MusicalKey,
    pub time_signature: TimeSignature,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralDescriptors {
    /// Mean of the first 13 mel-frequency cepstral coefficients
    pub mfcc: Vec<f32>,
    /// Mean spectral centroid in Hz
    pub spectral_centroid: f32,
    /// Mean 85% spectral rolloff in Hz
    pub spectral_rolloff: f32,
    /// Mean zero crossings per sample
    pub zero_crossing_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicDescriptors {
    /// Pitch-class energy, max-normalized (C first)
    pub chroma: [f32; 12],
    pub key_strength: f32,
    /// 6-D tonal centroid of the chroma
    pub tonal_centroid: [f32; 6],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhythmicDescriptors {
    /// Pulse clarity in [0, 1]
    pub beat_strength: f32,
    /// Onsets per second
    pub onset_density: f32,
    /// 1.0 = perfectly steady tempo
    pub tempo_stability: f32,
}

/// Metric value with its provenance tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f32,
    pub methodology: String,
}

impl MetricValue {
    pub fn new(value: f32, methodology: impl Into<String>) -> Self {
        Self {
            value,
            methodology: methodology.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetrics {
    pub dynamics_quotient: MetricValue,
    pub mad_divergence: MetricValue,
    pub texture_complexity: MetricValue,
}

/// Result of one pipeline run on one asset under one model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub fingerprint: String,
    pub model_version: String,
    pub analysis_depth: AnalysisDepth,
    pub basic: BasicDescriptors,
    pub spectral: SpectralDescriptors,
    pub harmonic: HarmonicDescriptors,
    pub rhythmic: RhythmicDescriptors,
    pub metrics: CustomMetrics,
    /// Overall confidence in [0, 1]
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.fingerprint.clone(), self.model_version.clone())
    }
}
