//! Engine configuration
//!
//! All recognized options carry built-in defaults, so an empty TOML file (or
//! no file at all) yields a working engine. `validate()` is called once at
//! startup; the engine never re-reads configuration while running.

use cmx_common::config::{default_database_path, LoggingConfig};
use cmx_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bootstrap configuration file layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmxToml {
    /// SQLite database holding analysis records
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Engine tuning (optional)
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for CmxToml {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Extraction, orchestration and scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Shortest accepted clip in seconds, inclusive (default: 5.0)
    #[serde(default = "default_min_duration_secs")]
    pub min_duration_secs: f64,

    /// Longest accepted clip in seconds, inclusive (default: 1800.0)
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: f64,

    /// Clips longer than this get a Basic (excerpt) analysis (default: 600.0)
    #[serde(default = "default_full_analysis_max_duration_secs")]
    pub full_analysis_max_duration_secs: f64,

    /// Length of the centered excerpt used for Basic analysis (default: 120.0)
    #[serde(default = "default_basic_excerpt_secs")]
    pub basic_excerpt_secs: f64,

    /// Whole-clip RMS below this level is treated as silence (default: -60.0 dBFS)
    #[serde(default = "default_silence_threshold_db")]
    pub silence_threshold_db: f32,

    /// Maximum simultaneous extraction pipelines (default: 4)
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Submissions allowed to wait beyond the concurrency limit (default: 16)
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Per-extraction timeout in milliseconds (default: 120000)
    #[serde(default = "default_per_item_timeout_ms")]
    pub per_item_timeout_ms: u64,

    /// Maximum assets accepted in one batch (default: 64)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Compatibility scoring parameters
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: default_min_duration_secs(),
            max_duration_secs: default_max_duration_secs(),
            full_analysis_max_duration_secs: default_full_analysis_max_duration_secs(),
            basic_excerpt_secs: default_basic_excerpt_secs(),
            silence_threshold_db: default_silence_threshold_db(),
            concurrency_limit: default_concurrency_limit(),
            queue_depth: default_queue_depth(),
            per_item_timeout_ms: default_per_item_timeout_ms(),
            max_batch_size: default_max_batch_size(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_millis(self.per_item_timeout_ms)
    }

    /// Total submissions that may be admitted at once (running + queued)
    pub fn admission_capacity(&self) -> usize {
        self.concurrency_limit + self.queue_depth
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if !(self.min_duration_secs >= 0.0) {
            return Err(Error::Config(
                "min_duration_secs must be >= 0".to_string(),
            ));
        }
        if !(self.max_duration_secs >= self.min_duration_secs) {
            return Err(Error::Config(format!(
                "max_duration_secs ({}) must be >= min_duration_secs ({})",
                self.max_duration_secs, self.min_duration_secs
            )));
        }
        if !(self.basic_excerpt_secs >= self.min_duration_secs) {
            return Err(Error::Config(
                "basic_excerpt_secs must be >= min_duration_secs".to_string(),
            ));
        }
        if !(self.full_analysis_max_duration_secs >= self.basic_excerpt_secs) {
            return Err(Error::Config(
                "full_analysis_max_duration_secs must be >= basic_excerpt_secs".to_string(),
            ));
        }
        if self.silence_threshold_db > 0.0 {
            return Err(Error::Config(
                "silence_threshold_db must be negative dB".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::Config("concurrency_limit must be >= 1".to_string()));
        }
        if self.per_item_timeout_ms == 0 {
            return Err(Error::Config("per_item_timeout_ms must be >= 1".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be >= 1".to_string()));
        }
        self.scoring.validate()
    }
}

/// Compatibility scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Factor weights, summing to 1.0
    #[serde(default)]
    pub weights: ScoringWeights,

    /// BPM difference at which tempo similarity reaches 0 (default: 20.0)
    #[serde(default = "default_tempo_tolerance_bpm")]
    pub tempo_tolerance_bpm: f32,

    #[serde(default)]
    pub thresholds: SimilarityThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            tempo_tolerance_bpm: default_tempo_tolerance_bpm(),
            thresholds: SimilarityThresholds::default(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tempo_tolerance_bpm > 0.0) {
            return Err(Error::Config(
                "tempo_tolerance_bpm must be > 0".to_string(),
            ));
        }
        self.weights.validate()?;
        self.thresholds.validate()
    }
}

/// Named weight set for the overall compatibility blend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_weight_tempo")]
    pub tempo: f32,
    #[serde(default = "default_weight_key")]
    pub key: f32,
    #[serde(default = "default_weight_spectral")]
    pub spectral: f32,
    #[serde(default = "default_weight_rhythmic")]
    pub rhythmic: f32,
    #[serde(default = "default_weight_declared")]
    pub declared: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            tempo: default_weight_tempo(),
            key: default_weight_key(),
            spectral: default_weight_spectral(),
            rhythmic: default_weight_rhythmic(),
            declared: default_weight_declared(),
        }
    }
}

impl ScoringWeights {
    /// Allowed deviation of the weight sum from 1.0
    pub const SUM_TOLERANCE: f32 = 1e-6;

    pub fn sum(&self) -> f32 {
        self.tempo + self.key + self.spectral + self.rhythmic + self.declared
    }

    pub fn validate(&self) -> Result<()> {
        let all = [self.tempo, self.key, self.spectral, self.rhythmic, self.declared];
        if all.iter().any(|w| !(*w >= 0.0)) {
            return Err(Error::Config("scoring weights must be >= 0".to_string()));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(Error::Config(format!(
                "scoring weights must sum to 1.0 (got {})",
                sum
            )));
        }
        Ok(())
    }
}

/// Thresholds used when interpreting sub-scores and record confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityThresholds {
    /// Sub-scores above this produce a reason string (default: 0.8)
    #[serde(default = "default_notable_threshold")]
    pub notable: f32,

    /// Records below this confidence flag the score as low-confidence (default: 0.5)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            notable: default_notable_threshold(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl SimilarityThresholds {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.notable) || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config(
                "similarity thresholds must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_min_duration_secs() -> f64 {
    5.0
}

fn default_max_duration_secs() -> f64 {
    1800.0
}

fn default_full_analysis_max_duration_secs() -> f64 {
    600.0
}

fn default_basic_excerpt_secs() -> f64 {
    120.0
}

fn default_silence_threshold_db() -> f32 {
    -60.0
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_queue_depth() -> usize {
    16
}

fn default_per_item_timeout_ms() -> u64 {
    120_000
}

fn default_max_batch_size() -> usize {
    64
}

fn default_tempo_tolerance_bpm() -> f32 {
    20.0
}

fn default_weight_tempo() -> f32 {
    0.2
}

fn default_weight_key() -> f32 {
    0.15
}

fn default_weight_spectral() -> f32 {
    0.25
}

fn default_weight_rhythmic() -> f32 {
    0.2
}

fn default_weight_declared() -> f32 {
    0.2
}

fn default_notable_threshold() -> f32 {
    0.8
}

fn default_min_confidence() -> f32 {
    0.5
}
