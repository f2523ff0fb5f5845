//! Feature extractor
//!
//! Decodes an asset, checks duration and silence, chooses the analysis depth
//! and computes the raw descriptor set. Custom metrics are derived from the
//! result afterwards (see [`crate::metrics`]).

use super::frames::{self, amplitude_to_db, compute_spectrogram, Spectrogram};
use super::key::{self, KeyEstimate};
use super::spectral::{self, SpectralSummary};
use super::tempo::{self, RhythmAnalysis};
use super::MODEL_VERSION;
use crate::config::EngineConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{
    AnalysisDepth, AnalysisRecord, AssetMetadata, AudioAsset, BasicDescriptors, CustomMetrics,
    HarmonicDescriptors, RhythmicDescriptors, SpectralDescriptors,
};
use crate::services::AudioDecoder;
use chrono::Utc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// RMS envelope window in seconds
pub const RMS_WINDOW_SECS: f64 = 0.5;

/// Confidence multiplier applied to excerpt-based analyses
pub const BASIC_DEPTH_CONFIDENCE_FACTOR: f32 = 0.85;

const CONFIDENCE_WEIGHT_PULSE: f32 = 0.4;
const CONFIDENCE_WEIGHT_KEY: f32 = 0.3;
const CONFIDENCE_WEIGHT_ACTIVE: f32 = 0.3;

/// Extractor output; not persisted
#[derive(Debug, Clone, PartialEq)]
pub struct RawDescriptors {
    /// Decoded duration of the whole asset
    pub duration_secs: f64,
    pub analysis_depth: AnalysisDepth,
    /// Length of the audio actually analyzed (the excerpt for Basic depth)
    pub analyzed_secs: f64,
    pub sample_rate: u32,
    pub rhythm: RhythmAnalysis,
    pub chroma: [f32; 12],
    pub key: KeyEstimate,
    pub tonal_centroid: [f32; 6],
    pub spectral: SpectralSummary,
    /// RMS over consecutive 0.5 s windows
    pub rms_envelope: Vec<f32>,
    /// Fraction of STFT frames above the silence threshold
    pub active_fraction: f32,
}

impl RawDescriptors {
    /// Overall confidence in [0, 1]
    pub fn confidence(&self) -> f32 {
        let base = CONFIDENCE_WEIGHT_PULSE * self.rhythm.pulse_clarity
            + CONFIDENCE_WEIGHT_KEY * self.key.strength
            + CONFIDENCE_WEIGHT_ACTIVE * self.active_fraction;
        let scaled = match self.analysis_depth {
            AnalysisDepth::Full => base,
            AnalysisDepth::Basic => base * BASIC_DEPTH_CONFIDENCE_FACTOR,
        };
        scaled.clamp(0.0, 1.0)
    }

    /// Assemble the persisted record
    pub fn into_record(self, fingerprint: String, metrics: CustomMetrics) -> AnalysisRecord {
        let confidence = self.confidence();
        AnalysisRecord {
            fingerprint,
            model_version: MODEL_VERSION.to_string(),
            analysis_depth: self.analysis_depth,
            basic: BasicDescriptors {
                tempo_bpm: self.rhythm.bpm,
                key: self.key.key,
                time_signature: self.rhythm.time_signature,
                duration_secs: self.duration_secs,
            },
            spectral: SpectralDescriptors {
                mfcc: self.spectral.mfcc,
                spectral_centroid: self.spectral.centroid_hz,
                spectral_rolloff: self.spectral.rolloff_hz,
                zero_crossing_rate: self.spectral.zero_crossing_rate,
            },
            harmonic: HarmonicDescriptors {
                chroma: self.chroma,
                key_strength: self.key.strength,
                tonal_centroid: self.tonal_centroid,
            },
            rhythmic: RhythmicDescriptors {
                beat_strength: self.rhythm.pulse_clarity,
                onset_density: self.rhythm.onset_density,
                tempo_stability: self.rhythm.tempo_stability,
            },
            metrics,
            confidence,
            created_at: Utc::now(),
        }
    }
}

/// Feature extractor
///
/// Holds only configuration; one instance is shared by all workers.
pub struct FeatureExtractor {
    min_duration_secs: f64,
    max_duration_secs: f64,
    full_analysis_max_duration_secs: f64,
    basic_excerpt_secs: f64,
    silence_threshold_db: f32,
    decoder: AudioDecoder,
}

impl FeatureExtractor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            min_duration_secs: config.min_duration_secs,
            max_duration_secs: config.max_duration_secs,
            full_analysis_max_duration_secs: config.full_analysis_max_duration_secs,
            basic_excerpt_secs: config.basic_excerpt_secs,
            silence_threshold_db: config.silence_threshold_db,
            decoder: AudioDecoder::default(),
        }
    }

    /// Inclusive duration bounds check
    pub fn check_duration(&self, duration_secs: f64) -> AnalysisResult<()> {
        if duration_secs < self.min_duration_secs || duration_secs > self.max_duration_secs {
            return Err(AnalysisError::DurationOutOfRange {
                duration_secs,
                min_secs: self.min_duration_secs,
                max_secs: self.max_duration_secs,
            });
        }
        Ok(())
    }

    /// Cheap pre-admission validation against declared metadata
    pub fn validate(&self, metadata: &AssetMetadata) -> AnalysisResult<()> {
        if metadata.sample_rate == 0 || metadata.channels == 0 {
            return Err(AnalysisError::UnsupportedFormat(format!(
                "{} with {} Hz / {} channels",
                metadata.format, metadata.sample_rate, metadata.channels
            )));
        }
        self.check_duration(metadata.duration_secs)
    }

    pub fn analysis_depth_for(&self, duration_secs: f64) -> AnalysisDepth {
        if duration_secs > self.full_analysis_max_duration_secs {
            AnalysisDepth::Basic
        } else {
            AnalysisDepth::Full
        }
    }

    /// Extract raw descriptors from an asset
    ///
    /// # Errors
    /// - `DurationOutOfRange` when the decoded duration is outside bounds
    /// - `UnanalyzableAudio` for corrupt or silent audio
    /// - `UnsupportedFormat` for codecs the decoder lacks
    /// - `Cancelled` when `cancel` fires
    pub fn extract(
        &self,
        asset: &AudioAsset,
        cancel: &CancellationToken,
    ) -> AnalysisResult<RawDescriptors> {
        let started = Instant::now();
        let mut decoded = self.decoder.decode(asset.bytes(), asset.format(), cancel)?;
        let duration_secs = decoded.duration_secs();
        self.check_duration(duration_secs)?;

        let analysis_depth = self.analysis_depth_for(duration_secs);
        if analysis_depth == AnalysisDepth::Basic {
            decoded.center_excerpt(self.basic_excerpt_secs);
            debug!(
                duration_secs,
                excerpt_secs = self.basic_excerpt_secs,
                "Long clip, analyzing centered excerpt"
            );
        }

        let source_rate = decoded.sample_rate;
        let samples = self.decoder.resample(decoded.samples, source_rate, cancel)?;
        let sample_rate = self.decoder.target_sample_rate();
        let analyzed_secs = samples.len() as f64 / sample_rate as f64;

        let level_db = amplitude_to_db(frames::frame_rms(&samples));
        if level_db < self.silence_threshold_db {
            return Err(AnalysisError::UnanalyzableAudio(format!(
                "silent: {:.1} dBFS below threshold {:.1} dBFS",
                level_db, self.silence_threshold_db
            )));
        }

        let spec = compute_spectrogram(&samples, sample_rate, cancel)?;
        let raw = self.describe(
            &spec,
            &samples,
            duration_secs,
            analyzed_secs,
            analysis_depth,
            cancel,
        )?;

        info!(
            duration_secs,
            depth = ?raw.analysis_depth,
            bpm = raw.rhythm.bpm,
            key = %raw.key.key,
            confidence = raw.confidence(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Feature extraction complete"
        );

        Ok(raw)
    }

    fn describe(
        &self,
        spec: &Spectrogram,
        samples: &[f32],
        duration_secs: f64,
        analyzed_secs: f64,
        analysis_depth: AnalysisDepth,
        cancel: &CancellationToken,
    ) -> AnalysisResult<RawDescriptors> {
        let rhythm = tempo::analyze_rhythm(spec, analyzed_secs, cancel)?;

        let chroma = key::compute_chroma(spec, cancel)?;
        let key_estimate = key::estimate_key(&chroma);
        let tonal_centroid = key::tonal_centroid(&chroma);

        let spectral = spectral::analyze_spectrum(spec, cancel)?;

        let window = (RMS_WINDOW_SECS * spec.sample_rate as f64).round() as usize;
        let rms_envelope = frames::rms_envelope(samples, window, cancel)?;

        let active_threshold = 10f32.powf(self.silence_threshold_db / 20.0);
        let active_frames = spec.rms.iter().filter(|r| **r >= active_threshold).count();
        let active_fraction = active_frames as f32 / spec.num_frames().max(1) as f32;

        Ok(RawDescriptors {
            duration_secs,
            analysis_depth,
            analyzed_secs,
            sample_rate: spec.sample_rate,
            rhythm,
            chroma,
            key: key_estimate,
            tonal_centroid,
            spectral,
            rms_envelope,
            active_fraction,
        })
    }
}
