//! Scripted pipeline and record fixtures
//!
//! `ScriptedPipeline` stands in for feature extraction in orchestrator tests:
//! it sleeps for a fixed time (polling cancellation unless built with
//! `uninterruptible`), counts invocations and fails any asset whose bytes
//! start with `FAIL`.

use chrono::Utc;
use cmx_analysis::config::EngineConfig;
use cmx_analysis::extractors::FeatureExtractor;
use cmx_analysis::models::{
    AnalysisDepth, AnalysisRecord, AssetMetadata, AudioAsset, AudioFormat, BasicDescriptors,
    CustomMetrics, HarmonicDescriptors, MetricValue, Mode, MusicalKey, RhythmicDescriptors,
    SpectralDescriptors, TimeSignature,
};
use cmx_analysis::orchestrator::AnalysisPipeline;
use cmx_analysis::{AnalysisError, AnalysisResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const SCRIPTED_MODEL_VERSION: &str = "scripted-v1";

pub struct ScriptedPipeline {
    delay: Duration,
    honors_cancel: bool,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    extractor: FeatureExtractor,
}

impl ScriptedPipeline {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            honors_cancel: true,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            extractor: FeatureExtractor::new(&EngineConfig::default()),
        }
    }

    /// Stage that only checks cancellation after its full delay, like a long
    /// native call
    pub fn uninterruptible(delay: Duration) -> Self {
        Self {
            honors_cancel: false,
            ..Self::new(delay)
        }
    }

    /// Number of times `analyze` was entered
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `analyze` calls that have not yet returned
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `analyze` calls observed
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

impl AnalysisPipeline for ScriptedPipeline {
    fn model_version(&self) -> &str {
        SCRIPTED_MODEL_VERSION
    }

    fn validate(&self, metadata: &AssetMetadata) -> AnalysisResult<()> {
        self.extractor.validate(metadata)
    }

    fn analyze(
        &self,
        asset: &AudioAsset,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> AnalysisResult<AnalysisRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now_running, Ordering::SeqCst);

        let started = Instant::now();
        let outcome = loop {
            if self.honors_cancel && cancel.is_cancelled() {
                break Err(AnalysisError::Cancelled);
            }
            if started.elapsed() >= self.delay {
                if cancel.is_cancelled() {
                    break Err(AnalysisError::Cancelled);
                }
                break Ok(());
            }
            std::thread::sleep(Duration::from_millis(2));
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        if asset.bytes().starts_with(b"FAIL") {
            return Err(AnalysisError::UnanalyzableAudio("scripted failure".into()));
        }

        let mut record = sample_record(fingerprint, 120.0, MusicalKey::new(0, Mode::Major));
        record.model_version = SCRIPTED_MODEL_VERSION.to_string();
        Ok(record)
    }
}

/// Asset with arbitrary content and valid declared metadata
pub fn scripted_asset(content: &[u8]) -> AudioAsset {
    AudioAsset::new(
        content.to_vec(),
        AssetMetadata {
            format: AudioFormat::Wav,
            duration_secs: 30.0,
            sample_rate: 44100,
            channels: 2,
        },
    )
}

/// Plausible record for scoring and storage tests
pub fn sample_record(fingerprint: &str, tempo_bpm: f32, key: MusicalKey) -> AnalysisRecord {
    AnalysisRecord {
        fingerprint: fingerprint.to_string(),
        model_version: cmx_analysis::MODEL_VERSION.to_string(),
        analysis_depth: AnalysisDepth::Full,
        basic: BasicDescriptors {
            tempo_bpm,
            key,
            time_signature: TimeSignature::COMMON,
            duration_secs: 30.0,
        },
        spectral: SpectralDescriptors {
            mfcc: vec![-200.0, 40.0, -10.0, 5.0, 2.0, -1.0, 0.5, 0.0, 0.3, -0.2, 0.1, 0.0, 0.0],
            spectral_centroid: 1800.0,
            spectral_rolloff: 4200.0,
            zero_crossing_rate: 0.08,
        },
        harmonic: HarmonicDescriptors {
            chroma: [0.9, 0.1, 0.4, 0.1, 0.7, 0.5, 0.1, 0.8, 0.1, 0.5, 0.1, 0.3],
            key_strength: 0.75,
            tonal_centroid: [0.1, 0.2, -0.1, 0.05, 0.0, 0.1],
        },
        rhythmic: RhythmicDescriptors {
            beat_strength: 0.6,
            onset_density: 2.5,
            tempo_stability: 0.9,
        },
        metrics: CustomMetrics {
            dynamics_quotient: MetricValue::new(0.25, "dq-v1:rms500ms-cv"),
            mad_divergence: MetricValue::new(0.2, "mad-v1:kk24-tvd"),
            texture_complexity: MetricValue::new(0.5, "tc-v1:wvar-sat0.01"),
        },
        confidence: 0.8,
        created_at: Utc::now(),
    }
}
