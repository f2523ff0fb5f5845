//! Extraction pipeline seam
//!
//! The orchestrator drives any [`AnalysisPipeline`]; production uses
//! [`FeaturePipeline`] (feature extraction plus custom metrics).

use crate::config::EngineConfig;
use crate::error::AnalysisResult;
use crate::extractors::{FeatureExtractor, MODEL_VERSION};
use crate::metrics;
use crate::models::{AnalysisRecord, AssetMetadata, AudioAsset};
use tokio_util::sync::CancellationToken;

/// Synchronous, CPU-bound analysis of one asset
///
/// Called on the blocking thread pool. Implementations must poll `cancel`
/// often enough that a timed-out or cancelled run releases its worker
/// promptly.
pub trait AnalysisPipeline: Send + Sync + 'static {
    /// Version tag written into every record this pipeline produces
    fn model_version(&self) -> &str;

    /// Reject assets that cannot be analyzed, before admission
    fn validate(&self, metadata: &AssetMetadata) -> AnalysisResult<()>;

    fn analyze(
        &self,
        asset: &AudioAsset,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> AnalysisResult<AnalysisRecord>;
}

pub struct FeaturePipeline {
    extractor: FeatureExtractor,
}

impl FeaturePipeline {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config),
        }
    }
}

impl AnalysisPipeline for FeaturePipeline {
    fn model_version(&self) -> &str {
        MODEL_VERSION
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
        let raw = self.extractor.extract(asset, cancel)?;
        let custom = metrics::calculate(&raw);
        Ok(raw.into_record(fingerprint.to_string(), custom))
    }
}
