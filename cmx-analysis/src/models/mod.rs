//! Data models

pub mod analysis_record;
pub mod audio_asset;
pub mod compatibility;

pub use analysis_record::{
    AnalysisDepth, AnalysisRecord, BasicDescriptors, CustomMetrics, HarmonicDescriptors,
    MetricValue, Mode, MusicalKey, RecordKey, RhythmicDescriptors, SpectralDescriptors,
    TimeSignature,
};
pub use audio_asset::{AssetMetadata, AudioAsset, AudioFormat};
pub use compatibility::{CompatibilityScore, DeclaredAttributes, Factor, SubScore};
