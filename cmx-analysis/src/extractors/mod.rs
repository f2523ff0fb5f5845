//! Audio feature extraction
//!
//! Everything here is CPU-bound and synchronous; callers run it on the
//! blocking pool. Output is deterministic for identical input under the same
//! [`MODEL_VERSION`].

pub mod feature_extractor;
pub mod frames;
pub mod key;
pub mod spectral;
pub mod tempo;

pub use feature_extractor::{FeatureExtractor, RawDescriptors};

/// STFT window length in samples
pub const FRAME_SIZE: usize = 2048;
/// STFT hop length in samples
pub const HOP_SIZE: usize = 512;

/// Version of the extraction and metric algorithms; part of every record key
pub const MODEL_VERSION: &str = "cmx-features-1.0/metrics-1.0";
