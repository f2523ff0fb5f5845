//! cmx-analysis library
//!
//! Audio feature extraction, custom metrics, idempotent result storage and
//! pairwise compatibility scoring for collaborator matching.
//!
//! Data flow: [`AudioAsset`] → [`extractors::FeatureExtractor`] →
//! [`metrics::calculate`] → [`AnalysisRecord`] in the [`store::AnalysisStore`]
//! → [`scoring::CompatibilityScorer`] on demand. The
//! [`orchestrator::AnalysisOrchestrator`] ties these together under a bounded
//! concurrency budget.

pub mod config;
pub mod error;
pub mod extractors;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod scoring;
pub mod services;
pub mod store;

pub use crate::error::{AnalysisError, AnalysisResult, ErrorKind};
pub use crate::extractors::MODEL_VERSION;
pub use crate::models::{AnalysisRecord, AudioAsset, CompatibilityScore, DeclaredAttributes};
pub use crate::orchestrator::{AnalysisOrchestrator, BatchReport};
pub use crate::scoring::CompatibilityScorer;
pub use crate::store::AnalysisStore;
