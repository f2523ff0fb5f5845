//! Error types for cmx-analysis
//!
//! Every failure that crosses the engine boundary is one of the
//! [`AnalysisError`] variants below. Low-level decoder, resampler, storage and
//! task errors are normalized into this taxonomy where they occur.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Analysis error taxonomy
///
/// `Clone` so a single pipeline failure can be handed to every caller waiting
/// on the same in-flight computation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Declared or detected encoding is outside the supported codec set (terminal)
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Duration outside `[min, max]` (terminal)
    #[error("Duration {duration_secs:.3}s outside allowed range [{min_secs}s, {max_secs}s]")]
    DurationOutOfRange {
        duration_secs: f64,
        min_secs: f64,
        max_secs: f64,
    },

    /// Corrupt or silence-only data (terminal)
    #[error("Unanalyzable audio: {0}")]
    UnanalyzableAudio(String),

    /// Extraction exceeded the per-item timeout (retryable)
    #[error("Analysis timed out after {timeout_ms}ms")]
    AnalysisTimeout { timeout_ms: u64 },

    /// Concurrency budget and queue are both full (retry later with backoff)
    #[error("Backpressure: {in_flight} submissions admitted, capacity {capacity}")]
    BackpressureRejected { in_flight: usize, capacity: usize },

    /// Decoder/resource/storage failure (retryable, never cached)
    #[error("Transient pipeline failure: {0}")]
    PipelineTransient(String),

    /// Caller cancelled the submission
    #[error("Analysis cancelled")]
    Cancelled,

    /// Batch longer than the configured maximum
    #[error("Batch of {size} items exceeds maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },
}

/// Coarse error category, used for events and for the caller's retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    DurationOutOfRange,
    UnanalyzableAudio,
    AnalysisTimeout,
    BackpressureRejected,
    PipelineTransient,
    Cancelled,
    BatchTooLarge,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::DurationOutOfRange => "duration_out_of_range",
            ErrorKind::UnanalyzableAudio => "unanalyzable_audio",
            ErrorKind::AnalysisTimeout => "analysis_timeout",
            ErrorKind::BackpressureRejected => "backpressure_rejected",
            ErrorKind::PipelineTransient => "pipeline_transient",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::BatchTooLarge => "batch_too_large",
        };
        f.write_str(s)
    }
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            AnalysisError::DurationOutOfRange { .. } => ErrorKind::DurationOutOfRange,
            AnalysisError::UnanalyzableAudio(_) => ErrorKind::UnanalyzableAudio,
            AnalysisError::AnalysisTimeout { .. } => ErrorKind::AnalysisTimeout,
            AnalysisError::BackpressureRejected { .. } => ErrorKind::BackpressureRejected,
            AnalysisError::PipelineTransient(_) => ErrorKind::PipelineTransient,
            AnalysisError::Cancelled => ErrorKind::Cancelled,
            AnalysisError::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
        }
    }

    /// Terminal errors must not be retried with the same asset
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisError::UnsupportedFormat(_)
                | AnalysisError::DurationOutOfRange { .. }
                | AnalysisError::UnanalyzableAudio(_)
                | AnalysisError::BatchTooLarge { .. }
        )
    }

    /// Errors a caller may retry (possibly after backoff or with more resources)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::AnalysisTimeout { .. }
                | AnalysisError::BackpressureRejected { .. }
                | AnalysisError::PipelineTransient(_)
                | AnalysisError::Cancelled
        )
    }
}

impl From<cmx_common::Error> for AnalysisError {
    fn from(err: cmx_common::Error) -> Self {
        AnalysisError::PipelineTransient(err.to_string())
    }
}

impl From<sqlx::Error> for AnalysisError {
    fn from(err: sqlx::Error) -> Self {
        AnalysisError::PipelineTransient(format!("storage: {}", err))
    }
}

impl From<tokio::task::JoinError> for AnalysisError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            AnalysisError::Cancelled
        } else {
            AnalysisError::PipelineTransient(format!("worker panicked: {}", err))
        }
    }
}

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;
