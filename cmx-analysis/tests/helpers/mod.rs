//! Test Helper Utilities
//!
//! Shared utilities for testing cmx-analysis

#![allow(dead_code)]

pub mod audio_generator;
pub mod test_pipeline;

// Re-export commonly used items
pub use audio_generator::{
    corrupted_asset, generate_test_wav, render, wav_asset, wav_bytes, AudioConfig, Signal,
};
pub use test_pipeline::{sample_record, scripted_asset, ScriptedPipeline, SCRIPTED_MODEL_VERSION};

use cmx_analysis::config::EngineConfig;

/// Engine config with small limits so backpressure is easy to provoke
pub fn small_engine_config(concurrency_limit: usize, queue_depth: usize) -> EngineConfig {
    EngineConfig {
        concurrency_limit,
        queue_depth,
        per_item_timeout_ms: 5_000,
        ..EngineConfig::default()
    }
}
