//! End-to-end feature extraction on generated audio
//!
//! Runs the production pipeline (decode, resample, descriptors, metrics)
//! against synthetic WAV assets.

mod helpers;

use cmx_analysis::config::EngineConfig;
use cmx_analysis::models::{AnalysisDepth, AnalysisRecord, AudioAsset, Mode};
use cmx_analysis::orchestrator::{AnalysisPipeline, FeaturePipeline};
use cmx_analysis::{AnalysisError, MODEL_VERSION};
use helpers::{corrupted_asset, generate_test_wav, wav_asset, AudioConfig, Signal};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn analyze_with(config: &EngineConfig, asset: &AudioAsset) -> Result<AnalysisRecord, AnalysisError> {
    let pipeline = FeaturePipeline::new(config);
    pipeline.analyze(asset, &asset.fingerprint(), &CancellationToken::new())
}

fn analyze(asset: &AudioAsset) -> Result<AnalysisRecord, AnalysisError> {
    analyze_with(&EngineConfig::default(), asset)
}

#[test]
fn test_click_track_tempo_near_120() {
    let asset = wav_asset(Signal::ClickTrack { bpm: 120.0 }, &AudioConfig::with_duration(10.0));
    let record = analyze(&asset).unwrap();

    assert!(
        (record.basic.tempo_bpm - 120.0).abs() < 6.0,
        "tempo {} not near 120",
        record.basic.tempo_bpm
    );
    assert!(record.rhythmic.beat_strength > 0.0);
    assert!(record.rhythmic.onset_density > 1.0 && record.rhythmic.onset_density < 4.0);
}

#[test]
fn test_groove_detects_c_major() {
    let asset = wav_asset(Signal::Groove { bpm: 120.0 }, &AudioConfig::with_duration(10.0));
    let record = analyze(&asset).unwrap();

    assert_eq!(record.basic.key.pitch_class, 0, "key was {}", record.basic.key);
    assert_eq!(record.basic.key.mode, Mode::Major);
    assert!(record.harmonic.key_strength > 0.3);
    assert!(record.confidence > 0.0 && record.confidence <= 1.0);
}

#[test]
fn test_record_shape_and_versions() {
    let asset = wav_asset(Signal::Groove { bpm: 100.0 }, &AudioConfig::with_duration(8.0));
    let record = analyze(&asset).unwrap();

    assert_eq!(record.fingerprint, asset.fingerprint());
    assert_eq!(record.model_version, MODEL_VERSION);
    assert_eq!(record.analysis_depth, AnalysisDepth::Full);
    assert_eq!(record.spectral.mfcc.len(), 13);
    assert!((record.basic.duration_secs - 8.0).abs() < 0.01);

    let chroma_sum: f32 = record.harmonic.chroma.iter().sum();
    assert!(chroma_sum > 0.0);
    assert!(record.harmonic.chroma.iter().all(|c| (0.0..=1.0).contains(c)));

    for metric in [
        &record.metrics.dynamics_quotient,
        &record.metrics.mad_divergence,
        &record.metrics.texture_complexity,
    ] {
        assert!(metric.value.is_finite() && metric.value >= 0.0);
        assert!(!metric.methodology.is_empty());
    }
    assert!(record.metrics.mad_divergence.value <= 1.0);
    assert!(record.metrics.texture_complexity.value <= 1.0);
}

#[test]
fn test_extraction_is_deterministic() {
    let asset = wav_asset(Signal::Groove { bpm: 128.0 }, &AudioConfig::with_duration(6.0));
    let first = analyze(&asset).unwrap();
    let second = analyze(&asset).unwrap();

    assert_eq!(first.basic, second.basic);
    assert_eq!(first.spectral, second.spectral);
    assert_eq!(first.harmonic, second.harmonic);
    assert_eq!(first.rhythmic, second.rhythmic);
    assert_eq!(first.metrics, second.metrics);
    assert_eq!(first.confidence, second.confidence);
}

#[test]
fn test_resamples_and_downmixes_native_rate() {
    let config = AudioConfig {
        sample_rate: 44100,
        channels: 2,
        ..AudioConfig::with_duration(6.0)
    };
    let asset = wav_asset(Signal::Tone { frequency: 440.0 }, &config);
    let record = analyze(&asset).unwrap();

    assert!((record.basic.duration_secs - 6.0).abs() < 0.01);
    assert!(
        record.spectral.spectral_centroid > 300.0 && record.spectral.spectral_centroid < 800.0,
        "centroid {}",
        record.spectral.spectral_centroid
    );
    assert_eq!(record.basic.key.pitch_class, 9, "A tone should map to an A key");
}

#[test]
fn test_duration_boundary() {
    let exact = wav_asset(Signal::Groove { bpm: 120.0 }, &AudioConfig::with_duration(5.0));
    assert!(analyze(&exact).is_ok());

    let short = wav_asset(Signal::Groove { bpm: 120.0 }, &AudioConfig::with_duration(4.9));
    assert!(matches!(
        analyze(&short),
        Err(AnalysisError::DurationOutOfRange { .. })
    ));
}

#[test]
fn test_silence_is_unanalyzable() {
    let asset = wav_asset(Signal::Silence, &AudioConfig::with_duration(6.0));
    assert!(matches!(
        analyze(&asset),
        Err(AnalysisError::UnanalyzableAudio(_))
    ));
}

#[test]
fn test_corrupted_bytes_are_unanalyzable() {
    let asset = corrupted_asset(&AudioConfig::with_duration(10.0));
    assert!(matches!(
        analyze(&asset),
        Err(AnalysisError::UnanalyzableAudio(_))
    ));
}

#[test]
fn test_long_clip_uses_basic_depth() {
    let engine = EngineConfig {
        full_analysis_max_duration_secs: 12.0,
        basic_excerpt_secs: 6.0,
        ..EngineConfig::default()
    };
    let asset = wav_asset(Signal::Groove { bpm: 120.0 }, &AudioConfig::with_duration(15.0));

    let basic = analyze_with(&engine, &asset).unwrap();
    let full = analyze(&asset).unwrap();

    assert_eq!(basic.analysis_depth, AnalysisDepth::Basic);
    assert_eq!(full.analysis_depth, AnalysisDepth::Full);
    assert!((basic.basic.duration_secs - 15.0).abs() < 0.01);
    assert!(basic.confidence <= 0.85 + 1e-6);
    assert!(full.confidence > 0.0);
}

#[test]
fn test_cancelled_before_start() {
    let asset = wav_asset(Signal::Groove { bpm: 120.0 }, &AudioConfig::with_duration(6.0));
    let pipeline = FeaturePipeline::new(&EngineConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = pipeline.analyze(&asset, &asset.fingerprint(), &cancel);
    assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
}

#[test]
fn test_asset_from_file_reads_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let config = AudioConfig {
        sample_rate: 44100,
        channels: 2,
        ..AudioConfig::with_duration(7.0)
    };
    let path = generate_test_wav(
        &temp_dir.path().join("take.wav"),
        Signal::Tone { frequency: 220.0 },
        &config,
    )
    .unwrap();

    let asset = AudioAsset::from_file(&path).unwrap();
    let metadata = asset.metadata();
    assert_eq!(metadata.sample_rate, 44100);
    assert_eq!(metadata.channels, 2);
    assert!((metadata.duration_secs - 7.0).abs() < 0.01);
}
