//! Compatibility scoring over full records

mod helpers;

use cmx_analysis::config::ScoringConfig;
use cmx_analysis::models::{Factor, Mode, MusicalKey};
use cmx_analysis::{CompatibilityScorer, DeclaredAttributes};
use helpers::sample_record;

fn scorer() -> CompatibilityScorer {
    CompatibilityScorer::new(ScoringConfig::default()).unwrap()
}

#[test]
fn test_self_score_is_maximal() {
    let a = sample_record("a", 120.0, MusicalKey::new(7, Mode::Major));
    let result = scorer().score(&a, &a, None);

    assert!((result.overall - 1.0).abs() < 1e-4, "overall {}", result.overall);
    assert!(result.sub_score(Factor::Declared).is_none());
    assert!(!result.low_confidence);
    assert_eq!(result.reasons.len(), 4);
}

#[test]
fn test_score_is_symmetric() {
    let a = sample_record("a", 118.0, MusicalKey::new(0, Mode::Major));
    let mut b = sample_record("b", 126.0, MusicalKey::new(9, Mode::Minor));
    b.spectral.mfcc[2] = 12.0;
    b.spectral.spectral_centroid = 2600.0;
    b.rhythmic.beat_strength = 0.4;

    let da = DeclaredAttributes::new(["Rock", "indie"], ["guitar"]);
    let db = DeclaredAttributes::new(["rock"], ["Guitar", "vocals"]);

    let s = scorer();
    let ab = s.score(&a, &b, Some((&da, &db)));
    let ba = s.score(&b, &a, Some((&db, &da)));

    assert_eq!(ab.overall, ba.overall);
    assert_eq!(ab.sub_scores, ba.sub_scores);
    assert_eq!(ab.reasons, ba.reasons);
    assert!(ab.reasons.iter().any(|r| r.starts_with("Relative keys")));
}

#[test]
fn test_declared_attributes_contribute() {
    let a = sample_record("a", 120.0, MusicalKey::new(0, Mode::Major));
    let b = sample_record("b", 120.0, MusicalKey::new(0, Mode::Major));

    let da = DeclaredAttributes::new(["jazz", "funk"], ["horns"]);
    let db = DeclaredAttributes::new(["jazz"], ["horns"]);
    let result = scorer().score(&a, &b, Some((&da, &db)));

    // genres 1/2, tags 1/1
    let declared = result.sub_score(Factor::Declared).unwrap();
    assert!((declared - (0.6 * 0.5 + 0.4 * 1.0)).abs() < 1e-6);

    let weight_sum: f32 = result.sub_scores.iter().map(|s| s.weight).sum();
    assert!((weight_sum - 1.0).abs() < 1e-5);
    let contribution_sum: f32 = result.sub_scores.iter().map(|s| s.contribution).sum();
    assert!((contribution_sum - result.overall).abs() < 1e-5);
}

#[test]
fn test_distant_records_score_low() {
    let a = sample_record("a", 80.0, MusicalKey::new(0, Mode::Major));
    let mut b = sample_record("b", 160.0, MusicalKey::new(6, Mode::Minor));
    b.spectral.mfcc = b.spectral.mfcc.iter().map(|c| -c).collect();
    b.spectral.spectral_centroid = 9000.0;
    b.spectral.spectral_rolloff = 10000.0;
    b.rhythmic.beat_strength = 0.0;
    b.rhythmic.tempo_stability = 0.1;

    let result = scorer().score(&a, &b, None);
    assert_eq!(result.sub_score(Factor::Tempo), Some(0.0));
    assert!(result.overall < 0.4, "overall {}", result.overall);
    assert!(result.reasons.is_empty());
}

#[test]
fn test_low_confidence_flag() {
    let a = sample_record("a", 120.0, MusicalKey::new(0, Mode::Major));
    let mut b = sample_record("b", 120.0, MusicalKey::new(0, Mode::Major));
    b.confidence = 0.2;

    let result = scorer().score(&a, &b, None);
    assert!(result.low_confidence);
    assert!(result.overall > 0.9);
}

#[test]
fn test_scoring_version_reported() {
    let s = scorer();
    let a = sample_record("a", 120.0, MusicalKey::new(0, Mode::Major));
    let result = s.score(&a, &a, None);
    assert_eq!(result.scoring_version, s.scoring_version());
    assert!(result.scoring_version.starts_with("cmx-score-2/"));
}

#[test]
fn test_tempo_and_minor_key_example() {
    // 120.5 BPM in C minor against 118.2 BPM in E minor, other descriptors equal
    let a = sample_record("a", 120.5, MusicalKey::new(0, Mode::Minor));
    let b = sample_record("b", 118.2, MusicalKey::new(4, Mode::Minor));
    let result = scorer().score(&a, &b, None);

    let tempo = result.sub_score(Factor::Tempo).unwrap();
    assert!((tempo - 0.885).abs() < 1e-4, "tempo {}", tempo);

    // Relative majors Eb and G are four fifths apart
    let key = result.sub_score(Factor::Key).unwrap();
    assert!((key - 0.8 * (1.0 - 4.0 / 6.0)).abs() < 1e-5, "key {}", key);
    assert!((result.sub_score(Factor::Spectral).unwrap() - 1.0).abs() < 1e-5);
    assert!((result.sub_score(Factor::Rhythmic).unwrap() - 1.0).abs() < 1e-5);

    // Default weights without declared attributes: 0.25, 0.1875, 0.3125, 0.25
    let expected = 0.25 * 0.885 + 0.1875 * (0.8 / 3.0) + 0.3125 + 0.25;
    assert!(
        (result.overall - expected).abs() < 1e-4,
        "overall {} expected {}",
        result.overall,
        expected
    );
}

#[test]
fn test_reasons_ordered_by_contribution() {
    let a = sample_record("a", 120.5, MusicalKey::new(0, Mode::Minor));
    let b = sample_record("b", 118.2, MusicalKey::new(4, Mode::Minor));
    let result = scorer().score(&a, &b, None);

    // Key similarity is below the notable threshold
    assert_eq!(
        result.reasons,
        vec![
            "Similar timbre and spectral balance".to_string(),
            "Similar rhythmic feel (pulse strength and steadiness)".to_string(),
            "Similar tempo (118.2 and 120.5 BPM)".to_string(),
        ]
    );

    let contributions: Vec<f32> = [Factor::Spectral, Factor::Rhythmic, Factor::Tempo]
        .iter()
        .map(|f| {
            result
                .sub_scores
                .iter()
                .find(|s| s.factor == *f)
                .map(|s| s.contribution)
                .unwrap()
        })
        .collect();
    assert!(contributions.windows(2).all(|w| w[0] >= w[1]));
}
