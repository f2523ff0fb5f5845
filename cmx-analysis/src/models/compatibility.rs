//! Compatibility score types
//!
//! Scores are computed on demand and never persisted by the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Scoring factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Tempo,
    Key,
    Spectral,
    Rhythmic,
    Declared,
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Factor::Tempo => "tempo",
            Factor::Key => "key",
            Factor::Spectral => "spectral",
            Factor::Rhythmic => "rhythmic",
            Factor::Declared => "declared",
        };
        f.write_str(s)
    }
}

/// One factor's similarity and its share of the overall score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub factor: Factor,
    /// Similarity in [0, 1]
    pub score: f32,
    /// Effective weight after renormalization
    pub weight: f32,
    /// `score * weight`
    pub contribution: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityScore {
    /// Weighted blend in [0, 1]
    pub overall: f32,
    pub sub_scores: Vec<SubScore>,
    pub reasons: Vec<String>,
    pub low_confidence: bool,
    /// Identifies the formula and weight set that produced this score
    pub scoring_version: String,
}

impl CompatibilityScore {
    pub fn sub_score(&self, factor: Factor) -> Option<f32> {
        self.sub_scores
            .iter()
            .find(|s| s.factor == factor)
            .map(|s| s.score)
    }
}

/// Profile attributes declared by a user or project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredAttributes {
    pub genres: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

impl DeclaredAttributes {
    /// Build from free-form strings (trimmed, lowercased, blanks dropped)
    pub fn new<G, T, S1, S2>(genres: G, tags: T) -> Self
    where
        G: IntoIterator<Item = S1>,
        T: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        Self {
            genres: normalize(genres),
            tags: normalize(tags),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.genres.is_empty() && self.tags.is_empty()
    }
}

fn normalize<I, S>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_attributes_normalized() {
        let attrs = DeclaredAttributes::new(["  Jazz", "FUNK", ""], ["Vocals"]);
        assert!(attrs.genres.contains("jazz"));
        assert!(attrs.genres.contains("funk"));
        assert_eq!(attrs.genres.len(), 2);
        assert!(attrs.tags.contains("vocals"));
    }

    #[test]
    fn test_empty_attributes() {
        let attrs = DeclaredAttributes::new(Vec::<String>::new(), Vec::<String>::new());
        assert!(attrs.is_empty());
    }
}
