// src/matching/fuzzy.rs
//! Fuzzy fallback over canonical display names.
//!
//! Scores are distances: 0.0 is identical, 1.0 shares nothing. Review tooling
//! downstream relies on that orientation and on the 0.2 cut between
//! `partial` and `mismatch`.

use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strsim::normalized_levenshtein;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::matching::normalize::normalize_fuzzy;
use crate::models::core::DecisionStatus;
use crate::registry::CanonicalRegistry;

/// Distances strictly below this are `partial`, everything else `mismatch`.
pub const FUZZY_PARTIAL_THRESHOLD: f64 = 0.2;

const TRIGRAM_WEIGHT: f64 = 0.6;
const EDIT_WEIGHT: f64 = 0.4;

/// Distance between a query name and a candidate name, in `[0, 1]`.
/// Both inputs arrive already folded by [`normalize_fuzzy`].
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, query: &str, candidate: &str) -> f64;

    fn name(&self) -> &'static str;
}

fn clamp_distance(value: f64) -> f64 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Word trigrams padded the way Postgres pg_trgm pads them.
pub fn trigrams(text: &str) -> HashSet<String> {
    let mut grams = HashSet::new();
    for word in text.split_whitespace() {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TrigramScorer;

impl SimilarityScorer for TrigramScorer {
    fn score(&self, query: &str, candidate: &str) -> f64 {
        let a = trigrams(query);
        let b = trigrams(candidate);
        let union = a.union(&b).count();
        if union == 0 {
            return 1.0;
        }
        let shared = a.intersection(&b).count();
        clamp_distance(1.0 - shared as f64 / union as f64)
    }

    fn name(&self) -> &'static str {
        "trigram"
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EditDistanceScorer;

impl SimilarityScorer for EditDistanceScorer {
    fn score(&self, query: &str, candidate: &str) -> f64 {
        if query.is_empty() && candidate.is_empty() {
            return 1.0;
        }
        clamp_distance(1.0 - normalized_levenshtein(query, candidate))
    }

    fn name(&self) -> &'static str {
        "edit_distance"
    }
}

/// Weighted mean of trigram and edit distance.
#[derive(Debug, Clone, Copy)]
pub struct CompositeScorer {
    pub trigram_weight: f64,
    pub edit_weight: f64,
}

impl Default for CompositeScorer {
    fn default() -> Self {
        Self {
            trigram_weight: TRIGRAM_WEIGHT,
            edit_weight: EDIT_WEIGHT,
        }
    }
}

impl SimilarityScorer for CompositeScorer {
    fn score(&self, query: &str, candidate: &str) -> f64 {
        let total = self.trigram_weight + self.edit_weight;
        if total <= 0.0 {
            return 1.0;
        }
        let trigram = TrigramScorer.score(query, candidate);
        let edit = EditDistanceScorer.score(query, candidate);
        clamp_distance((trigram * self.trigram_weight + edit * self.edit_weight) / total)
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// `partial` below the threshold, `mismatch` at or above it.
pub fn classify_fuzzy_score(score: f64) -> DecisionStatus {
    if score < FUZZY_PARTIAL_THRESHOLD {
        DecisionStatus::Partial
    } else {
        DecisionStatus::Mismatch
    }
}

#[derive(Debug, Clone)]
struct IndexedName {
    id: i64,
    display_name: String,
    folded: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    pub id: i64,
    pub display_name: String,
    pub score: f64,
}

/// Read-only snapshot of canonical display names prepared for scoring.
#[derive(Debug, Clone, Default)]
pub struct FuzzyIndex {
    names: Vec<IndexedName>,
}

impl FuzzyIndex {
    pub fn from_names(names: Vec<(i64, String)>) -> Self {
        let names = names
            .into_iter()
            .map(|(id, display_name)| IndexedName {
                id,
                folded: normalize_fuzzy(&display_name),
                display_name,
            })
            .collect();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Lowest-distance candidate. Ties keep the earliest candidate in
    /// snapshot order. `None` when the index is empty.
    pub fn best_match(&self, query: &str, scorer: &dyn SimilarityScorer) -> Option<FuzzyMatch> {
        let folded_query = normalize_fuzzy(query);
        let mut best: Option<(f64, &IndexedName)> = None;
        for candidate in &self.names {
            let score = clamp_distance(scorer.score(&folded_query, &candidate.folded));
            match best {
                Some((best_score, _)) if score >= best_score => {}
                _ => best = Some((score, candidate)),
            }
        }
        best.map(|(score, candidate)| {
            debug!(
                "Fuzzy best for {:?}: {} {:?} ({} score {:.4})",
                folded_query,
                candidate.id,
                candidate.display_name,
                scorer.name(),
                score
            );
            FuzzyMatch {
                id: candidate.id,
                display_name: candidate.display_name.clone(),
                score,
            }
        })
    }
}

struct CachedIndex {
    vocabulary: String,
    loaded_at: Instant,
    index: Arc<FuzzyIndex>,
}

/// Time-bounded cache of the registry name snapshot. Staleness only affects
/// match quality, never the decision state machine.
pub struct CandidateSnapshot {
    ttl: Duration,
    cached: RwLock<Option<CachedIndex>>,
}

impl CandidateSnapshot {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: RwLock::new(None),
        }
    }

    pub async fn get(
        &self,
        registry: &dyn CanonicalRegistry,
        vocabulary: &str,
    ) -> Result<Arc<FuzzyIndex>> {
        {
            let cached = self.cached.read().await;
            if let Some(c) = cached.as_ref() {
                if c.vocabulary == vocabulary && c.loaded_at.elapsed() < self.ttl {
                    return Ok(c.index.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(c) = cached.as_ref() {
            if c.vocabulary == vocabulary && c.loaded_at.elapsed() < self.ttl {
                return Ok(c.index.clone());
            }
        }
        let started = Instant::now();
        let index = Arc::new(FuzzyIndex::from_names(registry.list_names(vocabulary).await?));
        info!(
            "🔎 Loaded fuzzy candidate snapshot: {} names from {} in {:.2?}",
            index.len(),
            vocabulary,
            started.elapsed()
        );
        *cached = Some(CachedIndex {
            vocabulary: vocabulary.to_string(),
            loaded_at: Instant::now(),
            index: index.clone(),
        });
        Ok(index)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}
