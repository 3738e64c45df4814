//! Recommendation selection over a candidate pool.
//!
//! Scores every scorable candidate with the trained classifier, picks the
//! highest-probability one, and attaches a confidence band plus a local
//! explanation. When no candidate can be scored at all, degrades to a
//! clearly-marked uniform random pick rather than failing the request.

use crate::aggregate::{self, Aggregation};
use crate::explain::{self, ExplainerConfig, Explanation};
use data_loader::{DistanceTable, LocationId};
use match_model::ProbabilityModel;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Confidence band bounds, in percent
const CONFIDENCE_MIN: u8 = 60;
const CONFIDENCE_MAX: u8 = 95;

/// Explanation key marking output produced without usable distance data
const INSUFFICIENT_DATA_KEY: &str = "insufficient_data";

#[derive(Error, Debug, PartialEq)]
pub enum RecommendError {
    /// The candidate pool was empty after removing reference locations
    #[error("no candidates to recommend from")]
    EmptyPool,
}

/// One selected location with its supporting evidence.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub location: LocationId,
    /// Confidence percentage, always within [60, 95]
    pub confidence: u8,
    /// Ranked per-feature contribution weights (or the fallback marker)
    pub explanation: Explanation,
    /// Raw aggregated means keyed `top_*` / `bottom_*`
    pub raw_distances: BTreeMap<String, f64>,
}

/// Scoring, explanation, and selection over one distance table and one
/// trained model. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct RecommendationEngine {
    table: Arc<DistanceTable>,
    model: Arc<dyn ProbabilityModel>,
    explainer: ExplainerConfig,
}

impl RecommendationEngine {
    pub fn new(table: Arc<DistanceTable>, model: Arc<dyn ProbabilityModel>) -> Self {
        Self {
            table,
            model,
            explainer: ExplainerConfig::default(),
        }
    }

    /// Replace the explainer configuration (sample count, seed, ...)
    pub fn with_explainer(mut self, explainer: ExplainerConfig) -> Self {
        self.explainer = explainer;
        self
    }

    pub fn table(&self) -> &DistanceTable {
        &self.table
    }

    /// Pick the best match from `pool` given the labeled reference sets.
    ///
    /// Candidates with no distance record to either reference set are
    /// skipped; candidates that are themselves reference locations are
    /// excluded. Ties on probability resolve to the lexicographically
    /// smallest location. If nothing is scorable the engine falls back to
    /// a uniform random pick, flagged as such in the explanation.
    pub fn recommend(
        &self,
        pool: &BTreeSet<LocationId>,
        liked: &BTreeSet<LocationId>,
        disliked: &BTreeSet<LocationId>,
    ) -> Result<Recommendation, RecommendError> {
        let candidates: Vec<&LocationId> = pool
            .iter()
            .filter(|c| !liked.contains(*c) && !disliked.contains(*c))
            .collect();
        if candidates.is_empty() {
            return Err(RecommendError::EmptyPool);
        }

        // BTreeSet iteration is sorted and par_iter keeps collect order,
        // so the strictly-greater argmax below is the lexicographic
        // tie-break.
        let scored: Vec<(&LocationId, Aggregation, f64)> = candidates
            .par_iter()
            .map(|&candidate| {
                let aggregation = aggregate::aggregate(&self.table, candidate, liked, disliked);
                let score = match &aggregation {
                    Aggregation::Vector(v) => self.model.predict(&v.to_model_input()),
                    Aggregation::Insufficient => f64::NAN,
                };
                (candidate, aggregation, score)
            })
            .collect();

        let mut best: Option<(&LocationId, &Aggregation, f64)> = None;
        for (candidate, aggregation, score) in &scored {
            if matches!(aggregation, Aggregation::Insufficient) {
                tracing::debug!(location = %candidate, "Candidate has no relation to either reference set");
                continue;
            }
            if !score.is_finite() {
                tracing::warn!(location = %candidate, score, "Dropping non-finite score");
                continue;
            }
            if best.is_none_or(|(_, _, s)| *score > s) {
                best = Some((*candidate, aggregation, *score));
            }
        }

        let Some((location, Aggregation::Vector(vector), score)) = best else {
            return Ok(self.random_fallback(&candidates));
        };

        let explanation = match explain::explain(self.model.as_ref(), vector, &self.explainer) {
            Ok(explanation) => explanation,
            Err(reason) => {
                tracing::warn!(location = %location, %reason, "Surrogate fit failed, reporting raw values");
                raw_value_explanation(vector)
            }
        };

        let confidence = confidence_from_score(score);
        tracing::info!(location = %location, score, confidence, "Selected recommendation");
        Ok(Recommendation {
            location: (*location).clone(),
            confidence,
            explanation,
            raw_distances: raw_distances(vector),
        })
    }

    /// Uniform random degradation when no candidate is scorable.
    ///
    /// The pick, the confidence, and the explanation all advertise that no
    /// data supported the choice.
    fn random_fallback(&self, candidates: &[&LocationId]) -> Recommendation {
        let mut rng = match self.explainer.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        // candidates is non-empty, checked by the caller
        let location = candidates
            .choose(&mut rng)
            .map(|&l| l.clone())
            .unwrap_or_default();
        tracing::warn!(
            location = %location,
            pool_size = candidates.len(),
            "No scorable candidates, falling back to a random pick"
        );

        Recommendation {
            location,
            confidence: rng.random_range(CONFIDENCE_MIN..=CONFIDENCE_MAX),
            explanation: Explanation::ordered(vec![
                ("random_recommendation".to_string(), 1.0),
                (INSUFFICIENT_DATA_KEY.to_string(), 0.8),
            ]),
            raw_distances: BTreeMap::from([(INSUFFICIENT_DATA_KEY.to_string(), 1.0)]),
        }
    }
}

/// Map a probability to the reported confidence band
fn confidence_from_score(score: f64) -> u8 {
    let pct = (score * 100.0).round();
    pct.clamp(CONFIDENCE_MIN as f64, CONFIDENCE_MAX as f64) as u8
}

/// Raw aggregated means in fixed slot order, as an explanation substitute
fn raw_value_explanation(vector: &aggregate::AggregatedVector) -> Explanation {
    let terms: Vec<(String, f64)> = vector
        .present_slots()
        .map(|(side, feature, value)| (side.qualified_name(feature), value))
        .collect();
    if terms.is_empty() {
        return Explanation::ordered(vec![(INSUFFICIENT_DATA_KEY.to_string(), 0.8)]);
    }
    Explanation::ordered(terms)
}

/// Raw aggregated means keyed for caller-facing output
fn raw_distances(vector: &aggregate::AggregatedVector) -> BTreeMap<String, f64> {
    let map: BTreeMap<String, f64> = vector
        .present_slots()
        .map(|(side, feature, value)| (side.raw_key(feature), value))
        .collect();
    if map.is_empty() {
        return BTreeMap::from([(INSUFFICIENT_DATA_KEY.to_string(), 1.0)]);
    }
    map
}

/// Every known location except the reference locations, optionally
/// restricted to one region.
pub fn candidate_pool(
    table: &DistanceTable,
    liked: &BTreeSet<LocationId>,
    disliked: &BTreeSet<LocationId>,
    region: Option<&str>,
) -> BTreeSet<LocationId> {
    let base = match region {
        Some(region) => table.locations_in_region(region),
        None => table.locations(),
    };
    base.into_iter()
        .filter(|loc| !liked.contains(loc) && !disliked.contains(loc))
        .collect()
}
