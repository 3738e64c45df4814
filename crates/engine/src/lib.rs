//! Preference-driven location matching.
//!
//! Given a distance table, two labeled reference sets ("more like these",
//! "less like those"), and a pre-trained match classifier, this crate
//! aggregates per-candidate feature vectors, scores every candidate,
//! selects the best match, and produces a local explanation of why it won.
//!
//! Pipeline stages, each its own module:
//! - [`aggregate`]: candidate x reference-set feature means, strict about
//!   missing data
//! - [`explain`]: perturbation-based local surrogate over the classifier
//! - [`selector`]: scoring, argmax selection, confidence banding, and the
//!   random degradation path

pub mod aggregate;
pub mod explain;
pub mod selector;

pub use aggregate::{AggregatedVector, Aggregation, aggregate};
pub use explain::{ExplainerConfig, Explanation, SurrogateError, explain};
pub use selector::{
    RecommendError, Recommendation, RecommendationEngine, candidate_pool,
};
