//! Local surrogate explanation for one scored candidate.
//!
//! Approximates the classifier's behavior near a single aggregated vector:
//! perturb the present slots with Gaussian noise, query the model for each
//! synthetic sample, weight samples by proximity to the original instance,
//! and fit a weighted ridge regression. The fitted coefficients are the
//! per-slot contribution weights, ranked by absolute magnitude.
//!
//! A failed fit is a value ([`SurrogateError`]), never a panic; the
//! selector substitutes the raw-value fallback explanation.

use crate::aggregate::AggregatedVector;
use match_model::ProbabilityModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

/// Relative perturbation scale per slot, with a floor so zero-valued slots
/// still move
const PERTURB_SCALE: f64 = 0.25;
const PERTURB_FLOOR: f64 = 0.1;

/// Ways the surrogate fit can fail. All are recoverable by the caller.
#[derive(Error, Debug, PartialEq)]
pub enum SurrogateError {
    /// The vector has no finite slot to perturb
    #[error("no usable feature values to explain")]
    NoUsableFeatures,

    /// The model produced a non-finite probability, or the fit diverged
    #[error("non-finite value during surrogate fit")]
    NonFinite,

    /// The weighted normal equations could not be solved
    #[error("degenerate surrogate system")]
    Singular,
}

/// Tuning knobs for the surrogate fit.
#[derive(Debug, Clone)]
pub struct ExplainerConfig {
    /// Synthetic samples drawn around the instance
    pub num_samples: usize,
    /// Proximity kernel width; `None` uses LIME's `0.75 * sqrt(dims)`
    pub kernel_width: Option<f64>,
    /// Ridge regularization strength
    pub ridge: f64,
    /// Fixed RNG seed for reproducible explanations; `None` draws from the OS
    pub seed: Option<u64>,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            num_samples: 512,
            kernel_width: None,
            ridge: 1e-3,
            seed: None,
        }
    }
}

/// Ranked per-slot contribution weights.
///
/// Entries are ordered by descending absolute weight (surrogate result) or
/// by fixed slot order (raw-value fallback); ties keep the original slot
/// order. Serializes as an ordered JSON map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Explanation {
    terms: Vec<(String, f64)>,
}

impl Explanation {
    /// Build from unranked terms, sorting by descending |weight|.
    ///
    /// The sort is stable, so equal magnitudes keep their input order.
    pub fn ranked(mut terms: Vec<(String, f64)>) -> Self {
        terms.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { terms }
    }

    /// Build keeping the given order as-is (raw-value fallback shape)
    pub fn ordered(terms: Vec<(String, f64)>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[(String, f64)] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Weight for a qualified name, if present
    pub fn weight(&self, name: &str) -> Option<f64> {
        self.terms.iter().find(|(n, _)| n == name).map(|(_, w)| *w)
    }
}

impl Serialize for Explanation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.terms.len()))?;
        for (name, weight) in &self.terms {
            map.serialize_entry(name, weight)?;
        }
        map.end()
    }
}

/// Fit a local surrogate around `vector` and return ranked contributions.
pub fn explain(
    model: &dyn ProbabilityModel,
    vector: &AggregatedVector,
    config: &ExplainerConfig,
) -> Result<Explanation, SurrogateError> {
    let slots: Vec<_> = vector.present_slots().collect();
    let dims = slots.len();
    if dims == 0 {
        return Err(SurrogateError::NoUsableFeatures);
    }

    let sigmas: Vec<f64> = slots
        .iter()
        .map(|(_, _, x)| (x.abs() * PERTURB_SCALE).max(PERTURB_FLOOR))
        .collect();
    let kernel_width = config
        .kernel_width
        .unwrap_or_else(|| 0.75 * (dims as f64).sqrt());

    let base = vector.to_model_input();
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    // Offsets of the present slots in the flat model input
    let offsets: Vec<usize> = slots
        .iter()
        .map(|(side, feature, _)| match side {
            data_loader::Side::Liked => feature.index(),
            data_loader::Side::Disliked => data_loader::Feature::COUNT + feature.index(),
        })
        .collect();

    // Sample matrix in standardized offset space; the first row is the
    // unperturbed instance itself
    let n = config.num_samples.max(dims + 2);
    let mut samples: Vec<Vec<f64>> = Vec::with_capacity(n);
    let mut targets: Vec<f64> = Vec::with_capacity(n);
    let mut weights: Vec<f64> = Vec::with_capacity(n);

    for i in 0..n {
        let mut u = vec![0.0f64; dims];
        let mut input = base;
        if i > 0 {
            for j in 0..dims {
                let noise: f64 = rng.sample(StandardNormal);
                u[j] = noise;
                input[offsets[j]] = slots[j].2 + sigmas[j] * noise;
            }
        }
        let y = model.predict(&input);
        if !y.is_finite() {
            return Err(SurrogateError::NonFinite);
        }
        let d2: f64 = u.iter().map(|v| v * v).sum();
        weights.push((-d2 / (kernel_width * kernel_width)).exp());
        samples.push(u);
        targets.push(y);
    }

    let coefficients = fit_weighted_ridge(&samples, &targets, &weights, config.ridge)?;

    let terms = slots
        .iter()
        .zip(&coefficients)
        .map(|((side, feature, _), &w)| (side.qualified_name(*feature), w))
        .collect();
    Ok(Explanation::ranked(terms))
}

/// Weighted ridge regression with intercept, solved through the normal
/// equations. Small systems only (at most 2 * Feature::COUNT unknowns).
fn fit_weighted_ridge(
    samples: &[Vec<f64>],
    targets: &[f64],
    weights: &[f64],
    ridge: f64,
) -> Result<Vec<f64>, SurrogateError> {
    let dims = samples[0].len();
    let total_weight: f64 = weights.iter().sum();
    if !(total_weight.is_finite() && total_weight > 0.0) {
        return Err(SurrogateError::Singular);
    }

    // Weighted centering absorbs the intercept
    let mut x_mean = vec![0.0f64; dims];
    let mut y_mean = 0.0f64;
    for ((row, &y), &w) in samples.iter().zip(targets).zip(weights) {
        for (m, &v) in x_mean.iter_mut().zip(row) {
            *m += w * v;
        }
        y_mean += w * y;
    }
    for m in &mut x_mean {
        *m /= total_weight;
    }
    y_mean /= total_weight;

    let mut gram = vec![vec![0.0f64; dims]; dims];
    let mut rhs = vec![0.0f64; dims];
    for ((row, &y), &w) in samples.iter().zip(targets).zip(weights) {
        let dy = y - y_mean;
        for j in 0..dims {
            let dj = row[j] - x_mean[j];
            rhs[j] += w * dj * dy;
            for k in j..dims {
                gram[j][k] += w * dj * (row[k] - x_mean[k]);
            }
        }
    }
    for j in 0..dims {
        for k in 0..j {
            gram[j][k] = gram[k][j];
        }
        gram[j][j] += ridge;
    }

    let beta = solve_linear_system(gram, rhs).ok_or(SurrogateError::Singular)?;
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(SurrogateError::NonFinite);
    }
    Ok(beta)
}

/// Gaussian elimination with partial pivoting; `None` on a degenerate pivot.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in (row + 1)..n {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    Some(x)
}
