//! In-process scoring through a pre-trained gradient-boosted binary
//! classifier.
//!
//! This crate provides:
//! - The [`ProbabilityModel`] trait the engine scores and explains through
//! - [`GbdtModel`], a reader and inference engine for the LightGBM-style
//!   text artifact the matcher was trained with
//! - Loading with schema validation (wrong input arity fails loudly) and
//!   the documented cross-granularity fallback load
//!
//! The artifact is loaded once at process start and is immutable
//! thereafter; scoring is a pure read and safe to run concurrently.

use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

pub mod gbdt;

pub use gbdt::GbdtModel;

/// Errors that can occur while loading or validating a trained artifact
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read model artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error at line {line} in model artifact: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Model expects {found} input features but the schema requires {expected}")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("Unsupported model: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// A stateless, thread-safe binary classifier producing match probabilities.
///
/// Inputs are the fixed-order aggregated feature vector; missing slots are
/// passed through as NaN, never as zero. Implementations must tolerate NaN
/// the way the trained model does (routing through default directions).
pub trait ProbabilityModel: Send + Sync {
    /// Width of the expected input vector
    fn num_features(&self) -> usize;

    /// Match probability in [0, 1] for one input vector
    fn predict(&self, features: &[f64]) -> f64;
}

/// Load a trained artifact and validate its input arity against the shared
/// feature schema. Any mismatch is fatal, never silently adapted.
pub fn load_model(path: &Path, expected_features: usize) -> Result<GbdtModel> {
    let model = GbdtModel::from_file(path)?;
    if model.num_features() != expected_features {
        return Err(ModelError::SchemaMismatch {
            expected: expected_features,
            found: model.num_features(),
        });
    }
    info!(
        path = %path.display(),
        trees = model.num_trees(),
        features = model.num_features(),
        "Loaded match model"
    );
    Ok(model)
}

/// Load the preferred artifact, falling back to a coarser-granularity one
/// when the preferred file does not exist.
///
/// The substitution is deliberate and logged; every other failure mode
/// (corrupt file, schema mismatch) still propagates from whichever file
/// was read.
pub fn load_model_with_fallback(
    preferred: &Path,
    fallback: &Path,
    expected_features: usize,
) -> Result<GbdtModel> {
    if preferred.exists() {
        return load_model(preferred, expected_features);
    }
    warn!(
        preferred = %preferred.display(),
        fallback = %fallback.display(),
        "Preferred model artifact absent, substituting fallback"
    );
    load_model(fallback, expected_features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Minimal valid artifact: one stump on feature 0, 18-wide schema.
    fn tiny_artifact() -> String {
        let names: Vec<String> = (0..18).map(|i| format!("f{i}")).collect();
        format!(
            "version=v4\n\
             num_class=1\n\
             max_feature_idx=17\n\
             objective=binary sigmoid:1\n\
             feature_names={}\n\
             \n\
             Tree=0\n\
             num_leaves=2\n\
             split_feature=0\n\
             threshold=0.5\n\
             decision_type=2\n\
             left_child=-1\n\
             right_child=-2\n\
             leaf_value=-1.0 1.0\n\
             \n\
             end of trees\n",
            names.join(" ")
        )
    }

    fn write_artifact(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_model_validates_arity() {
        let file = write_artifact(&tiny_artifact());

        assert!(load_model(file.path(), 18).is_ok());

        let err = load_model(file.path(), 4).unwrap_err();
        assert!(matches!(
            err,
            ModelError::SchemaMismatch {
                expected: 4,
                found: 18
            }
        ));
    }

    #[test]
    fn test_fallback_load_when_preferred_absent() {
        let fallback = write_artifact(&tiny_artifact());
        let missing = fallback.path().with_extension("does-not-exist");

        let model = load_model_with_fallback(&missing, fallback.path(), 18).unwrap();
        assert_eq!(model.num_features(), 18);
    }

    #[test]
    fn test_fallback_does_not_mask_corrupt_preferred() {
        let preferred = write_artifact("not a model at all");
        let fallback = write_artifact(&tiny_artifact());

        let err = load_model_with_fallback(preferred.path(), fallback.path(), 18);
        assert!(err.is_err(), "corrupt preferred artifact must propagate");
    }

    #[test]
    fn test_missing_both_artifacts_is_loud() {
        let err = load_model_with_fallback(
            Path::new("/nonexistent/a.txt"),
            Path::new("/nonexistent/b.txt"),
            18,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Io { .. }));
    }
}
