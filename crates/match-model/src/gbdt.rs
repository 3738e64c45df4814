//! Reader and inference engine for the LightGBM-style text artifact.
//!
//! The artifact is a sequence of `key=value` lines: a header block
//! (objective, class count, feature schema), then one block per tree
//! (`Tree=N` ... arrays describing splits and leaves), terminated by an
//! `end of trees` line. Unknown keys are ignored so artifacts carry extra
//! metadata (feature importances, parameters) without breaking the reader.
//!
//! Inference walks each tree: a NaN input at a split follows the node's
//! default-left bit, exactly as the trained model handled missing values.
//! NaN is the missing-value indicator; it must never be coerced to zero.

use crate::{ModelError, ProbabilityModel, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// One decision tree of the boosted ensemble.
///
/// Internal nodes are indexed 0..num_leaves-1; a negative child index `c`
/// refers to leaf `!c` (LightGBM's encoding).
#[derive(Debug, Clone)]
struct Tree {
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    default_left: Vec<bool>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
}

impl Tree {
    /// Raw (pre-link) contribution of this tree for one input vector
    fn predict(&self, x: &[f64]) -> f64 {
        if self.split_feature.is_empty() {
            // Degenerate single-leaf tree
            return self.leaf_value[0];
        }

        let mut node = 0usize;
        loop {
            let value = x[self.split_feature[node]];
            let go_left = if value.is_nan() {
                self.default_left[node]
            } else {
                value <= self.threshold[node]
            };
            let child = if go_left {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
            if child < 0 {
                return self.leaf_value[(!child) as usize];
            }
            node = child as usize;
        }
    }
}

/// A pre-trained gradient-boosted binary classifier.
///
/// Immutable after load; `predict` is a pure read, safe to call from many
/// threads concurrently.
#[derive(Debug, Clone)]
pub struct GbdtModel {
    trees: Vec<Tree>,
    num_features: usize,
    sigmoid: f64,
    feature_names: Vec<String>,
}

impl GbdtModel {
    /// Read an artifact from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_text(&content)
    }

    /// Parse an artifact from its text form.
    pub fn from_text(content: &str) -> Result<Self> {
        Parser::new(content).parse()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Column names the artifact was trained with (empty if absent)
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

impl ProbabilityModel for GbdtModel {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn predict(&self, features: &[f64]) -> f64 {
        assert_eq!(
            features.len(),
            self.num_features,
            "input width {} does not match model schema {}",
            features.len(),
            self.num_features
        );
        let raw: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        1.0 / (1.0 + (-self.sigmoid * raw).exp())
    }
}

// =============================================================================
// Artifact parsing
// =============================================================================

struct Parser<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

/// Key/value pairs of one tree block, with the block's starting line for
/// error reporting.
struct TreeBlock {
    start_line: usize,
    fields: HashMap<String, String>,
}

impl<'a> Parser<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            lines: content.lines().enumerate(),
        }
    }

    fn parse(mut self) -> Result<GbdtModel> {
        let mut header: HashMap<String, String> = HashMap::new();
        let mut tree_blocks: Vec<TreeBlock> = Vec::new();
        let mut in_trees = false;

        while let Some((idx, raw)) = self.lines.next() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line == "end of trees" {
                break;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ModelError::Parse {
                line: idx + 1,
                reason: format!("Expected key=value, got '{line}'"),
            })?;
            if key == "Tree" {
                in_trees = true;
                tree_blocks.push(TreeBlock {
                    start_line: idx + 1,
                    fields: HashMap::new(),
                });
            } else if in_trees {
                let block = tree_blocks.last_mut().expect("in_trees implies a block");
                block.fields.insert(key.to_string(), value.to_string());
            } else {
                header.insert(key.to_string(), value.to_string());
            }
        }

        let num_features = Self::parse_header(&header)?;
        let sigmoid = Self::parse_sigmoid(&header)?;
        let feature_names = header
            .get("feature_names")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        if tree_blocks.is_empty() {
            return Err(ModelError::Unsupported("artifact contains no trees".to_string()));
        }
        let trees = tree_blocks
            .into_iter()
            .map(|block| Self::parse_tree(block, num_features))
            .collect::<Result<Vec<_>>>()?;

        Ok(GbdtModel {
            trees,
            num_features,
            sigmoid,
            feature_names,
        })
    }

    fn parse_header(header: &HashMap<String, String>) -> Result<usize> {
        let num_class: usize = header
            .get("num_class")
            .map(|v| v.trim().parse())
            .transpose()
            .map_err(|_| ModelError::Unsupported("invalid num_class".to_string()))?
            .unwrap_or(1);
        if num_class != 1 {
            return Err(ModelError::Unsupported(format!(
                "only binary classification is supported, got num_class={num_class}"
            )));
        }

        if let Some(objective) = header.get("objective") {
            if !objective.trim_start().starts_with("binary") {
                return Err(ModelError::Unsupported(format!(
                    "only binary objective is supported, got '{objective}'"
                )));
            }
        }

        let max_feature_idx: usize = header
            .get("max_feature_idx")
            .ok_or_else(|| ModelError::Unsupported("missing max_feature_idx".to_string()))?
            .trim()
            .parse()
            .map_err(|_| ModelError::Unsupported("invalid max_feature_idx".to_string()))?;
        Ok(max_feature_idx + 1)
    }

    fn parse_sigmoid(header: &HashMap<String, String>) -> Result<f64> {
        // "objective=binary sigmoid:1" carries the link coefficient
        let Some(objective) = header.get("objective") else {
            return Ok(1.0);
        };
        for token in objective.split_whitespace() {
            if let Some(value) = token.strip_prefix("sigmoid:") {
                return value.parse().map_err(|_| {
                    ModelError::Unsupported(format!("invalid sigmoid coefficient '{value}'"))
                });
            }
        }
        Ok(1.0)
    }

    fn parse_tree(block: TreeBlock, num_features: usize) -> Result<Tree> {
        let line = block.start_line;
        let err = |reason: String| ModelError::Parse { line, reason };

        let field = |name: &str| -> Result<&str> {
            block
                .fields
                .get(name)
                .map(|s| s.as_str())
                .ok_or_else(|| err(format!("Tree block missing '{name}'")))
        };

        let num_leaves: usize = field("num_leaves")?
            .trim()
            .parse()
            .map_err(|_| err("invalid num_leaves".to_string()))?;
        if num_leaves == 0 {
            return Err(err("num_leaves must be at least 1".to_string()));
        }

        let leaf_value = parse_list::<f64>(field("leaf_value")?)
            .map_err(|e| err(format!("invalid leaf_value: {e}")))?;
        if leaf_value.len() != num_leaves {
            return Err(err(format!(
                "expected {} leaf values, found {}",
                num_leaves,
                leaf_value.len()
            )));
        }

        // A single-leaf tree has no internal nodes and no split arrays
        if num_leaves == 1 {
            return Ok(Tree {
                split_feature: Vec::new(),
                threshold: Vec::new(),
                default_left: Vec::new(),
                left_child: Vec::new(),
                right_child: Vec::new(),
                leaf_value,
            });
        }

        let internal = num_leaves - 1;
        let split_feature = parse_list::<usize>(field("split_feature")?)
            .map_err(|e| err(format!("invalid split_feature: {e}")))?;
        let threshold = parse_list::<f64>(field("threshold")?)
            .map_err(|e| err(format!("invalid threshold: {e}")))?;
        let decision_type = parse_list::<u32>(field("decision_type")?)
            .map_err(|e| err(format!("invalid decision_type: {e}")))?;
        let left_child = parse_list::<i32>(field("left_child")?)
            .map_err(|e| err(format!("invalid left_child: {e}")))?;
        let right_child = parse_list::<i32>(field("right_child")?)
            .map_err(|e| err(format!("invalid right_child: {e}")))?;

        for (name, len) in [
            ("split_feature", split_feature.len()),
            ("threshold", threshold.len()),
            ("decision_type", decision_type.len()),
            ("left_child", left_child.len()),
            ("right_child", right_child.len()),
        ] {
            if len != internal {
                return Err(err(format!(
                    "expected {internal} entries in {name}, found {len}"
                )));
            }
        }

        for &f in &split_feature {
            if f >= num_features {
                return Err(err(format!(
                    "split feature index {f} out of range (schema width {num_features})"
                )));
            }
        }
        for &child in left_child.iter().chain(right_child.iter()) {
            let valid = if child < 0 {
                ((!child) as usize) < num_leaves
            } else {
                (child as usize) < internal
            };
            if !valid {
                return Err(err(format!("child index {child} out of range")));
            }
        }

        // Child links must form a tree rooted at node 0; a revisited node
        // means a cycle (or shared subtree) that would trap the tree walk
        let mut visited = vec![false; internal];
        let mut stack = vec![0i32];
        while let Some(node) = stack.pop() {
            if node < 0 {
                continue;
            }
            let idx = node as usize;
            if visited[idx] {
                return Err(err(format!("cyclic child link at node {idx}")));
            }
            visited[idx] = true;
            stack.push(left_child[idx]);
            stack.push(right_child[idx]);
        }

        // Bit 1 of decision_type is the missing-value default direction
        let default_left = decision_type.iter().map(|d| d & 2 != 0).collect();

        Ok(Tree {
            split_feature,
            threshold,
            default_left,
            left_child,
            right_child,
            leaf_value,
        })
    }
}

fn parse_list<T: std::str::FromStr>(raw: &str) -> std::result::Result<Vec<T>, String>
where
    T::Err: std::fmt::Display,
{
    raw.split_whitespace()
        .map(|tok| tok.parse::<T>().map_err(|e| format!("'{tok}': {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    /// Two-feature artifact:
    /// - Tree 0: stump on f0, threshold 0.5, default left, leaves [-1.0, 1.0]
    /// - Tree 1: stump on f1, threshold 0.0, default right, leaves [0.5, -0.5]
    fn two_tree_artifact() -> &'static str {
        "num_class=1\n\
         max_feature_idx=1\n\
         objective=binary sigmoid:1\n\
         feature_names=f0 f1\n\
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
         Tree=1\n\
         num_leaves=2\n\
         split_feature=1\n\
         threshold=0.0\n\
         decision_type=0\n\
         left_child=-1\n\
         right_child=-2\n\
         leaf_value=0.5 -0.5\n\
         \n\
         end of trees\n"
    }

    #[test]
    fn test_parse_metadata() {
        let model = GbdtModel::from_text(two_tree_artifact()).unwrap();
        assert_eq!(model.num_trees(), 2);
        assert_eq!(model.num_features(), 2);
        assert_eq!(model.feature_names(), &["f0".to_string(), "f1".to_string()]);
    }

    #[test]
    fn test_predict_sums_trees_through_sigmoid() {
        let model = GbdtModel::from_text(two_tree_artifact()).unwrap();

        // f0=0.2 <= 0.5 -> -1.0; f1=-1.0 <= 0.0 -> 0.5; raw = -0.5
        let p = model.predict(&[0.2, -1.0]);
        assert!((p - sigmoid(-0.5)).abs() < 1e-12);

        // f0=0.9 > 0.5 -> 1.0; f1=1.0 > 0.0 -> -0.5; raw = 0.5
        let p = model.predict(&[0.9, 1.0]);
        assert!((p - sigmoid(0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_nan_routes_through_default_direction() {
        let model = GbdtModel::from_text(two_tree_artifact()).unwrap();

        // Tree 0 defaults left (-1.0), tree 1 defaults right (-0.5)
        let p = model.predict(&[f64::NAN, f64::NAN]);
        assert!((p - sigmoid(-1.5)).abs() < 1e-12);

        // NaN is not treated as zero: zero input takes the comparison path
        let p_zero = model.predict(&[0.0, 0.0]);
        assert!((p_zero - sigmoid(-0.5)).abs() < 1e-12);
        assert!((p - p_zero).abs() > 0.1);
    }

    #[test]
    fn test_sigmoid_coefficient_scales_raw_score() {
        let artifact = two_tree_artifact().replace("sigmoid:1", "sigmoid:2");
        let model = GbdtModel::from_text(&artifact).unwrap();
        let p = model.predict(&[0.9, 1.0]);
        assert!((p - sigmoid(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_single_leaf_tree() {
        let artifact = "num_class=1\n\
                        max_feature_idx=1\n\
                        objective=binary sigmoid:1\n\
                        Tree=0\n\
                        num_leaves=1\n\
                        leaf_value=0.3\n\
                        end of trees\n";
        let model = GbdtModel::from_text(artifact).unwrap();
        let p = model.predict(&[f64::NAN, 0.0]);
        assert!((p - sigmoid(0.3)).abs() < 1e-12);
    }

    #[test]
    fn test_multiclass_is_rejected() {
        let artifact = two_tree_artifact().replace("num_class=1", "num_class=3");
        assert!(matches!(
            GbdtModel::from_text(&artifact),
            Err(ModelError::Unsupported(_))
        ));
    }

    #[test]
    fn test_split_feature_out_of_range() {
        let artifact = two_tree_artifact().replace("split_feature=1", "split_feature=7");
        assert!(matches!(
            GbdtModel::from_text(&artifact),
            Err(ModelError::Parse { .. })
        ));
    }

    #[test]
    fn test_cyclic_child_links_are_rejected() {
        // Node 0 pointing back at itself passes the range check but would
        // loop forever at inference time
        let artifact = "num_class=1\n\
                        max_feature_idx=1\n\
                        objective=binary sigmoid:1\n\
                        Tree=0\n\
                        num_leaves=2\n\
                        split_feature=0\n\
                        threshold=0.5\n\
                        decision_type=2\n\
                        left_child=0\n\
                        right_child=-1\n\
                        leaf_value=-1.0 1.0\n\
                        end of trees\n";
        assert!(matches!(
            GbdtModel::from_text(artifact),
            Err(ModelError::Parse { .. })
        ));
    }

    #[test]
    fn test_leaf_count_mismatch() {
        let artifact = two_tree_artifact().replace("leaf_value=-1.0 1.0", "leaf_value=-1.0");
        assert!(matches!(
            GbdtModel::from_text(&artifact),
            Err(ModelError::Parse { .. })
        ));
    }

    #[test]
    fn test_empty_artifact_is_rejected() {
        assert!(GbdtModel::from_text("num_class=1\nmax_feature_idx=1\n").is_err());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let artifact = format!(
            "tree_sizes=120\n{}\nfeature_importances=f0=3 f1=1\n",
            two_tree_artifact()
        );
        // Trailing metadata after "end of trees" is skipped entirely
        assert!(GbdtModel::from_text(&artifact).is_ok());
    }
}
