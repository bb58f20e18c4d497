use serde::Deserialize;
use tracing::warn;

use crate::error::AppError;
use crate::types::FeatureVector;

/// Logistic sigmoid, the exact transform the models were trained against.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// One gradient-boosted tree in the flat parallel-array layout of the
/// artifact format. Node id 0 is the root; a negative child id means the
/// node has no child on that side.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeModel {
    pub left_children: Vec<i64>,
    pub right_children: Vec<i64>,
    pub split_indices: Vec<usize>,
    pub split_conditions: Vec<f64>,
    pub default_left: Vec<u8>,
    pub base_weights: Vec<f64>,
}

impl TreeModel {
    pub fn num_nodes(&self) -> usize {
        self.left_children.len()
    }

    /// Structural invariants checkable without traversal: equal-length
    /// arrays, child ids within bounds, at least one node.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.num_nodes();
        if n == 0 {
            return Err("tree has no nodes".to_string());
        }
        if self.right_children.len() != n
            || self.split_indices.len() != n
            || self.split_conditions.len() != n
            || self.default_left.len() != n
            || self.base_weights.len() != n
        {
            return Err(format!("parallel arrays disagree on length (root has {})", n));
        }
        for (i, (&l, &r)) in self
            .left_children
            .iter()
            .zip(self.right_children.iter())
            .enumerate()
        {
            if l >= n as i64 || r >= n as i64 {
                return Err(format!("node {} child id out of range", i));
            }
        }
        Ok(())
    }
}

/// Traverse one tree and return its leaf contribution.
///
/// Missing features (no entry, or NaN) follow the node's default branch.
/// Out-of-range node ids and traversals longer than the node count abort
/// with `ModelCorrupt` — a malformed tree can never loop or read out of
/// bounds.
pub fn evaluate_tree(
    tree: &TreeModel,
    feature_names: &[String],
    feats: &FeatureVector,
) -> Result<f64, AppError> {
    let n = tree.num_nodes();
    let mut node = 0usize;
    let mut steps = 0usize;

    loop {
        if node >= n {
            return Err(AppError::ModelCorrupt(format!(
                "node id {} out of range ({} nodes)",
                node, n
            )));
        }
        steps += 1;
        if steps > n {
            return Err(AppError::ModelCorrupt(format!(
                "traversal visited more than {} nodes, cycle suspected",
                n
            )));
        }

        let left = tree.left_children[node];
        let right = *tree
            .right_children
            .get(node)
            .ok_or_else(|| AppError::ModelCorrupt("right_children too short".to_string()))?;

        if left < 0 && right < 0 {
            return tree
                .base_weights
                .get(node)
                .copied()
                .ok_or_else(|| AppError::ModelCorrupt("base_weights too short".to_string()));
        }

        let split_idx = *tree
            .split_indices
            .get(node)
            .ok_or_else(|| AppError::ModelCorrupt("split_indices too short".to_string()))?;
        let split_cond = *tree
            .split_conditions
            .get(node)
            .ok_or_else(|| AppError::ModelCorrupt("split_conditions too short".to_string()))?;
        let default_left = tree
            .default_left
            .get(node)
            .map(|&d| d != 0)
            .ok_or_else(|| AppError::ModelCorrupt("default_left too short".to_string()))?;

        // An absent or NaN feature value takes the default branch
        let value = feature_names
            .get(split_idx)
            .and_then(|name| feats.get(name))
            .copied()
            .filter(|v| !v.is_nan());
        let go_left = match value {
            Some(v) => v < split_cond,
            None => default_left,
        };

        let next = if go_left { left } else { right };
        if next < 0 {
            return Err(AppError::ModelCorrupt(format!(
                "node {} has a single negative child",
                node
            )));
        }
        node = next as usize;
    }
}

/// An ordered forest plus the feature-name ordering its split indices are
/// relative to. Loaded once, immutable, shared by concurrent readers.
#[derive(Debug, Clone, Default)]
pub struct Ensemble {
    pub trees: Vec<TreeModel>,
    pub feature_names: Vec<String>,
}

// Artifact shape: the trees live at learner.gradient_booster.model.trees
#[derive(Deserialize, Default)]
struct Artifact {
    #[serde(default)]
    learner: Option<Learner>,
}

#[derive(Deserialize, Default)]
struct Learner {
    #[serde(default)]
    gradient_booster: Option<GradientBooster>,
    #[serde(default)]
    feature_names: Vec<String>,
}

#[derive(Deserialize, Default)]
struct GradientBooster {
    #[serde(default)]
    model: Option<BoosterModel>,
}

#[derive(Deserialize, Default)]
struct BoosterModel {
    #[serde(default)]
    trees: Option<Vec<TreeModel>>,
}

impl Ensemble {
    /// Zero trees: margin 0, probability exactly 0.5.
    pub fn empty(expected_names: &[&str]) -> Self {
        Self {
            trees: Vec::new(),
            feature_names: expected_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Deserialize a model artifact. Every failure mode — unparsable JSON,
    /// missing trees array, length-mismatched arrays, embedded feature
    /// ordering that disagrees with the extractor's — degrades to the empty
    /// ensemble with a diagnostic, never a fatal error.
    pub fn from_json(raw: &str, expected_names: &[&str]) -> Self {
        let artifact: Artifact = match serde_json::from_str(raw) {
            Ok(a) => a,
            Err(e) => {
                warn!("Model artifact parse failed, using empty ensemble: {}", e);
                return Self::empty(expected_names);
            }
        };

        let learner = match artifact.learner {
            Some(l) => l,
            None => {
                warn!("Model artifact has no learner object, using empty ensemble");
                return Self::empty(expected_names);
            }
        };

        let trees = match learner.gradient_booster.and_then(|g| g.model).and_then(|m| m.trees) {
            Some(t) => t,
            None => {
                warn!("Could not find trees array in model artifact, using empty ensemble");
                return Self::empty(expected_names);
            }
        };

        // The split indices are relative to this ordering; an artifact that
        // embeds a different one was trained against different features.
        if !learner.feature_names.is_empty()
            && learner.feature_names != expected_names
        {
            warn!(
                "Model artifact feature ordering {:?} does not match extractor ordering, using empty ensemble",
                learner.feature_names
            );
            return Self::empty(expected_names);
        }

        for (i, tree) in trees.iter().enumerate() {
            if let Err(e) = tree.validate() {
                warn!("Tree {} failed validation ({}), using empty ensemble", i, e);
                return Self::empty(expected_names);
            }
        }

        Self {
            trees,
            feature_names: expected_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Sum every tree's contribution and apply the logistic transform.
    pub fn score(&self, feats: &FeatureVector) -> Result<f64, AppError> {
        let mut margin = 0.0;
        for tree in &self.trees {
            margin += evaluate_tree(tree, &self.feature_names, feats)?;
        }
        Ok(sigmoid(margin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn leaf_tree(weight: f64) -> TreeModel {
        TreeModel {
            left_children: vec![-1],
            right_children: vec![-1],
            split_indices: vec![0],
            split_conditions: vec![0.0],
            default_left: vec![0],
            base_weights: vec![weight],
        }
    }

    // Root splits on feature 0 at 5.0; left leaf -1.0, right leaf +1.0
    fn split_tree(default_left: u8) -> TreeModel {
        TreeModel {
            left_children: vec![1, -1, -1],
            right_children: vec![2, -1, -1],
            split_indices: vec![0, 0, 0],
            split_conditions: vec![5.0, 0.0, 0.0],
            default_left: vec![default_left, 0, 0],
            base_weights: vec![0.0, -1.0, 1.0],
        }
    }

    fn names() -> Vec<String> {
        vec!["f0".to_string()]
    }

    fn feats(value: Option<f64>) -> FeatureVector {
        let mut m = HashMap::new();
        if let Some(v) = value {
            m.insert("f0".to_string(), v);
        }
        m
    }

    #[test]
    fn test_leaf_only_ensemble_probability() {
        let ensemble = Ensemble {
            trees: vec![leaf_tree(2.0), leaf_tree(2.0), leaf_tree(2.0)],
            feature_names: names(),
        };
        let p = ensemble.score(&feats(None)).unwrap();
        assert_eq!(p, 1.0 / (1.0 + (-6.0f64).exp()));
    }

    #[test]
    fn test_empty_ensemble_scores_half() {
        let ensemble = Ensemble::empty(&["f0"]);
        assert_eq!(ensemble.score(&feats(Some(3.0))).unwrap(), 0.5);
    }

    #[test]
    fn test_split_routing_on_present_value() {
        let tree = split_tree(1);
        // 4.0 < 5.0 goes left
        assert_eq!(evaluate_tree(&tree, &names(), &feats(Some(4.0))).unwrap(), -1.0);
        // 5.0 is not < 5.0, goes right
        assert_eq!(evaluate_tree(&tree, &names(), &feats(Some(5.0))).unwrap(), 1.0);
    }

    #[test]
    fn test_missing_feature_follows_default_branch() {
        assert_eq!(evaluate_tree(&split_tree(1), &names(), &feats(None)).unwrap(), -1.0);
        assert_eq!(evaluate_tree(&split_tree(0), &names(), &feats(None)).unwrap(), 1.0);
    }

    #[test]
    fn test_nan_value_is_missing() {
        assert_eq!(
            evaluate_tree(&split_tree(1), &names(), &feats(Some(f64::NAN))).unwrap(),
            -1.0
        );
    }

    #[test]
    fn test_determinism() {
        let ensemble = Ensemble {
            trees: vec![split_tree(1), leaf_tree(0.25)],
            feature_names: names(),
        };
        let input = feats(Some(4.5));
        let a = ensemble.score(&input).unwrap();
        let b = ensemble.score(&input).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_probability_strictly_inside_unit_interval() {
        for margin in [-50.0, -3.0, 0.0, 3.0, 50.0] {
            let ensemble = Ensemble {
                trees: vec![leaf_tree(margin)],
                feature_names: names(),
            };
            let p = ensemble.score(&feats(None)).unwrap();
            assert!(p > 0.0 && p < 1.0, "p = {} for margin {}", p, margin);
        }
    }

    #[test]
    fn test_cycle_is_detected() {
        // Node 0 and node 1 point back at each other on the left
        let tree = TreeModel {
            left_children: vec![1, 0, -1],
            right_children: vec![2, 2, -1],
            split_indices: vec![0, 0, 0],
            split_conditions: vec![5.0, 5.0, 0.0],
            default_left: vec![1, 1, 0],
            base_weights: vec![0.0, 0.0, 1.0],
        };
        let err = evaluate_tree(&tree, &names(), &feats(None)).unwrap_err();
        assert!(matches!(err, AppError::ModelCorrupt(_)));
    }

    #[test]
    fn test_out_of_range_child_is_detected() {
        let tree = TreeModel {
            left_children: vec![7],
            right_children: vec![8],
            split_indices: vec![0],
            split_conditions: vec![5.0],
            default_left: vec![1],
            base_weights: vec![0.0],
        };
        let err = evaluate_tree(&tree, &names(), &feats(Some(1.0))).unwrap_err();
        assert!(matches!(err, AppError::ModelCorrupt(_)));
    }

    #[test]
    fn test_from_json_full_artifact() {
        let raw = serde_json::json!({
            "learner": {
                "feature_names": ["f0"],
                "gradient_booster": {
                    "model": {
                        "trees": [{
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [0, 0, 0],
                            "split_conditions": [5.0, 0.0, 0.0],
                            "default_left": [1, 0, 0],
                            "base_weights": [0.0, -1.0, 1.0]
                        }]
                    }
                }
            }
        })
        .to_string();
        let ensemble = Ensemble::from_json(&raw, &["f0"]);
        assert_eq!(ensemble.len(), 1);
        assert_eq!(ensemble.score(&feats(Some(9.0))).unwrap(), sigmoid(1.0));
    }

    #[test]
    fn test_from_json_missing_trees_degrades_to_empty() {
        for raw in [
            "{}",
            r#"{"learner": {}}"#,
            r#"{"learner": {"gradient_booster": {}}}"#,
            r#"{"learner": {"gradient_booster": {"model": {}}}}"#,
            "not json at all",
        ] {
            let ensemble = Ensemble::from_json(raw, &["f0"]);
            assert!(ensemble.is_empty());
            assert_eq!(ensemble.score(&feats(None)).unwrap(), 0.5);
        }
    }

    #[test]
    fn test_from_json_rejects_mismatched_feature_ordering() {
        let raw = serde_json::json!({
            "learner": {
                "feature_names": ["other"],
                "gradient_booster": {"model": {"trees": [{
                    "left_children": [-1], "right_children": [-1],
                    "split_indices": [0], "split_conditions": [0.0],
                    "default_left": [0], "base_weights": [1.0]
                }]}}
            }
        })
        .to_string();
        assert!(Ensemble::from_json(&raw, &["f0"]).is_empty());
    }

    #[test]
    fn test_from_json_rejects_length_mismatch() {
        let raw = serde_json::json!({
            "learner": {
                "gradient_booster": {"model": {"trees": [{
                    "left_children": [-1, -1], "right_children": [-1],
                    "split_indices": [0], "split_conditions": [0.0],
                    "default_left": [0], "base_weights": [1.0]
                }]}}
            }
        })
        .to_string();
        assert!(Ensemble::from_json(&raw, &["f0"]).is_empty());
    }
}
