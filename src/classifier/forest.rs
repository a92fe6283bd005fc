//! # Tree Ensemble Classifier
//!
//! Evaluates decision trees / random forests exported to JSON:
//!
//! ```json
//! {
//!   "n_features": 40,
//!   "classes": [0, 1, 2, 3, 4],
//!   "scaler": { "mean": [...], "scale": [...] },
//!   "trees": [
//!     { "nodes": [
//!       { "feature": 3, "threshold": -12.5, "left": 1, "right": 2 },
//!       { "value": [0.0, 8.0, 1.0, 0.0, 0.0] },
//!       { "value": [4.0, 0.0, 0.0, 0.0, 2.0] }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Each tree starts at node 0. A split sends the sample left when
//! `x[feature] <= threshold`. Leaves hold per-class weights; every leaf is
//! normalized to a distribution and the ensemble averages them, the same way
//! a random forest's `predict` does. `classes` and `scaler` are optional.

use super::scaler::{ScalerParams, StandardScaler};
use super::{check_input, ClassIndex, Classifier, ModelFormat};
use crate::features::FeatureVector;
use crate::error::PipelineResult;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ForestFile {
    n_features: usize,
    #[serde(default)]
    classes: Option<Vec<i64>>,
    #[serde(default)]
    scaler: Option<ScalerParams>,
    trees: Vec<TreeFile>,
}

#[derive(Debug, Deserialize)]
struct TreeFile {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

/// Validated tree; leaf values are already normalized distributions.
#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn leaf_for(&self, x: &[f32]) -> &[f64] {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if x[*feature] as f64 <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf { value } => return value,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForestClassifier {
    n_features: usize,
    classes: Vec<i64>,
    scaler: Option<StandardScaler>,
    trees: Vec<Tree>,
}

impl ForestClassifier {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model file {}", path.display()))?;
        let forest = Self::from_json(&text)
            .with_context(|| format!("invalid tree ensemble in {}", path.display()))?;
        info!(
            path = %path.display(),
            trees = forest.num_trees(),
            classes = forest.classes.len(),
            scaled = forest.scaler.is_some(),
            "tree ensemble loaded"
        );
        Ok(forest)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: ForestFile = serde_json::from_str(text)?;
        Self::from_file(file)
    }

    fn from_file(file: ForestFile) -> Result<Self> {
        if file.n_features == 0 {
            return Err(anyhow!("n_features must be greater than 0"));
        }
        if file.trees.is_empty() {
            return Err(anyhow!("ensemble has no trees"));
        }

        let num_classes = match &file.classes {
            Some(classes) => classes.len(),
            None => first_leaf_width(&file.trees)?,
        };
        if num_classes == 0 {
            return Err(anyhow!("ensemble has no classes"));
        }
        let classes = file
            .classes
            .unwrap_or_else(|| (0..num_classes as i64).collect());

        let scaler = file
            .scaler
            .map(StandardScaler::from_params)
            .transpose()?;
        if let Some(scaler) = &scaler {
            if scaler.len() != file.n_features {
                return Err(anyhow!(
                    "scaler covers {} features but the model expects {}",
                    scaler.len(),
                    file.n_features
                ));
            }
        }

        let trees = file
            .trees
            .into_iter()
            .enumerate()
            .map(|(t, tree)| {
                validate_tree(tree, file.n_features, num_classes)
                    .with_context(|| format!("tree {}", t))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            n_features: file.n_features,
            classes,
            scaler,
            trees,
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

fn first_leaf_width(trees: &[TreeFile]) -> Result<usize> {
    trees
        .iter()
        .flat_map(|t| t.nodes.iter())
        .find_map(|n| match n {
            Node::Leaf { value } => Some(value.len()),
            Node::Split { .. } => None,
        })
        .ok_or_else(|| anyhow!("ensemble has no leaves"))
}

/// Check indices and normalize leaves.
///
/// Children must point forward, which rules out cycles and guarantees that
/// every walk from the root ends at a leaf.
fn validate_tree(tree: TreeFile, n_features: usize, num_classes: usize) -> Result<Tree> {
    let len = tree.nodes.len();
    if len == 0 {
        return Err(anyhow!("tree has no nodes"));
    }

    let nodes = tree
        .nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| match node {
            Node::Split {
                feature,
                left,
                right,
                threshold,
            } => {
                if feature >= n_features {
                    return Err(anyhow!("node {} splits on feature {} of {}", i, feature, n_features));
                }
                if !threshold.is_finite() {
                    return Err(anyhow!("node {} has a non-finite threshold", i));
                }
                for child in [left, right] {
                    if child <= i || child >= len {
                        return Err(anyhow!("node {} has invalid child {}", i, child));
                    }
                }
                Ok(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                })
            }
            Node::Leaf { value } => {
                if value.len() != num_classes {
                    return Err(anyhow!(
                        "leaf {} has {} weights, expected {}",
                        i,
                        value.len(),
                        num_classes
                    ));
                }
                if value.iter().any(|w| !w.is_finite() || *w < 0.0) {
                    return Err(anyhow!("leaf {} has negative or non-finite weights", i));
                }
                let total: f64 = value.iter().sum();
                if total <= 0.0 {
                    return Err(anyhow!("leaf {} has no weight", i));
                }
                Ok(Node::Leaf {
                    value: value.into_iter().map(|w| w / total).collect(),
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Tree { nodes })
}

impl Classifier for ForestClassifier {
    fn format(&self) -> ModelFormat {
        ModelFormat::Forest
    }

    fn input_dim(&self) -> usize {
        self.n_features
    }

    fn num_classes(&self) -> usize {
        self.classes.len()
    }

    fn predict(&self, features: &FeatureVector) -> PipelineResult<ClassIndex> {
        check_input(self.n_features, features)?;

        let scaled;
        let x = match &self.scaler {
            Some(scaler) => {
                scaled = scaler.transform(features.as_slice());
                &scaled[..]
            }
            None => features.as_slice(),
        };

        let mut votes = vec![0.0f64; self.classes.len()];
        for tree in &self.trees {
            for (vote, p) in votes.iter_mut().zip(tree.leaf_for(x)) {
                *vote += p;
            }
        }

        // Strict comparison keeps the first index on ties
        let mut best = 0;
        for (i, v) in votes.iter().enumerate() {
            if *v > votes[best] {
                best = i;
            }
        }
        Ok(ClassIndex(self.classes[best]))
    }
}
