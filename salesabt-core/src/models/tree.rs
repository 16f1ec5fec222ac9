//! CART classification tree (Gini impurity).
//!
//! Nodes live in a flat arena indexed by position; the root is node 0. A split
//! sends `x[feature] <= threshold` left. Rows with a missing (NaN) value follow
//! the direction learned for that split, chosen by whichever side gave the lower
//! impurity during training.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

use super::{
    check_training_input, check_width, normalise, unknown_param, Classifier, ModelError,
    ParamValue,
};

/// Minimum impurity decrease for a split to be kept.
const MIN_DECREASE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        missing_left: bool,
        left: usize,
        right: usize,
    },
}

/// A fitted tree: node arena plus the input width it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    pub nodes: Vec<Node>,
    pub n_features: usize,
}

impl TreeModel {
    /// Leaf value reached by one row.
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    missing_left,
                    left,
                    right,
                } => {
                    let v = row[*feature];
                    let go_left = if v.is_nan() {
                        *missing_left
                    } else {
                        v <= *threshold
                    };
                    idx = if go_left { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

// ─── Split search ────────────────────────────────────────────────────

/// Per-row statistics a split criterion aggregates.
pub(crate) trait SplitCriterion {
    type Stats: Copy + Default;

    fn row_stats(&self, row: usize) -> Self::Stats;
    fn add(a: Self::Stats, b: Self::Stats) -> Self::Stats;
    fn sub(a: Self::Stats, b: Self::Stats) -> Self::Stats;
    /// Whether a child with these stats may become a leaf of the split.
    fn admissible(&self, child: Self::Stats) -> bool;
    /// Score of a node; larger is better. A split's gain is
    /// `score(left) + score(right) - score(parent)`.
    fn score(&self, stats: Self::Stats) -> f64;
}

/// Best split found for a node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SplitChoice {
    pub feature: usize,
    pub threshold: f64,
    pub missing_left: bool,
    pub gain: f64,
}

/// Scan `features` for the split maximising the criterion gain.
pub(crate) fn best_split<C: SplitCriterion>(
    criterion: &C,
    x: &ArrayView2<'_, f64>,
    rows: &[usize],
    features: &[usize],
) -> Option<SplitChoice> {
    let parent = rows
        .iter()
        .fold(C::Stats::default(), |acc, &r| C::add(acc, criterion.row_stats(r)));
    let parent_score = criterion.score(parent);
    let mut best: Option<SplitChoice> = None;

    for &feature in features {
        let mut present: Vec<(f64, usize)> = Vec::with_capacity(rows.len());
        let mut missing = C::Stats::default();
        let mut n_missing = 0usize;
        for &r in rows {
            let v = x[[r, feature]];
            if v.is_nan() {
                missing = C::add(missing, criterion.row_stats(r));
                n_missing += 1;
            } else {
                present.push((v, r));
            }
        }
        if present.is_empty() {
            continue;
        }
        present.sort_by(|a, b| a.0.total_cmp(&b.0));

        let directions: &[bool] = if n_missing > 0 { &[false, true] } else { &[false] };
        let mut left_present = C::Stats::default();
        for i in 0..present.len() {
            left_present = C::add(left_present, criterion.row_stats(present[i].1));
            let last = i + 1 == present.len();
            if !last && present[i].0 == present[i + 1].0 {
                continue;
            }
            // With every present row on the left only the missing rows remain
            // to form the right side.
            if last && n_missing == 0 {
                continue;
            }
            let threshold = if last {
                present[i].0
            } else {
                let mid = present[i].0 + (present[i + 1].0 - present[i].0) / 2.0;
                if mid >= present[i + 1].0 {
                    present[i].0
                } else {
                    mid
                }
            };

            for &missing_left in directions {
                if last && missing_left {
                    continue;
                }
                let left = if missing_left {
                    C::add(left_present, missing)
                } else {
                    left_present
                };
                let right = C::sub(parent, left);
                if !criterion.admissible(left) || !criterion.admissible(right) {
                    continue;
                }
                let gain = criterion.score(left) + criterion.score(right) - parent_score;
                if best.map_or(true, |b| gain > b.gain) {
                    best = Some(SplitChoice {
                        feature,
                        threshold,
                        missing_left,
                        gain,
                    });
                }
            }
        }
    }
    best
}

pub(crate) fn goes_left(x: &ArrayView2<'_, f64>, row: usize, choice: &SplitChoice) -> bool {
    let v = x[[row, choice.feature]];
    if v.is_nan() {
        choice.missing_left
    } else {
        v <= choice.threshold
    }
}

// ─── Gini criterion ──────────────────────────────────────────────────

/// (rows, positives)
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ClassCounts {
    n: f64,
    pos: f64,
}

struct Gini<'a> {
    y: ArrayView1<'a, f64>,
    min_samples_leaf: usize,
}

impl SplitCriterion for Gini<'_> {
    type Stats = ClassCounts;

    fn row_stats(&self, row: usize) -> ClassCounts {
        ClassCounts {
            n: 1.0,
            pos: self.y[row],
        }
    }

    fn add(a: ClassCounts, b: ClassCounts) -> ClassCounts {
        ClassCounts {
            n: a.n + b.n,
            pos: a.pos + b.pos,
        }
    }

    fn sub(a: ClassCounts, b: ClassCounts) -> ClassCounts {
        ClassCounts {
            n: a.n - b.n,
            pos: a.pos - b.pos,
        }
    }

    fn admissible(&self, child: ClassCounts) -> bool {
        child.n >= self.min_samples_leaf as f64 && child.n > 0.0
    }

    /// Negative weighted Gini impurity, `-n * gini`.
    fn score(&self, s: ClassCounts) -> f64 {
        if s.n <= 0.0 {
            return 0.0;
        }
        let p = s.pos / s.n;
        -s.n * 2.0 * p * (1.0 - p)
    }
}

// ─── Tree growing ────────────────────────────────────────────────────

/// Structural limits shared by the single tree and the forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features sampled per node; `None` considers all.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

impl TreeParams {
    /// Apply a structural parameter; returns `Ok(false)` if the name is not one.
    pub(crate) fn apply(&mut self, name: &str, value: &ParamValue) -> Result<bool, ModelError> {
        match name {
            "max_depth" => self.max_depth = value.to_optional_usize(name, 1)?,
            "min_samples_split" => self.min_samples_split = value.to_usize(name, 2)?,
            "min_samples_leaf" => self.min_samples_leaf = value.to_usize(name, 1)?,
            "max_features" => self.max_features = value.to_optional_usize(name, 1)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

struct GiniGrower<'a> {
    x: ArrayView2<'a, f64>,
    criterion: Gini<'a>,
    params: &'a TreeParams,
    rng: Option<&'a mut StdRng>,
    nodes: Vec<Node>,
    importance: Vec<f64>,
}

impl GiniGrower<'_> {
    fn grow(&mut self, rows: &[usize], depth: usize) -> usize {
        let n = rows.len();
        let pos: f64 = rows.iter().map(|&r| self.criterion.y[r]).sum();
        let value = pos / n as f64;
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        let pure = pos == 0.0 || pos == n as f64;
        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if pure || depth_reached || n < self.params.min_samples_split {
            return idx;
        }

        let n_features = self.x.ncols();
        let features: Vec<usize> = match (self.params.max_features, self.rng.as_deref_mut()) {
            (Some(k), Some(rng)) if k < n_features => {
                let mut picked = sample(rng, n_features, k).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..n_features).collect(),
        };

        let Some(choice) = best_split(&self.criterion, &self.x, rows, &features) else {
            return idx;
        };
        if choice.gain <= MIN_DECREASE {
            return idx;
        }

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&r| goes_left(&self.x, r, &choice));
        self.importance[choice.feature] += choice.gain;

        let left = self.grow(&left_rows, depth + 1);
        let right = self.grow(&right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: choice.feature,
            threshold: choice.threshold,
            missing_left: choice.missing_left,
            left,
            right,
        };
        idx
    }
}

/// Grow a Gini tree over `rows` (duplicates allowed, as in a bootstrap sample).
///
/// Returns the tree and its raw (unnormalised) impurity-decrease importances.
pub(crate) fn grow_gini_tree(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    rows: &[usize],
    params: &TreeParams,
    rng: Option<&mut StdRng>,
) -> (TreeModel, Vec<f64>) {
    let n_features = x.ncols();
    let mut grower = GiniGrower {
        x: x.view(),
        criterion: Gini {
            y: y.view(),
            min_samples_leaf: params.min_samples_leaf,
        },
        params,
        rng,
        nodes: Vec::new(),
        importance: vec![0.0; n_features],
    };
    grower.grow(rows, 0);
    (
        TreeModel {
            nodes: grower.nodes,
            n_features,
        },
        grower.importance,
    )
}

// ─── Estimator ───────────────────────────────────────────────────────

/// Single decision tree classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub params: TreeParams,
    #[serde(default)]
    model: Option<TreeModel>,
    #[serde(default)]
    importances: Option<Vec<f64>>,
}

impl DecisionTree {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params,
            model: None,
            importances: None,
        }
    }

    pub fn model(&self) -> Option<&TreeModel> {
        self.model.as_ref()
    }
}

impl Classifier for DecisionTree {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        check_training_input(&x, &y)?;
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let (model, importance) = grow_gini_tree(x, y, &rows, &self.params, None);
        self.model = Some(model);
        self.importances = Some(normalise(importance));
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        let model = self.model.as_ref().ok_or(ModelError::NotFitted)?;
        check_width(model.n_features, &x)?;
        Ok(x.rows().into_iter().map(|row| model.predict_row(row)).collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.importances.clone()
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ModelError> {
        if self.params.apply(name, value)? {
            Ok(())
        } else {
            Err(unknown_param("decision_tree", name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn learns_threshold() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut tree = DecisionTree::default();
        tree.fit(x.view(), y.view()).unwrap();
        let p = tree.predict_proba(array![[0.0], [6.0], [7.0], [20.0]].view()).unwrap();
        assert_eq!(p.to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
        assert_eq!(tree.model().unwrap().depth(), 1);
        assert_eq!(tree.feature_importances(), Some(vec![1.0]));
    }

    #[test]
    fn picks_informative_feature() {
        let x = array![
            [5.0, 0.0],
            [1.0, 0.0],
            [4.0, 0.0],
            [2.0, 1.0],
            [3.0, 1.0],
            [6.0, 1.0]
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut tree = DecisionTree::default();
        tree.fit(x.view(), y.view()).unwrap();
        let imp = tree.feature_importances().unwrap();
        assert_eq!(imp, vec![0.0, 1.0]);
    }

    #[test]
    fn max_depth_limits_growth() {
        let x = Array2::from_shape_fn((16, 1), |(i, _)| i as f64);
        let y: Array1<f64> = (0..16).map(|i| f64::from(i % 2 == 0)).collect();
        let mut tree = DecisionTree::default();
        tree.set_param("max_depth", &ParamValue::Int(2)).unwrap();
        tree.fit(x.view(), y.view()).unwrap();
        assert!(tree.model().unwrap().depth() <= 2);
    }

    #[test]
    fn min_samples_leaf_respected() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 0.0, 0.0, 0.0, 0.0];
        let mut tree = DecisionTree::default();
        tree.set_param("min_samples_leaf", &ParamValue::Int(2)).unwrap();
        tree.fit(x.view(), y.view()).unwrap();
        // The lone positive cannot be isolated.
        let p = tree.predict_proba(array![[1.0]].view()).unwrap();
        assert!(p[0] < 1.0);
    }

    #[test]
    fn missing_values_follow_learned_direction() {
        let nan = f64::NAN;
        let x = array![[1.0], [2.0], [nan], [nan], [10.0], [11.0]];
        let y = array![0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut tree = DecisionTree::default();
        tree.fit(x.view(), y.view()).unwrap();
        let p = tree.predict_proba(array![[nan], [1.5]].view()).unwrap();
        assert_eq!(p.to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn rejects_unknown_param() {
        let mut tree = DecisionTree::default();
        assert!(matches!(
            tree.set_param("eta", &ParamValue::Float(0.1)),
            Err(ModelError::UnknownParam { .. })
        ));
    }

    #[test]
    fn predict_before_fit() {
        let tree = DecisionTree::default();
        assert_eq!(
            tree.predict_proba(array![[1.0]].view()),
            Err(ModelError::NotFitted)
        );
    }

    #[test]
    fn width_mismatch() {
        let mut tree = DecisionTree::default();
        tree.fit(array![[1.0], [2.0]].view(), array![0.0, 1.0].view())
            .unwrap();
        assert_eq!(
            tree.predict_proba(array![[1.0, 2.0]].view()),
            Err(ModelError::FeatureMismatch { expected: 1, got: 2 })
        );
    }
}
