//! Second-order gradient boosting for the logistic loss.
//!
//! Each round fits a regression tree to the gradient/hessian of the log loss at
//! the current margin. Split gain is
//! `½·[G_L²/(H_L+λ) + G_R²/(H_R+λ) − G²/(H+λ)]`, leaf weight is `−G/(H+λ)`
//! scaled by `eta`. Rows with missing values are routed by a learned default
//! direction, so the model accepts unimputed input.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

use super::tree::{best_split, goes_left, Node, SplitCriterion, TreeModel};
use super::{
    check_training_input, check_width, normalise, sigmoid, unknown_param, Classifier, ModelError,
    ParamValue,
};
use crate::rng::SeedHierarchy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    /// Learning rate.
    pub eta: f64,
    /// Fraction of rows sampled (without replacement) per round.
    pub subsample: f64,
    /// L2 regularisation on leaf weights.
    pub lambda: f64,
    /// Minimum gain to keep a split.
    pub gamma: f64,
    /// Minimum hessian sum per child.
    pub min_child_weight: f64,
    pub random_state: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            eta: 0.3,
            subsample: 1.0,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            random_state: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GradStats {
    g: f64,
    h: f64,
}

struct LogLoss<'a> {
    grad: &'a [f64],
    hess: &'a [f64],
    lambda: f64,
    min_child_weight: f64,
}

impl LogLoss<'_> {
    fn leaf_weight(&self, s: GradStats) -> f64 {
        -s.g / (s.h + self.lambda)
    }
}

impl SplitCriterion for LogLoss<'_> {
    type Stats = GradStats;

    fn row_stats(&self, row: usize) -> GradStats {
        GradStats {
            g: self.grad[row],
            h: self.hess[row],
        }
    }

    fn add(a: GradStats, b: GradStats) -> GradStats {
        GradStats {
            g: a.g + b.g,
            h: a.h + b.h,
        }
    }

    fn sub(a: GradStats, b: GradStats) -> GradStats {
        GradStats {
            g: a.g - b.g,
            h: a.h - b.h,
        }
    }

    fn admissible(&self, child: GradStats) -> bool {
        child.h >= self.min_child_weight
    }

    fn score(&self, s: GradStats) -> f64 {
        0.5 * s.g * s.g / (s.h + self.lambda)
    }
}

struct RoundGrower<'a> {
    x: ArrayView2<'a, f64>,
    loss: LogLoss<'a>,
    params: &'a BoostParams,
    nodes: Vec<Node>,
    gain: Vec<f64>,
}

impl RoundGrower<'_> {
    fn grow(&mut self, rows: &[usize], depth: usize) -> usize {
        let stats = rows.iter().fold(GradStats::default(), |acc, &r| {
            LogLoss::add(acc, self.loss.row_stats(r))
        });
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.params.eta * self.loss.leaf_weight(stats),
        });
        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }

        let features: Vec<usize> = (0..self.x.ncols()).collect();
        let Some(choice) = best_split(&self.loss, &self.x, rows, &features) else {
            return idx;
        };
        if choice.gain <= self.params.gamma || choice.gain <= 1e-12 {
            return idx;
        }

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&r| goes_left(&self.x, r, &choice));
        self.gain[choice.feature] += choice.gain;

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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub params: BoostParams,
    #[serde(default)]
    base_margin: f64,
    #[serde(default)]
    trees: Vec<TreeModel>,
    #[serde(default)]
    importances: Option<Vec<f64>>,
}

impl GradientBoosting {
    pub fn new(params: BoostParams) -> Self {
        Self {
            params,
            base_margin: 0.0,
            trees: Vec::new(),
            importances: None,
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.params.random_state = seed;
        self
    }

    pub fn trees(&self) -> &[TreeModel] {
        &self.trees
    }

    fn margin(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        check_training_input(&x, &y)?;
        if x.iter().any(|v| v.is_infinite()) {
            return Err(ModelError::NonFiniteInput);
        }
        let n = x.nrows();
        let params = &self.params;
        let seeds = SeedHierarchy::new(params.random_state);
        let n_sampled = ((n as f64 * params.subsample).round() as usize).clamp(1, n);

        // base_score 0.5 → margin 0
        let base_margin = 0.0;
        let mut margins = vec![base_margin; n];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut gain = vec![0.0; x.ncols()];

        for round in 0..params.n_estimators {
            let mut grad = vec![0.0; n];
            let mut hess = vec![0.0; n];
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = p - y[i];
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }

            let rows: Vec<usize> = if n_sampled < n {
                let mut rng = seeds.rng_for("boost_round", round as u64);
                let mut picked = sample(&mut rng, n, n_sampled).into_vec();
                picked.sort_unstable();
                picked
            } else {
                (0..n).collect()
            };

            let mut grower = RoundGrower {
                x: x.view(),
                loss: LogLoss {
                    grad: &grad,
                    hess: &hess,
                    lambda: params.lambda,
                    min_child_weight: params.min_child_weight,
                },
                params,
                nodes: Vec::new(),
                gain: vec![0.0; x.ncols()],
            };
            grower.grow(&rows, 0);
            let tree = TreeModel {
                nodes: grower.nodes,
                n_features: x.ncols(),
            };
            for (total, g) in gain.iter_mut().zip(&grower.gain) {
                *total += g;
            }

            for (i, row) in x.rows().into_iter().enumerate() {
                margins[i] += tree.predict_row(row);
            }
            if margins.iter().any(|m| !m.is_finite()) {
                return Err(ModelError::Diverged);
            }
            trees.push(tree);
        }

        self.base_margin = base_margin;
        self.trees = trees;
        self.importances = Some(normalise(gain));
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        let first = self.trees.first().ok_or(ModelError::NotFitted)?;
        check_width(first.n_features, &x)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| sigmoid(self.margin(row)))
            .collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.importances.clone()
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ModelError> {
        let p = &mut self.params;
        match name {
            "n_estimators" => p.n_estimators = value.to_usize(name, 1)?,
            "max_depth" => p.max_depth = value.to_usize(name, 1)?,
            "eta" | "learning_rate" => {
                let eta = value.to_f64(name)?;
                if !(eta > 0.0 && eta <= 1.0) {
                    return Err(ModelError::InvalidParam {
                        name: name.into(),
                        value: value.to_string(),
                        reason: "must be in (0, 1]".into(),
                    });
                }
                p.eta = eta;
            }
            "subsample" => {
                let s = value.to_f64(name)?;
                if !(s > 0.0 && s <= 1.0) {
                    return Err(ModelError::InvalidParam {
                        name: name.into(),
                        value: value.to_string(),
                        reason: "must be in (0, 1]".into(),
                    });
                }
                p.subsample = s;
            }
            "lambda" | "reg_lambda" => p.lambda = value.to_f64(name)?.max(0.0),
            "gamma" => p.gamma = value.to_f64(name)?.max(0.0),
            "min_child_weight" => p.min_child_weight = value.to_f64(name)?.max(0.0),
            "random_state" => p.random_state = value.to_seed(name)?,
            _ => return Err(unknown_param("gradient_boosting", name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((80, 2), |(i, j)| {
            if j == 0 {
                i as f64
            } else {
                ((i * 13) % 7) as f64
            }
        });
        let y: Array1<f64> = (0..80).map(|i| f64::from(i >= 40)).collect();
        (x, y)
    }

    #[test]
    fn boosting_separates_classes() {
        let (x, y) = data();
        let mut gb = GradientBoosting::default();
        gb.set_param("n_estimators", &ParamValue::Int(10)).unwrap();
        gb.set_param("max_depth", &ParamValue::Int(3)).unwrap();
        gb.fit(x.view(), y.view()).unwrap();
        let p = gb.predict_proba(x.view()).unwrap();
        assert!(p[0] < 0.2);
        assert!(p[79] > 0.8);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
        let imp = gb.feature_importances().unwrap();
        assert!(imp[0] > imp[1]);
    }

    #[test]
    fn accepts_missing_values() {
        let nan = f64::NAN;
        let x = array![[1.0], [nan], [2.0], [nan], [10.0], [11.0], [12.0], [13.0]];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut gb = GradientBoosting::default();
        gb.set_param("n_estimators", &ParamValue::Int(20)).unwrap();
        gb.set_param("min_child_weight", &ParamValue::Float(0.0)).unwrap();
        gb.fit(x.view(), y.view()).unwrap();
        let p = gb.predict_proba(array![[nan], [12.5]].view()).unwrap();
        assert!(p[0] < 0.5);
        assert!(p[1] > 0.5);
    }

    #[test]
    fn subsampling_is_seeded() {
        let (x, y) = data();
        let fit = |seed: u64| {
            let mut gb = GradientBoosting::default().with_random_state(seed);
            gb.set_param("n_estimators", &ParamValue::Int(5)).unwrap();
            gb.set_param("subsample", &ParamValue::Float(0.5)).unwrap();
            gb.fit(x.view(), y.view()).unwrap();
            gb
        };
        assert_eq!(fit(1992), fit(1992));
    }

    #[test]
    fn rejects_bad_eta() {
        let mut gb = GradientBoosting::default();
        assert!(gb.set_param("eta", &ParamValue::Float(0.0)).is_err());
        assert!(gb.set_param("eta", &ParamValue::Float(0.1)).is_ok());
        assert_eq!(gb.params.eta, 0.1);
    }
}
