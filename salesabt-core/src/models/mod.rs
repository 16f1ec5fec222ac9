//! Binary classifiers.
//!
//! Every estimator implements [`Classifier`]: fit on a dense `f64` matrix with
//! 0/1 labels, then produce positive-class probabilities. [`Estimator`] is the
//! tagged variant a pipeline ends in; it is also what gets persisted, so each
//! model stores plain parameters (coefficients, split points, leaf values).

pub mod boosting;
pub mod forest;
pub mod logistic;
pub mod tree;

pub use boosting::GradientBoosting;
pub use forest::RandomForest;
pub use logistic::LogisticRegression;
pub use tree::{DecisionTree, TreeParams};

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("model used before fit")]
    NotFitted,

    #[error("cannot fit on zero rows")]
    EmptyInput,

    #[error("{rows} feature rows but {targets} targets")]
    ShapeMismatch { rows: usize, targets: usize },

    #[error("model was fitted on {expected} features, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("input contains missing or non-finite values")]
    NonFiniteInput,

    #[error("labels must be 0 or 1, found {0}")]
    NonBinaryTarget(f64),

    #[error("{estimator} has no parameter '{name}'")]
    UnknownParam { estimator: String, name: String },

    #[error("invalid value {value} for '{name}': {reason}")]
    InvalidParam {
        name: String,
        value: String,
        reason: String,
    },

    #[error("solver diverged")]
    Diverged,
}

// ─── Hyper-parameters ────────────────────────────────────────────────

/// A single hyper-parameter value from a search grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Null,
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Null => write!(f, "None"),
        }
    }
}

impl ParamValue {
    fn invalid(&self, name: &str, reason: &str) -> ModelError {
        ModelError::InvalidParam {
            name: name.to_string(),
            value: self.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Numeric value, accepting integers.
    pub fn to_f64(&self, name: &str) -> Result<f64, ModelError> {
        match self {
            ParamValue::Int(v) => Ok(*v as f64),
            ParamValue::Float(v) => Ok(*v),
            ParamValue::Null => Err(self.invalid(name, "expected a number")),
        }
    }

    /// Integer at least `min`.
    pub fn to_usize(&self, name: &str, min: usize) -> Result<usize, ModelError> {
        match self {
            ParamValue::Int(v) if *v >= min as i64 => Ok(*v as usize),
            ParamValue::Int(_) => Err(self.invalid(name, &format!("must be >= {min}"))),
            _ => Err(self.invalid(name, "expected an integer")),
        }
    }

    /// Integer at least `min`, or `None` for no limit.
    pub fn to_optional_usize(&self, name: &str, min: usize) -> Result<Option<usize>, ModelError> {
        match self {
            ParamValue::Null => Ok(None),
            other => other.to_usize(name, min).map(Some),
        }
    }

    /// Seed value.
    pub fn to_seed(&self, name: &str) -> Result<u64, ModelError> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Ok(*v as u64),
            _ => Err(self.invalid(name, "expected a non-negative integer")),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<Option<i64>> for ParamValue {
    fn from(v: Option<i64>) -> Self {
        v.map_or(ParamValue::Null, ParamValue::Int)
    }
}

// ─── Classifier capability ───────────────────────────────────────────

pub trait Classifier {
    /// Fit on rows of `x` with labels `y` in {0, 1}.
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ModelError>;

    /// Probability of the positive class per row.
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError>;

    /// Hard labels at the 0.5 threshold.
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| if p > 0.5 { 1.0 } else { 0.0 }))
    }

    /// Normalised per-feature importances, if the model defines them.
    fn feature_importances(&self) -> Option<Vec<f64>>;

    /// Apply a named hyper-parameter.
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ModelError>;
}

/// The estimator families a pipeline can end in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    Logistic(LogisticRegression),
    Tree(DecisionTree),
    Forest(RandomForest),
    Boosted(GradientBoosting),
}

impl Estimator {
    pub fn name(&self) -> &'static str {
        match self {
            Estimator::Logistic(_) => "logistic_regression",
            Estimator::Tree(_) => "decision_tree",
            Estimator::Forest(_) => "random_forest",
            Estimator::Boosted(_) => "gradient_boosting",
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Estimator::Logistic(m) => m,
            Estimator::Tree(m) => m,
            Estimator::Forest(m) => m,
            Estimator::Boosted(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Estimator::Logistic(m) => m,
            Estimator::Tree(m) => m,
            Estimator::Forest(m) => m,
            Estimator::Boosted(m) => m,
        }
    }
}

impl Classifier for Estimator {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        self.inner().predict_proba(x)
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.inner().feature_importances()
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ModelError> {
        self.inner_mut().set_param(name, value)
    }
}

// ─── Shared helpers ──────────────────────────────────────────────────

pub(crate) fn check_training_input(
    x: &ArrayView2<'_, f64>,
    y: &ArrayView1<'_, f64>,
) -> Result<(), ModelError> {
    if x.nrows() == 0 {
        return Err(ModelError::EmptyInput);
    }
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            rows: x.nrows(),
            targets: y.len(),
        });
    }
    if let Some(&bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        return Err(ModelError::NonBinaryTarget(bad));
    }
    Ok(())
}

pub(crate) fn check_width(expected: usize, x: &ArrayView2<'_, f64>) -> Result<(), ModelError> {
    if x.ncols() != expected {
        return Err(ModelError::FeatureMismatch {
            expected,
            got: x.ncols(),
        });
    }
    Ok(())
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

pub(crate) fn normalise(mut scores: Vec<f64>) -> Vec<f64> {
    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        scores.iter_mut().for_each(|s| *s /= total);
    }
    scores
}

pub(crate) fn unknown_param(estimator: &str, name: &str) -> ModelError {
    ModelError::UnknownParam {
        estimator: estimator.to_string(),
        name: name.to_string(),
    }
}
