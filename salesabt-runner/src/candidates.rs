//! The candidate pipelines compared by a training run.

use salesabt_core::models::{
    Classifier, DecisionTree, GradientBoosting, LogisticRegression, RandomForest,
};
use salesabt_core::{Estimator, FeaturePartition, ModelError, ParamValue, Pipeline, Scoring, Stage};
use serde::Serialize;

use crate::config::ScoringPolicy;
use crate::search::{ParamGrid, ParamPoint};

/// Preprocessing placed in front of the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessing {
    /// Zero imputer, one imputer, then the one-hot encoder.
    Full,
    /// One-hot encoder only; missing values reach the estimator as NaN.
    EncoderOnly,
}

/// A named estimator template with its search grid and scoring.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub preprocessing: Preprocessing,
    pub estimator: Estimator,
    pub grid: ParamGrid,
    pub scoring: Scoring,
}

impl Candidate {
    /// Fresh, unfitted pipeline for one grid point.
    pub fn build_pipeline(
        &self,
        partition: &FeaturePartition,
        point: &ParamPoint,
    ) -> Result<Pipeline, ModelError> {
        let mut estimator = self.estimator.clone();
        for (name, value) in point {
            estimator.set_param(name, value)?;
        }

        let mut stages = Vec::new();
        if self.preprocessing == Preprocessing::Full {
            stages.push(Stage::zero_imputer(partition.zero_fill_columns()));
            stages.push(Stage::one_imputer(partition.one_fill_columns()));
        }
        stages.push(Stage::one_hot(partition.categorical.clone()));

        Ok(Pipeline::new(partition.fit_columns(), stages, estimator))
    }
}

fn ints(values: &[i64]) -> Vec<ParamValue> {
    values.iter().copied().map(ParamValue::Int).collect()
}

fn floats(values: &[f64]) -> Vec<ParamValue> {
    values.iter().copied().map(ParamValue::Float).collect()
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

fn boosting_grid(depths: &[i64]) -> ParamGrid {
    ParamGrid::new()
        .with("n_estimators", ints(&[10, 50]))
        .with("max_depth", ints(depths))
        .with("eta", floats(&[0.1, 0.3]))
        .with("subsample", floats(&[0.1, 0.2]))
}

/// The five candidates in declaration order.
///
/// `seed` goes to the forest and boosting estimators. Under
/// [`ScoringPolicy::Observed`] only the logistic candidate searches on ROC AUC.
pub fn default_candidates(seed: u64, policy: ScoringPolicy) -> Vec<Candidate> {
    let tree_scoring = match policy {
        ScoringPolicy::Observed => Scoring::NegRmse,
        ScoringPolicy::Unified => Scoring::RocAuc,
    };

    vec![
        Candidate {
            name: "logistic_l1".into(),
            preprocessing: Preprocessing::Full,
            estimator: Estimator::Logistic(LogisticRegression::default()),
            grid: ParamGrid::new()
                .with("C", floats(&linspace(0.0, 0.22, 5)))
                .with("random_state", ints(&[1992])),
            scoring: Scoring::RocAuc,
        },
        Candidate {
            name: "decision_tree".into(),
            preprocessing: Preprocessing::Full,
            estimator: Estimator::Tree(DecisionTree::default()),
            grid: ParamGrid::new()
                .with(
                    "max_depth",
                    vec![
                        ParamValue::Null,
                        ParamValue::Int(5),
                        ParamValue::Int(6),
                        ParamValue::Int(7),
                    ],
                )
                .with("min_samples_split", ints(&[2, 5]))
                .with("min_samples_leaf", ints(&[1, 2, 5])),
            scoring: tree_scoring,
        },
        Candidate {
            name: "random_forest".into(),
            preprocessing: Preprocessing::Full,
            estimator: Estimator::Forest(RandomForest::default().with_random_state(seed)),
            grid: ParamGrid::new()
                .with("n_estimators", ints(&[10, 20]))
                .with("max_depth", ints(&[5, 10]))
                .with("min_samples_split", ints(&[10, 12]))
                .with("min_samples_leaf", ints(&[5, 10])),
            scoring: tree_scoring,
        },
        Candidate {
            name: "xgb".into(),
            preprocessing: Preprocessing::Full,
            estimator: Estimator::Boosted(GradientBoosting::default().with_random_state(seed)),
            grid: boosting_grid(&[5, 10]),
            scoring: tree_scoring,
        },
        Candidate {
            name: "xgb_no_impute".into(),
            preprocessing: Preprocessing::EncoderOnly,
            estimator: Estimator::Boosted(GradientBoosting::default().with_random_state(seed)),
            grid: boosting_grid(&[3, 5]),
            scoring: tree_scoring,
        },
    ]
}
