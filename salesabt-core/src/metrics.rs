//! Classification metrics and search scorers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("{labels} labels but {scores} scores")]
    LengthMismatch { labels: usize, scores: usize },

    #[error("metric undefined on empty input")]
    Empty,

    #[error("ROC AUC is undefined when only one class is present")]
    SingleClass,

    #[error("scores contain non-finite values")]
    NonFiniteScore,
}

fn check(y: &[f64], scores: &[f64]) -> Result<(), MetricError> {
    if y.len() != scores.len() {
        return Err(MetricError::LengthMismatch {
            labels: y.len(),
            scores: scores.len(),
        });
    }
    if y.is_empty() {
        return Err(MetricError::Empty);
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(MetricError::NonFiniteScore);
    }
    Ok(())
}

/// Area under the ROC curve via the rank-sum statistic.
///
/// Tied scores share their average rank, which credits a positive/negative tie
/// with one half.
pub fn roc_auc(y: &[f64], scores: &[f64]) -> Result<f64, MetricError> {
    check(y, scores)?;
    let n_pos = y.iter().filter(|&&v| v > 0.5).count();
    let n_neg = y.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(MetricError::SingleClass);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; the tie block i..=j shares their mean
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if y[idx] > 0.5 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

pub fn rmse(y: &[f64], predictions: &[f64]) -> Result<f64, MetricError> {
    check(y, predictions)?;
    let mse = y
        .iter()
        .zip(predictions)
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        / y.len() as f64;
    Ok(mse.sqrt())
}

/// Negated RMSE, so that larger is better.
pub fn neg_rmse(y: &[f64], predictions: &[f64]) -> Result<f64, MetricError> {
    rmse(y, predictions).map(|v| -v)
}

/// Metric a grid search maximises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    /// ROC AUC on positive-class probabilities.
    RocAuc,
    /// Negative RMSE on hard 0/1 predictions at the 0.5 threshold.
    NegRmse,
}

impl Scoring {
    pub fn name(self) -> &'static str {
        match self {
            Scoring::RocAuc => "roc_auc",
            Scoring::NegRmse => "neg_root_mean_squared_error",
        }
    }

    /// Score positive-class probabilities against labels.
    pub fn score(self, y: &[f64], proba: &[f64]) -> Result<f64, MetricError> {
        match self {
            Scoring::RocAuc => roc_auc(y, proba),
            Scoring::NegRmse => {
                let hard: Vec<f64> = proba
                    .iter()
                    .map(|&p| if p > 0.5 { 1.0 } else { 0.0 })
                    .collect();
                neg_rmse(y, &hard)
            }
        }
    }
}
