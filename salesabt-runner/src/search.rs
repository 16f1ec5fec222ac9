//! Cross-validated grid search.
//!
//! Each (grid point, fold) pair is an independent unit: it builds its own
//! pipeline, fits it on the fold's training rows and scores the held-out rows.
//! Units share nothing but read-only fold frames, so they run on the rayon pool
//! when parallelism is enabled. A grid point whose folds do not all succeed is
//! recorded as failed; the search only fails when every point does.

use polars::prelude::DataFrame;
use rayon::prelude::*;
use salesabt_core::dataset::take_rows;
use salesabt_core::split::stratified_folds;
use salesabt_core::{
    DatasetError, FeaturePartition, ModelError, ParamValue, Pipeline, PipelineError, Scoring,
    SplitError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::candidates::Candidate;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("candidate '{0}' has an empty parameter grid")]
    EmptyGrid(String),

    #[error("cannot build folds: {0}")]
    Folds(#[from] SplitError),

    #[error("cannot slice fold data: {0}")]
    Data(#[from] DatasetError),

    #[error("every grid point of '{candidate}' failed; first error: {first_error}")]
    AllGridPointsFailed {
        candidate: String,
        first_error: String,
    },

    #[error("refit of best point failed: {0}")]
    Refit(#[from] PipelineError),

    #[error("cannot build pipeline: {0}")]
    Build(#[from] ModelError),
}

// ─── Parameter grid ──────────────────────────────────────────────────

/// One assignment of every grid key.
pub type ParamPoint = BTreeMap<String, ParamValue>;

/// Finite hyper-parameter grid. Keys are kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    values: BTreeMap<String, Vec<ParamValue>>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the values swept for `name`.
    pub fn with(mut self, name: &str, values: Vec<ParamValue>) -> Self {
        self.values.insert(name.to_string(), values);
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of points; an empty grid has exactly one (the defaults).
    pub fn size(&self) -> usize {
        self.values.values().map(Vec::len).product()
    }

    /// Cartesian product in key order, last key varying fastest.
    pub fn points(&self) -> Vec<ParamPoint> {
        let mut points = vec![ParamPoint::new()];
        for (name, values) in &self.values {
            let mut next = Vec::with_capacity(points.len() * values.len());
            for point in &points {
                for value in values {
                    let mut extended = point.clone();
                    extended.insert(name.clone(), value.clone());
                    next.push(extended);
                }
            }
            points = next;
        }
        points
    }
}

/// Render a point as `a=1, b=0.3` for logs and reports.
pub fn describe_point(point: &ParamPoint) -> String {
    point
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridPointResult {
    pub params: ParamPoint,
    pub fold_scores: Vec<f64>,
    /// Mean CV score; `None` when any fold failed.
    pub mean_score: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub candidate: String,
    pub scoring: Scoring,
    pub points: Vec<GridPointResult>,
    pub best_index: usize,
    pub best_params: ParamPoint,
    pub best_score: f64,
    /// Best point refit on the whole search sample.
    pub best_pipeline: Pipeline,
    pub elapsed_ms: u128,
}

impl SearchOutcome {
    pub fn failed_points(&self) -> usize {
        self.points.iter().filter(|p| p.error.is_some()).count()
    }
}

/// Outcome of one candidate's search, kept even when it failed.
#[derive(Debug, Clone)]
pub enum CandidateSearch {
    Completed(Box<SearchOutcome>),
    Failed { candidate: String, reason: String },
}

impl CandidateSearch {
    pub fn candidate(&self) -> &str {
        match self {
            CandidateSearch::Completed(outcome) => &outcome.candidate,
            CandidateSearch::Failed { candidate, .. } => candidate,
        }
    }
}

// ─── Search executor ─────────────────────────────────────────────────

struct FoldData {
    train: DataFrame,
    train_y: Vec<f64>,
    test: DataFrame,
    test_y: Vec<f64>,
}

pub struct GridSearch {
    folds: usize,
    parallel: bool,
}

impl GridSearch {
    pub fn new(folds: usize) -> Self {
        Self {
            folds,
            parallel: true,
        }
    }

    /// Enables or disables parallel execution of search units.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Search `candidate`'s grid on `frame` / `y` and refit the best point.
    pub fn run(
        &self,
        candidate: &Candidate,
        partition: &FeaturePartition,
        frame: &DataFrame,
        y: &[f64],
    ) -> Result<SearchOutcome, SearchError> {
        let started = Instant::now();
        let points = candidate.grid.points();
        if points.is_empty() {
            return Err(SearchError::EmptyGrid(candidate.name.clone()));
        }

        let folds = stratified_folds(y, self.folds)?
            .into_iter()
            .map(|fold| -> Result<FoldData, DatasetError> {
                Ok(FoldData {
                    train: take_rows(frame, &fold.train)?,
                    train_y: fold.train.iter().map(|&i| y[i]).collect(),
                    test: take_rows(frame, &fold.test)?,
                    test_y: fold.test.iter().map(|&i| y[i]).collect(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            candidate = %candidate.name,
            points = points.len(),
            folds = folds.len(),
            scoring = candidate.scoring.name(),
            "grid search started"
        );

        let units: Vec<(usize, usize)> = (0..points.len())
            .flat_map(|p| (0..folds.len()).map(move |f| (p, f)))
            .collect();
        let evaluate = |&(p, f): &(usize, usize)| {
            let score = evaluate_unit(candidate, partition, &points[p], &folds[f]);
            if let Err(reason) = &score {
                debug!(candidate = %candidate.name, point = p, fold = f, %reason, "unit failed");
            }
            score
        };
        let scores: Vec<Result<f64, String>> = if self.parallel {
            units.par_iter().map(evaluate).collect()
        } else {
            units.iter().map(evaluate).collect()
        };

        let results: Vec<GridPointResult> = points
            .iter()
            .zip(scores.chunks(folds.len()))
            .map(|(params, unit_scores)| summarise_point(params.clone(), unit_scores))
            .collect();

        // Strict `>` keeps the earliest point on ties.
        let mut best: Option<(usize, f64)> = None;
        for (i, result) in results.iter().enumerate() {
            match (result.mean_score, best) {
                (Some(score), None) => best = Some((i, score)),
                (Some(score), Some((_, top))) if score > top => best = Some((i, score)),
                _ => {}
            }
        }
        let Some((best_index, best_score)) = best else {
            let first_error = results
                .iter()
                .find_map(|r| r.error.clone())
                .unwrap_or_default();
            return Err(SearchError::AllGridPointsFailed {
                candidate: candidate.name.clone(),
                first_error,
            });
        };

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        if failed > 0 {
            warn!(
                candidate = %candidate.name,
                failed,
                total = results.len(),
                "some grid points failed and were skipped"
            );
        }

        let best_params = results[best_index].params.clone();
        let mut best_pipeline = candidate.build_pipeline(partition, &best_params)?;
        best_pipeline.fit(frame, y)?;

        let elapsed_ms = started.elapsed().as_millis();
        info!(
            candidate = %candidate.name,
            best = %describe_point(&best_params),
            score = best_score,
            elapsed_ms,
            "grid search finished"
        );

        Ok(SearchOutcome {
            candidate: candidate.name.clone(),
            scoring: candidate.scoring,
            points: results,
            best_index,
            best_params,
            best_score,
            best_pipeline,
            elapsed_ms,
        })
    }
}

fn evaluate_unit(
    candidate: &Candidate,
    partition: &FeaturePartition,
    point: &ParamPoint,
    fold: &FoldData,
) -> Result<f64, String> {
    let mut pipeline = candidate
        .build_pipeline(partition, point)
        .map_err(|e| e.to_string())?;
    pipeline
        .fit(&fold.train, &fold.train_y)
        .map_err(|e| e.to_string())?;
    let proba = pipeline.predict_proba(&fold.test).map_err(|e| e.to_string())?;
    let score = candidate
        .scoring
        .score(&fold.test_y, &proba)
        .map_err(|e| e.to_string())?;
    if score.is_finite() {
        Ok(score)
    } else {
        Err(format!("non-finite score {score}"))
    }
}

fn summarise_point(params: ParamPoint, unit_scores: &[Result<f64, String>]) -> GridPointResult {
    let mut fold_scores = Vec::with_capacity(unit_scores.len());
    let mut error = None;
    for score in unit_scores {
        match score {
            Ok(v) => fold_scores.push(*v),
            Err(e) if error.is_none() => error = Some(e.clone()),
            Err(_) => {}
        }
    }
    let mean_score = if error.is_none() && !fold_scores.is_empty() {
        Some(fold_scores.iter().sum::<f64>() / fold_scores.len() as f64)
    } else {
        None
    };
    GridPointResult {
        params,
        fold_scores,
        mean_score,
        error,
    }
}
