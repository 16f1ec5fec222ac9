//! Out-of-time validation of the selected candidate.
//!
//! A fresh pipeline with the winner's best parameters is fitted on the whole
//! training universe and scored on the latest snapshot. The result is reported
//! only; a poor score does not change the selection.

use chrono::NaiveDate;
use salesabt_core::{
    roc_auc, Dataset, DatasetError, MetricError, ModelError, PipelineError, SnapshotSplit,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::candidates::Candidate;
use crate::search::ParamPoint;

#[derive(Debug, Error)]
pub enum OotError {
    #[error("cannot slice snapshot data: {0}")]
    Data(#[from] DatasetError),

    #[error("cannot build pipeline: {0}")]
    Build(#[from] ModelError),

    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("holdout AUC undefined: {0}")]
    Metric(#[from] MetricError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OotReport {
    pub snapshot: NaiveDate,
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub auc: f64,
}

pub fn validate_out_of_time(
    candidate: &Candidate,
    params: &ParamPoint,
    dataset: &Dataset,
    split: &SnapshotSplit,
) -> Result<OotReport, OotError> {
    let training = dataset.subset(&split.training)?;
    let holdout = dataset.subset(&split.holdout)?;

    let mut pipeline = candidate.build_pipeline(dataset.partition(), params)?;
    pipeline.fit(training.frame(), training.target())?;
    let proba = pipeline.predict_proba(holdout.frame())?;
    let auc = roc_auc(holdout.target(), &proba)?;

    info!(
        candidate = %candidate.name,
        snapshot = %split.max_snapshot,
        holdout_rows = holdout.len(),
        auc,
        "out-of-time validation"
    );
    Ok(OotReport {
        snapshot: split.max_snapshot,
        training_rows: training.len(),
        holdout_rows: holdout.len(),
        auc,
    })
}
