//! Preprocessing stages terminated by an estimator.
//!
//! A pipeline selects its input columns, runs each stage in order, converts the
//! result to a dense matrix (nulls become NaN) and hands it to the estimator.
//! The column names seen by the estimator are recorded at fit time and used to
//! label feature importances and to align frames at prediction time.

use ndarray::{Array2, ArrayView1};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Classifier, Estimator, ModelError};
use crate::preprocess::{PreprocessError, Stage, Transformer};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("estimator failed: {0}")]
    Model(#[from] ModelError),

    #[error("{rows} rows but {targets} targets")]
    TargetLength { rows: usize, targets: usize },

    #[error("pipeline used before fit")]
    NotFitted,

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    input_columns: Vec<String>,
    stages: Vec<Stage>,
    estimator: Estimator,
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    fitted: bool,
}

impl Pipeline {
    pub fn new(input_columns: Vec<String>, stages: Vec<Stage>, estimator: Estimator) -> Self {
        Self {
            input_columns,
            stages,
            estimator,
            feature_names: Vec::new(),
            fitted: false,
        }
    }

    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Column names after preprocessing, in estimator order.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn select_inputs(&self, frame: &DataFrame) -> Result<DataFrame, PipelineError> {
        for name in &self.input_columns {
            if frame.column(name).is_err() {
                return Err(PreprocessError::MissingColumn(name.clone()).into());
            }
        }
        Ok(frame.select(self.input_columns.iter().map(String::as_str))?)
    }

    /// Fit every stage and then the estimator on `frame`.
    pub fn fit(&mut self, frame: &DataFrame, y: &[f64]) -> Result<(), PipelineError> {
        if frame.height() != y.len() {
            return Err(PipelineError::TargetLength {
                rows: frame.height(),
                targets: y.len(),
            });
        }
        let mut current = self.select_inputs(frame)?;
        for stage in &mut self.stages {
            current = stage.fit_transform(&current)?;
        }
        self.feature_names = current
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let x = to_matrix(&current, &self.feature_names)?;
        self.estimator.fit(x.view(), ArrayView1::from(y))?;
        self.fitted = true;
        Ok(())
    }

    /// Run the fitted stages.
    pub fn transform(&self, frame: &DataFrame) -> Result<DataFrame, PipelineError> {
        if !self.fitted {
            return Err(PipelineError::NotFitted);
        }
        let mut current = self.select_inputs(frame)?;
        for stage in &self.stages {
            current = stage.transform(&current)?;
        }
        Ok(current)
    }

    /// Positive-class probability per row.
    pub fn predict_proba(&self, frame: &DataFrame) -> Result<Vec<f64>, PipelineError> {
        let transformed = self.transform(frame)?;
        let x = to_matrix(&transformed, &self.feature_names)?;
        Ok(self.estimator.predict_proba(x.view())?.to_vec())
    }

    /// Importances paired with feature names, when the estimator has them.
    pub fn feature_importances(&self) -> Option<Vec<(String, f64)>> {
        let scores = self.estimator.feature_importances()?;
        Some(self.feature_names.iter().cloned().zip(scores).collect())
    }

    /// The `n` most important features, highest first.
    pub fn ranked_importances(&self, n: usize) -> Vec<(String, f64)> {
        let mut ranked = self.feature_importances().unwrap_or_default();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

/// Dense `f64` matrix of `columns`, in that order. Nulls become NaN.
pub fn to_matrix(frame: &DataFrame, columns: &[String]) -> Result<Array2<f64>, PipelineError> {
    let mut x = Array2::<f64>::zeros((frame.height(), columns.len()));
    for (j, name) in columns.iter().enumerate() {
        let column = frame
            .column(name)
            .map_err(|_| PreprocessError::MissingColumn(name.clone()))?;
        if matches!(column.dtype(), DataType::String) {
            return Err(PreprocessError::NonNumericColumn {
                column: name.clone(),
                dtype: column.dtype().to_string(),
            }
            .into());
        }
        let cast = column.cast(&DataType::Float64)?;
        for (i, value) in cast.f64()?.into_iter().enumerate() {
            x[[i, j]] = value.unwrap_or(f64::NAN);
        }
    }
    Ok(x)
}
