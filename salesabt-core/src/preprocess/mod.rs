//! Preprocessing stages.
//!
//! A stage is fitted on training rows and then applied unchanged to any frame
//! with the same input columns. Stages never draw random numbers, so the same
//! fitted state always yields the same output.

pub mod encoder;
pub mod imputer;

pub use encoder::OneHotEncoder;
pub use imputer::ConstantImputer;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("stage input is missing column '{0}'")]
    MissingColumn(String),

    #[error("stage used before fit")]
    NotFitted,

    #[error("column '{column}' is not numeric ({dtype}) when it reaches the estimator")]
    NonNumericColumn { column: String, dtype: String },

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// Fit/transform capability shared by every stage.
pub trait Transformer {
    /// Learn the stage state from training rows.
    fn fit(&mut self, frame: &DataFrame) -> Result<(), PreprocessError>;

    /// Apply the fitted state.
    fn transform(&self, frame: &DataFrame) -> Result<DataFrame, PreprocessError>;

    fn fit_transform(&mut self, frame: &DataFrame) -> Result<DataFrame, PreprocessError> {
        self.fit(frame)?;
        self.transform(frame)
    }
}

/// A pipeline stage, selected by variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stage {
    /// Fills missing values of the zero-imputation families with 0.
    ZeroImputer(ConstantImputer),
    /// Fills missing values of the trend family with 1.
    OneImputer(ConstantImputer),
    /// Drop-last one-hot encoding of the categorical columns.
    OneHot(OneHotEncoder),
}

impl Stage {
    pub fn zero_imputer(columns: Vec<String>) -> Self {
        Stage::ZeroImputer(ConstantImputer::new(0.0, columns))
    }

    pub fn one_imputer(columns: Vec<String>) -> Self {
        Stage::OneImputer(ConstantImputer::new(1.0, columns))
    }

    pub fn one_hot(columns: Vec<String>) -> Self {
        Stage::OneHot(OneHotEncoder::new(columns))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::ZeroImputer(_) => "zero_imputer",
            Stage::OneImputer(_) => "one_imputer",
            Stage::OneHot(_) => "one_hot",
        }
    }
}

impl Transformer for Stage {
    fn fit(&mut self, frame: &DataFrame) -> Result<(), PreprocessError> {
        match self {
            Stage::ZeroImputer(s) | Stage::OneImputer(s) => s.fit(frame),
            Stage::OneHot(s) => s.fit(frame),
        }
    }

    fn transform(&self, frame: &DataFrame) -> Result<DataFrame, PreprocessError> {
        match self {
            Stage::ZeroImputer(s) | Stage::OneImputer(s) => s.transform(frame),
            Stage::OneHot(s) => s.transform(frame),
        }
    }
}

pub(crate) fn require_column<'a>(
    frame: &'a DataFrame,
    name: &str,
) -> Result<&'a Column, PreprocessError> {
    frame
        .column(name)
        .map_err(|_| PreprocessError::MissingColumn(name.to_string()))
}
