//! Constant-value imputation.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::{require_column, PreprocessError, Transformer};

/// Replaces nulls and NaN in the listed columns with a constant.
///
/// Present values are never touched. The listed columns come out as `Float64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantImputer {
    pub fill_value: f64,
    pub columns: Vec<String>,
    #[serde(default)]
    fitted: bool,
}

impl ConstantImputer {
    pub fn new(fill_value: f64, columns: Vec<String>) -> Self {
        Self {
            fill_value,
            columns,
            fitted: false,
        }
    }
}

impl Transformer for ConstantImputer {
    fn fit(&mut self, frame: &DataFrame) -> Result<(), PreprocessError> {
        for name in &self.columns {
            require_column(frame, name)?;
        }
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, frame: &DataFrame) -> Result<DataFrame, PreprocessError> {
        if !self.fitted {
            return Err(PreprocessError::NotFitted);
        }
        let mut out = frame.clone();
        for name in &self.columns {
            let column = require_column(frame, name)?.cast(&DataType::Float64)?;
            let values: Vec<f64> = column
                .f64()?
                .into_iter()
                .map(|v| match v {
                    Some(x) if !x.is_nan() => x,
                    _ => self.fill_value,
                })
                .collect();
            out.with_column(Column::new(name.as_str().into(), values))?;
        }
        Ok(out)
    }
}
