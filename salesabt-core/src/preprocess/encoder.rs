//! Drop-last one-hot encoding.
//!
//! Categories are recorded in order of first appearance in the fit frame. With
//! N categories the encoder emits N-1 `Float64` indicator columns named
//! `{column}_{category}`; the last category is the reference and gets none.
//! Indicators are appended after the remaining columns and the source column is
//! removed.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{require_column, PreprocessError, Transformer};

/// Fitted categories of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMap {
    pub column: String,
    pub categories: Vec<String>,
}

impl CategoryMap {
    /// Categories that receive an indicator column.
    pub fn encoded(&self, drop_last: bool) -> &[String] {
        if drop_last && !self.categories.is_empty() {
            &self.categories[..self.categories.len() - 1]
        } else {
            &self.categories
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    pub columns: Vec<String>,
    pub drop_last: bool,
    #[serde(default)]
    maps: Vec<CategoryMap>,
    #[serde(default)]
    fitted: bool,
}

impl OneHotEncoder {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            drop_last: true,
            maps: Vec::new(),
            fitted: false,
        }
    }

    pub fn category_maps(&self) -> &[CategoryMap] {
        &self.maps
    }

    /// Names of the indicator columns this encoder produces.
    pub fn output_names(&self) -> Vec<String> {
        self.maps
            .iter()
            .flat_map(|map| {
                map.encoded(self.drop_last)
                    .iter()
                    .map(move |cat| indicator_name(&map.column, cat))
            })
            .collect()
    }
}

fn indicator_name(column: &str, category: &str) -> String {
    format!("{column}_{category}")
}

fn string_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<String>>, PreprocessError> {
    let column = require_column(frame, name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

impl Transformer for OneHotEncoder {
    fn fit(&mut self, frame: &DataFrame) -> Result<(), PreprocessError> {
        let mut maps = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let mut categories: Vec<String> = Vec::new();
            for value in string_values(frame, name)?.into_iter().flatten() {
                if !categories.contains(&value) {
                    categories.push(value);
                }
            }
            maps.push(CategoryMap {
                column: name.clone(),
                categories,
            });
        }
        self.maps = maps;
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, frame: &DataFrame) -> Result<DataFrame, PreprocessError> {
        if !self.fitted {
            return Err(PreprocessError::NotFitted);
        }
        let mut out = frame.clone();
        for map in &self.maps {
            let values = string_values(frame, &map.column)?;

            let unseen = values
                .iter()
                .filter(|v| match v {
                    Some(s) => !map.categories.contains(s),
                    None => true,
                })
                .count();
            if unseen > 0 {
                warn!(
                    column = %map.column,
                    rows = unseen,
                    "categories unseen at fit time encoded as all-zero indicators"
                );
            }

            out = out.drop(&map.column)?;
            for category in map.encoded(self.drop_last) {
                let indicator: Vec<f64> = values
                    .iter()
                    .map(|v| if v.as_deref() == Some(category.as_str()) { 1.0 } else { 0.0 })
                    .collect();
                out.with_column(Column::new(
                    indicator_name(&map.column, category).into(),
                    indicator,
                ))?;
            }
        }
        Ok(out)
    }
}
