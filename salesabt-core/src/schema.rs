//! ABT schema and feature partitioning.
//!
//! The ABT carries a snapshot column, seller identifier attributes, numeric
//! features, categorical features and a binary target. Partitioning removes the
//! identifiers and the target, keeps the declared categoricals, and treats every
//! remaining column as numeric. Numeric columns are then classified into
//! imputation families by a fixed name-prefix table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("column '{0}' is declared both categorical and identifier")]
    ConflictingRole(String),

    #[error("target column '{0}' cannot also be a feature or identifier")]
    TargetOverlap(String),
}

/// Names of the structural columns of the ABT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbtSchema {
    /// Binary target column (1 = the seller sold in the following window).
    pub target: String,
    /// Snapshot date column.
    pub snapshot: String,
    /// Columns excluded from modelling.
    pub identifiers: Vec<String>,
    /// Columns encoded as categories.
    pub categorical: Vec<String>,
    /// Table the ETL materialises and the loader reads.
    pub table: String,
    /// Source view each snapshot is selected from.
    pub source_view: String,
}

impl Default for AbtSchema {
    fn default() -> Self {
        Self {
            target: "fl_venda".into(),
            snapshot: "dt_ref".into(),
            identifiers: vec![
                "seller_id".into(),
                "seller_city".into(),
                "seller_zip_code_prefix".into(),
                "dt_ref".into(),
            ],
            categorical: vec!["seller_state".into()],
            table: "TB_ABT".into(),
            source_view: "vw_olist_abt_p2".into(),
        }
    }
}

impl AbtSchema {
    /// Identifier set, always including the snapshot column.
    pub fn excluded_columns(&self) -> BTreeSet<&str> {
        let mut set: BTreeSet<&str> = self.identifiers.iter().map(String::as_str).collect();
        set.insert(self.snapshot.as_str());
        set
    }

    /// Sanity checks on the declared roles.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let excluded = self.excluded_columns();
        for cat in &self.categorical {
            if excluded.contains(cat.as_str()) {
                return Err(SchemaError::ConflictingRole(cat.clone()));
            }
        }
        if excluded.contains(self.target.as_str()) || self.categorical.contains(&self.target) {
            return Err(SchemaError::TargetOverlap(self.target.clone()));
        }
        Ok(())
    }
}

// ─── Column families ─────────────────────────────────────────────────

/// Imputation family of a numeric column, assigned by name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnFamily {
    Trend,
    Count,
    Average,
    Max,
    DayCount,
    Proportion,
    /// Matches no known prefix; receives no imputation.
    Unclassified,
}

/// Prefix table, checked in order. The first matching prefix wins.
const PREFIXES: &[(&str, ColumnFamily)] = &[
    ("tend", ColumnFamily::Trend),
    ("trend", ColumnFamily::Trend),
    ("qtd", ColumnFamily::Count),
    ("quant", ColumnFamily::Count),
    ("count", ColumnFamily::Count),
    ("media", ColumnFamily::Average),
    ("avg", ColumnFamily::Average),
    ("average", ColumnFamily::Average),
    ("max", ColumnFamily::Max),
    ("dias", ColumnFamily::DayCount),
    ("days", ColumnFamily::DayCount),
    ("prop", ColumnFamily::Proportion),
];

impl ColumnFamily {
    /// Constant used to fill missing values, `None` for unclassified columns.
    pub fn fill_value(self) -> Option<f64> {
        match self {
            ColumnFamily::Trend => Some(1.0),
            ColumnFamily::Count
            | ColumnFamily::Average
            | ColumnFamily::Max
            | ColumnFamily::DayCount
            | ColumnFamily::Proportion => Some(0.0),
            ColumnFamily::Unclassified => None,
        }
    }
}

/// Classify a numeric column by its name prefix.
pub fn classify_column(name: &str) -> ColumnFamily {
    PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, family)| *family)
        .unwrap_or(ColumnFamily::Unclassified)
}

// ─── Partition ───────────────────────────────────────────────────────

/// Disjoint split of the ABT columns into modelling roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePartition {
    pub identifiers: Vec<String>,
    pub categorical: Vec<String>,
    /// Numeric columns in input order, paired with their family.
    pub numeric: Vec<(String, ColumnFamily)>,
    pub target: String,
}

impl FeaturePartition {
    /// Partition `columns` according to `schema`.
    ///
    /// Declared categoricals must be present. Identifiers that are absent are
    /// simply not reported. Unclassified numeric columns are logged.
    pub fn build(columns: &[String], schema: &AbtSchema) -> Result<Self, SchemaError> {
        schema.validate()?;
        if !columns.contains(&schema.target) {
            return Err(SchemaError::MissingColumn(schema.target.clone()));
        }
        for cat in &schema.categorical {
            if !columns.contains(cat) {
                return Err(SchemaError::MissingColumn(cat.clone()));
            }
        }

        let excluded = schema.excluded_columns();
        let mut identifiers = Vec::new();
        let mut numeric = Vec::new();
        for column in columns {
            if excluded.contains(column.as_str()) {
                identifiers.push(column.clone());
            } else if *column == schema.target || schema.categorical.contains(column) {
                continue;
            } else {
                numeric.push((column.clone(), classify_column(column)));
            }
        }

        let partition = Self {
            identifiers,
            categorical: schema.categorical.clone(),
            numeric,
            target: schema.target.clone(),
        };
        let unclassified = partition.unclassified();
        if !unclassified.is_empty() {
            warn!(
                columns = ?unclassified,
                "numeric columns match no imputation family and will not be imputed"
            );
        }
        Ok(partition)
    }

    pub fn numeric_columns(&self) -> Vec<String> {
        self.numeric.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Numeric columns imputed with 0.
    pub fn zero_fill_columns(&self) -> Vec<String> {
        self.columns_with_fill(0.0)
    }

    /// Numeric columns imputed with 1.
    pub fn one_fill_columns(&self) -> Vec<String> {
        self.columns_with_fill(1.0)
    }

    fn columns_with_fill(&self, fill: f64) -> Vec<String> {
        self.numeric
            .iter()
            .filter(|(_, family)| family.fill_value() == Some(fill))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn unclassified(&self) -> Vec<String> {
        self.numeric
            .iter()
            .filter(|(_, family)| *family == ColumnFamily::Unclassified)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Columns fed to the pipeline: numeric first, then categorical.
    pub fn fit_columns(&self) -> Vec<String> {
        let mut cols = self.numeric_columns();
        cols.extend(self.categorical.iter().cloned());
        cols
    }
}
