//! Typed ABT table.
//!
//! Wraps a polars `DataFrame` after validating it against an [`AbtSchema`]:
//! structural columns present, snapshot parsed to dates, numeric features cast
//! to `Float64`, categoricals cast to `String`, and a binary target.

use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;

use crate::schema::{AbtSchema, FeaturePartition, SchemaError};

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("snapshot column '{column}' has unparsable value '{value}'")]
    UnparsableDate { column: String, value: String },

    #[error("snapshot column '{0}' contains missing values")]
    MissingSnapshot(String),

    #[error("column '{column}' has {count} value(s) that do not parse as numbers")]
    UnparsableNumeric { column: String, count: usize },

    #[error("column '{column}' has unsupported type {dtype}")]
    UnsupportedType { column: String, dtype: String },

    #[error("target column '{column}' must be binary 0/1, found {value}")]
    NonBinaryTarget { column: String, value: f64 },

    #[error("target column '{0}' contains missing values")]
    MissingTarget(String),

    #[error("row index {index} out of range for {len} rows")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("dataset is empty")]
    Empty,

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// A validated ABT.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
    partition: FeaturePartition,
    snapshots: Vec<NaiveDate>,
    target: Vec<f64>,
}

impl Dataset {
    /// Validate and coerce a raw frame.
    pub fn from_frame(frame: DataFrame, schema: &AbtSchema) -> Result<Self, DatasetError> {
        let columns: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut required = vec![&schema.snapshot, &schema.target];
        required.extend(schema.identifiers.iter());
        required.extend(schema.categorical.iter());
        for name in required {
            if !columns.contains(name) {
                return Err(SchemaError::MissingColumn(name.clone()).into());
            }
        }

        let partition = FeaturePartition::build(&columns, schema)?;
        let snapshots = parse_snapshots(frame.column(&schema.snapshot)?)?;

        let mut frame = frame;
        for name in partition.numeric_columns() {
            let column = frame.column(&name)?;
            if matches!(column.dtype(), DataType::Date | DataType::Datetime(_, _)) {
                return Err(DatasetError::UnsupportedType {
                    column: name,
                    dtype: column.dtype().to_string(),
                });
            }
            let before = column.null_count();
            let cast = column.cast(&DataType::Float64)?;
            let introduced = cast.null_count().saturating_sub(before);
            if introduced > 0 {
                return Err(DatasetError::UnparsableNumeric {
                    column: name,
                    count: introduced,
                });
            }
            frame.with_column(cast)?;
        }

        for name in &partition.categorical {
            let cast = frame.column(name)?.cast(&DataType::String)?;
            frame.with_column(cast)?;
        }

        let target_column = frame.column(&schema.target)?.cast(&DataType::Float64)?;
        let mut target = Vec::with_capacity(target_column.len());
        for value in target_column.f64()?.into_iter() {
            match value {
                Some(v) if v == 0.0 || v == 1.0 => target.push(v),
                Some(v) => {
                    return Err(DatasetError::NonBinaryTarget {
                        column: schema.target.clone(),
                        value: v,
                    })
                }
                None => return Err(DatasetError::MissingTarget(schema.target.clone())),
            }
        }
        frame.with_column(target_column)?;

        Ok(Self {
            frame,
            partition,
            snapshots,
            target,
        })
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn partition(&self) -> &FeaturePartition {
        &self.partition
    }

    pub fn snapshots(&self) -> &[NaiveDate] {
        &self.snapshots
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    /// Rows at `indices`, in the given order.
    pub fn subset(&self, indices: &[usize]) -> Result<Self, DatasetError> {
        let frame = take_rows(&self.frame, indices)?;
        Ok(Self {
            frame,
            partition: self.partition.clone(),
            snapshots: indices.iter().map(|&i| self.snapshots[i]).collect(),
            target: indices.iter().map(|&i| self.target[i]).collect(),
        })
    }

    /// BLAKE3 hash over column names and values, hex encoded.
    pub fn content_hash(&self) -> Result<String, DatasetError> {
        let mut hasher = blake3::Hasher::new();
        for column in self.frame.get_columns() {
            hasher.update(column.name().as_bytes());
            match column.dtype() {
                DataType::Float64 => {
                    for value in column.f64()?.into_iter() {
                        match value {
                            Some(v) => hasher.update(&v.to_le_bytes()),
                            None => hasher.update(&[0xff]),
                        };
                    }
                }
                DataType::String => {
                    for value in column.str()?.into_iter() {
                        match value {
                            Some(s) => hasher.update(s.as_bytes()).update(&[0]),
                            None => hasher.update(&[0xff]),
                        };
                    }
                }
                _ => {
                    for i in 0..column.len() {
                        hasher.update(column.get(i)?.to_string().as_bytes());
                    }
                }
            }
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Gather rows of a frame by position.
pub fn take_rows(frame: &DataFrame, indices: &[usize]) -> Result<DataFrame, DatasetError> {
    let len = frame.height();
    if let Some(&index) = indices.iter().find(|&&i| i >= len) {
        return Err(DatasetError::IndexOutOfRange { index, len });
    }
    let idx: Vec<IdxSize> = indices.iter().map(|&i| i as IdxSize).collect();
    Ok(frame.take(&IdxCa::from_vec("idx".into(), idx))?)
}

// ── Snapshot parsing ─────────────────────────────────────────────────

fn parse_snapshots(column: &Column) -> Result<Vec<NaiveDate>, DatasetError> {
    let name = column.name().to_string();
    match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|value| match value {
                Some(s) => parse_snapshot_str(s).ok_or_else(|| DatasetError::UnparsableDate {
                    column: name.clone(),
                    value: s.to_string(),
                }),
                None => Err(DatasetError::MissingSnapshot(name.clone())),
            })
            .collect(),
        DataType::Date => {
            let days = column.cast(&DataType::Int32)?;
            days.i32()?
                .into_iter()
                .map(|value| {
                    let days = value.ok_or_else(|| DatasetError::MissingSnapshot(name.clone()))?;
                    NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_DAYS_FROM_CE + days).ok_or_else(
                        || DatasetError::UnparsableDate {
                            column: name.clone(),
                            value: days.to_string(),
                        },
                    )
                })
                .collect()
        }
        DataType::Datetime(_, _) => parse_snapshots(&column.cast(&DataType::Date)?),
        other => Err(DatasetError::UnsupportedType {
            column: name,
            dtype: other.to_string(),
        }),
    }
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part.
pub fn parse_snapshot_str(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let date = value.get(..10)?;
    let rest = value.get(10..)?;
    if !(rest.is_empty() || rest.starts_with(' ') || rest.starts_with('T')) {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("dt_ref".into(), &["2018-01-01", "2018-01-01", "2018-02-01 00:00:00"]),
            Column::new("seller_id".into(), &["a", "b", "c"]),
            Column::new("seller_city".into(), &["x", "y", "z"]),
            Column::new("seller_zip_code_prefix".into(), &[1i64, 2, 3]),
            Column::new("seller_state".into(), &["SP", "RJ", "SP"]),
            Column::new("qtd_pedidos".into(), &[Some(1i64), None, Some(3)]),
            Column::new("media_nota".into(), &["4.5", "3", "2.25"]),
            Column::new("fl_venda".into(), &[1i64, 0, 1]),
        ])
        .unwrap()
    }

    #[test]
    fn coerces_types() {
        let ds = Dataset::from_frame(frame(), &AbtSchema::default()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.frame().column("qtd_pedidos").unwrap().dtype(), &DataType::Float64);
        assert_eq!(ds.frame().column("media_nota").unwrap().dtype(), &DataType::Float64);
        assert_eq!(ds.frame().column("qtd_pedidos").unwrap().null_count(), 1);
        assert_eq!(ds.target(), &[1.0, 0.0, 1.0]);
        assert_eq!(
            ds.snapshots()[2],
            NaiveDate::from_ymd_opt(2018, 2, 1).unwrap()
        );
    }

    #[test]
    fn missing_identifier_is_schema_error() {
        let df = frame().drop("seller_city").unwrap();
        let err = Dataset::from_frame(df, &AbtSchema::default()).unwrap_err();
        assert!(matches!(err, DatasetError::Schema(SchemaError::MissingColumn(c)) if c == "seller_city"));
    }

    #[test]
    fn unparsable_numeric_rejected() {
        let mut df = frame();
        df.with_column(Column::new("media_nota".into(), &["4.5", "abc", "1"]))
            .unwrap();
        let err = Dataset::from_frame(df, &AbtSchema::default()).unwrap_err();
        assert!(matches!(err, DatasetError::UnparsableNumeric { count: 1, .. }));
    }

    #[test]
    fn unparsable_date_rejected() {
        let mut df = frame();
        df.with_column(Column::new("dt_ref".into(), &["2018-01-01", "jan", "2018-02-01"]))
            .unwrap();
        let err = Dataset::from_frame(df, &AbtSchema::default()).unwrap_err();
        assert!(matches!(err, DatasetError::UnparsableDate { .. }));
    }

    #[test]
    fn non_binary_target_rejected() {
        let mut df = frame();
        df.with_column(Column::new("fl_venda".into(), &[1i64, 2, 0]))
            .unwrap();
        let err = Dataset::from_frame(df, &AbtSchema::default()).unwrap_err();
        assert!(matches!(err, DatasetError::NonBinaryTarget { value, .. } if value == 2.0));
    }

    #[test]
    fn subset_keeps_alignment() {
        let ds = Dataset::from_frame(frame(), &AbtSchema::default()).unwrap();
        let sub = ds.subset(&[2, 0]).unwrap();
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.target(), &[1.0, 1.0]);
        assert_eq!(sub.snapshots()[0], NaiveDate::from_ymd_opt(2018, 2, 1).unwrap());
        let ids: Vec<_> = sub
            .frame()
            .column("seller_id")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(ids, vec![Some("c"), Some("a")]);
    }

    #[test]
    fn subset_out_of_range() {
        let ds = Dataset::from_frame(frame(), &AbtSchema::default()).unwrap();
        assert!(matches!(
            ds.subset(&[5]),
            Err(DatasetError::IndexOutOfRange { index: 5, len: 3 })
        ));
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let a = Dataset::from_frame(frame(), &AbtSchema::default()).unwrap();
        let b = Dataset::from_frame(frame(), &AbtSchema::default()).unwrap();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
        let c = a.subset(&[0, 1]).unwrap();
        assert_ne!(a.content_hash().unwrap(), c.content_hash().unwrap());
    }

    #[test]
    fn snapshot_string_formats() {
        let d = NaiveDate::from_ymd_opt(2018, 5, 1).unwrap();
        assert_eq!(parse_snapshot_str("2018-05-01"), Some(d));
        assert_eq!(parse_snapshot_str("2018-05-01 00:00:00"), Some(d));
        assert_eq!(parse_snapshot_str("2018-05-01T00:00:00"), Some(d));
        assert_eq!(parse_snapshot_str("2018-05-01x"), None);
        assert_eq!(parse_snapshot_str("05/01/2018"), None);
    }
}
