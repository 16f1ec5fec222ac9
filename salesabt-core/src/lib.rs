//! salesabt core: the ABT model-training domain.
//!
//! This crate holds everything a training run computes on:
//! - ABT schema and prefix-based feature partitioning
//! - Validated, polars-backed dataset
//! - Snapshot holdout, random train/test and stratified k-fold splits
//! - Preprocessing stages (constant imputers, drop-last one-hot encoder)
//! - Estimators (L1 logistic regression, CART tree, random forest, gradient boosting)
//! - Pipelines and metrics

pub mod dataset;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod rng;
pub mod schema;
pub mod split;

pub use dataset::{Dataset, DatasetError};
pub use metrics::{roc_auc, MetricError, Scoring};
pub use models::{Classifier, Estimator, ModelError, ParamValue};
pub use pipeline::{Pipeline, PipelineError};
pub use preprocess::{PreprocessError, Stage, Transformer};
pub use rng::SeedHierarchy;
pub use schema::{classify_column, AbtSchema, ColumnFamily, FeaturePartition, SchemaError};
pub use split::{SnapshotSplit, SplitError, TrainTestSplit};
