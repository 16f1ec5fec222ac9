//! salesabt runner: ETL, model search and packaging.
//!
//! This crate builds on `salesabt-core` to provide:
//! - Run configuration (TOML file plus overrides)
//! - Monthly ABT materialisation in SQLite and loading into a dataset
//! - The five candidate pipelines and their hyper-parameter grids
//! - Parallel cross-validated grid search
//! - Test-AUC selection and out-of-time validation
//! - Versioned model bundle and feature-importance export

pub mod abt_loader;
pub mod bundle;
pub mod candidates;
pub mod config;
pub mod etl;
pub mod oot;
pub mod search;
pub mod selection;
pub mod trainer;

pub use abt_loader::{load_abt, load_abt_from_path, read_table, LoadError};
pub use bundle::{
    build_bundle, write_importances_csv, AucSummary, BundleError, ModelBundle, BUNDLE_FILE,
    FORMAT_VERSION, IMPORTANCE_FILE,
};
pub use candidates::{default_candidates, Candidate, Preprocessing};
pub use config::{ConfigError, RunConfig, RunId, ScoringPolicy, TrainingConfig};
pub use etl::{build_abt, monthly_snapshots, render_template, run_etl, EtlError, EtlSummary};
pub use oot::{validate_out_of_time, OotError, OotReport};
pub use search::{
    CandidateSearch, GridPointResult, GridSearch, ParamGrid, ParamPoint, SearchError,
    SearchOutcome,
};
pub use selection::{select_best, EntryStatus, LeaderboardEntry, Selection, SelectionError};
pub use trainer::{
    run, train_candidates, train_models, RunError, RunSummary, SearchSummary, SplitSizes,
    TrainingReport,
};
