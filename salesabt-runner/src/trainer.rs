//! Training run orchestration.
//!
//! Steps run strictly in order: partition, snapshot split, train/test split,
//! one grid search per candidate, test-AUC selection, out-of-time validation,
//! final refit and bundle. Parallelism lives only inside the grid search.

use salesabt_core::dataset::take_rows;
use salesabt_core::split::{split_by_snapshot, train_test_split};
use salesabt_core::{Dataset, DatasetError, FeaturePartition, Scoring, SplitError};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::abt_loader::{load_abt_from_path, LoadError};
use crate::bundle::{build_bundle, write_importances_csv, AucSummary, BundleError, ModelBundle};
use crate::candidates::{default_candidates, Candidate};
use crate::config::{ConfigError, RunConfig, RunId, TrainingConfig};
use crate::etl::{run_etl, EtlError, EtlSummary};
use crate::oot::{validate_out_of_time, OotError, OotReport};
use crate::search::{describe_point, CandidateSearch, GridSearch, ParamPoint, SearchError};
use crate::selection::{select_best, LeaderboardEntry, SelectionError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("ETL: {0}")]
    Etl(#[from] EtlError),

    #[error("loading ABT: {0}")]
    Load(#[from] LoadError),

    #[error("splitting: {0}")]
    Split(#[from] SplitError),

    #[error("dataset: {0}")]
    Data(#[from] DatasetError),

    #[error("search setup: {0}")]
    Search(#[from] SearchError),

    #[error("selection: {0}")]
    Selection(#[from] SelectionError),

    #[error("out-of-time validation: {0}")]
    Oot(#[from] OotError),

    #[error("model bundle: {0}")]
    Bundle(#[from] BundleError),
}

// ─── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitSizes {
    pub training_universe: usize,
    pub holdout: usize,
    pub train: usize,
    pub test: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSummary {
    pub candidate: String,
    pub scoring: Scoring,
    pub grid_points: usize,
    pub failed_points: usize,
    pub best_params: Option<ParamPoint>,
    pub best_cv_score: Option<f64>,
    pub elapsed_ms: u128,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub partition: FeaturePartition,
    pub split: SplitSizes,
    pub searches: Vec<SearchSummary>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub selected_candidate: String,
    pub test_auc: f64,
    pub oot: OotReport,
    pub importances: Vec<(String, f64)>,
    pub bundle: ModelBundle,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub etl: EtlSummary,
    pub report: TrainingReport,
    pub bundle_path: PathBuf,
    pub importance_path: PathBuf,
}

// ─── Training ────────────────────────────────────────────────────────

/// Train every default candidate on `dataset` and package the winner.
pub fn train_models(
    dataset: &Dataset,
    training: &TrainingConfig,
) -> Result<TrainingReport, RunError> {
    let candidates = default_candidates(training.seed, training.scoring_policy);
    train_candidates(dataset, training, &candidates)
}

/// As [`train_models`], with an explicit candidate list.
pub fn train_candidates(
    dataset: &Dataset,
    training: &TrainingConfig,
    candidates: &[Candidate],
) -> Result<TrainingReport, RunError> {
    training.validate()?;
    let partition = dataset.partition();
    info!(
        identifiers = partition.identifiers.len(),
        categorical = partition.categorical.len(),
        numeric = partition.numeric.len(),
        "features partitioned"
    );

    let snapshot_split = split_by_snapshot(dataset)?;
    let universe = dataset.subset(&snapshot_split.training)?;
    let positions: Vec<usize> = (0..universe.len()).collect();
    let tts = train_test_split(&positions, training.test_fraction, training.seed)?;

    let train_frame = take_rows(universe.frame(), &tts.train)?;
    let train_y: Vec<f64> = tts.train.iter().map(|&i| universe.target()[i]).collect();
    let test_frame = take_rows(universe.frame(), &tts.test)?;
    let test_y: Vec<f64> = tts.test.iter().map(|&i| universe.target()[i]).collect();

    let split = SplitSizes {
        training_universe: universe.len(),
        holdout: snapshot_split.holdout.len(),
        train: tts.train.len(),
        test: tts.test.len(),
    };
    info!(
        holdout_snapshot = %snapshot_split.max_snapshot,
        training_universe = split.training_universe,
        holdout = split.holdout,
        train = split.train,
        test = split.test,
        "data split"
    );

    let search = GridSearch::new(training.cv_folds).with_parallelism(training.parallel);
    let mut searches = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match search.run(candidate, partition, &train_frame, &train_y) {
            Ok(outcome) => searches.push(CandidateSearch::Completed(Box::new(outcome))),
            Err(
                e @ (SearchError::AllGridPointsFailed { .. }
                | SearchError::Refit(_)
                | SearchError::Build(_)),
            ) => {
                warn!(candidate = %candidate.name, error = %e, "candidate search failed");
                searches.push(CandidateSearch::Failed {
                    candidate: candidate.name.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    let summaries: Vec<SearchSummary> = candidates
        .iter()
        .zip(&searches)
        .map(|(candidate, search)| summarise(candidate, search))
        .collect();

    let selection = select_best(&searches, &test_frame, &test_y)?;
    let winner = &candidates[selection.winner_index];
    let best_params = selection.winner.best_params.clone();
    let test_auc = selection.test_auc;
    let leaderboard = selection.leaderboard.clone();
    info!(
        candidate = %winner.name,
        params = %describe_point(&best_params),
        test_auc,
        "selected pipeline"
    );

    let oot = validate_out_of_time(winner, &best_params, dataset, &snapshot_split)?;
    let bundle = build_bundle(
        winner,
        &best_params,
        dataset,
        AucSummary {
            test: test_auc,
            oot: oot.auc,
        },
    )?;

    let importances = bundle.importances(training.top_importances);
    if importances.is_empty() {
        info!(candidate = %winner.name, "selected estimator exposes no feature importances");
    }
    for (rank, (feature, importance)) in importances.iter().enumerate() {
        info!(rank = rank + 1, %feature, importance, "feature importance");
    }

    Ok(TrainingReport {
        partition: partition.clone(),
        split,
        searches: summaries,
        leaderboard,
        selected_candidate: winner.name.clone(),
        test_auc,
        oot,
        importances,
        bundle,
    })
}

fn summarise(candidate: &Candidate, search: &CandidateSearch) -> SearchSummary {
    match search {
        CandidateSearch::Completed(outcome) => SearchSummary {
            candidate: outcome.candidate.clone(),
            scoring: outcome.scoring,
            grid_points: outcome.points.len(),
            failed_points: outcome.failed_points(),
            best_params: Some(outcome.best_params.clone()),
            best_cv_score: Some(outcome.best_score),
            elapsed_ms: outcome.elapsed_ms,
            error: None,
        },
        CandidateSearch::Failed { candidate: name, reason } => SearchSummary {
            candidate: name.clone(),
            scoring: candidate.scoring,
            grid_points: candidate.grid.size(),
            failed_points: candidate.grid.size(),
            best_params: None,
            best_cv_score: None,
            elapsed_ms: 0,
            error: Some(reason.clone()),
        },
    }
}

// ─── Full run ────────────────────────────────────────────────────────

/// ETL, load, train, then write the bundle and importance export.
pub fn run(config: &RunConfig, training: &TrainingConfig) -> Result<RunSummary, RunError> {
    config.validate()?;
    training.validate()?;
    let run_id = config.run_id();
    info!(run_id = %run_id, "training run started");

    let etl = run_etl(config, &training.schema)?;
    let dataset = load_abt_from_path(&config.data_path, &training.schema)?;
    let report = train_models(&dataset, training)?;

    let bundle_path = report.bundle.save(&config.model_dir)?;
    let importance_path = write_importances_csv(&config.model_dir, &report.importances)?;
    info!(
        run_id = %run_id,
        bundle = %bundle_path.display(),
        test_auc = report.test_auc,
        oot_auc = report.oot.auc,
        "training run finished"
    );

    Ok(RunSummary {
        run_id,
        etl,
        report,
        bundle_path,
        importance_path,
    })
}
