//! salesabt CLI: materialise the ABT, train the candidates, persist the winner.
//!
//! A single command with no sub-commands. Options come from an optional TOML
//! file, then from flags. Logs go to stderr (filter with `RUST_LOG`); the
//! leaderboard and both AUC figures go to stdout.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use salesabt_runner::search::describe_point;
use salesabt_runner::{run, RunConfig, RunSummary, TrainingConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "salesabt",
    about = "Build the Olist seller ABT, then train and persist the best sales model"
)]
struct Cli {
    /// TOML file with run options. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database with the source tables.
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// SQL template with a {data_ref} placeholder.
    #[arg(long)]
    query_path: Option<PathBuf>,

    /// First snapshot to materialise (YYYY-MM-DD, first day of a month).
    #[arg(long)]
    first_snapshot: Option<String>,

    /// Last snapshot to materialise (YYYY-MM-DD, first day of a month).
    #[arg(long)]
    last_snapshot: Option<String>,

    /// Directory receiving the model bundle.
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(cli)?;
    info!(
        data_path = %config.data_path.display(),
        first_snapshot = %config.first_snapshot,
        last_snapshot = %config.last_snapshot,
        "configuration resolved"
    );
    let summary = run(&config, &TrainingConfig::default()).context("training run failed")?;
    print_summary(&summary);
    Ok(())
}

fn parse_date(flag: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("--{flag} must be YYYY-MM-DD, got '{value}'"))
}

fn build_config(cli: Cli) -> Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(path) = cli.data_path {
        config.data_path = path;
    }
    if let Some(path) = cli.query_path {
        config.query_path = path;
    }
    if let Some(value) = cli.first_snapshot.as_deref() {
        config.first_snapshot = parse_date("first-snapshot", value)?;
    }
    if let Some(value) = cli.last_snapshot.as_deref() {
        config.last_snapshot = parse_date("last-snapshot", value)?;
    }
    if let Some(path) = cli.model_dir {
        config.model_dir = path;
    }
    config.validate()?;
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    let report = &summary.report;
    println!();
    println!("=== ABT ===");
    for (snapshot, rows) in &summary.etl.snapshots {
        println!("{snapshot}:     {rows} rows");
    }
    println!(
        "Split:          {} train / {} test / {} out-of-time",
        report.split.train, report.split.test, report.split.holdout
    );

    println!();
    println!("--- Candidates ---");
    for (entry, search) in report.leaderboard.iter().zip(&report.searches) {
        let auc = entry
            .test_auc
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
        let params = search
            .best_params
            .as_ref()
            .map(describe_point)
            .unwrap_or_else(|| search.error.clone().unwrap_or_default());
        println!("{:<16} {:>8}  {}", entry.candidate, auc, params);
    }

    println!();
    println!("Selected:       {}", report.selected_candidate);
    println!("Test AUC:       {:.4}", report.bundle.auc.test);
    println!("Out-of-time AUC: {:.4}", report.bundle.auc.oot);
    if !report.importances.is_empty() {
        println!();
        println!("--- Top features ---");
        for (rank, (feature, importance)) in report.importances.iter().enumerate() {
            println!("{:>3}. {:<40} {:.4}", rank + 1, feature, importance);
        }
    }
    println!();
    println!("Model saved to: {}", summary.bundle_path.display());
    println!("Importances:    {}", summary.importance_path.display());
}
