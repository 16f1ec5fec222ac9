//! End-to-end training runs on a synthetic ABT.
//!
//! 100 rows over two monthly snapshots (80 + 20), 20% positives, one strong
//! signal feature plus noise in every imputation family.

use chrono::NaiveDate;
use polars::prelude::*;
use rusqlite::{params, Connection};
use tempfile::TempDir;

use salesabt_core::models::{DecisionTree, TreeParams};
use salesabt_core::split::split_by_snapshot;
use salesabt_core::{AbtSchema, Dataset, Estimator, ParamValue, Scoring};
use salesabt_runner::{
    run, train_candidates, train_models, Candidate, ModelBundle, ParamGrid, Preprocessing,
    RunConfig, TrainingConfig,
};

const CANDIDATES: [&str; 5] = [
    "logistic_l1",
    "decision_tree",
    "random_forest",
    "xgb",
    "xgb_no_impute",
];

// ── Helpers ──────────────────────────────────────────────────────────

struct Row {
    snapshot: &'static str,
    seller_id: String,
    seller_city: String,
    zip: i64,
    state: &'static str,
    qtd_pedidos: Option<f64>,
    tend_receita: Option<f64>,
    media_nota: f64,
    dias_ultima_venda: f64,
    prop_entregue: f64,
    fl_venda: i64,
}

fn rows() -> Vec<Row> {
    (0..100usize)
        .map(|i| {
            let positive = i % 5 == 0;
            Row {
                snapshot: if i < 80 { "2018-04-01" } else { "2018-05-01" },
                seller_id: format!("s{i}"),
                seller_city: format!("city{}", i % 4),
                zip: 1000 + i as i64,
                state: ["SP", "RJ", "MG"][i % 3],
                qtd_pedidos: if positive {
                    Some(8.0 + (i % 3) as f64)
                } else if i % 11 == 0 {
                    None
                } else {
                    Some((i % 4) as f64)
                },
                tend_receita: (i % 9 != 0).then(|| 1.0 + ((i * 7) % 5) as f64 / 10.0),
                media_nota: ((i * 13) % 50) as f64 / 10.0,
                dias_ultima_venda: if positive {
                    (i % 7) as f64
                } else {
                    30.0 + (i % 13) as f64
                },
                prop_entregue: ((i * 3) % 10) as f64 / 10.0,
                fl_venda: i64::from(positive),
            }
        })
        .collect()
}

fn synthetic_dataset() -> Dataset {
    let rows = rows();
    let df = DataFrame::new(vec![
        Column::new("dt_ref".into(), rows.iter().map(|r| r.snapshot).collect::<Vec<_>>()),
        Column::new(
            "seller_id".into(),
            rows.iter().map(|r| r.seller_id.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            "seller_city".into(),
            rows.iter().map(|r| r.seller_city.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            "seller_zip_code_prefix".into(),
            rows.iter().map(|r| r.zip as f64).collect::<Vec<_>>(),
        ),
        Column::new("seller_state".into(), rows.iter().map(|r| r.state).collect::<Vec<_>>()),
        Column::new(
            "qtd_pedidos".into(),
            rows.iter().map(|r| r.qtd_pedidos).collect::<Vec<_>>(),
        ),
        Column::new(
            "tend_receita".into(),
            rows.iter().map(|r| r.tend_receita).collect::<Vec<_>>(),
        ),
        Column::new(
            "media_nota".into(),
            rows.iter().map(|r| r.media_nota).collect::<Vec<_>>(),
        ),
        Column::new(
            "dias_ultima_venda".into(),
            rows.iter().map(|r| r.dias_ultima_venda).collect::<Vec<_>>(),
        ),
        Column::new(
            "prop_entregue".into(),
            rows.iter().map(|r| r.prop_entregue).collect::<Vec<_>>(),
        ),
        Column::new(
            "fl_venda".into(),
            rows.iter().map(|r| r.fl_venda as f64).collect::<Vec<_>>(),
        ),
    ])
    .unwrap();
    Dataset::from_frame(df, &AbtSchema::default()).unwrap()
}

fn sequential() -> TrainingConfig {
    TrainingConfig {
        parallel: false,
        ..TrainingConfig::default()
    }
}

fn date(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

// ── 1. Snapshot roles ────────────────────────────────────────────────

#[test]
fn training_universe_and_holdout_follow_snapshots() {
    let ds = synthetic_dataset();
    let split = split_by_snapshot(&ds).unwrap();
    assert_eq!(split.max_snapshot, date(2018, 5));
    assert_eq!(split.training.len(), 80);
    assert_eq!(split.holdout.len(), 20);
    assert!(split.training.iter().all(|&i| ds.snapshots()[i] == date(2018, 4)));
    assert!(split.holdout.iter().all(|&i| ds.snapshots()[i] == date(2018, 5)));
}

// ── 2. Full candidate comparison ─────────────────────────────────────

#[test]
fn selects_exactly_one_candidate_and_scores_it() {
    let ds = synthetic_dataset();
    let report = train_models(&ds, &TrainingConfig::default()).unwrap();

    assert_eq!(report.split.training_universe, 80);
    assert_eq!(report.split.holdout, 20);
    assert_eq!(report.split.test, 20);
    assert_eq!(report.split.train, 60);
    assert_eq!(report.oot.snapshot, date(2018, 5));
    assert_eq!(report.oot.training_rows, 80);

    let names: Vec<&str> = report.leaderboard.iter().map(|e| e.candidate.as_str()).collect();
    assert_eq!(names, CANDIDATES);
    assert_eq!(report.searches.len(), 5);
    assert!(CANDIDATES.contains(&report.selected_candidate.as_str()));

    let auc = report.bundle.auc;
    assert!((0.0..=1.0).contains(&auc.test));
    assert!((0.0..=1.0).contains(&auc.oot));
    assert_eq!(auc.test, report.test_auc);

    let proba = report.bundle.score(ds.frame()).unwrap();
    assert_eq!(proba.len(), 100);
    assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn logistic_zero_c_point_is_skipped_not_fatal() {
    let ds = synthetic_dataset();
    let report = train_models(&ds, &sequential()).unwrap();
    let logistic = &report.searches[0];
    assert_eq!(logistic.candidate, "logistic_l1");
    assert_eq!(logistic.scoring, Scoring::RocAuc);
    assert_eq!(logistic.grid_points, 5);
    assert!(logistic.failed_points >= 1);
    assert!(logistic.best_params.is_some());
}

#[test]
fn repeated_runs_agree() {
    let ds = synthetic_dataset();
    let a = train_models(&ds, &sequential()).unwrap();
    let b = train_models(&ds, &TrainingConfig::default()).unwrap();
    assert_eq!(a.selected_candidate, b.selected_candidate);
    assert_eq!(a.leaderboard, b.leaderboard);
    assert_eq!(a.bundle.model, b.bundle.model);
}

// ── 3. Degenerate grid ───────────────────────────────────────────────

#[test]
fn single_point_grid_still_selects() {
    let ds = synthetic_dataset();
    let candidates = vec![Candidate {
        name: "single_tree".into(),
        preprocessing: Preprocessing::Full,
        estimator: Estimator::Tree(DecisionTree::new(TreeParams::default())),
        grid: ParamGrid::new().with("max_depth", vec![ParamValue::Int(3)]),
        scoring: Scoring::NegRmse,
    }];
    let report = train_candidates(&ds, &sequential(), &candidates).unwrap();
    assert_eq!(report.selected_candidate, "single_tree");
    assert_eq!(report.searches[0].grid_points, 1);
    assert_eq!(report.bundle.best_params["max_depth"], ParamValue::Int(3));
    assert!(!report.importances.is_empty());
}

// ── 4. Bundle round trip ─────────────────────────────────────────────

#[test]
fn bundle_round_trip_exposes_contract() {
    let ds = synthetic_dataset();
    let report = train_models(&ds, &sequential()).unwrap();
    let tmp = TempDir::new().unwrap();
    let path = report.bundle.save(tmp.path()).unwrap();
    let loaded = ModelBundle::load(&path).unwrap();

    assert_eq!(loaded.cat_vars, vec!["seller_state".to_string()]);
    assert_eq!(
        loaded.num_vars,
        vec![
            "qtd_pedidos".to_string(),
            "tend_receita".to_string(),
            "media_nota".to_string(),
            "dias_ultima_venda".to_string(),
            "prop_entregue".to_string(),
        ]
    );
    assert_eq!(loaded.fit_vars.last().map(String::as_str), Some("seller_state"));
    assert_eq!(loaded.auc, report.bundle.auc);
    assert_eq!(
        loaded.score(ds.frame()).unwrap(),
        report.bundle.score(ds.frame()).unwrap()
    );
}

// ── 5. ETL through SQLite ────────────────────────────────────────────

fn seed_database(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE src (
            snap TEXT, seller_id TEXT, seller_city TEXT, seller_zip_code_prefix INTEGER,
            seller_state TEXT, qtd_pedidos REAL, tend_receita REAL, media_nota REAL,
            dias_ultima_venda REAL, prop_entregue REAL, fl_venda INTEGER);",
    )
    .unwrap();
    for r in rows() {
        conn.execute(
            "INSERT INTO src VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                r.snapshot,
                r.seller_id,
                r.seller_city,
                r.zip,
                r.state,
                r.qtd_pedidos,
                r.tend_receita,
                r.media_nota,
                r.dias_ultima_venda,
                r.prop_entregue,
                r.fl_venda,
            ],
        )
        .unwrap();
    }
}

const TEMPLATE: &str = "DROP VIEW IF EXISTS vw_olist_abt_p2;
CREATE VIEW vw_olist_abt_p2 AS
SELECT seller_id, seller_city, seller_zip_code_prefix, seller_state, qtd_pedidos,
       tend_receita, media_nota, dias_ultima_venda, prop_entregue, fl_venda
FROM src
WHERE snap = '{data_ref}';";

#[test]
fn full_run_materialises_trains_and_persists() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("olist.db");
    let sql = tmp.path().join("abt.sql");
    seed_database(&db);
    std::fs::write(&sql, TEMPLATE).unwrap();

    let config = RunConfig {
        data_path: db,
        query_path: sql,
        first_snapshot: date(2018, 4),
        last_snapshot: date(2018, 5),
        model_dir: tmp.path().join("models"),
    };
    let summary = run(&config, &sequential()).unwrap();

    assert_eq!(
        summary.etl.snapshots,
        vec![(date(2018, 4), 80), (date(2018, 5), 20)]
    );
    assert_eq!(summary.report.split.holdout, 20);
    assert!(summary.bundle_path.ends_with("best_model_olist.json"));
    assert!(summary.importance_path.exists());

    let loaded = ModelBundle::load(&summary.bundle_path).unwrap();
    assert!(CANDIDATES.contains(&loaded.selected_candidate.as_str()));
    assert!((0.0..=1.0).contains(&loaded.auc.oot));
}
