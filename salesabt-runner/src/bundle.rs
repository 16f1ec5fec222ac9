//! Persisted model bundle.
//!
//! The bundle is JSON: column lists, the fitted pipeline stored as plain data
//! (coefficients, split points, category maps), both AUC figures and the
//! provenance of the run. Every bundle carries a `format_version`; newer
//! versions are rejected on load. Files are written to a temporary sibling and
//! renamed into place so a failed write never leaves a partial bundle.

use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use salesabt_core::{Dataset, DatasetError, ModelError, Pipeline, PipelineError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::candidates::Candidate;
use crate::search::ParamPoint;

/// Current bundle format.
pub const FORMAT_VERSION: u32 = 1;

pub const BUNDLE_FILE: &str = "best_model_olist.json";
pub const IMPORTANCE_FILE: &str = "feature_importance.csv";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bundle serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unsupported bundle format {found} (max supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("cannot build pipeline: {0}")]
    Build(#[from] ModelError),

    #[error("dataset error: {0}")]
    Data(#[from] DatasetError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BundleError + '_ {
    move |source| BundleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AucSummary {
    /// Test split AUC of the selected candidate.
    pub test: f64,
    /// Out-of-time holdout AUC.
    pub oot: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub cat_vars: Vec<String>,
    pub num_vars: Vec<String>,
    /// Input columns of `model`, in order.
    pub fit_vars: Vec<String>,
    pub model: Pipeline,
    pub auc: AucSummary,
    pub selected_candidate: String,
    pub best_params: ParamPoint,
    pub dataset_hash: String,
    pub created_at: DateTime<Utc>,
}

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

/// Refit the selected candidate on every row and wrap it for persistence.
pub fn build_bundle(
    candidate: &Candidate,
    params: &ParamPoint,
    dataset: &Dataset,
    auc: AucSummary,
) -> Result<ModelBundle, BundleError> {
    let partition = dataset.partition();
    let mut model = candidate.build_pipeline(partition, params)?;
    model.fit(dataset.frame(), dataset.target())?;
    info!(
        candidate = %candidate.name,
        rows = dataset.len(),
        features = model.feature_names().len(),
        "final model fitted on full dataset"
    );

    Ok(ModelBundle {
        format_version: FORMAT_VERSION,
        cat_vars: partition.categorical.clone(),
        num_vars: partition.numeric_columns(),
        fit_vars: model.input_columns().to_vec(),
        model,
        auc,
        selected_candidate: candidate.name.clone(),
        best_params: params.clone(),
        dataset_hash: dataset.content_hash()?,
        created_at: Utc::now(),
    })
}

impl ModelBundle {
    /// Write the bundle into `dir` as [`BUNDLE_FILE`].
    pub fn save(&self, dir: &Path) -> Result<PathBuf, BundleError> {
        let json = serde_json::to_vec_pretty(self)?;
        let path = dir.join(BUNDLE_FILE);
        write_atomic(&path, &json)?;
        info!(path = %path.display(), bytes = json.len(), "model bundle saved");
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let bytes = std::fs::read(path).map_err(io_error(path))?;
        Self::from_json(&bytes)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, BundleError> {
        let bundle: ModelBundle = serde_json::from_slice(bytes)?;
        if bundle.format_version > FORMAT_VERSION {
            return Err(BundleError::UnsupportedVersion {
                found: bundle.format_version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(bundle)
    }

    /// Positive-class probabilities for `frame`, which must hold `fit_vars`.
    pub fn score(&self, frame: &DataFrame) -> Result<Vec<f64>, BundleError> {
        Ok(self.model.predict_proba(frame)?)
    }

    /// The `n` most important features of the model, highest first.
    pub fn importances(&self, n: usize) -> Vec<(String, f64)> {
        self.model.ranked_importances(n)
    }
}

/// Export ranked importances next to the bundle as [`IMPORTANCE_FILE`].
///
/// Columns: rank, feature, importance
pub fn write_importances_csv(
    dir: &Path,
    ranked: &[(String, f64)],
) -> Result<PathBuf, BundleError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["rank", "feature", "importance"])?;
    for (i, (feature, importance)) in ranked.iter().enumerate() {
        wtr.write_record([
            (i + 1).to_string().as_str(),
            feature.as_str(),
            format!("{importance:.6}").as_str(),
        ])?;
    }
    let data = wtr
        .into_inner()
        .map_err(|e| BundleError::Csv(e.into_error().into()))?;
    let path = dir.join(IMPORTANCE_FILE);
    write_atomic(&path, &data)?;
    Ok(path)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BundleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, path));
    if let Err(source) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(BundleError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use salesabt_core::models::LogisticRegression;
    use salesabt_core::{Estimator, Stage};
    use tempfile::TempDir;

    fn bundle() -> ModelBundle {
        let df = DataFrame::new(vec![
            Column::new("qtd_x".into(), (0..20).map(f64::from).collect::<Vec<_>>()),
            Column::new(
                "seller_state".into(),
                (0..20).map(|i| if i % 2 == 0 { "SP" } else { "RJ" }).collect::<Vec<_>>(),
            ),
        ])
        .unwrap();
        let y: Vec<f64> = (0..20).map(|i| f64::from(i >= 10)).collect();
        let mut model = Pipeline::new(
            vec!["qtd_x".into(), "seller_state".into()],
            vec![
                Stage::zero_imputer(vec!["qtd_x".into()]),
                Stage::one_hot(vec!["seller_state".into()]),
            ],
            Estimator::Logistic(LogisticRegression::default()),
        );
        model.fit(&df, &y).unwrap();
        ModelBundle {
            format_version: FORMAT_VERSION,
            cat_vars: vec!["seller_state".into()],
            num_vars: vec!["qtd_x".into()],
            fit_vars: vec!["qtd_x".into(), "seller_state".into()],
            model,
            auc: AucSummary { test: 0.9, oot: 0.8 },
            selected_candidate: "logistic_l1".into(),
            best_params: ParamPoint::new(),
            dataset_hash: "abc".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let original = bundle();
        let path = original.save(tmp.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), BUNDLE_FILE);
        assert!(!tmp.path().join(format!("{BUNDLE_FILE}.tmp")).exists());

        let loaded = ModelBundle::load(&path).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.auc.test, 0.9);
        assert_eq!(loaded.auc.oot, 0.8);
    }

    #[test]
    fn loaded_model_scores() {
        let tmp = TempDir::new().unwrap();
        let original = bundle();
        let loaded = ModelBundle::load(&original.save(tmp.path()).unwrap()).unwrap();
        let df = DataFrame::new(vec![
            Column::new("seller_state".into(), vec!["SP", "RJ"]),
            Column::new("qtd_x".into(), vec![Some(1.0), None]),
        ])
        .unwrap();
        let proba = loaded.score(&df).unwrap();
        assert_eq!(proba, original.score(&df).unwrap());
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn newer_format_rejected() {
        let mut value = serde_json::to_value(bundle()).unwrap();
        value["format_version"] = serde_json::json!(FORMAT_VERSION + 1);
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            ModelBundle::from_json(&bytes),
            Err(BundleError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn missing_format_version_defaults() {
        let mut value = serde_json::to_value(bundle()).unwrap();
        value.as_object_mut().unwrap().remove("format_version");
        let bytes = serde_json::to_vec(&value).unwrap();
        assert_eq!(ModelBundle::from_json(&bytes).unwrap().format_version, FORMAT_VERSION);
    }

    #[test]
    fn unwritable_destination_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        assert!(matches!(bundle().save(&blocker), Err(BundleError::Io { .. })));
    }

    #[test]
    fn importance_csv_layout() {
        let tmp = TempDir::new().unwrap();
        let ranked = vec![("qtd_x".to_string(), 0.75), ("seller_state_SP".to_string(), 0.25)];
        let path = write_importances_csv(tmp.path(), &ranked).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "rank,feature,importance");
        assert_eq!(lines[1], "1,qtd_x,0.750000");
        assert_eq!(lines[2], "2,seller_state_SP,0.250000");
    }
}
