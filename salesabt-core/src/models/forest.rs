//! Random forest of Gini trees.
//!
//! Each tree sees a bootstrap sample and considers `sqrt(n_features)` features at
//! every node. Tree `i` draws from the seed hierarchy at `("forest_tree", i)`, so
//! the forest is identical whether trees are grown in parallel or not.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{grow_gini_tree, TreeModel, TreeParams};
use super::{
    check_training_input, check_width, normalise, unknown_param, Classifier, ModelError,
    ParamValue,
};
use crate::rng::SeedHierarchy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub tree: TreeParams,
    pub bootstrap: bool,
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams::default(),
            bootstrap: true,
            random_state: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub params: ForestParams,
    #[serde(default)]
    trees: Vec<TreeModel>,
    #[serde(default)]
    importances: Option<Vec<f64>>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            importances: None,
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.params.random_state = seed;
        self
    }

    pub fn trees(&self) -> &[TreeModel] {
        &self.trees
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        check_training_input(&x, &y)?;
        let n = x.nrows();
        let n_features = x.ncols();
        let mut tree_params = self.params.tree.clone();
        if tree_params.max_features.is_none() {
            tree_params.max_features = Some(((n_features as f64).sqrt() as usize).max(1));
        }
        let seeds = SeedHierarchy::new(self.params.random_state);
        let bootstrap = self.params.bootstrap;

        let grown: Vec<(TreeModel, Vec<f64>)> = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = seeds.rng_for("forest_tree", i as u64);
                let rows: Vec<usize> = if bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                let (tree, importance) = grow_gini_tree(x, y, &rows, &tree_params, Some(&mut rng));
                (tree, normalise(importance))
            })
            .collect();

        let mut importance = vec![0.0; n_features];
        for (_, imp) in &grown {
            for (total, v) in importance.iter_mut().zip(imp) {
                *total += v;
            }
        }
        self.trees = grown.into_iter().map(|(tree, _)| tree).collect();
        self.importances = Some(normalise(importance));
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        let first = self.trees.first().ok_or(ModelError::NotFitted)?;
        check_width(first.n_features, &x)?;
        let k = self.trees.len() as f64;
        Ok(x.rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / k)
            .collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.importances.clone()
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ModelError> {
        match name {
            "n_estimators" => self.params.n_estimators = value.to_usize(name, 1)?,
            "random_state" => self.params.random_state = value.to_seed(name)?,
            _ => {
                if !self.params.tree.apply(name, value)? {
                    return Err(unknown_param("random_forest", name));
                }
            }
        }
        Ok(())
    }
}
