//! Gradient-boosted regression trees
//!
//! Squared-loss boosting on top of smartcore's `DecisionTreeRegressor`:
//! start from the mean target, then repeatedly fit a depth-limited tree to
//! the current residuals and add it with a shrinkage factor. There is no row
//! or column subsampling, so a fit is fully determined by its data and
//! parameters.

use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};

use super::{MLModel, ModelMetadata, TrainingDataset};
use crate::domain::EntityId;
use crate::error::{ForecastError, ForecastResult};

type RegressionTree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Residuals below this are treated as an exact fit
const RESIDUAL_EPSILON: f64 = 1e-12;

/// Boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbmParams {
    pub n_trees: usize,
    pub max_depth: u16,
    pub learning_rate: f64,
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_trees: 200,
            max_depth: 6,
            learning_rate: 0.05,
            min_samples_leaf: 1,
            min_samples_split: 2,
        }
    }
}

impl GbmParams {
    fn tree_parameters(&self) -> DecisionTreeRegressorParameters {
        DecisionTreeRegressorParameters::default()
            .with_max_depth(self.max_depth)
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_min_samples_split(self.min_samples_split)
    }
}

/// Fitted boosted ensemble for one entity
#[derive(Debug, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    pub metadata: ModelMetadata,
    pub params: GbmParams,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    /// Fit the ensemble on `dataset`.
    pub fn fit(
        entity_id: &EntityId,
        dataset: &TrainingDataset,
        feature_names: Vec<String>,
        params: &GbmParams,
    ) -> ForecastResult<Self> {
        let model_err = |message: String| ForecastError::Model {
            entity_id: entity_id.to_string(),
            message,
        };

        if dataset.is_empty() {
            return Err(model_err("cannot train on empty dataset".to_string()));
        }

        if dataset.n_features() != feature_names.len() {
            return Err(model_err(format!(
                "dataset has {} columns but {} feature names",
                dataset.n_features(),
                feature_names.len()
            )));
        }

        let x = to_matrix(&dataset.features, feature_names.len()).map_err(model_err)?;
        let y = &dataset.targets;

        let base_score = y.iter().sum::<f64>() / y.len() as f64;
        let mut fitted = vec![base_score; y.len()];
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(t, f)| t - f).collect();
            if residuals.iter().all(|r| r.abs() < RESIDUAL_EPSILON) {
                break;
            }

            let tree = RegressionTree::fit(&x, &residuals, params.tree_parameters())
                .map_err(|e| model_err(format!("tree fit failed: {:?}", e)))?;
            let update = tree
                .predict(&x)
                .map_err(|e| model_err(format!("tree prediction failed: {:?}", e)))?;

            for (f, u) in fitted.iter_mut().zip(update) {
                *f += params.learning_rate * u;
            }
            trees.push(tree);
        }

        Ok(Self {
            metadata: ModelMetadata::new(entity_id.clone(), dataset.len(), feature_names),
            params: params.clone(),
            base_score,
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn model_err(&self, message: String) -> ForecastError {
        ForecastError::Model {
            entity_id: self.metadata.entity_id.to_string(),
            message,
        }
    }

    fn predict_matrix(&self, x: &DenseMatrix<f64>, n_rows: usize) -> ForecastResult<Vec<f64>> {
        let mut out = vec![self.base_score; n_rows];
        for tree in &self.trees {
            let update = tree
                .predict(x)
                .map_err(|e| self.model_err(format!("prediction failed: {:?}", e)))?;
            for (o, u) in out.iter_mut().zip(update) {
                *o += self.params.learning_rate * u;
            }
        }
        Ok(out)
    }
}

impl MLModel for GradientBoostedTrees {
    fn predict(&self, features: &[f64]) -> ForecastResult<f64> {
        let predictions = self.predict_batch(&[features.to_vec()])?;
        predictions
            .first()
            .copied()
            .ok_or_else(|| self.model_err("model returned empty predictions".to_string()))
    }

    fn predict_batch(&self, rows: &[Vec<f64>]) -> ForecastResult<Vec<f64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let x = to_matrix(rows, self.metadata.feature_names.len())
            .map_err(|message| self.model_err(message))?;
        self.predict_matrix(&x, rows.len())
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

/// Row-major dense matrix; every row must have `n_features` columns.
fn to_matrix(rows: &[Vec<f64>], n_features: usize) -> Result<DenseMatrix<f64>, String> {
    let mut flat = Vec::with_capacity(rows.len() * n_features);
    for row in rows {
        if row.len() != n_features {
            return Err(format!(
                "feature count mismatch: expected {}, got {}",
                n_features,
                row.len()
            ));
        }
        flat.extend_from_slice(row);
    }
    Ok(DenseMatrix::new(rows.len(), n_features, flat, false))
}
