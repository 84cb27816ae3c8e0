//! Machine Learning Module
//!
//! Regression models used by the per-entity trainer and forecaster:
//! - `models`: the [`MLModel`] prediction interface
//! - `training`: feature matrices and the tail holdout split
//! - `gbm`: gradient-boosted regression trees on smartcore decision trees

use serde::{Deserialize, Serialize};

use crate::domain::EntityId;
use crate::forecast::metrics::ForecastMetrics;

pub mod gbm;
pub mod models;
pub mod training;

pub use gbm::{GbmParams, GradientBoostedTrees};
pub use models::MLModel;
pub use training::TrainingDataset;

/// ML Model Metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub entity_id: EntityId,
    pub version: String,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub training_samples: usize,
    /// Filled in by the trainer once the holdout window has been scored
    pub validation_metrics: Option<ForecastMetrics>,
    pub feature_names: Vec<String>,
}

impl ModelMetadata {
    pub fn new(entity_id: EntityId, training_samples: usize, feature_names: Vec<String>) -> Self {
        Self {
            entity_id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: chrono::Utc::now(),
            training_samples,
            validation_metrics: None,
            feature_names,
        }
    }
}
