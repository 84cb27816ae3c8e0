//! ML Model Definitions

use super::ModelMetadata;
use crate::error::ForecastResult;

/// Trait for regression models
pub trait MLModel: Send + Sync {
    /// Predict one value from a dense feature vector
    fn predict(&self, features: &[f64]) -> ForecastResult<f64>;

    /// Predict one value per row
    fn predict_batch(&self, rows: &[Vec<f64>]) -> ForecastResult<Vec<f64>> {
        rows.iter().map(|row| self.predict(row)).collect()
    }

    /// Get model metadata
    fn metadata(&self) -> &ModelMetadata;
}
