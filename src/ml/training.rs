//! Training dataset preparation.

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};
use crate::forecast::features::FeatureRow;

/// Dense feature matrix with targets, in date order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingDataset {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl TrainingDataset {
    pub fn new(features: Vec<Vec<f64>>, targets: Vec<f64>) -> ForecastResult<Self> {
        if features.len() != targets.len() {
            return Err(ForecastError::DimensionMismatch {
                actual: targets.len(),
                predicted: features.len(),
            });
        }
        Ok(Self { features, targets })
    }

    /// Collect the complete rows; rows with any undefined feature or demand are dropped.
    pub fn from_complete_rows(rows: &[FeatureRow]) -> Self {
        let (features, targets) = rows
            .iter()
            .filter_map(|row| Some((row.dense()?, row.demand()?)))
            .unzip();
        Self { features, targets }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }

    /// Split off the last `holdout` rows as the validation set.
    ///
    /// Returns `(train, validation)`; the split keeps date order.
    pub fn split_tail(&self, holdout: usize) -> (TrainingDataset, TrainingDataset) {
        let split_idx = self.len().saturating_sub(holdout);

        let train = TrainingDataset {
            features: self.features[..split_idx].to_vec(),
            targets: self.targets[..split_idx].to_vec(),
        };

        let val = TrainingDataset {
            features: self.features[split_idx..].to_vec(),
            targets: self.targets[split_idx..].to_vec(),
        };

        (train, val)
    }
}
