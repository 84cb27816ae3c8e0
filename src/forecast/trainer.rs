//! Per-entity model training
//!
//! Drops incomplete feature rows, holds out the trailing horizon for
//! validation, fits the booster, persists it and scores the holdout.

use std::path::PathBuf;
use tracing::{debug, info};

use super::features::{FeatureBuilder, FeatureRow};
use super::metrics::{ForecastMetrics, ResidualSpread};
use crate::config::ForecastSettings;
use crate::domain::{round_to, EntityId, MetricRecord};
use crate::error::{ForecastError, ForecastResult};
use crate::ml::{GbmParams, GradientBoostedTrees, MLModel, TrainingDataset};
use crate::repo::ModelStore;

/// Everything the forecaster needs from a trained entity
#[derive(Debug)]
pub struct TrainedEntity {
    pub model: GradientBoostedTrees,
    pub metrics: MetricRecord,
    pub spread: ResidualSpread,
    pub model_path: PathBuf,
}

#[derive(Debug)]
pub enum TrainOutcome {
    Trained(Box<TrainedEntity>),
    /// Fewer complete feature rows than the configured minimum
    Skipped { usable_rows: usize },
}

pub struct PerEntityTrainer<'a> {
    builder: &'a FeatureBuilder,
    settings: &'a ForecastSettings,
    params: &'a GbmParams,
    store: &'a dyn ModelStore,
}

impl<'a> PerEntityTrainer<'a> {
    pub fn new(
        builder: &'a FeatureBuilder,
        settings: &'a ForecastSettings,
        params: &'a GbmParams,
        store: &'a dyn ModelStore,
    ) -> Self {
        Self {
            builder,
            settings,
            params,
            store,
        }
    }

    /// Train, persist and evaluate one entity's model.
    pub fn train(&self, entity_id: &EntityId, rows: &[FeatureRow]) -> ForecastResult<TrainOutcome> {
        let dataset = TrainingDataset::from_complete_rows(rows);

        if dataset.len() < self.settings.min_train_rows {
            info!(
                entity = %entity_id,
                usable_rows = dataset.len(),
                min_rows = self.settings.min_train_rows,
                "skipping entity: too short"
            );
            return Ok(TrainOutcome::Skipped {
                usable_rows: dataset.len(),
            });
        }

        let horizon = self.settings.horizon;
        let (train, val) = dataset.split_tail(horizon);
        if train.is_empty() || val.is_empty() {
            return Err(ForecastError::EmptyTrainingSet {
                entity_id: entity_id.to_string(),
                rows: dataset.len(),
                horizon,
            });
        }

        let mut model =
            GradientBoostedTrees::fit(entity_id, &train, self.builder.column_names(), self.params)?;

        let predictions = model.predict_batch(&val.features)?;
        let metrics = ForecastMetrics::calculate(&val.targets, &predictions)?;
        let spread = ResidualSpread::from_validation(
            &val.targets,
            &predictions,
            self.settings.lower_quantile,
            self.settings.upper_quantile,
        )?;

        model.metadata.validation_metrics = Some(metrics.clone());
        let model_path = self.store.save(entity_id, &model)?;
        debug!(
            entity = %entity_id,
            path = %model_path.display(),
            trees = model.n_trees(),
            "model saved"
        );

        info!(
            entity = %entity_id,
            rmse = metrics.rmse,
            mae = metrics.mae,
            mape = ?metrics.mape,
            smape = ?metrics.smape,
            n_train = train.len(),
            n_val = val.len(),
            "entity trained"
        );

        let record = MetricRecord {
            entity_id: entity_id.clone(),
            rmse: round_to(metrics.rmse, 4),
            mae: round_to(metrics.mae, 4),
            mape: metrics.mape.map(|m| round_to(m, 4)),
            smape: metrics.smape.map(|s| round_to(s, 4)),
            n_train: train.len(),
            n_val: val.len(),
        };

        Ok(TrainOutcome::Trained(Box::new(TrainedEntity {
            model,
            metrics: record,
            spread,
            model_path,
        })))
    }
}
