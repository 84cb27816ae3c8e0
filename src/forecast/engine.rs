//! Pipeline driver: trains and forecasts every entity on a bounded worker pool.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::task::{self, JoinSet};
use tracing::{info, warn};

use super::features::FeatureBuilder;
use super::iterative::IterativeForecaster;
use super::trainer::{PerEntityTrainer, TrainOutcome};
use crate::config::{Config, ForecastSettings};
use crate::domain::{
    aggregate_monthly, EntityId, EntitySeries, ForecastRecord, MetricRecord, MonthlyForecast,
    TimeSeriesRecord,
};
use crate::error::{ForecastError, ForecastResult};
use crate::ml::GbmParams;
use crate::repo::ModelStore;

/// Result of one entity's train-and-forecast job
#[derive(Debug)]
pub enum EntityOutcome {
    Forecast {
        metrics: MetricRecord,
        forecasts: Vec<ForecastRecord>,
    },
    Skipped {
        usable_rows: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedEntity {
    pub entity_id: EntityId,
    pub error: String,
}

/// Merged output of a run, ordered by entity id then date
#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub forecasts: Vec<ForecastRecord>,
    pub metrics: Vec<MetricRecord>,
    pub monthly: Vec<MonthlyForecast>,
    pub skipped: Vec<EntityId>,
    pub failed: Vec<FailedEntity>,
}

/// Immutable state shared by every worker
struct EngineContext {
    builder: FeatureBuilder,
    settings: ForecastSettings,
    params: GbmParams,
    store: Arc<dyn ModelStore>,
}

impl EngineContext {
    fn process_entity(
        &self,
        entity_id: &EntityId,
        records: &[TimeSeriesRecord],
    ) -> ForecastResult<EntityOutcome> {
        let rows = self.builder.build(records);
        let trainer = PerEntityTrainer::new(
            &self.builder,
            &self.settings,
            &self.params,
            self.store.as_ref(),
        );

        let trained = match trainer.train(entity_id, &rows)? {
            TrainOutcome::Trained(trained) => trained,
            TrainOutcome::Skipped { usable_rows } => {
                return Ok(EntityOutcome::Skipped { usable_rows });
            }
        };

        let forecaster = IterativeForecaster::new(
            &self.builder,
            self.settings.horizon,
            self.settings.history_window,
        );
        let forecasts = forecaster.forecast(entity_id, &trained.model, &trained.spread, records)?;

        Ok(EntityOutcome::Forecast {
            metrics: trained.metrics,
            forecasts,
        })
    }
}

pub struct ForecastEngine {
    context: Arc<EngineContext>,
    max_workers: usize,
    continue_on_entity_error: bool,
}

impl ForecastEngine {
    pub fn new(
        settings: ForecastSettings,
        params: GbmParams,
        store: Arc<dyn ModelStore>,
        max_workers: usize,
        continue_on_entity_error: bool,
    ) -> ForecastResult<Self> {
        let builder = settings.feature_builder()?;
        Ok(Self {
            context: Arc::new(EngineContext {
                builder,
                settings,
                params,
                store,
            }),
            max_workers: max_workers.max(1),
            continue_on_entity_error,
        })
    }

    pub fn from_config(cfg: &Config, store: Arc<dyn ModelStore>) -> ForecastResult<Self> {
        Self::new(
            cfg.forecast.clone(),
            cfg.model.gbm_params(),
            store,
            cfg.pipeline.worker_count(),
            cfg.pipeline.continue_on_entity_error,
        )
    }

    /// Train and forecast a single entity on the calling thread.
    pub fn process_entity(
        &self,
        entity_id: &EntityId,
        records: &[TimeSeriesRecord],
    ) -> ForecastResult<EntityOutcome> {
        self.context.process_entity(entity_id, records)
    }

    /// Run every entity and merge the results.
    ///
    /// At most `max_workers` entities are in flight. Persistence and I/O
    /// failures abort the run. Other per-entity failures abort it only when
    /// `continue_on_entity_error` is off; otherwise the entity is listed in
    /// [`PipelineOutput::failed`] and contributes no rows. Once a run is
    /// aborted no further entity is started, and the call returns only after
    /// the jobs already running have finished.
    pub async fn run(&self, series: EntitySeries) -> ForecastResult<PipelineOutput> {
        let entity_count = series.len();
        info!(entities = entity_count, workers = self.max_workers, "starting forecast run");

        let mut pending = series.into_iter();
        let mut jobs = JoinSet::new();
        let mut running: HashMap<task::Id, EntityId> = HashMap::new();

        let mut outcomes: BTreeMap<EntityId, EntityOutcome> = BTreeMap::new();
        let mut failed = Vec::new();
        let mut abort: Option<ForecastError> = None;

        loop {
            while abort.is_none() && jobs.len() < self.max_workers {
                let Some((entity_id, records)) = pending.next() else {
                    break;
                };
                let context = Arc::clone(&self.context);
                let job_entity = entity_id.clone();
                let handle =
                    jobs.spawn_blocking(move || context.process_entity(&job_entity, &records));
                running.insert(handle.id(), entity_id);
            }

            let Some(joined) = jobs.join_next_with_id().await else {
                break;
            };

            let (entity_id, result) = match joined {
                Ok((id, result)) => (running.remove(&id), result),
                Err(e) => {
                    let entity_id = running.remove(&e.id());
                    let err = ForecastError::Worker {
                        entity_id: entity_label(entity_id.as_ref()),
                        message: e.to_string(),
                    };
                    (entity_id, Err(err))
                }
            };
            let entity_id = entity_id.unwrap_or_else(|| EntityId::new(UNKNOWN_ENTITY));

            match result {
                Ok(outcome) => {
                    outcomes.insert(entity_id, outcome);
                }
                Err(err) if abort.is_some() => {
                    warn!(entity = %entity_id, error = %err, "entity failed while aborting");
                }
                Err(err) if err.is_fatal_for_run() || !self.continue_on_entity_error => {
                    warn!(
                        entity = %entity_id,
                        error = %err,
                        in_flight = jobs.len(),
                        "aborting run"
                    );
                    abort = Some(err);
                }
                Err(err) => {
                    warn!(entity = %entity_id, error = %err, "entity failed");
                    failed.push(FailedEntity {
                        entity_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        if let Some(err) = abort {
            return Err(err);
        }

        failed.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        let output = merge(outcomes, failed);

        info!(
            entities = entity_count,
            forecast = output.metrics.len(),
            skipped = output.skipped.len(),
            failed = output.failed.len(),
            rows = output.forecasts.len(),
            "forecast run complete"
        );
        Ok(output)
    }
}

const UNKNOWN_ENTITY: &str = "<unknown>";

fn entity_label(entity_id: Option<&EntityId>) -> String {
    entity_id.map_or_else(|| UNKNOWN_ENTITY.to_string(), EntityId::to_string)
}

fn merge(outcomes: BTreeMap<EntityId, EntityOutcome>, failed: Vec<FailedEntity>) -> PipelineOutput {
    let mut output = PipelineOutput {
        failed,
        ..PipelineOutput::default()
    };

    for (entity_id, outcome) in outcomes {
        match outcome {
            EntityOutcome::Forecast { metrics, forecasts } => {
                output.metrics.push(metrics);
                output.forecasts.extend(forecasts);
            }
            EntityOutcome::Skipped { .. } => output.skipped.push(entity_id),
        }
    }

    output.monthly = aggregate_monthly(&output.forecasts);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::group_by_entity;
    use crate::ml::GradientBoostedTrees;
    use crate::repo::{InMemoryModelStore, MockModelStore};
    use chrono::{Duration, NaiveDate};
    use rstest::rstest;
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> ForecastSettings {
        ForecastSettings {
            horizon: 7,
            min_train_rows: 40,
            lags: vec![1, 7],
            rolling_windows: vec![7],
            history_window: 30,
            ..ForecastSettings::default()
        }
    }

    fn params() -> GbmParams {
        GbmParams {
            n_trees: 15,
            max_depth: 3,
            learning_rate: 0.3,
            ..GbmParams::default()
        }
    }

    fn series(entity: &str, days: usize, base: f64) -> Vec<TimeSeriesRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..days)
            .map(|i| {
                TimeSeriesRecord::new(
                    entity,
                    start + Duration::days(i as i64),
                    base + (i % 7) as f64,
                    "Plant_1",
                    "Cat_1",
                )
            })
            .collect()
    }

    fn in_memory(settings: ForecastSettings, workers: usize, tolerant: bool) -> ForecastEngine {
        let store = Arc::new(InMemoryModelStore::new());
        ForecastEngine::new(settings, params(), store, workers, tolerant).unwrap()
    }

    fn many_series(count: usize) -> EntitySeries {
        let records = (0..count)
            .flat_map(|i| series(&format!("SKU_{i:04}"), 80, 10.0 + i as f64))
            .collect();
        group_by_entity(records).unwrap()
    }

    fn all_series() -> EntitySeries {
        let mut records = series("SKU_0002", 80, 10.0);
        records.extend(series("SKU_0001", 80, 30.0));
        records.extend(series("SKU_0003", 20, 5.0));
        group_by_entity(records).unwrap()
    }

    #[tokio::test]
    async fn test_run_merges_in_entity_order() {
        let store = Arc::new(InMemoryModelStore::new());
        let engine = ForecastEngine::new(settings(), params(), store.clone(), 2, true).unwrap();

        let output = engine.run(all_series()).await.unwrap();

        assert_eq!(output.metrics.len(), 2);
        assert_eq!(output.metrics[0].entity_id, EntityId::from("SKU_0001"));
        assert_eq!(output.metrics[1].entity_id, EntityId::from("SKU_0002"));
        assert_eq!(output.skipped, vec![EntityId::from("SKU_0003")]);
        assert!(output.failed.is_empty());
        assert_eq!(output.forecasts.len(), 14);
        assert!(output.forecasts[..7].iter().all(|f| f.entity_id.as_str() == "SKU_0001"));
        assert_eq!(store.len(), 2);

        let total: f64 = output.monthly.iter().map(|m| m.total_forecast).sum();
        let expected: f64 = output.forecasts.iter().map(|f| f.forecast).sum();
        assert!((total - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_worker_count_does_not_change_output() {
        let sequential = in_memory(settings(), 1, true).run(all_series()).await.unwrap();
        let parallel = in_memory(settings(), 4, true).run(all_series()).await.unwrap();

        assert_eq!(sequential.forecasts, parallel.forecasts);
        assert_eq!(sequential.metrics, parallel.metrics);
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_run() {
        let mut store = MockModelStore::new();
        store.expect_save().returning(|id, _| {
            Err(ForecastError::Persistence {
                entity_id: id.to_string(),
                path: PathBuf::from("/readonly/models").join(format!("{id}.bin")),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            })
        });

        let engine = ForecastEngine::new(settings(), params(), Arc::new(store), 2, true).unwrap();
        let err = engine.run(all_series()).await.unwrap_err();
        assert!(matches!(err, ForecastError::Persistence { .. }));
        assert!(err.to_string().contains("/readonly/models"));
    }

    #[rstest]
    #[case::single_worker(1, false)]
    #[case::single_worker_tolerant(1, true)]
    #[case::three_workers(3, false)]
    #[tokio::test]
    async fn test_fatal_error_stops_scheduling(#[case] workers: usize, #[case] tolerant: bool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut store = MockModelStore::new();
        store.expect_save().returning(move |id, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ForecastError::Persistence {
                entity_id: id.to_string(),
                path: PathBuf::from("/ro").join(format!("{id}.bin")),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            })
        });

        let engine = ForecastEngine::new(settings(), params(), Arc::new(store), workers, tolerant)
            .unwrap();
        let err = engine.run(many_series(20)).await.unwrap_err();

        assert!(matches!(err, ForecastError::Persistence { .. }));
        // Only the jobs already in flight at the first failure reach the store
        let saved = calls.load(Ordering::SeqCst);
        assert!(saved >= 1 && saved <= workers, "save called {saved} times");
    }

    struct CrashingStore;

    impl ModelStore for CrashingStore {
        fn save(&self, _: &EntityId, _: &GradientBoostedTrees) -> ForecastResult<PathBuf> {
            panic!("storage backend crashed");
        }

        fn load(&self, entity_id: &EntityId) -> ForecastResult<GradientBoostedTrees> {
            panic!("no model for {entity_id}");
        }
    }

    #[tokio::test]
    async fn test_worker_panic_names_entity() {
        let engine =
            ForecastEngine::new(settings(), params(), Arc::new(CrashingStore), 1, true).unwrap();
        let err = engine.run(many_series(5)).await.unwrap_err();

        match err {
            ForecastError::Worker { entity_id, .. } => assert_eq!(entity_id, "SKU_0000"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_entity_failure_is_recorded_or_aborts() {
        // Too little tail history to seed lag_28 during forecasting
        let narrow = ForecastSettings {
            lags: vec![1, 28],
            history_window: 10,
            ..settings()
        };

        let output = in_memory(narrow.clone(), 2, true).run(all_series()).await.unwrap();
        assert!(output.forecasts.is_empty());
        assert!(output.metrics.is_empty());
        assert_eq!(output.failed.len(), 2);
        assert_eq!(output.failed[0].entity_id, EntityId::from("SKU_0001"));

        let err = in_memory(narrow, 2, false).run(all_series()).await.unwrap_err();
        assert!(matches!(err, ForecastError::FeatureComputation { .. }));
    }

    #[test]
    fn test_process_entity_skips_short_series() {
        let engine = in_memory(settings(), 1, true);
        let records = series("SKU_0009", 30, 1.0);
        let outcome = engine.process_entity(&EntityId::from("SKU_0009"), &records).unwrap();
        assert!(matches!(outcome, EntityOutcome::Skipped { usable_rows: 23 }));
    }
}
