//! Forecasting pipeline: features, training, recursive forecasting and the
//! multi-entity driver.

pub mod engine;
pub mod features;
pub mod iterative;
pub mod metrics;
pub mod trainer;

pub use engine::{EntityOutcome, FailedEntity, ForecastEngine, PipelineOutput};
pub use features::{CalendarFeatures, FeatureBuilder, FeatureRow};
pub use iterative::IterativeForecaster;
pub use metrics::{percentile, ForecastMetrics, ResidualSpread};
pub use trainer::{PerEntityTrainer, TrainOutcome, TrainedEntity};
