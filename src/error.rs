use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by the forecasting core.
///
/// An entity with too little history is not an error; the trainer reports it
/// as [`crate::forecast::TrainOutcome::Skipped`].
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid series for entity {entity_id}: {reason}")]
    InvalidSeries { entity_id: String, reason: String },

    #[error("Empty data provided")]
    EmptyData,

    #[error("Dimension mismatch: actual={actual}, predicted={predicted}")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("Entity {entity_id}: {rows} usable rows leave nothing to train on with horizon {horizon}")]
    EmptyTrainingSet {
        entity_id: String,
        rows: usize,
        horizon: usize,
    },

    #[error("Entity {entity_id}: feature '{column}' is undefined on {date}")]
    FeatureComputation {
        entity_id: String,
        date: NaiveDate,
        column: String,
    },

    #[error("Model error for entity {entity_id}: {message}")]
    Model { entity_id: String, message: String },

    #[error("Failed to persist model for entity {entity_id} at {}: {source}", path.display())]
    Persistence {
        entity_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker for entity {entity_id} did not complete: {message}")]
    Worker { entity_id: String, message: String },

    #[error("CSV error on {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl ForecastError {
    /// Whether this failure must abort the whole run rather than one entity.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Self::Persistence { .. }
                | Self::Io { .. }
                | Self::Csv { .. }
                | Self::InvalidConfig(_)
                | Self::Worker { .. }
        )
    }
}

pub type ForecastResult<T> = Result<T, ForecastError>;
