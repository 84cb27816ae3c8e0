//! Durable storage: per-entity model artifacts and the CSV tables.

use std::path::PathBuf;

use crate::domain::EntityId;
use crate::error::ForecastResult;
use crate::ml::GradientBoostedTrees;

pub mod csv_io;
pub mod models;

pub use models::{FileModelStore, InMemoryModelStore};

/// Stores one model per entity; saving again replaces the previous artifact.
#[cfg_attr(test, mockall::automock)]
pub trait ModelStore: Send + Sync {
    /// Persist the model and return where it was written
    fn save(&self, entity_id: &EntityId, model: &GradientBoostedTrees) -> ForecastResult<PathBuf>;

    fn load(&self, entity_id: &EntityId) -> ForecastResult<GradientBoostedTrees>;
}
