use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::error::{ForecastError, ForecastResult};

pub const DEFAULT_PLANT: &str = "Plant_1";
pub const DEFAULT_CATEGORY: &str = "Cat_1";

/// Entity (SKU) identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One observed (or, inside the forecaster, provisional) day of demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub entity_id: EntityId,
    pub date: NaiveDate,
    /// `None` when the observation is missing
    pub demand: Option<f64>,
    pub plant: String,
    pub category: String,
}

impl TimeSeriesRecord {
    pub fn new(
        entity_id: impl Into<EntityId>,
        date: NaiveDate,
        demand: f64,
        plant: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            date,
            demand: Some(demand),
            plant: plant.into(),
            category: category.into(),
        }
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-entity series ordered by date
pub type EntitySeries = BTreeMap<EntityId, Vec<TimeSeriesRecord>>;

/// Partition raw rows into per-entity series sorted by date.
///
/// Duplicate dates within an entity are rejected. Calendar gaps are only
/// logged: lag and rolling features treat positions as consecutive days.
pub fn group_by_entity(records: Vec<TimeSeriesRecord>) -> ForecastResult<EntitySeries> {
    let mut grouped: EntitySeries = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.entity_id.clone())
            .or_default()
            .push(record);
    }

    for (entity_id, series) in grouped.iter_mut() {
        series.sort_by_key(|r| r.date);

        let mut gaps = 0usize;
        for pair in series.windows(2) {
            let step = (pair[1].date - pair[0].date).num_days();
            if step == 0 {
                return Err(ForecastError::InvalidSeries {
                    entity_id: entity_id.to_string(),
                    reason: format!("duplicate date {}", pair[1].date),
                });
            }
            if step > 1 {
                gaps += 1;
            }
        }
        if gaps > 0 {
            warn!(
                entity = %entity_id,
                gaps,
                "series has calendar gaps; lag features are positional"
            );
        }
    }

    Ok(grouped)
}
