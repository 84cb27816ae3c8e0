//! Recursive multi-step forecasting
//!
//! Each future day is appended to a working copy of the recent history,
//! features are rebuilt over the whole buffer and the model's raw
//! prediction is written back so later lags and rolling stats see it.

use chrono::Duration;
use tracing::debug;

use super::features::FeatureBuilder;
use super::metrics::ResidualSpread;
use crate::domain::{
    round_to, EntityId, ForecastRecord, TimeSeriesRecord, DEFAULT_CATEGORY, DEFAULT_PLANT,
};
use crate::error::{ForecastError, ForecastResult};
use crate::ml::MLModel;

const OUTPUT_DECIMALS: i32 = 3;

pub struct IterativeForecaster<'a> {
    builder: &'a FeatureBuilder,
    horizon: usize,
    history_window: usize,
}

impl<'a> IterativeForecaster<'a> {
    pub fn new(builder: &'a FeatureBuilder, horizon: usize, history_window: usize) -> Self {
        Self {
            builder,
            horizon,
            history_window,
        }
    }

    /// Forecast `horizon` days past the end of `history`.
    ///
    /// `history` must be date-ordered and belong to `entity_id`. Only the
    /// trailing `history_window` records are used to seed features.
    pub fn forecast(
        &self,
        entity_id: &EntityId,
        model: &dyn MLModel,
        spread: &ResidualSpread,
        history: &[TimeSeriesRecord],
    ) -> ForecastResult<Vec<ForecastRecord>> {
        let last = history.last().ok_or_else(|| ForecastError::InvalidSeries {
            entity_id: entity_id.to_string(),
            reason: "no history to forecast from".to_string(),
        })?;

        let start = history.len().saturating_sub(self.history_window);
        let mut buffer: Vec<TimeSeriesRecord> =
            Vec::with_capacity(history.len() - start + self.horizon);
        buffer.extend_from_slice(&history[start..]);

        let plant = non_empty_or(&last.plant, DEFAULT_PLANT);
        let category = non_empty_or(&last.category, DEFAULT_CATEGORY);
        let columns = self.builder.column_names();

        let mut out = Vec::with_capacity(self.horizon);
        let mut date = last.date;
        for _ in 0..self.horizon {
            date += Duration::days(1);
            let carried = buffer.last().and_then(|r| r.demand);
            buffer.push(TimeSeriesRecord {
                entity_id: entity_id.clone(),
                date,
                demand: carried,
                plant: plant.clone(),
                category: category.clone(),
            });

            let row = self
                .builder
                .build(&buffer)
                .pop()
                .ok_or(ForecastError::EmptyData)?;

            let features = match row.dense() {
                Some(features) => features,
                None => {
                    let column = row
                        .first_missing()
                        .and_then(|i| columns.get(i).cloned())
                        .unwrap_or_default();
                    return Err(ForecastError::FeatureComputation {
                        entity_id: entity_id.to_string(),
                        date,
                        column,
                    });
                }
            };

            let p = model.predict(&features)?;
            out.push(ForecastRecord {
                entity_id: entity_id.clone(),
                date,
                forecast: clamp_round(p),
                lower_q: clamp_round(p + spread.lower_bound),
                upper_q: clamp_round(p + spread.upper_bound),
            });

            if let Some(appended) = buffer.last_mut() {
                appended.demand = Some(p);
            }
        }

        debug!(entity = %entity_id, steps = out.len(), last_date = %date, "forecast complete");
        Ok(out)
    }
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn clamp_round(value: f64) -> f64 {
    // Keeps -0.0 out of the output
    round_to(value, OUTPUT_DECIMALS).max(0.0) + 0.0
}
