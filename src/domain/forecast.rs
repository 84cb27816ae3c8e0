use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::EntityId;

/// One forecast day for one entity.
///
/// Each value is clamped to zero independently, so `lower_q <= forecast <= upper_q`
/// does not hold when the validation residuals are skewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    #[serde(rename = "sku")]
    pub entity_id: EntityId,
    pub date: NaiveDate,
    pub forecast: f64,
    pub lower_q: f64,
    pub upper_q: f64,
}

/// Validation accuracy of one entity's model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(rename = "sku")]
    pub entity_id: EntityId,
    pub rmse: f64,
    pub mae: f64,
    /// Undefined when every validation actual is zero
    pub mape: Option<f64>,
    /// Undefined when every `|actual| + |predicted|` is zero
    pub smape: Option<f64>,
    pub n_train: usize,
    pub n_val: usize,
}

/// Total forecast demand for one calendar month across all entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyForecast {
    /// First day of the month
    pub month: NaiveDate,
    pub total_forecast: f64,
}

/// Sum `forecast` per calendar month, months ascending.
pub fn aggregate_monthly(forecasts: &[ForecastRecord]) -> Vec<MonthlyForecast> {
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in forecasts {
        let month = record.date.with_day(1).unwrap_or(record.date);
        *totals.entry(month).or_insert(0.0) += record.forecast;
    }

    totals
        .into_iter()
        .map(|(month, total_forecast)| MonthlyForecast {
            month,
            total_forecast,
        })
        .collect()
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
