//! Feature engineering for demand forecasting
//!
//! Builds lag, rolling and calendar features from one entity's daily series.
//! Lag and rolling values that reach before the start of the series are
//! `None`; callers drop incomplete rows before training.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{EntityId, EntitySeries, TimeSeriesRecord};
use crate::error::{ForecastError, ForecastResult};

/// Calendar features derived from a date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    /// Day of week (0=Monday, 6=Sunday)
    pub day_of_week: u32,
    /// Day of month (1-31)
    pub day_of_month: u32,
    /// Month (1-12)
    pub month: u32,
    pub year: i32,
    /// Saturday or Sunday
    pub is_weekend: bool,
}

impl CalendarFeatures {
    pub fn from_date(date: NaiveDate) -> Self {
        let day_of_week = date.weekday().num_days_from_monday();
        Self {
            day_of_week,
            day_of_month: date.day(),
            month: date.month(),
            year: date.year(),
            is_weekend: day_of_week >= 5,
        }
    }

    fn values(&self) -> [f64; 5] {
        [
            self.day_of_week as f64,
            self.day_of_month as f64,
            self.month as f64,
            self.year as f64,
            if self.is_weekend { 1.0 } else { 0.0 },
        ]
    }
}

const CALENDAR_COLUMNS: [&str; 5] = ["dow", "day", "month", "year", "is_weekend"];

/// A series record extended with its derived feature columns.
///
/// `values` is aligned with [`FeatureBuilder::column_names`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub record: TimeSeriesRecord,
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    pub fn date(&self) -> NaiveDate {
        self.record.date
    }

    pub fn demand(&self) -> Option<f64> {
        self.record.demand
    }

    /// True when every feature and the demand are defined
    pub fn is_complete(&self) -> bool {
        self.record.demand.is_some() && self.values.iter().all(Option::is_some)
    }

    /// Index of the first undefined feature column
    pub fn first_missing(&self) -> Option<usize> {
        self.values.iter().position(Option::is_none)
    }

    /// Dense feature vector, or `None` if any feature is undefined
    pub fn dense(&self) -> Option<Vec<f64>> {
        self.values.iter().copied().collect()
    }
}

/// Derives lag/rolling/calendar features per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBuilder {
    lags: Vec<usize>,
    rolling_windows: Vec<usize>,
}

impl FeatureBuilder {
    /// Lags and windows are sorted and deduplicated; zero is rejected.
    pub fn new(lags: &[usize], rolling_windows: &[usize]) -> ForecastResult<Self> {
        if lags.iter().chain(rolling_windows).any(|&v| v == 0) {
            return Err(ForecastError::InvalidConfig(
                "lags and rolling windows must be positive".to_string(),
            ));
        }

        let mut lags = lags.to_vec();
        lags.sort_unstable();
        lags.dedup();
        let mut rolling_windows = rolling_windows.to_vec();
        rolling_windows.sort_unstable();
        rolling_windows.dedup();

        Ok(Self {
            lags,
            rolling_windows,
        })
    }

    pub fn lags(&self) -> &[usize] {
        &self.lags
    }

    pub fn rolling_windows(&self) -> &[usize] {
        &self.rolling_windows
    }

    /// Regressor input columns, in model order
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.width());
        names.extend(self.lags.iter().map(|k| format!("lag_{k}")));
        for w in &self.rolling_windows {
            names.push(format!("roll_mean_{w}"));
            names.push(format!("roll_std_{w}"));
        }
        names.extend(CALENDAR_COLUMNS.iter().map(|c| c.to_string()));
        names
    }

    pub fn width(&self) -> usize {
        self.lags.len() + 2 * self.rolling_windows.len() + CALENDAR_COLUMNS.len()
    }

    /// Build feature rows for one entity's date-ordered series.
    pub fn build(&self, series: &[TimeSeriesRecord]) -> Vec<FeatureRow> {
        let demand: Vec<Option<f64>> = series.iter().map(|r| r.demand).collect();

        series
            .iter()
            .enumerate()
            .map(|(t, record)| {
                let mut values = Vec::with_capacity(self.width());

                for &k in &self.lags {
                    values.push(if t >= k { demand[t - k] } else { None });
                }

                for &w in &self.rolling_windows {
                    let (mean, std) = shifted_rolling_stats(&demand, t, w);
                    values.push(mean);
                    values.push(std);
                }

                values.extend(
                    CalendarFeatures::from_date(record.date)
                        .values()
                        .into_iter()
                        .map(Some),
                );

                FeatureRow {
                    record: record.clone(),
                    values,
                }
            })
            .collect()
    }

    /// Build features for every entity independently.
    pub fn build_all(&self, series: &EntitySeries) -> BTreeMap<EntityId, Vec<FeatureRow>> {
        series
            .iter()
            .map(|(id, records)| (id.clone(), self.build(records)))
            .collect()
    }
}

/// Mean and sample standard deviation of the `window` observations strictly
/// before position `t`.
///
/// Missing observations are skipped. The mean is `None` only when no
/// observation is available; the standard deviation is `0.0` with fewer
/// than two observations.
fn shifted_rolling_stats(
    demand: &[Option<f64>],
    t: usize,
    window: usize,
) -> (Option<f64>, Option<f64>) {
    let start = t.saturating_sub(window);
    let observed: Vec<f64> = demand[start..t].iter().flatten().copied().collect();

    if observed.is_empty() {
        return (None, None);
    }

    let n = observed.len() as f64;
    let mean = observed.iter().sum::<f64>() / n;
    let std = if observed.len() < 2 {
        0.0
    } else {
        let variance = observed.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    };

    (Some(mean), Some(std))
}
