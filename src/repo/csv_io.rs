//! CSV input and output tables
//!
//! Input: `date,sku,demand,plant,category`.
//! Outputs: daily forecasts, per-entity metrics and the monthly roll-up.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::{
    EntityId, ForecastRecord, MetricRecord, MonthlyForecast, TimeSeriesRecord, DEFAULT_CATEGORY,
    DEFAULT_PLANT,
};
use crate::error::{ForecastError, ForecastResult};

pub const FORECASTS_FILE: &str = "sku_forecasts_daily.csv";
pub const METRICS_FILE: &str = "forecast_metrics.csv";
pub const MONTHLY_FILE: &str = "agg_monthly_forecast.csv";

#[derive(Debug, Deserialize)]
struct InputRow {
    date: String,
    sku: String,
    demand: Option<f64>,
    #[serde(default)]
    plant: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

/// `YYYY-MM-DD`, or a midnight timestamp `YYYY-MM-DD HH:MM:SS`
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

fn csv_err(path: &Path) -> impl Fn(csv::Error) -> ForecastError + '_ {
    move |source| ForecastError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Read the daily demand table.
pub fn read_series(path: &Path) -> ForecastResult<Vec<TimeSeriesRecord>> {
    let file = File::open(path).map_err(|source| ForecastError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    let mut records = Vec::new();
    for row in reader.deserialize::<InputRow>() {
        let row = row.map_err(csv_err(path))?;
        let date = parse_date(&row.date).ok_or_else(|| ForecastError::InvalidSeries {
            entity_id: row.sku.clone(),
            reason: format!("unparseable date '{}'", row.date),
        })?;
        if let Some(demand) = row.demand.filter(|d| !d.is_finite() || *d < 0.0) {
            return Err(ForecastError::InvalidSeries {
                entity_id: row.sku,
                reason: format!("invalid demand {demand} on {date}"),
            });
        }

        records.push(TimeSeriesRecord {
            entity_id: EntityId::new(row.sku),
            date,
            demand: row.demand,
            plant: row
                .plant
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_PLANT.to_string()),
            category: row
                .category
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        });
    }

    info!(path = %path.display(), rows = records.len(), "input series loaded");
    Ok(records)
}

fn write_table<T: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
) -> ForecastResult<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ForecastError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut writer = csv::Writer::from_path(path).map_err(csv_err(path))?;
    let mut count = 0;
    for row in rows {
        writer.serialize(row).map_err(csv_err(path))?;
        count += 1;
    }
    writer.flush().map_err(|source| ForecastError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(count)
}

pub fn write_forecasts(path: &Path, forecasts: &[ForecastRecord]) -> ForecastResult<usize> {
    write_table(path, forecasts)
}

/// Undefined MAPE/sMAPE are written as empty fields.
pub fn write_metrics(path: &Path, metrics: &[MetricRecord]) -> ForecastResult<usize> {
    write_table(path, metrics)
}

pub fn write_monthly(path: &Path, monthly: &[MonthlyForecast]) -> ForecastResult<usize> {
    write_table(path, monthly)
}

/// Paths of the tables written by [`write_outputs`]
#[derive(Debug, Clone, Default)]
pub struct WrittenTables {
    pub forecasts: Option<PathBuf>,
    pub metrics: Option<PathBuf>,
    pub monthly: Option<PathBuf>,
}

/// Write all non-empty output tables into `dir`.
pub fn write_outputs(
    dir: &Path,
    forecasts: &[ForecastRecord],
    metrics: &[MetricRecord],
    monthly: &[MonthlyForecast],
) -> ForecastResult<WrittenTables> {
    let mut written = WrittenTables::default();

    if !forecasts.is_empty() {
        let path = dir.join(FORECASTS_FILE);
        let rows = write_forecasts(&path, forecasts)?;
        info!(path = %path.display(), rows, "forecasts written");
        written.forecasts = Some(path);
    }

    if !metrics.is_empty() {
        let path = dir.join(METRICS_FILE);
        let rows = write_metrics(&path, metrics)?;
        info!(path = %path.display(), rows, "metrics written");
        written.metrics = Some(path);
    }

    if !monthly.is_empty() {
        let path = dir.join(MONTHLY_FILE);
        let rows = write_monthly(&path, monthly)?;
        info!(path = %path.display(), rows, "monthly aggregate written");
        written.monthly = Some(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_read_series_parses_both_date_forms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "date,sku,demand,plant,category").unwrap();
        writeln!(file, "2024-01-01,SKU_0001,12,Plant_2,Cat_3").unwrap();
        writeln!(file, "2024-01-02 00:00:00,SKU_0001,,Plant_2,Cat_3").unwrap();
        writeln!(file, "2024-01-01,SKU_0002,7,,").unwrap();
        drop(file);

        let records = read_series(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].demand, Some(12.0));
        assert_eq!(records[0].plant, "Plant_2");
        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(records[1].demand, None);
        assert_eq!(records[2].plant, DEFAULT_PLANT);
        assert_eq!(records[2].category, DEFAULT_CATEGORY);
    }

    #[test]
    fn test_read_series_rejects_bad_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        fs::write(&path, "date,sku,demand,plant,category\n01/02/2024,SKU_0001,1,P,C\n").unwrap();
        assert!(matches!(
            read_series(&path),
            Err(ForecastError::InvalidSeries { .. })
        ));
    }

    #[rstest]
    #[case::nan("NaN")]
    #[case::infinite("inf")]
    #[case::negative("-3")]
    fn test_read_series_rejects_invalid_demand(#[case] demand: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        let text = format!(
            "date,sku,demand,plant,category\n\
             2024-01-01,SKU_0001,4,P,C\n\
             2024-01-02,SKU_0007,{demand},P,C\n"
        );
        fs::write(&path, text).unwrap();

        match read_series(&path).unwrap_err() {
            ForecastError::InvalidSeries { entity_id, reason } => {
                assert_eq!(entity_id, "SKU_0007");
                assert!(reason.contains("invalid demand"), "{reason}");
                assert!(reason.contains("2024-01-02"), "{reason}");
            }
            other => panic!("expected invalid series, got {other:?}"),
        }
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_series(Path::new("/nonexistent/input.csv")).unwrap_err();
        assert!(matches!(err, ForecastError::Io { .. }));
    }

    #[test]
    fn test_write_metrics_null_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(METRICS_FILE);
        let metrics = vec![MetricRecord {
            entity_id: EntityId::from("SKU_0001"),
            rmse: 0.0,
            mae: 0.0,
            mape: None,
            smape: None,
            n_train: 30,
            n_val: 90,
        }];

        assert_eq!(write_metrics(&path, &metrics).unwrap(), 1);
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("sku,rmse,mae,mape,smape,n_train,n_val"));
        assert_eq!(lines.next(), Some("SKU_0001,0.0,0.0,,,30,90"));
    }

    #[test]
    fn test_write_outputs_skips_empty_tables() {
        let dir = tempfile::tempdir().unwrap();
        let forecasts = vec![ForecastRecord {
            entity_id: EntityId::from("SKU_0001"),
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            forecast: 1.5,
            lower_q: 0.0,
            upper_q: 2.25,
        }];

        let written = write_outputs(dir.path(), &forecasts, &[], &[]).unwrap();
        assert!(written.forecasts.is_some());
        assert!(written.metrics.is_none());
        assert!(!dir.path().join(METRICS_FILE).exists());

        let text = fs::read_to_string(dir.path().join(FORECASTS_FILE)).unwrap();
        assert_eq!(
            text,
            "sku,date,forecast,lower_q,upper_q\nSKU_0001,2024-02-01,1.5,0.0,2.25\n"
        );
    }
}
