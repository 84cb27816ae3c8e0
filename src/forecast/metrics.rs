//! Forecast Metrics and Evaluation
//!
//! Point-accuracy metrics over a validation window and residual-percentile
//! prediction intervals.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForecastError, ForecastResult};

/// Forecast accuracy metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Root Mean Square Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Absolute Percentage Error (%), over non-zero actuals only
    pub mape: Option<f64>,
    /// Symmetric MAPE (%), over non-zero denominators only
    pub smape: Option<f64>,
    /// Number of samples evaluated
    pub sample_count: usize,
}

impl ForecastMetrics {
    /// Calculate metrics from actual and predicted values
    pub fn calculate(actual: &[f64], predicted: &[f64]) -> ForecastResult<Self> {
        if actual.len() != predicted.len() {
            return Err(ForecastError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }

        if actual.is_empty() {
            return Err(ForecastError::EmptyData);
        }

        let n = actual.len() as f64;
        let mut squared = 0.0;
        let mut absolute = 0.0;
        let mut percentage_errors = Vec::with_capacity(actual.len());
        let mut symmetric_errors = Vec::with_capacity(actual.len());

        for (a, p) in actual.iter().zip(predicted.iter()) {
            let error = (a - p).abs();
            squared += error * error;
            absolute += error;

            // Masked, not clamped: zero actuals carry no percentage information
            if *a != 0.0 {
                percentage_errors.push(error / a.abs());
            }

            let denom = a.abs() + p.abs();
            if denom != 0.0 {
                symmetric_errors.push(100.0 * error / denom);
            }
        }

        Ok(ForecastMetrics {
            rmse: (squared / n).sqrt(),
            mae: absolute / n,
            mape: mean(&percentage_errors).map(|m| m * 100.0),
            smape: mean(&symmetric_errors),
            sample_count: actual.len(),
        })
    }
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metrics: RMSE={:.3}, MAE={:.3}", self.rmse, self.mae)?;
        match self.mape {
            Some(mape) => write!(f, ", MAPE={:.2}%", mape)?,
            None => write!(f, ", MAPE=NA")?,
        }
        match self.smape {
            Some(smape) => write!(f, ", sMAPE={:.2}%", smape),
            None => write!(f, ", sMAPE=NA"),
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Percentile with linear interpolation between the closest ranks.
///
/// `q` is a fraction in `[0, 1]`.
pub fn percentile(values: &[f64], q: f64) -> ForecastResult<f64> {
    if values.is_empty() {
        return Err(ForecastError::EmptyData);
    }
    if !(0.0..=1.0).contains(&q) {
        return Err(ForecastError::InvalidConfig(format!(
            "percentile {q} is outside [0, 1]"
        )));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;

    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Validation residual spread used as a constant prediction interval offset.
///
/// Residuals are `actual - predicted`; the bounds are added to every future
/// point forecast of the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualSpread {
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl ResidualSpread {
    pub fn from_validation(
        actual: &[f64],
        predicted: &[f64],
        lower_quantile: f64,
        upper_quantile: f64,
    ) -> ForecastResult<Self> {
        if actual.len() != predicted.len() {
            return Err(ForecastError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }

        let residuals: Vec<f64> = actual
            .iter()
            .zip(predicted.iter())
            .map(|(a, p)| a - p)
            .collect();

        Ok(Self {
            lower_bound: percentile(&residuals, lower_quantile)?,
            upper_bound: percentile(&residuals, upper_quantile)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_forecast() {
        let actual = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let predicted = vec![1.0, 2.0, 3.0, 4.0, 5.0];

        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();

        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.mape, Some(0.0));
        assert_eq!(metrics.smape, Some(0.0));
        assert_eq!(metrics.sample_count, 5);
    }

    #[test]
    fn test_forecast_with_errors() {
        let actual = vec![100.0, 200.0, 300.0, 400.0];
        let predicted = vec![110.0, 190.0, 330.0, 400.0];

        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();

        assert!((metrics.mae - 12.5).abs() < 1e-12);
        assert!((metrics.rmse - (1100.0f64 / 4.0).sqrt()).abs() < 1e-12);
        // (10% + 5% + 10% + 0%) / 4
        assert!((metrics.mape.unwrap() - 6.25).abs() < 1e-9);
        let expected_smape =
            (100.0 * 10.0 / 210.0 + 100.0 * 10.0 / 390.0 + 100.0 * 30.0 / 630.0 + 0.0) / 4.0;
        assert!((metrics.smape.unwrap() - expected_smape).abs() < 1e-9);
    }

    #[test]
    fn test_mape_masks_zero_actuals() {
        let actual = vec![0.0, 10.0];
        let predicted = vec![5.0, 12.0];

        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();
        assert!((metrics.mape.unwrap() - 20.0).abs() < 1e-12);
        // Both entries have a non-zero denominator
        let expected_smape = (100.0 + 100.0 * 2.0 / 22.0) / 2.0;
        assert!((metrics.smape.unwrap() - expected_smape).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_actuals_leave_percentages_undefined() {
        let actual = vec![0.0, 0.0, 0.0];
        let predicted = vec![0.0, 0.0, 0.0];

        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.mape, None);
        assert_eq!(metrics.smape, None);
        assert!(metrics.to_string().contains("MAPE=NA"));
    }

    #[test]
    fn test_zero_actuals_with_nonzero_predictions() {
        let metrics = ForecastMetrics::calculate(&[0.0, 0.0], &[1.0, 3.0]).unwrap();
        assert_eq!(metrics.mape, None);
        assert_eq!(metrics.smape, Some(100.0));
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = ForecastMetrics::calculate(&[1.0, 2.0, 3.0], &[1.0, 2.0]);
        assert!(matches!(
            result,
            Err(ForecastError::DimensionMismatch { actual: 3, predicted: 2 })
        ));
        assert!(matches!(
            ForecastMetrics::calculate(&[], &[]),
            Err(ForecastError::EmptyData)
        ));
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0).unwrap(), 1.0);
        assert_eq!(percentile(&values, 0.5).unwrap(), 3.0);
        assert_eq!(percentile(&values, 1.0).unwrap(), 5.0);
        // rank 0.4 between 1 and 2
        assert!((percentile(&values, 0.1).unwrap() - 1.4).abs() < 1e-12);
        assert!((percentile(&values, 0.9).unwrap() - 4.6).abs() < 1e-12);
        assert!(percentile(&values, 1.5).is_err());
        assert!(percentile(&[], 0.5).is_err());
    }

    #[test]
    fn test_residual_spread() {
        let actual = vec![10.0, 10.0, 10.0, 10.0, 10.0];
        let predicted = vec![12.0, 11.0, 10.0, 9.0, 8.0];

        // residuals: -2, -1, 0, 1, 2
        let spread = ResidualSpread::from_validation(&actual, &predicted, 0.1, 0.9).unwrap();
        assert!((spread.lower_bound + 1.6).abs() < 1e-12);
        assert!((spread.upper_bound - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_residual_spread_can_be_one_sided() {
        // Model always over-predicts: both bounds negative
        let spread =
            ResidualSpread::from_validation(&[1.0, 2.0, 3.0], &[3.0, 5.0, 7.0], 0.1, 0.9).unwrap();
        assert!(spread.lower_bound < 0.0);
        assert!(spread.upper_bound < 0.0);
    }
}
