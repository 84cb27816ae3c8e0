use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::forecast::FeatureBuilder;
use crate::ml::GbmParams;

pub const DEFAULT_CONFIG_FILE: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "DEMAND__";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub paths: PathsConfig,
    #[validate(nested)]
    pub forecast: ForecastSettings,
    #[validate(nested)]
    pub model: ModelConfig,
    #[validate(nested)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PathsConfig {
    pub input_csv: PathBuf,
    pub models_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_csv: PathBuf::from("data/synthetic_sku_daily.csv"),
            models_dir: PathBuf::from("models"),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

/// Training and forecasting behaviour shared by every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ForecastSettings {
    /// Days forecast per entity; also the validation holdout length
    #[validate(range(min = 1))]
    pub horizon: usize,
    /// Complete feature rows needed before an entity is modelled
    #[validate(range(min = 1))]
    pub min_train_rows: usize,
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub lower_quantile: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub upper_quantile: f64,
    /// Trailing records used to seed the recursive forecast
    #[validate(range(min = 1))]
    pub history_window: usize,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            horizon: 90,
            min_train_rows: 120,
            lags: vec![1, 7, 14, 28],
            rolling_windows: vec![7, 14, 28],
            lower_quantile: 0.10,
            upper_quantile: 0.90,
            history_window: 60,
        }
    }
}

impl ForecastSettings {
    pub fn feature_builder(&self) -> crate::error::ForecastResult<FeatureBuilder> {
        FeatureBuilder::new(&self.lags, &self.rolling_windows)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ModelConfig {
    #[validate(range(min = 1))]
    pub n_trees: usize,
    #[validate(range(min = 1))]
    pub max_depth: u16,
    #[validate(range(min = 0.0, max = 1.0))]
    pub learning_rate: f64,
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,
    #[validate(range(min = 2))]
    pub min_samples_split: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let params = GbmParams::default();
        Self {
            n_trees: params.n_trees,
            max_depth: params.max_depth,
            learning_rate: params.learning_rate,
            min_samples_leaf: params.min_samples_leaf,
            min_samples_split: params.min_samples_split,
        }
    }
}

impl ModelConfig {
    pub fn gbm_params(&self) -> GbmParams {
        GbmParams {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            min_samples_leaf: self.min_samples_leaf,
            min_samples_split: self.min_samples_split,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Concurrent entity jobs; 0 uses the available parallelism
    pub max_workers: usize,
    /// Record failed entities and keep going instead of aborting the run
    pub continue_on_entity_error: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            continue_on_entity_error: true,
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Config {
    /// Defaults, then `config/default.toml` if present, then `DEMAND__*` env vars.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let cfg: Config = figment.extract()?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Field ranges plus the checks that span several fields.
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        let f = &self.forecast;
        if f.lower_quantile >= f.upper_quantile {
            bail!(
                "forecast.lower_quantile ({}) must be below forecast.upper_quantile ({})",
                f.lower_quantile,
                f.upper_quantile
            );
        }
        if f.lags.is_empty() && f.rolling_windows.is_empty() {
            bail!("at least one lag or rolling window is required");
        }
        if f.lags.iter().chain(&f.rolling_windows).any(|&v| v == 0) {
            bail!("lags and rolling windows must be at least 1");
        }

        let builder = f.feature_builder()?;
        let deepest = builder
            .lags()
            .iter()
            .chain(builder.rolling_windows())
            .copied()
            .max()
            .unwrap_or(0);
        if f.history_window < deepest {
            bail!(
                "forecast.history_window ({}) must cover the largest lag/window ({})",
                f.history_window,
                deepest
            );
        }

        if self.model.learning_rate <= 0.0 {
            bail!("model.learning_rate must be positive");
        }
        Ok(())
    }
}
