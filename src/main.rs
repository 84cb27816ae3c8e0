use std::sync::Arc;

use anyhow::{Context, Result};
use demand_forecaster::{config, domain, forecast, repo, telemetry};
use config::Config;
use forecast::ForecastEngine;
use repo::{csv_io, FileModelStore};
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load().context("loading configuration")?;
    info!(
        input = %cfg.paths.input_csv.display(),
        horizon = cfg.forecast.horizon,
        "starting demand forecaster"
    );

    let records = csv_io::read_series(&cfg.paths.input_csv)?;
    let series = domain::group_by_entity(records)?;

    let store = Arc::new(FileModelStore::new(&cfg.paths.models_dir)?);
    info!(models = %store.dir().display(), "model store ready");
    let engine = ForecastEngine::from_config(&cfg, store)?;
    let output = engine.run(series).await?;

    for failed in &output.failed {
        warn!(entity = %failed.entity_id, error = %failed.error, "entity produced no forecast");
    }

    let written = csv_io::write_outputs(
        &cfg.paths.output_dir,
        &output.forecasts,
        &output.metrics,
        &output.monthly,
    )?;
    if written.forecasts.is_none() {
        warn!("no entity had enough history; nothing was forecast");
    }

    info!(
        forecast_rows = output.forecasts.len(),
        entities = output.metrics.len(),
        skipped = output.skipped.len(),
        "done"
    );
    Ok(())
}
