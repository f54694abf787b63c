use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use analytics_buffer::{DurableBuffer, RedisStreamBuffer};
use analytics_config::{load_config, validate_config};
use analytics_worker::{run_worker, WorkerConfig};
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "analytics-worker", version, about = "Analytics drain worker")]
struct Args {
    /// Path to a TOML config overlay; env vars always take precedence.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("loading configuration")?;
    let warnings = validate_config(&config).context("validating configuration")?;

    analytics_telemetry::init_tracing(&config.log_level, false);

    for warning in &warnings {
        tracing::warn!(%warning, "configuration warning");
    }

    tracing::info!(
        database_url_set = !config.database_url.is_empty(),
        "drain worker starting"
    );

    let pool = analytics_store::connect(&config.database_url, config.db_pool_size)
        .await
        .context("connecting to postgres")?;
    analytics_store::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let buffer: Arc<dyn DurableBuffer> = Arc::new(
        RedisStreamBuffer::connect(&config.redis_url)
            .await
            .context("connecting to redis")?,
    );

    let worker_config = WorkerConfig {
        batch_size: config.ingest_batch_size,
        poll_interval_ms: config.poll_interval_ms,
        rollup_interval: Duration::from_secs(config.rollup_interval_seconds),
    };

    run_worker(buffer, pool, worker_config)
        .await
        .context("drain worker loop")?;

    Ok(())
}
