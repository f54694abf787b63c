//! Entry point: load config, connect to Postgres/Redis, run migrations,
//! and serve. Mirrors the teacher's clap/tracing/bind-and-serve shape.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use analytics_buffer::RedisStreamBuffer;
use analytics_config::{load_config, validate_config};
use analytics_daemon::{build_app, AppState};
use analytics_live::{LiveHub, RedisLiveSubscriber};
use analytics_security::RedisStore;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "analytics-daemon", version, about = "Product analytics backend daemon")]
struct Args {
    /// Path to a TOML config file; falls back to defaults plus env overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("load config")?;
    for warning in validate_config(&config).context("validate config")? {
        warn!(?warning, "config warning");
    }

    analytics_telemetry::init_tracing(&config.log_level, !args.debug);

    let pool = analytics_store::connect(&config.database_url, config.db_pool_size)
        .await
        .context("connect to postgres")?;
    analytics_store::run_migrations(&pool).await.context("run migrations")?;

    let buffer = RedisStreamBuffer::connect(&config.redis_url)
        .await
        .context("connect ingest buffer")?;
    buffer.ensure_consumer_group().await.context("ensure consumer group")?;

    let kv = RedisStore::connect(&config.redis_url)
        .await
        .context("connect key-value store")?;

    let subscriber = RedisLiveSubscriber::new(&config.redis_url).context("build live subscriber")?;
    let hub = LiveHub::new(Arc::new(subscriber));

    let state = AppState {
        pool,
        kv: Arc::new(kv),
        buffer: Arc::new(buffer),
        hub,
        config: Arc::new(config.clone()),
    };

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!(bind = %config.bind_addr, "analytics-daemon listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("serve")
}
