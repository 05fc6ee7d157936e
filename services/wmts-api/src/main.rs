//! WMTS API service.
//!
//! HTTP server publishing gridded datasets as OGC WMTS 1.0.0 layers.

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use wmts_api::{
    build_router,
    config::config_path,
    maintenance::{spawn_config_watch, spawn_eviction},
    AppState, ServiceConfig, StateOptions,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(name = "wmts-api")]
#[command(about = "OGC WMTS tile server for gridded datasets")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "WMTS_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Service configuration file (YAML); serves a synthetic demo dataset when omitted
    #[arg(short, long, env = "WMTS_CONFIG")]
    config: Option<String>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,

    /// Number of tokio worker threads (default: number of CPU cores)
    #[arg(long, env = "TOKIO_WORKER_THREADS")]
    worker_threads: Option<usize>,

    /// Seconds between config file change checks, 0 disables watching
    #[arg(long, default_value_t = 0)]
    update_period: u64,

    /// Seconds between idle dataset sweeps
    #[arg(long, default_value_t = 30)]
    eviction_interval: u64,

    /// Rendered tiles kept in memory, 0 disables the tile cache
    #[arg(long, env = "WMTS_TILE_CACHE_SIZE", default_value_t = 1024)]
    tile_cache_size: usize,
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    }

    let runtime = runtime_builder.build()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    init_tracing(&args)?;

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow!("Failed to install Prometheus recorder: {}", e))?;
    info!("Prometheus metrics exporter initialized");

    let options = StateOptions {
        tile_cache_size: args.tile_cache_size,
        ..StateOptions::default()
    };
    let state = match config_path(args.config.as_deref()) {
        Some(path) => {
            info!(path = ?path, "Loading configuration");
            AppState::from_path(&path, options)?
        }
        None => {
            info!("No configuration file given, serving the demo dataset");
            AppState::new(ServiceConfig::demo(), options)
        }
    };
    let state = Arc::new(state);
    info!(
        datasets = state.snapshot().descriptors.len(),
        tile_cache_size = args.tile_cache_size,
        "Starting WMTS API server"
    );

    let mut tasks = vec![spawn_eviction(
        state.clone(),
        Duration::from_secs(args.eviction_interval.max(1)),
    )];
    if args.update_period > 0 && state.config_path().is_some() {
        tasks.push(spawn_config_watch(
            state.clone(),
            Duration::from_secs(args.update_period),
        ));
    }

    let app = build_router(state.clone(), Some(prometheus_handle));

    let addr: SocketAddr = args.listen.parse()?;
    info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in tasks {
        task.abort();
    }
    state.shutdown();
    info!("Server stopped");
    Ok(())
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = fmt().with_env_filter(filter).with_target(true);
    match args.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
