//! Map image generation server.

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use mapgen_api::{build_router, metrics, state, AppState};
use mapgen_common::RenderConfig;
use renderer::BackgroundEngineFactory;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// How long in-flight jobs get to observe cancellation on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "mapgen-api")]
#[command(about = "Map image generation server")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    listen: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Number of tokio worker threads (default: number of CPU cores)
    #[arg(long)]
    worker_threads: Option<usize>,

    /// Style used when a request carries none (default: plain background)
    #[arg(long, env = "DEFAULT_STYLE_PATH")]
    style: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    } else if let Some(threads) = env::var("TOKIO_WORKER_THREADS").ok().and_then(|v| v.parse::<usize>().ok()) {
        runtime_builder.worker_threads(threads);
    }

    let runtime = runtime_builder.build()?;
    runtime.block_on(async_main(args))?;
    Ok(())
}

async fn async_main(args: Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let prometheus_handle = metrics::install_recorder()?;
    info!("Prometheus metrics exporter initialized");

    let config = RenderConfig::from_env();
    info!(
        max_tile_size = config.max_tile_size,
        pool_max_instances = config.pool_max_instances,
        pool_min_instances = config.pool_min_instances,
        render_timeout_ms = config.render_timeout_ms,
        eviction_interval_ms = config.eviction_interval_ms,
        "Starting map image server"
    );

    let default_style = state::load_default_style(args.style.as_deref())?;
    let state = Arc::new(
        AppState::new(config, Arc::new(BackgroundEngineFactory), default_style)?
            .with_metrics(prometheus_handle),
    );

    state.warm_default_pool().await;

    let shutdown = CancellationToken::new();
    let eviction = tokio::spawn(state.eviction_task().run_until(shutdown.clone()));

    let app = build_router(state.clone());

    let addr: SocketAddr = args.listen.parse()?;
    info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    shutdown.cancel();
    eviction.await?;
    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C after cancelling jobs and draining pools, so open
/// connections receive their 503 before the server stops.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    state.shutdown(SHUTDOWN_GRACE).await;
}
