//! FastScan playback server.
//!
//! Serves CSV orderbook recordings to the dashboard: dataset catalogue,
//! per-row trace payloads, chunked batches for the render loop, prefetch and
//! cross-window sync.

use anyhow::{Context, Result};
use axum::middleware;
use clap::Parser;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fastscan_backend::config::ServerConfig;
use fastscan_backend::middleware::request_logging;
use fastscan_backend::{create_router, PlaybackService};

/// Orderbook replay server
#[derive(Parser, Debug)]
#[command(name = "fastscan")]
#[command(about = "Serve recorded orderbook datasets for timeline playback")]
struct Cli {
    /// TOML config file (overrides FASTSCAN_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, e.g. 0.0.0.0:3000
    #[arg(long)]
    bind: Option<String>,

    /// Directory holding the CSV datasets
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Trace cache capacity in entries (<= 0 disables caching)
    #[arg(long, allow_hyphen_values = true)]
    cache_capacity: Option<i64>,

    /// Prefetch buffer size (frames ahead)
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Order size to bar length multiplier
    #[arg(long)]
    bar_scale_coeff: Option<f64>,
}

impl Cli {
    fn resolve_config(&self) -> Result<ServerConfig> {
        let mut cfg = ServerConfig::from_path_or_env(self.config.as_deref())?;

        if let Some(bind) = &self.bind {
            cfg.bind_addr = bind.clone();
        }
        if let Some(dir) = &self.data_dir {
            cfg.data_dir = dir.clone();
        }
        if let Some(capacity) = self.cache_capacity {
            cfg.cache_capacity = capacity;
        }
        if let Some(size) = self.buffer_size {
            cfg.buffer_size = size;
        }
        if let Some(coeff) = self.bar_scale_coeff {
            cfg.bar_scale_coeff = coeff;
        }
        Ok(cfg.normalized())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "FastScan playback server starting"
    );
    if !config.data_dir.is_dir() {
        tracing::warn!(
            data_dir = %config.data_dir.display(),
            "Data directory does not exist; dataset listing will fail until it is created"
        );
    }

    let service = Arc::new(PlaybackService::new(&config));

    let app = create_router(service)
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("API server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fastscan_backend=debug,fastscan=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate root.
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
