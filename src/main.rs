//! PlantVision Inference Server
//!
//! Serves the object-detection models found under a models directory over
//! HTTP: health, prediction, model listing and hot reload.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use plantvision::config::{DevicePreference, ServerConfig, DEFAULT_WEIGHTS_FILE};
use plantvision::detector::default_loader;
use plantvision::logging::{init_logging, LogConfig, LogLevel};
use plantvision::{router, AppState};

/// PlantVision Inference Server
#[derive(Parser, Debug)]
#[command(name = "plantvision-server")]
#[command(version)]
#[command(about = "HTTP inference server for plant object-detection models")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PLANTVISION_PORT", default_value = "8081")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "PLANTVISION_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory with one subdirectory per model
    #[arg(long, env = "PLANTVISION_MODELS_DIR", default_value = "models")]
    models_dir: PathBuf,

    /// Weights filename inside each model directory
    #[arg(long, env = "PLANTVISION_WEIGHTS_FILE", default_value = DEFAULT_WEIGHTS_FILE)]
    weights_file: String,

    /// Directory for temporary uploads (defaults to the system temp dir)
    #[arg(long, env = "PLANTVISION_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Maximum upload size in megabytes
    #[arg(long, env = "PLANTVISION_MAX_UPLOAD_MB", default_value = "32")]
    max_upload_mb: usize,

    /// Inference device: auto, cpu or cuda
    #[arg(long, env = "PLANTVISION_DEVICE", default_value = "auto")]
    device: DevicePreference,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, env = "PLANTVISION_LOG", default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&LogConfig::for_level(cli.log_level)).map_err(anyhow::Error::msg)?;

    // Build configuration
    let config = ServerConfig {
        models_root: cli.models_dir,
        weights_file: cli.weights_file,
        host: cli.host,
        port: cli.port,
        upload_dir: cli.upload_dir,
        max_upload_bytes: ServerConfig::upload_limit_from_mb(cli.max_upload_mb)?,
        device: cli.device,
    };
    let addr = config.bind_addr()?;

    info!("PlantVision Inference Server v{}", plantvision::VERSION);
    info!("Configuration:");
    info!("  Models dir:   {:?}", config.models_root);
    info!("  Weights file: {}", config.weights_file);
    info!("  Upload dir:   {:?}", config.upload_dir());
    info!("  Device:       {}", config.device);

    // Create shared state and load models
    let loader = default_loader(config.device);
    let state = Arc::new(AppState::new(config, loader));

    let load_state = state.clone();
    let snapshot = tokio::task::spawn_blocking(move || load_state.registry.load()).await??;
    if snapshot.is_empty() {
        warn!("No models loaded. Server will start but predictions won't work.");
    }

    let app = router(state);

    // Start server
    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
