//! PlantDoc Server
//!
//! Leaf disease diagnosis API with Grad-CAM explanations and an agronomy
//! chat relay.

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use plantdoc_server::{create_router, AppConfig, AppState, ConfigOverrides};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Log filter used with `--verbose`
const VERBOSE_FILTER: &str = "plantdoc_vision=debug,plantdoc_server=debug,tower_http=debug";

/// Log filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "plantdoc_vision=info,plantdoc_server=info";

#[derive(Parser, Debug)]
#[command(name = "plantdoc-server")]
#[command(about = "PlantDoc leaf diagnosis API", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PLANTDOC_CONFIG", default_value = "plantdoc.yaml")]
    config: PathBuf,

    /// Listen address
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Model weights (.safetensors or .pth)
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Class label file, one label per line
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen: self.listen.clone(),
            port: self.port,
            weights: self.weights.clone(),
            labels: self.labels.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Starting PlantDoc Server");

    let config = AppConfig::load(&cli.config, &cli.overrides())?;
    info!("Configuration loaded");
    info!("Weights: {}", config.vision.model.weights_path.display());
    info!("Labels: {}", config.vision.model.labels_path.display());
    info!(
        "Confidence threshold: {}, blur threshold: {}",
        config.vision.decision.confidence_threshold, config.vision.quality.blur_threshold
    );

    let metrics_handle = init_metrics()?;

    info!("Loading model...");
    let addr: SocketAddr = format!("{}:{}", config.server.listen, config.server.port).parse()?;
    let state = AppState::from_config(config, Some(metrics_handle)).await?;
    let status = state.service.status();
    info!(
        "Model ready: {} ({} classes, trained weights: {})",
        status.architecture, status.num_classes, status.weights_loaded
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install the Prometheus recorder and describe the service metrics
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "plantdoc_requests_total",
        "Total number of requests by endpoint"
    );
    metrics::describe_counter!(
        "plantdoc_outcomes_total",
        "Diagnosis outcomes: success, uncertain or unusable"
    );
    metrics::describe_histogram!(
        "plantdoc_inference_latency_us",
        metrics::Unit::Microseconds,
        "Model latency in microseconds by stage"
    );
    metrics::describe_counter!("plantdoc_errors_total", "Total number of errors by kind");

    info!("Metrics exporter initialized");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filters_target_workspace_crates() {
        for filter in [VERBOSE_FILTER, DEFAULT_FILTER] {
            for directive in filter.split(',') {
                let target = directive.split('=').next().unwrap();
                assert!(
                    ["plantdoc_vision", "plantdoc_server", "tower_http"].contains(&target),
                    "unknown log target {}",
                    target
                );
                assert!(directive.parse::<tracing_subscriber::filter::Directive>().is_ok());
            }
        }
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["plantdoc-server", "-P", "9000", "--labels", "classes.txt", "-v"]);
        assert!(cli.verbose);
        let overrides = cli.overrides();
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.labels, Some(PathBuf::from("classes.txt")));
        assert_eq!(overrides.listen, None);
    }
}
