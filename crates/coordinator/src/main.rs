//! Quill Server - Main Entry Point
//!
//! Loads the vocabulary and model, starts the generation worker on its own
//! thread and runs the connection multiplexer on a single-threaded runtime.

use quill_common::{QuillConfig, QuillError, Result};
use quill_coordinator::metrics_server::serve_metrics;
use quill_coordinator::{ConnectionRegistry, Multiplexer, ResultRouter};
use quill_worker::WorkerService;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::var("QUILL_CONFIG").unwrap_or_else(|_| "configs/quill.yaml".to_string());
    let config = QuillConfig::from_file(&config_path)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.observability.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting Quill: bind={}:{}, device={}, window={}, tokens/request={}",
        config.bind_address,
        config.port,
        config.worker.device,
        config.worker.context_window,
        config.worker.tokens_per_request
    );

    let generator = quill_worker::load_generator(&config.worker)?;

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let worker = WorkerService::spawn(generator, request_rx, response_tx)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config, worker, request_tx, response_rx))
}

async fn run(
    config: QuillConfig,
    worker: WorkerService,
    request_tx: mpsc::UnboundedSender<quill_proto::GenerationRequest>,
    response_rx: mpsc::UnboundedReceiver<quill_proto::GenerationResponse>,
) -> Result<()> {
    let registry = ConnectionRegistry::new();
    let mut router = ResultRouter::new(registry.clone(), response_rx).spawn();

    if config.observability.enable_metrics {
        let metrics_addr = config.metrics_addr()?;
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(metrics_addr).await {
                error!("Metrics endpoint failed: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(config.listen_addr()?).await?;
    let multiplexer = Multiplexer::new(registry, request_tx, &config.coordinator);

    info!("Quill server running");

    // The router only stops once the worker has dropped its result sender
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = multiplexer.serve(listener) => {
            result?;
        }
        result = &mut router => {
            result.map_err(|e| QuillError::internal(format!("router task failed: {}", e)))?;
            match worker.join() {
                Ok(()) => warn!("Generation worker stopped"),
                Err(e) => {
                    error!("Generation worker failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    info!("Quill server shutdown complete");
    Ok(())
}
