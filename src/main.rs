//! CLI entry point, mirroring `run_scheduler.py`'s argparse surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nexus_scheduler::api::{self, AppState};
use nexus_scheduler::backend_client::HttpBackendClient;
use nexus_scheduler::codec::JsonPayloadCodec;
use nexus_scheduler::config::{AppSettings, ConfigLoader};
use nexus_scheduler::model::EndpointConfig;
use nexus_scheduler::predictors::transfer::TransferPredictor;
use nexus_scheduler::predictors::runtime::init_runtime_predictor;
use nexus_scheduler::scheduler::{run_dispatch_loop, run_watchdog_loop, SchedulerCore};
use nexus_scheduler::strategies::{EndpointDirectory, DEFAULT_LATENCY_CONST};
use nexus_scheduler::transfer_manager::{HttpTransferServiceClient, TransferManager};

#[derive(Parser)]
#[command(name = "nexus-scheduler")]
#[command(about = "Client-side scheduling proxy for a remote function-execution backend")]
#[command(version)]
struct Cli {
    /// Port to bind the front-end HTTP surface on.
    #[arg(short = 'p', long, default_value_t = 5000)]
    port: u16,

    /// Endpoint fleet configuration file (YAML).
    #[arg(long, default_value = "endpoints.yaml")]
    endpoints: String,

    /// Endpoint-selection strategy: round-robin | fastest-endpoint | smallest-eta.
    #[arg(short = 's', long, default_value = "round-robin")]
    strategy: String,

    /// Runtime predictor: rolling-average | input-length.
    #[arg(short = 'r', long = "predictor", default_value = "rolling-average")]
    predictor: String,

    /// Rolling-average window length.
    #[arg(long = "last-n", default_value_t = 3)]
    last_n: usize,

    /// Samples accumulated between regression refits.
    #[arg(long = "train-every", default_value_t = 1)]
    train_every: usize,

    /// Max backup submissions per task (reserved; spec §9 Open Question, unimplemented).
    #[arg(short = 'b', long = "max-backups", default_value_t = 0)]
    max_backups: usize,

    /// Base URL of the remote function-execution backend.
    #[arg(long = "backend-url", default_value = "http://localhost:6000")]
    backend_url: String,

    /// Base URL of the bulk-transfer service.
    #[arg(long = "transfer-url", default_value = "http://localhost:6001")]
    transfer_url: String,

    /// Optional JSON sidecar to load/save transfer-predictor state.
    #[arg(long = "predictor-state")]
    predictor_state: Option<String>,

    /// `tracing` filter directive, e.g. `info` or `nexus_scheduler=debug`.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Seconds of silence before an endpoint is considered dead.
    #[arg(long = "heartbeat-threshold", default_value_t = 75.0)]
    heartbeat_threshold: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = AppSettings::from_cli(cli.log_level.clone(), cli.port);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let endpoints: Vec<(String, EndpointConfig)> = ConfigLoader::load_endpoints_from_file(&cli.endpoints)?;
    let directory = Arc::new(EndpointDirectory::new(endpoints)?);

    let transfer_predictor = Arc::new(TransferPredictor::default());
    if let Some(path) = &cli.predictor_state {
        if std::path::Path::new(path).exists() {
            transfer_predictor.load_from_file(path)?;
            tracing::info!(path, "loaded transfer predictor snapshot");
        }
    }

    let runtime_predictor: Arc<dyn nexus_scheduler::predictors::RuntimePredictor> =
        Arc::from(init_runtime_predictor(&cli.predictor, cli.last_n, cli.train_every));

    let transfer_client = Arc::new(HttpTransferServiceClient::new(
        cli.transfer_url.clone(),
        Duration::from_secs(30),
    ));
    let transfer_manager = Arc::new(TransferManager::new(
        transfer_client,
        Arc::clone(&directory),
        Arc::clone(&transfer_predictor),
    ));

    let backend: Arc<dyn nexus_scheduler::backend_client::BackendClient> = Arc::new(HttpBackendClient::new(
        cli.backend_url.clone(),
        Duration::from_secs(30),
    ));

    let core = SchedulerCore::new(
        Arc::clone(&directory),
        &cli.strategy,
        runtime_predictor,
        Arc::clone(&transfer_predictor),
        Arc::clone(&transfer_manager),
        Arc::clone(&backend),
        Arc::new(JsonPayloadCodec),
        DEFAULT_LATENCY_CONST,
    )?;

    let stop = Arc::new(tokio::sync::Notify::new());
    let dispatch_handle = tokio::spawn(run_dispatch_loop(
        Arc::clone(&core),
        Duration::from_millis(200),
        Arc::clone(&stop),
    ));
    let watchdog_handle = tokio::spawn(run_watchdog_loop(
        Arc::clone(&core),
        Duration::from_secs(5),
        cli.heartbeat_threshold,
        Arc::clone(&stop),
    ));
    let tracker_handle = tokio::spawn(transfer_manager.run_tracker_loop(Duration::from_secs(2), Arc::clone(&stop)));

    let state = Arc::new(AppState {
        core: Arc::clone(&core),
        backend,
        http: reqwest::Client::new(),
        backend_base_url: cli.backend_url.clone(),
    });
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.bind_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "nexus-scheduler listening");

    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        stop.notify_waiters();
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    let _ = tokio::join!(dispatch_handle, watchdog_handle, tracker_handle);

    if let Some(path) = &cli.predictor_state {
        transfer_predictor.to_file(path)?;
        tracing::info!(path, "saved transfer predictor snapshot");
    }

    Ok(())
}
