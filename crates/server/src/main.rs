use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docfetch_core::{
    config_path, load_config, validate_config, CommandConverter, Config, DocumentConverter,
    DocumentService, HttpDocumentService, JobOrchestrator, JobRunner, JobService, JobStore,
    LogFormat, OutboxPublisher, OutboxRelay, ProgressBus, ProgressPublisher, ProgressTransport,
    SheetReader, SpreadsheetSource, SqliteJobStore,
};
use docfetch_server::api::create_router;
use docfetch_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let config_path = config_path();

    // Load config first: it selects the log format
    let config = match load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.logging.format);
    info!("docfetch {} starting, config from {:?}", VERSION, config_path);

    if let Err(e) = run(config).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run(config: Config) -> Result<()> {
    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    // Config fingerprint
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(fingerprint = &config_hash[..16], "Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Create SQLite job store
    let store = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    for dir in [
        &config.storage.upload_dir,
        &config.storage.output_dir,
        &config.storage.temp_dir,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", dir))?;
    }

    // Progress fan-out. With the outbox transport, events are written to
    // SQLite and relayed to the bus, including those of other workers.
    let bus = Arc::new(ProgressBus::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        &config.progress,
    ));
    let (publisher, relay): (Arc<dyn ProgressPublisher>, Option<Arc<OutboxRelay>>) =
        match config.progress.transport {
            ProgressTransport::InProcess => (bus.clone() as Arc<dyn ProgressPublisher>, None),
            ProgressTransport::Outbox => {
                let outbox = Arc::new(
                    OutboxPublisher::new(&config.database.path)
                        .context("Failed to open progress outbox")?,
                );
                let relay = Arc::new(OutboxRelay::new(
                    Arc::clone(&outbox),
                    Arc::clone(&bus),
                    &config.progress,
                ));
                relay.start().context("Failed to start outbox relay")?;
                info!("Progress outbox relay started");
                (outbox as Arc<dyn ProgressPublisher>, Some(relay))
            }
        };

    // Create document service client if configured
    let documents: Option<Arc<dyn DocumentService>> = match &config.document_service {
        Some(ds_config) => {
            info!("Initializing document service client for {}", ds_config.url);
            Some(Arc::new(
                HttpDocumentService::new(ds_config.clone())
                    .context("Failed to create document service client")?,
            ))
        }
        None => {
            info!("No document service configured");
            None
        }
    };

    let converter: Arc<dyn DocumentConverter> =
        Arc::new(CommandConverter::new(config.converter.clone()));
    if let Err(e) = converter.validate().await {
        warn!(
            "Converter '{}' unavailable, image conversion will fail: {}",
            converter.name(),
            e
        );
    }

    let sheets: Arc<dyn SpreadsheetSource> = Arc::new(SheetReader::new());

    // Create runner if enabled
    let runner = if config.orchestrator.enabled {
        match &documents {
            Some(documents) => {
                info!("Initializing job runner");
                let orchestrator = Arc::new(JobOrchestrator::new(
                    &config.orchestrator,
                    store.clone(),
                    Arc::clone(&sheets),
                    Arc::clone(documents),
                    Arc::clone(&converter),
                    Arc::clone(&publisher),
                    config.storage.temp_dir.clone(),
                ));
                let runner = Arc::new(JobRunner::new(
                    config.orchestrator.clone(),
                    store.clone(),
                    orchestrator,
                ));
                runner.start().await;
                info!("Job runner started");
                Some(runner)
            }
            None => {
                error!("Orchestrator enabled but no document service is configured");
                None
            }
        }
    } else {
        info!("Orchestrator disabled in config, jobs wait for a worker");
        None
    };

    let jobs = JobService::new(store.clone(), Arc::clone(&publisher), runner.clone());

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        jobs,
        bus,
        sheets,
        documents.clone(),
        runner.clone(),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Stop runner; in-flight jobs stay RUNNING for the next start
    if let Some(ref runner) = runner {
        info!("Stopping job runner...");
        runner.stop().await;
        info!("Job runner stopped");
    }

    if let Some(ref relay) = relay {
        relay.stop();
        info!("Progress outbox relay stopped");
    }

    if let Some(documents) = documents {
        documents.close().await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
