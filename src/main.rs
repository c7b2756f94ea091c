//! Mailtriage - Per-User Email Importance Classification
//!
//! Main entry point: starts the HTTP API with the background sweep, or runs
//! a single sweep cycle and exits.

use clap::{Parser, Subcommand};
use mailtriage::{
    api::ApiServer,
    classifier::ClassifierRegistry,
    config::TriageConfig,
    error::Result,
    persist::PersistenceLayer,
    scheduler::IncrementalScheduler,
    service::ClassificationService,
    storage::{self, sqlite::SqliteGroundTruth, GroundTruthStore},
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailtriage")]
#[command(about = "Per-user email importance classification service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (TOML)
    #[arg(short, long, env = "MAILTRIAGE_CONFIG")]
    config: Option<String>,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server (default)
    Serve {
        /// Disable the background sweep regardless of configuration
        #[arg(long)]
        no_sweep: bool,
    },

    /// Run the incremental sweep
    Sweep {
        /// Run one cycle and exit instead of looping
        #[arg(long)]
        once: bool,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mailtriage={level},tower_http=warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Shared wiring for both subcommands
struct Services {
    config: TriageConfig,
    service: Arc<ClassificationService>,
    embeddings: Arc<dyn storage::EmbeddingStore>,
    ground_truth: Arc<dyn GroundTruthStore>,
}

async fn build_services(config: TriageConfig) -> Result<Services> {
    let embeddings = storage::build_embedding_store(&config.embedding_store)?;
    let ground_truth: Arc<dyn GroundTruthStore> =
        Arc::new(SqliteGroundTruth::new(&config.ground_truth.db_path)?);

    let registry = Arc::new(ClassifierRegistry::new(
        PersistenceLayer::new(&config.data_dir),
        config.classifier.clone(),
    ));
    let loaded = registry.load_all().await;
    debug!("Registry warm with {} persisted classifiers", loaded);

    let service = Arc::new(ClassificationService::new(
        registry,
        embeddings.clone(),
        config.classifier.clone(),
    ));

    Ok(Services {
        config,
        service,
        embeddings,
        ground_truth,
    })
}

/// Flip the shutdown signal on ctrl-c
fn spawn_signal_handler(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = tx.send(true);
        }
    });
}

async fn run_serve(services: Services, no_sweep: bool) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let sweep_handle = if services.config.scheduler.enabled && !no_sweep {
        let mut scheduler = IncrementalScheduler::new(
            services.service.clone(),
            services.embeddings.clone(),
            services.ground_truth.clone(),
            services.config.scheduler.clone(),
        );
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { scheduler.run(rx).await }))
    } else {
        info!("Background sweep disabled");
        None
    };

    let server = ApiServer::new(services.config.http.clone(), services.service.clone());
    server.serve(shutdown_rx).await?;

    if let Some(handle) = sweep_handle {
        if let Err(e) = handle.await {
            warn!("Sweep task ended abnormally: {}", e);
        }
    }
    Ok(())
}

async fn run_sweep(services: Services, once: bool) -> anyhow::Result<()> {
    let mut scheduler = IncrementalScheduler::new(
        services.service.clone(),
        services.embeddings.clone(),
        services.ground_truth.clone(),
        services.config.scheduler.clone(),
    );

    if once {
        let summary = scheduler.run_once().await?;
        info!(
            "Sweep complete: {} discovered, {} submitted, {} reconciled, {} skipped (unready)",
            summary.discovered, summary.submitted, summary.reconciled, summary.skipped_unready
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);
    scheduler.run(shutdown_rx).await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    debug!("Mailtriage v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = TriageConfig::load(cli.config.as_deref())?;
    let services = build_services(config).await?;

    match cli.command {
        Some(Commands::Sweep { once }) => run_sweep(services, once).await,
        Some(Commands::Serve { no_sweep }) => run_serve(services, no_sweep).await,
        None => run_serve(services, false).await,
    }
}
