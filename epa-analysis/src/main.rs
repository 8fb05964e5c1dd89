//! epa-analysis - Estate Plan Analysis orchestrator
//!
//! Accepts client intakes over HTTP, queues one analysis run per intake and
//! drives it through the research, analysis and synthesis phases on a
//! background worker. Progress is polled over REST or streamed over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use epa_common::config::{default_config_path, load_toml_config, resolve_root_folder};
use epa_common::events::EventBus;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use epa_analysis::config::resolve_settings;
use epa_analysis::services::{
    AnalysisWorker, HttpAnalysisClient, RunCoordinator, SubmissionLimiter, WorkUnitExecutor,
};
use epa_analysis::AppState;

/// Command-line arguments for epa-analysis
#[derive(Parser, Debug)]
#[command(name = "epa-analysis")]
#[command(about = "Multi-phase estate plan analysis orchestrator")]
#[command(version)]
struct Args {
    /// Folder holding the service database
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Port to listen on (overrides the resolved listen_port setting)
    #[arg(short, long, env = "EPA_ANALYSIS_PORT")]
    port: Option<u16>,

    /// TOML configuration file
    #[arg(short, long, env = "EPA_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match args.config.clone() {
        Some(path) => path,
        None => default_config_path("epa-analysis")?,
    };
    let toml_config = load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting epa-analysis"
    );
    info!("Config file: {}", config_path.display());

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        "EPA_ROOT_FOLDER",
        Some(&toml_config),
    );
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let db_path = root_folder.join(epa_analysis::db::DATABASE_FILE);
    info!("Database: {}", db_path.display());
    let db_pool = epa_analysis::db::init_database_pool(&db_path).await?;

    let settings = resolve_settings(&db_pool, &toml_config).await?;

    let collaborator = HttpAnalysisClient::from_settings(&settings)
        .context("collaborator_url is not configured (set EPA_COLLABORATOR_URL or [orchestrator].collaborator_url)")??;
    info!("Analysis collaborator: {}", collaborator.endpoint());

    let executor = Arc::new(WorkUnitExecutor::new(
        Arc::new(collaborator),
        settings.unit_timeout(),
        settings.unit_max_retries,
        settings.retry_backoff(),
    ));

    let event_bus = EventBus::new(settings.event_bus_capacity);
    let coordinator = Arc::new(RunCoordinator::new(
        db_pool,
        event_bus,
        executor,
        &settings,
    ));

    let worker = AnalysisWorker::new(Arc::clone(&coordinator), settings.worker_poll_interval());
    let recovered = worker.recover_stale_jobs().await?;
    if recovered > 0 {
        warn!(recovered, "Resuming runs interrupted by a previous shutdown");
    }
    let worker_shutdown = worker.shutdown_token();
    let worker_task = tokio::spawn(worker.run());

    let limiter = SubmissionLimiter::new(settings.submissions_per_minute);
    let state = AppState::new(Arc::clone(&coordinator), limiter);
    let purge_limiter = Arc::clone(&state.submission_limiter);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            purge_limiter.purge_idle();
        }
    });

    let app = epa_analysis::build_router(state);

    let port = args.port.unwrap_or(settings.listen_port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    worker_shutdown.cancel();
    if let Err(e) = worker_task.await {
        error!(error = %e, "Analysis worker task panicked");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
