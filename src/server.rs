/// Server setup and initialization
///
/// Wires together all components: storage, registry, collaborators, execution engine, cron
/// scheduler and HTTP routes.

use crate::{
    api::{create_event_routes, create_run_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{
        clients::{HttpServiceClient, LogNotificationSender, NotificationSender, ServiceNotificationSender},
        dispatch::{ActionDispatcher, Collaborators, DispatchSettings},
        metrics::TracingMetrics,
        records::SqliteRecordStore,
        CronSchedulerService, EventIngestor, ExecutionEngine,
    },
    workflow::{registry::WorkflowRegistry, storage::SqliteRepository, types::RetryPolicy},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Directory a file-backed SQLite URL points into, if any
fn database_dir(url: &str) -> Option<&Path> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Path::new(path).parent().filter(|dir| !dir.as_os_str().is_empty())
}

/// Create the Axum application and the scheduler it depends on
pub async fn create_app(config: &Config) -> Result<(Router, Arc<CronSchedulerService>)> {
    if let Some(dir) = database_dir(&config.database.url) {
        tracing::info!("📁 Ensuring data directory exists: {}", dir.display());
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    tracing::info!("🗄️ Connecting to {}", config.database.url);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database.url)
        .await
        .context("Failed to open workflow database")?;

    let repository = Arc::new(SqliteRepository::new(pool.clone()));
    repository.init_schema().await?;
    let records = Arc::new(SqliteRecordStore::new(pool));
    records.init_schema().await?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(repository.clone()));
    registry
        .init_from_storage()
        .await
        .context("Failed to load workflows from storage")?;

    tracing::info!("🌍 Configuring {} outbound services", config.services.len());
    let services = Arc::new(HttpServiceClient::new(
        config.services.clone(),
        config.engine.action_timeout(),
    )?);
    let notifier: Arc<dyn NotificationSender> = match &config.notification_service {
        Some(name) => Arc::new(ServiceNotificationSender::new(services.clone(), name.clone())),
        None => {
            tracing::warn!("⚠️ No notification service configured, notifications will only be logged");
            Arc::new(LogNotificationSender)
        }
    };

    let settings = DispatchSettings {
        default_timeout: config.engine.action_timeout(),
        default_retry: RetryPolicy {
            max_attempts: config.engine.retry_attempts.max(1),
            initial_backoff_ms: config.engine.retry_backoff_ms,
            ..RetryPolicy::default()
        },
    };
    let dispatcher = ActionDispatcher::new(
        Collaborators {
            services,
            notifier,
            records,
        },
        settings,
    );

    tracing::info!("🚀 Initializing execution engine");
    let engine = ExecutionEngine::new(repository, dispatcher, Arc::new(TracingMetrics));
    let ingestor = EventIngestor::new(registry.clone(), engine.clone());

    tracing::info!("⏰ Initializing cron scheduler service");
    let scheduler = Arc::new(
        CronSchedulerService::new(registry.clone(), engine.clone())
            .await
            .context("Failed to initialize cron scheduler")?,
    );
    scheduler.start().await?;

    let state = AppState {
        registry,
        engine,
        ingestor,
        scheduler: scheduler.clone(),
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_event_routes())
        .merge(create_run_routes())
        .with_state(state);

    tracing::info!("✅ Application initialized successfully");
    Ok((app, scheduler))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowgate=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    init_tracing();
    tracing::info!("Starting flowgate server...");

    let (app, scheduler) = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, starting graceful shutdown");
}

async fn health_check() -> &'static str {
    "ok"
}
