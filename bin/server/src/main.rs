use nodeweave_ai::{SimulatedBackend, register_ai_handlers};
use nodeweave_server::{
    AppState,
    config::ServerConfig,
    db::{PgRecordStore, WorkflowRepository},
    error::StartupError,
    router,
};
use nodeweave_workflow::{EngineConfig, HandlerRegistry};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> nodeweave_core::Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migration {
            details: e.to_string(),
        })?;

    let mut registry = HandlerRegistry::with_builtins();
    register_ai_handlers(&mut registry, Arc::new(SimulatedBackend::default()));

    let engine_config = EngineConfig::from(&config.engine);
    tracing::info!(
        node_timeout_secs = engine_config.node_timeout.as_secs(),
        frontier_mode = ?engine_config.frontier_mode,
        "Engine configured"
    );

    let state = AppState::new(
        Arc::new(WorkflowRepository::new(db_pool.clone())),
        Arc::new(PgRecordStore::new(db_pool)),
        registry,
        engine_config,
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.bind_addr.clone(),
            details: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
