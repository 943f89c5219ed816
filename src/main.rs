//! Process Catalog - hierarchical process and area management server.

mod api;
mod config;
mod error;
mod schema;
mod store;
mod tree;

use anyhow::Context;
use api::AppState;
use config::AppConfig;
use store::SqliteStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "process_catalog=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!("Starting with {:?}", config);

    // Open the catalog database
    let store = if config.is_in_memory() {
        SqliteStore::in_memory()
    } else {
        SqliteStore::open(&config.database_path)
    }
    .with_context(|| format!("Unable to open database {:?}", config.database_path))?;

    if config.reset_database {
        store.reset().context("Unable to reset database")?;
    }
    info!("Database ready");

    // Build router
    let app = api::router(AppState::new(store))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Run server
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Unable to bind {}", addr))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
