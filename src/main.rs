use anyhow::{Context, Result};
use rental_l10n::clock::SystemClock;
use rental_l10n::config::Config;
use rental_l10n::db::Database;
use rental_l10n::http::{create_router, AppState};
use rental_l10n::scheduler::start_scheduler;
use rental_l10n::services::TranslationServices;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rental_l10n=info".parse()?),
        )
        .init();

    info!("Starting rental translation service");

    let config = Config::from_env()?;
    if config.deepl_api_key.is_none() {
        warn!("DEEPL_API_KEY not set; provider calls need a key stored in api_configuration");
    }
    if config.admin_api_key.is_none() {
        warn!("ADMIN_API_KEY not set; retrigger endpoint is disabled");
    }

    if let Some(dir) = sqlite_parent_dir(&config.database_url) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }
    let db = Database::connect(&config.database_url)
        .await
        .context("Failed to open database")?;
    info!("✓ Database ready");

    let services = Arc::new(TranslationServices::init(&config, db, Arc::new(SystemClock)).await?);
    let mut scheduler = start_scheduler(services.clone()).await?;

    let router = create_router(AppState::new(services.clone(), config.admin_api_key.clone()));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("✓ Listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    if let Err(e) = scheduler.shutdown().await {
        warn!("Scheduler shutdown failed: {}", e);
    }
    services.shutdown().await;
    services.db.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}

/// Directory holding a file-backed SQLite database, if any.
fn sqlite_parent_dir(url: &str) -> Option<&Path> {
    if url.contains(":memory:") {
        return None;
    }
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?
        .split('?')
        .next()?;
    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}
