use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::api::{self, AppState, SharedState};
use crate::config::AppConfig;
use crate::db::{Database, DbHandle};
use crate::ws;

/// How often expired sessions are swept from the database.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Build the full application router: REST API, WebSocket feed, and the
/// optional single-page client.
pub fn build_router(state: SharedState, static_dir: Option<&Path>, dev_mode: bool) -> Router {
    let mut app = api::api_router().route("/ws", get(ws::ws_handler));

    if let Some(dir) = static_dir {
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }

    let mut app = app.with_state(state).layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open (creating if needed) the database file and run migrations.
pub fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    Database::new(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

/// Start the taskdeck server and run until Ctrl+C.
pub async fn start_server(config: AppConfig) -> Result<()> {
    let db = DbHandle::new(open_database(&config.database.path)?);
    let purged = db.call(|db| db.purge_expired_sessions()).await?;
    if purged > 0 {
        tracing::info!(purged, "removed expired sessions");
    }

    let state = Arc::new(AppState::new(db.clone(), config.auth.clone()));
    let app = build_router(
        state,
        config.server.static_dir.as_deref(),
        config.server.dev_mode,
    );

    let sweeper = tokio::spawn(sweep_sessions(db));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        %local_addr,
        db = %config.database.path.display(),
        dev_mode = config.server.dev_mode,
        "taskdeck listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn sweep_sessions(db: DbHandle) {
    let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    // The first tick completes immediately; startup already swept.
    interval.tick().await;
    loop {
        interval.tick().await;
        match db.call(|db| db.purge_expired_sessions()).await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "removed expired sessions"),
            Err(e) => tracing::warn!(error = ?e, "session sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
