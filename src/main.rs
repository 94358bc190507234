//! teamsync
//!
//! Team-scoped data sync daemon for a multi-tenant CRM dashboard: resolves the
//! session's read/write scope, keeps per-entity stores fresh by polling, applies
//! mutations optimistically and serves the result over a local REST API.

mod aggregate;
mod api;
mod auth;
mod cache;
mod config;
mod db;
mod engine;
mod errors;
mod models;
mod notify;
mod remote;
mod scheduler;
mod session;
mod store;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::RequestCache;
use config::Config;
use db::{MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
use engine::SyncEngine;
use notify::NoticeBoard;
use remote::{EntityApi, RemoteClient};
use session::Session;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub notices: Arc<NoticeBoard>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting teamsync");
    tracing::info!("Remote API: {}", config.api_url);
    tracing::info!("Snapshot database: {:?}", config.snapshot_db);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (CRM_SYNC_API_PSK). Authentication is disabled!");
    }
    if config.api_token.is_none() {
        tracing::warn!("No remote API token configured (CRM_SYNC_API_TOKEN)");
    }

    let cache = Arc::new(RequestCache::new(config.cache_ttl));
    let client = RemoteClient::new(&config.api_url, config.api_token.clone(), cache.clone())?;

    let identity = match config.identity.clone() {
        Some(identity) => identity,
        None => {
            tracing::info!("Resolving identity from profile endpoint");
            client.profile().await?
        }
    };

    let snapshots: Arc<dyn SnapshotStore> = match &config.snapshot_db {
        Some(path) => Arc::new(SqliteSnapshotStore::new(db::init_database(path).await?)),
        None => Arc::new(MemorySnapshotStore::new()),
    };

    let session = Session::login(identity, cache);
    let notices = Arc::new(NoticeBoard::default());
    let engine = SyncEngine::new(
        session,
        |kind| Arc::new(client.entity(kind)) as Arc<dyn EntityApi>,
        Arc::new(client.clone()),
        snapshots,
        notices.clone(),
        config.poll,
    );
    engine.start().await?;

    let state = AppState {
        engine: engine.clone(),
        notices,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Session
        .route("/session", get(api::get_session))
        .route("/session/selection", put(api::put_selection))
        // Entity stores
        .route(
            "/entities/{kind}",
            get(api::list_records).post(api::create_record),
        )
        .route("/entities/{kind}/refresh", post(api::refresh_records))
        .route(
            "/entities/{kind}/{id}",
            put(api::update_record).delete(api::delete_record),
        )
        // Team view and sync
        .route("/team", get(api::get_team))
        .route("/team/refresh", post(api::refresh_team))
        .route("/sync", get(api::get_sync_status))
        .route("/activity", post(api::post_activity))
        .route("/notifications", get(api::list_notifications))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
