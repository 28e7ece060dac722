//! # mymate-server
//!
//! Real-time direct messaging for the mymate roommate platform.
//!
//! This binary provides:
//! - **Chat sockets** (`/api/v1/chats/websocket`) that deliver every message
//!   to all open devices of its addressee
//! - **Liveness monitor** that probes every socket and evicts dead ones
//! - **Chat list and history** endpoints for catching up after being offline
//! - **SQLite persistence** of messages through `mymate-store`
//! - **User sync API** (`/admin/users/*`) the account service uses to push
//!   profiles and revoke tokens

mod api;
mod auth;
mod channel;
mod config;
mod error;
mod history;
mod liveness;
mod registry;
mod router;
mod store;
mod ws;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::auth::JwtIdentityResolver;
use crate::config::ServerConfig;
use crate::history::HistoryService;
use crate::liveness::LivenessMonitor;
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::store::{SqliteStore, UserDirectory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mymate_server=debug")),
        )
        .init();

    info!("Starting mymate chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.uses_dev_secret() {
        warn!("SECRET_KEY not set, using the development secret");
    }
    if config.admin_token.is_none() {
        warn!("ADMIN_TOKEN not set, user sync API disabled; only users already in the database can chat");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    let registry = ConnectionRegistry::new();

    let router = MessageRouter::new(registry.clone(), store.clone(), config.request_timeout);
    let history = HistoryService::new(store.clone(), config.request_timeout);
    let directory: Arc<dyn UserDirectory> = store;
    let resolver = Arc::new(JwtIdentityResolver::new(
        config.secret_key.as_bytes(),
        directory.clone(),
    ));

    let http_addr = config.http_addr;
    let app_state = AppState {
        registry: registry.clone(),
        router,
        history,
        resolver,
        directory,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let _liveness =
        LivenessMonitor::new(registry, config.ping_interval, config.liveness_threshold).spawn();

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
