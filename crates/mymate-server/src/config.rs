//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mymate_shared::constants::{
    DEFAULT_HTTP_PORT, LIVENESS_THRESHOLD, OUTBOUND_QUEUE_CAPACITY, PING_INTERVAL_SECS,
    REQUEST_TIMEOUT_SECS,
};

/// Signing secret used when `SECRET_KEY` is not set. Development only.
pub const DEV_SECRET_KEY: &str = "mymate-dev-secret-change-me";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./mymate.db`
    pub database_path: PathBuf,

    /// HS256 secret the account service signs tokens with.
    /// Env: `SECRET_KEY`
    /// Default: [`DEV_SECRET_KEY`] (development only).
    pub secret_key: String,

    /// Delay between two liveness rounds.
    /// Env: `PING_INTERVAL_SECS`
    /// Default: `10`
    pub ping_interval: Duration,

    /// Consecutive failed probes tolerated before eviction.
    /// Env: `LIVENESS_THRESHOLD`
    /// Default: `10`
    pub liveness_threshold: u32,

    /// Deadline for store calls and outbound deliveries.
    /// Env: `REQUEST_TIMEOUT_SECS`
    /// Default: `60`
    pub request_timeout: Duration,

    /// Per-channel outbound queue capacity.
    /// Env: `OUTBOUND_QUEUE`
    /// Default: `64`
    pub outbound_queue: usize,

    /// Bearer token the account service uses on the /admin/* user sync API.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./mymate.db"),
            secret_key: DEV_SECRET_KEY.to_string(),
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            liveness_threshold: LIVENESS_THRESHOLD,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            outbound_queue: OUTBOUND_QUEUE_CAPACITY,
            admin_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parsed::<SocketAddr>(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(secret) = lookup("SECRET_KEY").filter(|s| !s.is_empty()) {
            config.secret_key = secret;
        }

        if let Some(secs) = parsed::<u64>(&lookup, "PING_INTERVAL_SECS").filter(|s| *s > 0) {
            config.ping_interval = Duration::from_secs(secs);
        }

        if let Some(n) = parsed::<u32>(&lookup, "LIVENESS_THRESHOLD") {
            config.liveness_threshold = n;
        }

        if let Some(secs) = parsed::<u64>(&lookup, "REQUEST_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.request_timeout = Duration::from_secs(secs);
        }

        // mpsc::channel panics on a zero capacity
        if let Some(n) = parsed::<usize>(&lookup, "OUTBOUND_QUEUE").filter(|n| *n > 0) {
            config.outbound_queue = n;
        }

        if let Some(token) = lookup("ADMIN_TOKEN").filter(|t| !t.is_empty()) {
            config.admin_token = Some(token);
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.secret_key == DEV_SECRET_KEY
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("secret_key", &"<redacted>")
            .field("ping_interval", &self.ping_interval)
            .field("liveness_threshold", &self.liveness_threshold)
            .field("request_timeout", &self.request_timeout)
            .field("outbound_queue", &self.outbound_queue)
            .field("admin_enabled", &self.admin_token.is_some())
            .finish()
    }
}
