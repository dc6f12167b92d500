use std::path::PathBuf;
use std::time::Duration;

use imagegen_pipeline::DispatcherConfig;

use crate::ws::{PING_INTERVAL, POLL_INTERVAL, PONG_TIMEOUT};

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long to wait for in-flight workers after the listener stops
    /// (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Number of concurrent generation workers (default: `3`).
    pub worker_count: usize,
    /// Admission queue capacity (default: `100`).
    pub queue_capacity: usize,
    /// Directory generated images are written to (default: `./storage`).
    pub storage_dir: PathBuf,
    /// URL prefix the storage directory is served under (default: `/files`).
    pub public_files_url: String,
    /// Provider used when a request names none (default: `gemini`).
    pub default_provider: String,
    /// How often a task subscription re-reads its task (default: 1s).
    pub ws_poll_interval: Duration,
    /// Interval between Ping frames on a subscription (default: 30s).
    pub ws_ping_interval: Duration,
    /// Subscriptions with no Pong for this long are closed (default: 60s).
    pub ws_pong_timeout: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `8080`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `WORKER_COUNT`          | `3`                     |
    /// | `QUEUE_CAPACITY`        | `100`                   |
    /// | `STORAGE_DIR`           | `./storage`             |
    /// | `PUBLIC_FILES_URL`      | `/files`                |
    /// | `DEFAULT_PROVIDER`      | `gemini`                |
    /// | `WS_POLL_INTERVAL_MS`   | `1000`                  |
    /// | `WS_PING_INTERVAL_MS`   | `30000`                 |
    /// | `WS_PONG_TIMEOUT_MS`    | `60000`                 |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup.
    ///
    /// Panics on unparsable numeric values; misconfiguration fails at boot.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let host = var("HOST", "0.0.0.0");

        let port: u16 = var("PORT", "8080")
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = var("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = var("REQUEST_TIMEOUT_SECS", "30")
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = var("SHUTDOWN_TIMEOUT_SECS", "30")
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let worker_count: usize = var("WORKER_COUNT", "3")
            .parse()
            .expect("WORKER_COUNT must be a valid usize");
        assert!(worker_count > 0, "WORKER_COUNT must be at least 1");

        let queue_capacity: usize = var("QUEUE_CAPACITY", "100")
            .parse()
            .expect("QUEUE_CAPACITY must be a valid usize");
        assert!(queue_capacity > 0, "QUEUE_CAPACITY must be at least 1");

        let storage_dir = PathBuf::from(var("STORAGE_DIR", "./storage"));
        let public_files_url = var("PUBLIC_FILES_URL", "/files");
        let default_provider = var("DEFAULT_PROVIDER", "gemini");

        let millis = |key: &str, default: Duration| -> Duration {
            let ms: u64 = lookup(key)
                .map(|v| v.parse().unwrap_or_else(|_| panic!("{key} must be a valid u64")))
                .unwrap_or(default.as_millis() as u64);
            assert!(ms > 0, "{key} must be at least 1");
            Duration::from_millis(ms)
        };
        let ws_poll_interval = millis("WS_POLL_INTERVAL_MS", POLL_INTERVAL);
        let ws_ping_interval = millis("WS_PING_INTERVAL_MS", PING_INTERVAL);
        let ws_pong_timeout = millis("WS_PONG_TIMEOUT_MS", PONG_TIMEOUT);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            worker_count,
            queue_capacity,
            storage_dir,
            public_files_url,
            default_provider,
            ws_poll_interval,
            ws_ping_interval,
            ws_pong_timeout,
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            default_provider: self.default_provider.clone(),
        }
    }

    /// Route prefix the storage directory is mounted at.
    ///
    /// Absolute public URLs (a CDN in front of the service) fall back to
    /// `/files`.
    pub fn files_mount_path(&self) -> String {
        let url = self.public_files_url.trim_end_matches('/');
        if url.starts_with('/') && url.len() > 1 {
            url.to_string()
        } else {
            "/files".to_string()
        }
    }
}
