//! Configuration module for uptrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::probe::{Classification, DEFAULT_PROBE_TIMEOUT};
use crate::scheduler::{SchedulerConfig, DEFAULT_MAX_CONCURRENT_PROBES, DEFAULT_POLL_INTERVAL};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptrail.db")
    pub db_path: String,
    /// Time between two polling batches (default: 60s)
    pub poll_interval: Duration,
    /// Bound on a single HTTP check (default: 10s)
    pub probe_timeout: Duration,
    /// Status periods kept per target (default: 100)
    pub history_limit: usize,
    /// Probes in flight at once (default: 16)
    pub max_concurrent_probes: usize,
    /// How HTTP responses map to online/offline (default: any response is online)
    pub classification: Classification,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptrail.db".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            classification: Classification::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTRAIL_HTTP_PORT`: HTTP port
    /// - `UPTRAIL_DB_PATH`: Database file path
    /// - `UPTRAIL_POLL_INTERVAL_SECS`: seconds between batches
    /// - `UPTRAIL_PROBE_TIMEOUT_SECS`: per-check timeout in seconds
    /// - `UPTRAIL_HISTORY_LIMIT`: periods kept per target (at least 1)
    /// - `UPTRAIL_MAX_CONCURRENT_PROBES`: parallel probes (at least 1)
    /// - `UPTRAIL_CLASSIFICATION`: `any-response` or `success-only`
    ///
    /// Invalid values are logged and ignored.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "UPTRAIL_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("UPTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = parse_var::<_, u64>(&lookup, "UPTRAIL_POLL_INTERVAL_SECS").filter(|s| *s > 0) {
            cfg.poll_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<_, u64>(&lookup, "UPTRAIL_PROBE_TIMEOUT_SECS").filter(|s| *s > 0) {
            cfg.probe_timeout = Duration::from_secs(secs);
        }

        if let Some(limit) = parse_var::<_, usize>(&lookup, "UPTRAIL_HISTORY_LIMIT") {
            cfg.history_limit = limit.max(1);
        }

        if let Some(n) = parse_var::<_, usize>(&lookup, "UPTRAIL_MAX_CONCURRENT_PROBES") {
            cfg.max_concurrent_probes = n.max(1);
        }

        if let Some(classification) = parse_var(&lookup, "UPTRAIL_CLASSIFICATION") {
            cfg.classification = classification;
        }

        cfg
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.poll_interval,
            probe_timeout: self.probe_timeout,
            history_limit: self.history_limit,
            max_concurrent_probes: self.max_concurrent_probes,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}
