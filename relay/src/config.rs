//! Configuration module for environment variable parsing.
//!
//! Every setting has a default, so the relay starts with an empty
//! environment. Malformed numbers fall back to the default with a warning.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::webhook::RetryPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the SMTP listener binds to
    pub listen_addr: String,

    /// Host used in body retrieval URLs and the SMTP greeting
    pub instance_hostname: String,

    /// Directory holding stored messages
    pub maildb_root: PathBuf,

    /// Directory the SMTP layer stages incoming messages in
    pub staging_dir: PathBuf,

    /// Base URL of the status service
    pub status_url: String,

    /// Bearer token for status calls
    pub server_jwt: String,

    /// Per-attempt webhook timeout in milliseconds
    pub webhook_timeout_ms: u64,

    /// Total webhook attempts
    pub webhook_max_attempts: u32,

    /// Backoff range in milliseconds (first wait, cap)
    pub webhook_retry_ms: (u64, u64),

    /// SMTP session timeout, also the delivery deadline
    pub session_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            listen_addr: env::var("WEBHOOK_LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:2526".to_string()),

            instance_hostname: env::var("INSTANCE_HOSTNAME")
                .unwrap_or_else(|_| "localhost".to_string()),

            maildb_root: env::var("MAILDB_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/usr/local/lib/maildb")),

            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp")),

            status_url: env::var("MAILDB_STATUS_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8081".to_string()),

            server_jwt: env::var("SERVER_JWT").unwrap_or_default(),

            webhook_timeout_ms: parse_or("WEBHOOK_TIMEOUT_MS", 60_000),

            webhook_max_attempts: parse_or::<u32>("WEBHOOK_MAX_ATTEMPTS", 5).max(1),

            webhook_retry_ms: retry_range(
                parse_or("WEBHOOK_RETRY_MIN_MS", 1_000),
                parse_or("WEBHOOK_RETRY_MAX_MS", 30_000),
            ),

            session_timeout_ms: parse_or("SESSION_TIMEOUT_MS", 180_000),
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let (min, max) = self.webhook_retry_ms;
        RetryPolicy {
            max_attempts: self.webhook_max_attempts,
            min_wait: Duration::from_millis(min),
            max_wait: Duration::from_millis(max),
        }
    }
}

/// Parse a variable, keeping `default` when it is unset or malformed.
fn parse_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, default = %default, "Invalid number, using default");
            default
        }
    }
}

/// Keep the backoff cap at or above the first wait.
fn retry_range(min: u64, max: u64) -> (u64, u64) {
    if min <= max {
        (min, max)
    } else {
        warn!(min_ms = min, max_ms = max, "Retry cap below first wait, using first wait as cap");
        (min, min)
    }
}
