// src/config.rs
use chrono_tz::Tz;
use log::warn;
use std::env;
use std::time::Duration;

use crate::BoxError;

const DEFAULT_PORT: u16 = 3030;
const DEFAULT_UPSTREAM_BASE_URL: &str = "http://localhost:4000/api";
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STALE_TIME_MS: u64 = 30_000;
const DEFAULT_CACHE_TIME_MS: u64 = 300_000;
const DEFAULT_REFETCH_INTERVAL_MS: u64 = 60_000;
// base64 of "retail-dashboard-dev-secret"
const DEFAULT_AUTH_SECRET: &str = "cmV0YWlsLWRhc2hib2FyZC1kZXYtc2VjcmV0";

/// Runtime configuration, read once from the environment at startup and
/// carried inside the shared application state.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    /// Business timezone anchoring day boundaries for windows and buckets.
    pub dashboard_tz: Tz,
    pub stale_time: Duration,
    pub cache_time: Duration,
    pub refetch_interval: Duration,
    /// Base64-encoded HS256 secret for offline tokens.
    pub auth_secret: String,
}

fn env_millis(name: &str, default_ms: u64) -> Result<Duration, BoxError> {
    match env::var(name) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .map_err(|_| format!("{} must be an integer millisecond value", name))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, BoxError> {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| "PORT must be a number")?,
            Err(_) => {
                warn!("$PORT not set, defaulting to {}", DEFAULT_PORT);
                DEFAULT_PORT
            }
        };

        let upstream_base_url = env::var("UPSTREAM_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_UPSTREAM_BASE_URL.to_string());

        let dashboard_tz: Tz = env::var("DASHBOARD_TZ")
            .unwrap_or_else(|_| "UTC".to_string())
            .parse()
            .map_err(|err: String| format!("DASHBOARD_TZ is not a valid timezone: {}", err))?;

        Ok(Config {
            port,
            upstream_base_url,
            upstream_timeout: env_millis("UPSTREAM_TIMEOUT_MS", DEFAULT_UPSTREAM_TIMEOUT_MS)?,
            dashboard_tz,
            stale_time: env_millis("STALE_TIME_MS", DEFAULT_STALE_TIME_MS)?,
            cache_time: env_millis("CACHE_TIME_MS", DEFAULT_CACHE_TIME_MS)?,
            refetch_interval: env_millis("REFETCH_INTERVAL_MS", DEFAULT_REFETCH_INTERVAL_MS)?,
            auth_secret: env::var("AUTH_SECRET").unwrap_or_else(|_| DEFAULT_AUTH_SECRET.to_string()),
        })
    }
}
