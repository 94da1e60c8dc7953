// src/handlers/health.rs
use chrono::Utc;
use log::info;
use serde_json::json;
use std::sync::Arc;
use warp::reply::Json;
use warp::Rejection;

use crate::services::query_cache::SYSTEM_HEALTH_KEY;
use crate::AppState;

/// Upstream health plus the cache/poller status. Never blocks on a probe:
/// it reports the standing health query's last settlement and, if nothing
/// has settled yet, kicks off a background probe.
pub async fn get_health(state: Arc<AppState>) -> Result<Json, Rejection> {
    info!("Handling health request");

    let cache = state.queries.cache();
    let status = cache.status(SYSTEM_HEALTH_KEY);

    let upstream = match &status {
        Some(s) if s.has_value && s.error.is_none() => "up",
        Some(s) if s.has_value => "degraded",
        Some(s) if s.error.is_some() => "down",
        _ => "unknown",
    };
    if let Some(s) = &status {
        if !s.has_value && !s.is_fetching {
            cache.spawn_revalidate(SYSTEM_HEALTH_KEY);
        }
    }

    Ok(warp::reply::json(&json!({
        "upstream": upstream,
        "queries": state.queries.combined(),
        "checkedAt": Utc::now(),
    })))
}
