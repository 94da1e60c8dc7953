// src/handlers/activity.rs
use log::{error, info};
use serde::Deserialize;
use std::sync::Arc;
use warp::reply::Json;
use warp::Rejection;

use super::error::ApiError;
use crate::services::query_cache::DASHBOARD_ACTIVITIES_KEY;
use crate::{activity_fetcher, AppState};

pub const DEFAULT_ACTIVITY_LIMIT: u32 = 20;
pub const DEFAULT_ACTIVITY_HOURS: u32 = 24;
const MAX_ACTIVITY_LIMIT: u32 = 200;
const MAX_ACTIVITY_HOURS: u32 = 24 * 31;

#[derive(Debug, Default, Deserialize)]
pub struct ActivityParams {
    pub limit: Option<u32>,
    pub hours: Option<u32>,
}

/// Recent-activity feed, bounded by `limit` and an `hours` lookback.
pub async fn get_activity(params: ActivityParams, state: Arc<AppState>) -> Result<Json, Rejection> {
    info!("Handling activity request: {:?}", params);

    let limit = params.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT).min(MAX_ACTIVITY_LIMIT);
    let hours = params.hours.unwrap_or(DEFAULT_ACTIVITY_HOURS).min(MAX_ACTIVITY_HOURS);
    if limit == 0 || hours == 0 {
        return Err(warp::reject::custom(ApiError::bad_request(
            "limit and hours must be positive",
        )));
    }

    let cache = state.queries.cache();
    let result = if limit == DEFAULT_ACTIVITY_LIMIT && hours == DEFAULT_ACTIVITY_HOURS {
        cache.get(DASHBOARD_ACTIVITIES_KEY).await
    } else {
        let key = format!("{}:{}:{}", DASHBOARD_ACTIVITIES_KEY, limit, hours);
        let fetcher = activity_fetcher(
            state.client.clone(),
            state.config.dashboard_tz,
            limit,
            hours,
        );
        cache.get_with(&key, state.adhoc_query_config(), fetcher).await
    };

    match result {
        Ok(payload) => Ok(warp::reply::json(&payload)),
        Err(err) => {
            error!("Failed to build activity feed: {}", err);
            Err(warp::reject::custom(ApiError::upstream_error(
                err.to_string(),
            )))
        }
    }
}
