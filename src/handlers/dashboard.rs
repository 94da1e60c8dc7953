// src/handlers/dashboard.rs
use chrono::{NaiveDate, Utc};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use warp::reply::Json;
use warp::Rejection;

use super::error::ApiError;
use crate::models::{ChartSelection, DateRange, RangeSpec};
use crate::services::query_cache::{DASHBOARD_DATA_KEY, DASHBOARD_METRICS_KEY};
use crate::{dashboard_fetcher, AppState};

pub const DEFAULT_PERIOD_DAYS: u32 = 7;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardParams {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(rename = "type")]
    pub series: Option<String>,
}

impl DashboardParams {
    fn is_default(&self) -> bool {
        self.period.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.series.is_none()
    }
}

fn parse_date(raw: &str, name: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("{} must be formatted YYYY-MM-DD", name)))
}

fn resolve_selection(params: &DashboardParams) -> Result<ChartSelection, ApiError> {
    match &params.series {
        None => Ok(ChartSelection::All),
        Some(raw) => ChartSelection::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("unknown chart type '{}'", raw))),
    }
}

fn resolve_range(params: &DashboardParams) -> Result<RangeSpec, ApiError> {
    match (&params.start_date, &params.end_date) {
        (Some(start_raw), Some(end_raw)) => {
            let start = parse_date(start_raw, "startDate")?;
            let end = parse_date(end_raw, "endDate")?;
            if start > end {
                return Err(ApiError::bad_request("startDate must not be after endDate"));
            }
            Ok(RangeSpec::Fixed(DateRange { start, end }))
        }
        (None, None) => match params.period.as_deref() {
            None => Ok(RangeSpec::TrailingDays(DEFAULT_PERIOD_DAYS)),
            Some("7d") => Ok(RangeSpec::TrailingDays(7)),
            Some("30d") => Ok(RangeSpec::TrailingDays(30)),
            Some("90d") => Ok(RangeSpec::TrailingDays(90)),
            Some(other) => Err(ApiError::bad_request(format!(
                "unknown period '{}', expected 7d, 30d or 90d",
                other
            ))),
        },
        _ => Err(ApiError::bad_request(
            "startDate and endDate must be provided together",
        )),
    }
}

/// Full aggregate payload. The parameterless request is served from the
/// standing dashboard query; explicit ranges and chart subsets get their own
/// cache keys.
pub async fn get_dashboard(
    params: DashboardParams,
    state: Arc<AppState>,
) -> Result<Json, Rejection> {
    info!("Handling dashboard request: {:?}", params);

    let selection = resolve_selection(&params).map_err(warp::reject::custom)?;
    let range = resolve_range(&params).map_err(warp::reject::custom)?;
    let cache = state.queries.cache();

    let result = if params.is_default() {
        cache.get(DASHBOARD_DATA_KEY).await
    } else {
        let resolved = range.resolve(Utc::now(), state.config.dashboard_tz);
        let key = format!(
            "{}:{}:{}:{:?}",
            DASHBOARD_DATA_KEY, resolved.start, resolved.end, selection
        );
        let fetcher = dashboard_fetcher(
            state.client.clone(),
            state.config.dashboard_tz,
            range,
            selection,
        );
        cache.get_with(&key, state.adhoc_query_config(), fetcher).await
    };

    match result {
        Ok(payload) => Ok(warp::reply::json(&payload)),
        Err(err) => {
            error!("Failed to build dashboard payload: {}", err);
            Err(warp::reject::custom(ApiError::upstream_error(
                err.to_string(),
            )))
        }
    }
}

/// Metrics section only, from the standing metrics query.
pub async fn get_dashboard_metrics(state: Arc<AppState>) -> Result<Json, Rejection> {
    info!("Handling dashboard metrics request");
    match state.queries.cache().get(DASHBOARD_METRICS_KEY).await {
        Ok(payload) => Ok(warp::reply::json(&payload)),
        Err(err) => {
            error!("Failed to compute dashboard metrics: {}", err);
            Err(warp::reject::custom(ApiError::upstream_error(
                err.to_string(),
            )))
        }
    }
}

/// Await a fresh refresh of every standing query.
pub async fn refresh_dashboard(state: Arc<AppState>) -> Result<Json, Rejection> {
    info!("Manual dashboard refresh requested");
    state.queries.refetch_all().await;
    Ok(warp::reply::json(&json!({
        "refreshed": true,
        "queries": state.queries.combined(),
        "at": Utc::now(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_resolve_to_trailing_week() {
        let params = DashboardParams::default();
        assert!(params.is_default());
        assert!(matches!(
            resolve_range(&params).unwrap(),
            RangeSpec::TrailingDays(7)
        ));
        assert_eq!(resolve_selection(&params).unwrap(), ChartSelection::All);
    }

    #[test]
    fn explicit_dates_resolve_to_fixed_range() {
        let params = DashboardParams {
            start_date: Some("2026-03-01".to_string()),
            end_date: Some("2026-03-07".to_string()),
            ..DashboardParams::default()
        };
        match resolve_range(&params).unwrap() {
            RangeSpec::Fixed(range) => assert_eq!(range.num_days(), 7),
            other => panic!("expected fixed range, got {:?}", other),
        }
    }

    #[test]
    fn malformed_parameters_are_rejected() {
        let bad_period = DashboardParams {
            period: Some("14d".to_string()),
            ..DashboardParams::default()
        };
        assert!(resolve_range(&bad_period).is_err());

        let inverted = DashboardParams {
            start_date: Some("2026-03-07".to_string()),
            end_date: Some("2026-03-01".to_string()),
            ..DashboardParams::default()
        };
        assert!(resolve_range(&inverted).is_err());

        let lonely_start = DashboardParams {
            start_date: Some("2026-03-01".to_string()),
            ..DashboardParams::default()
        };
        assert!(resolve_range(&lonely_start).is_err());

        let bad_type = DashboardParams {
            series: Some("pie".to_string()),
            ..DashboardParams::default()
        };
        assert!(resolve_selection(&bad_type).is_err());
    }
}
