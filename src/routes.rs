// src/routes.rs
use chrono::Utc;
use log::{info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use warp::reject::Rejection;
use warp::{Filter, Reply};

use crate::handlers::activity::{get_activity, ActivityParams};
use crate::handlers::dashboard::{
    get_dashboard, get_dashboard_metrics, refresh_dashboard, DashboardParams,
};
use crate::handlers::error::ApiError;
use crate::handlers::health::get_health;
use crate::AppState;

// Recovery handling for our custom errors
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message;

    if err.is_not_found() {
        code = warp::http::StatusCode::NOT_FOUND;
        message = "Not Found".to_string();
    } else if let Some(api_error) = err.find::<ApiError>() {
        code = api_error.status();
        message = api_error.message.clone();
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        code = warp::http::StatusCode::BAD_REQUEST;
        message = "Invalid query parameters".to_string();
    } else {
        code = warp::http::StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal Server Error".to_string();
    }

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "error": message,
        })),
        code,
    ))
}

async fn verify_authorization(
    header: Option<String>,
    state: Arc<AppState>,
) -> Result<(), Rejection> {
    let Some(header) = header else {
        return Ok(());
    };
    let token = header.strip_prefix("Bearer ").unwrap_or(header.as_str());
    state.verifier.verify(token, Utc::now()).await.map_err(|err| {
        warn!("Rejected request token: {}", err);
        warp::reject::custom(ApiError::unauthorized(err.to_string()))
    })
}

fn with_auth(
    state: Arc<AppState>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::any().map(move || state.clone()))
        .and_then(verify_authorization)
        .untuple_one()
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    info!("Configuring routes...");

    let auth = with_auth(state.clone());
    let state_filter = warp::any().map(move || state.clone());

    let metrics_route = warp::path!("api" / "v1" / "dashboard" / "metrics")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(get_dashboard_metrics);

    let activity_route = warp::path!("api" / "v1" / "dashboard" / "activity")
        .and(warp::get())
        .and(warp::query::<ActivityParams>())
        .and(state_filter.clone())
        .and_then(get_activity);

    let refresh_route = warp::path!("api" / "v1" / "dashboard" / "refresh")
        .and(warp::post())
        .and(state_filter.clone())
        .and_then(refresh_dashboard);

    let dashboard_route = warp::path!("api" / "v1" / "dashboard")
        .and(warp::get())
        .and(warp::query::<DashboardParams>())
        .and(state_filter.clone())
        .and_then(get_dashboard);

    let health_route = warp::path!("api" / "v1" / "health")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(get_health);

    info!("All routes configured successfully.");

    auth.and(
        metrics_route
            .or(activity_route)
            .or(refresh_route)
            .or(dashboard_route)
            .or(health_route),
    )
    .recover(handle_rejection)
}
