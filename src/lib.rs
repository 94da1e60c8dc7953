// src/lib.rs
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::json;
use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use handlers::activity::{DEFAULT_ACTIVITY_HOURS, DEFAULT_ACTIVITY_LIMIT};
use handlers::dashboard::DEFAULT_PERIOD_DAYS;
use models::{ChartSelection, RangeSpec};
use services::auth::TokenVerifier;
use services::metrics::{build_dashboard_payload, compute_metrics, recent_activity};
use services::orchestrator::{fetch_snapshot, SourceSet};
use services::query_cache::{
    DashboardQueries, FetchError, Fetcher, QueryCache, QueryConfig, StandingQuery,
    DASHBOARD_ACTIVITIES_KEY, DASHBOARD_DATA_KEY, DASHBOARD_METRICS_KEY, SYSTEM_HEALTH_KEY,
};
use services::upstream::{SourceApi, SourceFilters, UpstreamClient};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared application state: configuration, the upstream client, the token
/// verifier, and the standing dashboard queries. Owned by the serving
/// process and passed by reference into every handler; there is no hidden
/// module-level state.
pub struct AppState {
    pub config: Config,
    pub client: Arc<UpstreamClient>,
    pub verifier: TokenVerifier,
    pub queries: DashboardQueries,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, BoxError> {
        let client = Arc::new(UpstreamClient::new(&config)?);
        let verifier = TokenVerifier::new(&config)?;
        let tz = config.dashboard_tz;

        let base = QueryConfig {
            stale_time: config.stale_time,
            cache_time: config.cache_time,
            refetch_interval: Some(config.refetch_interval),
            ..QueryConfig::default()
        };
        // Health is polled at twice the frequency of the data queries.
        let health = QueryConfig {
            refetch_interval: Some(config.refetch_interval / 2),
            ..base.clone()
        };

        let standing = vec![
            StandingQuery {
                key: DASHBOARD_DATA_KEY,
                config: base.clone(),
                fetcher: dashboard_fetcher(
                    client.clone(),
                    tz,
                    RangeSpec::TrailingDays(DEFAULT_PERIOD_DAYS),
                    ChartSelection::All,
                ),
            },
            StandingQuery {
                key: DASHBOARD_METRICS_KEY,
                config: base.clone(),
                fetcher: metrics_fetcher(client.clone(), tz),
            },
            StandingQuery {
                key: DASHBOARD_ACTIVITIES_KEY,
                config: base,
                fetcher: activity_fetcher(
                    client.clone(),
                    tz,
                    DEFAULT_ACTIVITY_LIMIT,
                    DEFAULT_ACTIVITY_HOURS,
                ),
            },
            StandingQuery {
                key: SYSTEM_HEALTH_KEY,
                config: health,
                fetcher: health_fetcher(client.clone()),
            },
        ];
        let queries = DashboardQueries::new(QueryCache::new(), standing);

        Ok(AppState {
            config,
            client,
            verifier,
            queries,
        })
    }

    /// Query config for request-scoped cache keys; they are never polled.
    pub fn adhoc_query_config(&self) -> QueryConfig {
        QueryConfig {
            stale_time: self.config.stale_time,
            cache_time: self.config.cache_time,
            refetch_interval: None,
            ..QueryConfig::default()
        }
    }
}

/// Fetcher producing the full aggregate payload over all four sources.
pub fn dashboard_fetcher(
    client: Arc<UpstreamClient>,
    tz: Tz,
    range: RangeSpec,
    selection: ChartSelection,
) -> Fetcher {
    Arc::new(move || {
        let client = client.clone();
        Box::pin(async move {
            let now = Utc::now();
            let resolved = range.resolve(now, tz);
            let snapshot =
                fetch_snapshot(client.as_ref(), SourceSet::all(), &SourceFilters::default()).await;
            let payload = build_dashboard_payload(&snapshot, now, tz, &resolved, selection);
            serde_json::to_value(&payload).map_err(|err| FetchError::Definitive(err.to_string()))
        })
    })
}

/// Fetcher producing the metrics section only.
pub fn metrics_fetcher(client: Arc<UpstreamClient>, tz: Tz) -> Fetcher {
    Arc::new(move || {
        let client = client.clone();
        Box::pin(async move {
            let now = Utc::now();
            let snapshot =
                fetch_snapshot(client.as_ref(), SourceSet::all(), &SourceFilters::default()).await;
            let metrics = compute_metrics(&snapshot, now, tz);
            Ok(json!({
                "metrics": metrics,
                "dataQuality": snapshot.data_quality(),
                "lastUpdated": snapshot.captured_at,
            }))
        })
    })
}

/// Fetcher producing the recent-activity feed.
pub fn activity_fetcher(client: Arc<UpstreamClient>, tz: Tz, limit: u32, hours: u32) -> Fetcher {
    Arc::new(move || {
        let client = client.clone();
        Box::pin(async move {
            let now = Utc::now();
            let since = (now - chrono::Duration::hours(hours as i64))
                .with_timezone(&tz)
                .date_naive();
            let filters = SourceFilters {
                start_date: Some(since.to_string()),
                limit: Some(limit),
                ..SourceFilters::default()
            };
            let snapshot = fetch_snapshot(client.as_ref(), SourceSet::all(), &filters).await;
            let activities = recent_activity(&snapshot, now, limit as usize, hours);
            let count = activities.len();
            Ok(json!({
                "activities": activities,
                "count": count,
                "lastUpdated": snapshot.captured_at,
            }))
        })
    })
}

/// Fetcher probing upstream health. Fails when the probe fails, so the
/// standing health query carries the upstream's reachability state.
pub fn health_fetcher(client: Arc<UpstreamClient>) -> Fetcher {
    Arc::new(move || {
        let client = client.clone();
        Box::pin(async move {
            let started = std::time::Instant::now();
            client.health_check().await.map_err(FetchError::from)?;
            Ok(json!({
                "status": "ok",
                "probeTimeMs": started.elapsed().as_millis() as u64,
            }))
        })
    })
}
