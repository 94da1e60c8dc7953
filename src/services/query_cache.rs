// src/services/query_cache.rs
//
// Stale-while-revalidate query cache with retry and polling. Each query key
// has a single logical writer at a time: every issued fetch carries a
// monotonic generation, and a completion only applies if no newer completion
// has been applied and the key still has a subscriber. Serving stale data
// never blocks on the refresh that replaces it.
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{sleep, Duration, Instant};

use crate::services::upstream::UpstreamError;

pub const DASHBOARD_DATA_KEY: &str = "dashboard-data";
pub const DASHBOARD_METRICS_KEY: &str = "dashboard-metrics";
pub const DASHBOARD_ACTIVITIES_KEY: &str = "dashboard-activities";
pub const SYSTEM_HEALTH_KEY: &str = "system-health";

/// Combined-view constituents in error-priority order.
pub const QUERY_PRIORITY: [&str; 4] = [
    DASHBOARD_DATA_KEY,
    DASHBOARD_METRICS_KEY,
    DASHBOARD_ACTIVITIES_KEY,
    SYSTEM_HEALTH_KEY,
];

/// Fetch failure as seen by the cache. Only transient failures are eligible
/// for automatic retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Transient(String),
    Definitive(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FetchError::Transient(message) => write!(f, "{}", message),
            FetchError::Definitive(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<UpstreamError> for FetchError {
    fn from(err: UpstreamError) -> Self {
        if err.is_transient() {
            FetchError::Transient(err.to_string())
        } else {
            FetchError::Definitive(err.to_string())
        }
    }
}

pub type FetcherFuture = Pin<Box<dyn Future<Output = Result<Value, FetchError>> + Send>>;
pub type Fetcher = Arc<dyn Fn() -> FetcherFuture + Send + Sync>;

/// Exponential backoff for transient failures: `min(base * 2^n, max)` before
/// retry attempt `n`, up to `max_retries` retries after the initial call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (0-indexed), or `None` once retries are
    /// exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        Some(delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub stale_time: Duration,
    pub cache_time: Duration,
    pub refetch_interval: Option<Duration>,
    pub retry: RetryPolicy,
    pub enabled: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            stale_time: Duration::from_secs(30),
            cache_time: Duration::from_secs(300),
            refetch_interval: Some(Duration::from_secs(60)),
            retry: RetryPolicy::default(),
            enabled: true,
        }
    }
}

struct CachedValue {
    value: Value,
    fetched_at: Instant,
}

struct QueryEntry {
    config: QueryConfig,
    fetcher: Fetcher,
    value: Option<CachedValue>,
    error: Option<FetchError>,
    /// Generation of the most recently issued fetch.
    issued: u64,
    /// Generations at or below this are discarded on completion.
    applied: u64,
    in_flight: u32,
    last_access: Instant,
    subscribers: u32,
}

impl QueryEntry {
    fn is_stale(&self) -> bool {
        self.value
            .as_ref()
            .map_or(true, |v| v.fetched_at.elapsed() >= self.config.stale_time)
    }

    fn refetch_interval(&self) -> Option<Duration> {
        self.config.refetch_interval
    }
}

/// Point-in-time view of one query's state.
#[derive(Debug, Clone)]
pub struct QueryStatus {
    pub has_value: bool,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub error: Option<FetchError>,
}

/// Keeps a query's completions applicable. When the last subscription for a
/// key drops, in-flight results for it are discarded instead of cached.
pub struct QuerySubscription {
    cache: QueryCache,
    key: String,
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        let mut entries = self.cache.entries();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.applied = entry.issued;
            }
        }
    }
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Mutex<HashMap<String, QueryEntry>>>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        QueryCache {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, QueryEntry>> {
        self.inner.lock().expect("query cache lock poisoned")
    }

    /// Register a query under `key`. Re-registering an existing key keeps
    /// the original entry and its cached state.
    pub fn register(&self, key: &str, config: QueryConfig, fetcher: Fetcher) {
        let mut entries = self.entries();
        entries.entry(key.to_string()).or_insert_with(|| QueryEntry {
            config,
            fetcher,
            value: None,
            error: None,
            issued: 0,
            applied: 0,
            in_flight: 0,
            last_access: Instant::now(),
            subscribers: 0,
        });
    }

    pub fn subscribe(&self, key: &str) -> Option<QuerySubscription> {
        let mut entries = self.entries();
        let entry = entries.get_mut(key)?;
        entry.subscribers += 1;
        Some(QuerySubscription {
            cache: self.clone(),
            key: key.to_string(),
        })
    }

    fn issue(entry: &mut QueryEntry) -> (u64, Fetcher, RetryPolicy) {
        entry.issued += 1;
        entry.in_flight += 1;
        (entry.issued, entry.fetcher.clone(), entry.config.retry.clone())
    }

    /// Read the query, serving cached data wherever possible: a fresh value
    /// returns directly, a stale value returns immediately while exactly one
    /// background revalidation starts, and only a cache miss awaits a fetch.
    pub async fn get(&self, key: &str) -> Result<Value, FetchError> {
        enum Plan {
            Fresh(Value),
            Revalidate(Value),
            Load,
        }

        let plan = {
            let mut entries = self.entries();
            let entry = entries
                .get_mut(key)
                .ok_or_else(|| FetchError::Definitive(format!("unknown query key: {}", key)))?;
            entry.last_access = Instant::now();
            match &entry.value {
                Some(cached) if !entry.is_stale() => Plan::Fresh(cached.value.clone()),
                Some(cached) => Plan::Revalidate(cached.value.clone()),
                None => Plan::Load,
            }
        };

        match plan {
            Plan::Fresh(value) => Ok(value),
            Plan::Revalidate(value) => {
                self.spawn_revalidate(key);
                Ok(value)
            }
            Plan::Load => self.fetch(key).await,
        }
    }

    /// Register-if-absent, then read with a subscription held for the
    /// duration of the call.
    pub async fn get_with(
        &self,
        key: &str,
        config: QueryConfig,
        fetcher: Fetcher,
    ) -> Result<Value, FetchError> {
        self.register(key, config, fetcher);
        let _subscription = self.subscribe(key);
        self.get(key).await
    }

    /// Start a background refresh unless one is already in flight or the
    /// query is disabled.
    pub fn spawn_revalidate(&self, key: &str) {
        let issued = {
            let mut entries = self.entries();
            match entries.get_mut(key) {
                Some(entry) if entry.in_flight == 0 && entry.config.enabled => {
                    Some(Self::issue(entry))
                }
                _ => None,
            }
        };
        if let Some((generation, fetcher, retry)) = issued {
            let cache = self.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                let _ = cache.run_fetch(&key, generation, fetcher, retry).await;
            });
        }
    }

    /// Force a fetch cycle for `key` and await its outcome. Supersedes any
    /// in-flight fetch for the same key.
    pub async fn fetch(&self, key: &str) -> Result<Value, FetchError> {
        let (generation, fetcher, retry) = {
            let mut entries = self.entries();
            let entry = entries
                .get_mut(key)
                .ok_or_else(|| FetchError::Definitive(format!("unknown query key: {}", key)))?;
            entry.last_access = Instant::now();
            Self::issue(entry)
        };
        self.run_fetch(key, generation, fetcher, retry).await
    }

    async fn run_fetch(
        &self,
        key: &str,
        generation: u64,
        fetcher: Fetcher,
        retry: RetryPolicy,
    ) -> Result<Value, FetchError> {
        let mut attempt: u32 = 0;
        let result = loop {
            match fetcher().await {
                Ok(value) => break Ok(value),
                Err(err) if err.is_transient() => match retry.next_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            "Query '{}' failed transiently ({}), retry {} in {:?}",
                            key, err, attempt, delay
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    None => break Err(err),
                },
                Err(err) => break Err(err),
            }
        };
        self.complete(key, generation, &result);
        result
    }

    fn complete(&self, key: &str, generation: u64, result: &Result<Value, FetchError>) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            debug!("Query '{}' completed after eviction, discarding", key);
            return;
        };
        entry.in_flight = entry.in_flight.saturating_sub(1);
        if generation <= entry.applied {
            debug!(
                "Query '{}' completion superseded (generation {} <= {}), discarding",
                key, generation, entry.applied
            );
            return;
        }
        if entry.subscribers == 0 {
            debug!("Query '{}' has no subscribers, discarding completion", key);
            return;
        }
        entry.applied = generation;
        match result {
            Ok(value) => {
                entry.value = Some(CachedValue {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                });
                entry.error = None;
            }
            Err(err) => {
                entry.error = Some(err.clone());
            }
        }
    }

    /// Evict all cached values immediately; the next access per key goes
    /// back through a full fetch. In-flight completions are discarded.
    pub fn clear(&self) {
        let mut entries = self.entries();
        for (key, entry) in entries.iter_mut() {
            entry.value = None;
            entry.error = None;
            entry.applied = entry.issued;
            debug!("Cleared cached value for query '{}'", key);
        }
    }

    /// Await a fresh fetch of every registered query.
    pub async fn refetch_all(&self) {
        let keys: Vec<String> = self.entries().keys().cloned().collect();
        let mut tasks = tokio::task::JoinSet::new();
        for key in keys {
            let cache = self.clone();
            tasks.spawn(async move {
                let _ = cache.fetch(&key).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Re-trigger only the queries currently in a failed state.
    pub fn retry_failed(&self) {
        let failed: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, entry)| entry.error.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        for key in failed {
            info!("Retrying failed query '{}'", key);
            let cache = self.clone();
            tokio::spawn(async move {
                let _ = cache.fetch(&key).await;
            });
        }
    }

    /// Drop entries that have had no access and no subscriber for their
    /// configured cache time.
    pub fn evict_expired(&self) {
        let mut entries = self.entries();
        entries.retain(|key, entry| {
            let keep = entry.subscribers > 0
                || entry.in_flight > 0
                || entry.last_access.elapsed() < entry.config.cache_time;
            if !keep {
                debug!("Evicting idle query '{}'", key);
            }
            keep
        });
    }

    pub fn status(&self, key: &str) -> Option<QueryStatus> {
        let entries = self.entries();
        entries.get(key).map(|entry| QueryStatus {
            has_value: entry.value.is_some(),
            is_stale: entry.value.is_some() && entry.is_stale(),
            is_fetching: entry.in_flight > 0,
            error: entry.error.clone(),
        })
    }

    pub fn refetch_interval(&self, key: &str) -> Option<Duration> {
        self.entries().get(key).and_then(|e| e.refetch_interval())
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.entries().get(key).map_or(false, |e| e.config.enabled)
    }
}

/// A query to keep permanently registered and polled.
pub struct StandingQuery {
    pub key: &'static str,
    pub config: QueryConfig,
    pub fetcher: Fetcher,
}

/// Combined view across the dashboard's constituent queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedStatus {
    pub is_loading: bool,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The standing dashboard queries: registered up front, subscribed for the
/// life of the process, refreshed on their own cadences.
pub struct DashboardQueries {
    cache: QueryCache,
    _subscriptions: Vec<QuerySubscription>,
}

impl DashboardQueries {
    pub fn new(cache: QueryCache, standing: Vec<StandingQuery>) -> Self {
        let mut subscriptions = Vec::with_capacity(standing.len());
        for query in standing {
            cache.register(query.key, query.config, query.fetcher);
            if let Some(subscription) = cache.subscribe(query.key) {
                subscriptions.push(subscription);
            }
        }
        DashboardQueries {
            cache,
            _subscriptions: subscriptions,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// One poller task per standing query with a refetch interval. The first
    /// tick fires immediately to prime the cache at startup.
    pub fn spawn_pollers(&self) {
        for key in QUERY_PRIORITY {
            let Some(period) = self.cache.refetch_interval(key) else {
                continue;
            };
            let cache = self.cache.clone();
            info!("Polling query '{}' every {:?}", key, period);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    if cache.is_enabled(key) {
                        let _ = cache.fetch(key).await;
                    }
                    cache.evict_expired();
                }
            });
        }
    }

    /// `isLoading`/`isError` are ORs across the constituents; `error` is the
    /// first recorded error in fixed priority order. A query that still has
    /// a served value does not count as a hard error.
    pub fn combined(&self) -> CombinedStatus {
        let mut is_loading = false;
        let mut is_error = false;
        let mut error = None;
        for key in QUERY_PRIORITY {
            let Some(status) = self.cache.status(key) else {
                continue;
            };
            if !status.has_value && status.error.is_none() {
                is_loading = true;
            }
            if !status.has_value && status.error.is_some() {
                is_error = true;
            }
            if error.is_none() {
                if let Some(err) = &status.error {
                    error = Some(format!("{}: {}", key, err));
                }
            }
        }
        CombinedStatus {
            is_loading,
            is_error,
            error,
        }
    }

    /// Await a refresh of every constituent query.
    pub async fn refetch_all(&self) {
        let mut tasks = tokio::task::JoinSet::new();
        for key in QUERY_PRIORITY {
            let cache = self.cache.clone();
            tasks.spawn(async move {
                let _ = cache.fetch(key).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    pub async fn refetch_one(&self, key: &str) -> Result<Value, FetchError> {
        self.cache.fetch(key).await
    }

    pub fn retry(&self) {
        self.cache.retry_failed();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
