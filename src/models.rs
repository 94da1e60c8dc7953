// src/models.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::OnceLock;

fn amount_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?\d*\.?\d+").unwrap())
}

/// Normalize an upstream money amount into `f64`.
///
/// Upstream sources represent amounts as JSON numbers or as numeric strings
/// (optionally with a currency marker and thousands separators). Anything
/// unparsable, non-finite, or negative normalizes to zero.
pub fn normalize_amount(raw: &serde_json::Value) -> f64 {
    let parsed = match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let cleaned = s.replace(',', "");
            amount_pattern()
                .find(&cleaned)
                .and_then(|m| m.as_str().parse::<f64>().ok())
        }
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => 0.0,
    }
}

pub(crate) fn de_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(normalize_amount(&raw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SaleStatus {
    Completed,
    Cancelled,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    #[serde(deserialize_with = "de_amount")]
    pub total: f64,
    #[serde(default)]
    pub items: u32,
    #[serde(default)]
    pub payment_method: Option<String>,
    pub status: SaleStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub price: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashRegister {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Terminal settlement of a single source fetch. Produced once per source
/// per aggregation cycle, never partially filled.
#[derive(Debug, Clone)]
pub enum FetchOutcome<T> {
    Fulfilled(Vec<T>),
    Rejected(String),
}

impl<T> FetchOutcome<T> {
    /// Fulfilled records, or an empty slice when the source rejected.
    pub fn records(&self) -> &[T] {
        match self {
            FetchOutcome::Fulfilled(records) => records,
            FetchOutcome::Rejected(_) => &[],
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, FetchOutcome::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, FetchOutcome::Rejected(_))
    }
}

/// One consistent view of every requested source for a single aggregation
/// cycle. Sources that were not requested are `None`, not defaulted.
/// Immutable once built; all calculators in a cycle read the same snapshot.
#[derive(Debug, Clone)]
pub struct AggregateSnapshot {
    pub sales: Option<FetchOutcome<Sale>>,
    pub users: Option<FetchOutcome<User>>,
    pub products: Option<FetchOutcome<Product>>,
    pub cash_registers: Option<FetchOutcome<CashRegister>>,
    pub captured_at: DateTime<Utc>,
    pub api_response_time_ms: u64,
}

impl AggregateSnapshot {
    pub fn sale_records(&self) -> &[Sale] {
        self.sales.as_ref().map(FetchOutcome::records).unwrap_or(&[])
    }

    pub fn user_records(&self) -> &[User] {
        self.users.as_ref().map(FetchOutcome::records).unwrap_or(&[])
    }

    pub fn product_records(&self) -> &[Product] {
        self.products
            .as_ref()
            .map(FetchOutcome::records)
            .unwrap_or(&[])
    }

    pub fn register_records(&self) -> &[CashRegister] {
        self.cash_registers
            .as_ref()
            .map(FetchOutcome::records)
            .unwrap_or(&[])
    }

    pub fn requested_sources(&self) -> usize {
        [
            self.sales.is_some(),
            self.users.is_some(),
            self.products.is_some(),
            self.cash_registers.is_some(),
        ]
        .iter()
        .filter(|requested| **requested)
        .count()
    }

    pub fn rejected_sources(&self) -> usize {
        [
            self.sales.as_ref().map(FetchOutcome::is_rejected),
            self.users.as_ref().map(FetchOutcome::is_rejected),
            self.products.as_ref().map(FetchOutcome::is_rejected),
            self.cash_registers.as_ref().map(FetchOutcome::is_rejected),
        ]
        .iter()
        .filter(|rejected| **rejected == Some(true))
        .count()
    }

    /// Share of requested sources whose call rejected, from the snapshot's
    /// own settlement record.
    pub fn error_rate(&self) -> f64 {
        let requested = self.requested_sources();
        if requested == 0 {
            return 0.0;
        }
        self.rejected_sources() as f64 / requested as f64
    }

    pub fn data_quality(&self) -> DataQuality {
        DataQuality {
            sales_available: self
                .sales
                .as_ref()
                .map(FetchOutcome::is_fulfilled)
                .unwrap_or(false),
            users_available: self
                .users
                .as_ref()
                .map(FetchOutcome::is_fulfilled)
                .unwrap_or(false),
            products_available: self
                .products
                .as_ref()
                .map(FetchOutcome::is_fulfilled)
                .unwrap_or(false),
            cash_registers_available: self
                .cash_registers
                .as_ref()
                .map(FetchOutcome::is_fulfilled)
                .unwrap_or(false),
        }
    }
}

/// Half-open interval `[start, end)`; `start == None` means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct WindowRange {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl WindowRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant < self.end && self.start.map_or(true, |start| instant >= start)
    }
}

/// Midnight of `date` in `tz`, expressed in UTC. Falls back to 01:00 when a
/// DST transition skips midnight in that zone.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap();
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Today,
    Week,
    Month,
    Total,
}

impl TimeWindow {
    /// The window's interval anchored at `now`, with day boundaries taken in
    /// the business timezone.
    pub fn current(&self, now: DateTime<Utc>, tz: Tz) -> WindowRange {
        let start = match self {
            TimeWindow::Today => Some(local_midnight(now.with_timezone(&tz).date_naive(), tz)),
            TimeWindow::Week => Some(now - Duration::days(7)),
            TimeWindow::Month => {
                let first = now.with_timezone(&tz).date_naive().with_day(1).unwrap();
                Some(local_midnight(first, tz))
            }
            TimeWindow::Total => None,
        };
        WindowRange { start, end: now }
    }

    /// The prior same-length interval used for growth comparison. `Total`
    /// has no prior window.
    pub fn previous(&self, now: DateTime<Utc>, tz: Tz) -> Option<WindowRange> {
        match self {
            TimeWindow::Today => {
                let current = self.current(now, tz);
                Some(WindowRange {
                    start: current.start.map(|s| s - Duration::days(1)),
                    end: now - Duration::days(1),
                })
            }
            TimeWindow::Week => Some(WindowRange {
                start: Some(now - Duration::days(14)),
                end: now - Duration::days(7),
            }),
            TimeWindow::Month => {
                let first = now.with_timezone(&tz).date_naive().with_day(1).unwrap();
                let first_utc = local_midnight(first, tz);
                let prev_first = (first - Duration::days(1)).with_day(1).unwrap();
                let prev_first_utc = local_midnight(prev_first, tz);
                let elapsed = now - first_utc;
                Some(WindowRange {
                    start: Some(prev_first_utc),
                    end: (prev_first_utc + elapsed).min(first_utc),
                })
            }
            TimeWindow::Total => None,
        }
    }
}

/// Inclusive calendar-day range for chart bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn trailing_days(now: DateTime<Utc>, tz: Tz, days: u32) -> Self {
        let end = now.with_timezone(&tz).date_naive();
        DateRange {
            start: end - Duration::days(days.max(1) as i64 - 1),
            end,
        }
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// How a fetcher resolves its chart range at fetch time: a fixed range from
/// explicit request parameters, or a trailing window re-anchored at each
/// refresh.
#[derive(Debug, Clone, Copy)]
pub enum RangeSpec {
    TrailingDays(u32),
    Fixed(DateRange),
}

impl RangeSpec {
    pub fn resolve(&self, now: DateTime<Utc>, tz: Tz) -> DateRange {
        match self {
            RangeSpec::TrailingDays(days) => DateRange::trailing_days(now, tz, *days),
            RangeSpec::Fixed(range) => *range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartSelection {
    All,
    Daily,
    Weekly,
    Payments,
}

impl ChartSelection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "daily" => Some(ChartSelection::Daily),
            "weekly" => Some(ChartSelection::Weekly),
            "payments" => Some(ChartSelection::Payments),
            _ => None,
        }
    }

    pub fn includes_daily(&self) -> bool {
        matches!(self, ChartSelection::All | ChartSelection::Daily)
    }

    pub fn includes_weekly(&self) -> bool {
        matches!(self, ChartSelection::All | ChartSelection::Weekly)
    }

    pub fn includes_payments(&self) -> bool {
        matches!(self, ChartSelection::All | ChartSelection::Payments)
    }
}

// ---------------------------------------------------------------------------
// Aggregate payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Warning,
    Error,
}

impl SyncStatus {
    pub fn from_error_rate(rate: f64) -> Self {
        if rate <= 0.0 {
            SyncStatus::Success
        } else if rate < 0.5 {
            SyncStatus::Warning
        } else {
            SyncStatus::Error
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSummary {
    pub total: f64,
    pub average: f64,
    pub peak: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    pub points: Vec<ChartPoint>,
    pub summary: SeriesSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountByWindow {
    pub today: u64,
    pub week: u64,
    pub month: u64,
    pub total: u64,
    pub growth: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SumByWindow {
    pub today: f64,
    pub week: f64,
    pub month: f64,
    pub total: f64,
    pub growth: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetrics {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
    pub new_this_week: u64,
    pub growth: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePartition {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub sales: CountByWindow,
    pub revenue: SumByWindow,
    pub users: UserMetrics,
    pub products: ActivePartition,
    pub cash_registers: ActivePartition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCharts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_sales: Option<ChartSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_revenue: Option<ChartSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_methods: Option<ChartSeries>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub api_response_time: u64,
    pub error_rate: f64,
    pub sync_status: SyncStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    pub sales_available: bool,
    pub users_available: bool,
    pub products_available: bool,
    pub cash_registers_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPayload {
    pub metrics: DashboardMetrics,
    pub charts: DashboardCharts,
    pub system: SystemStatus,
    pub data_quality: DataQuality,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Sale,
    User,
    Product,
    Register,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_accepts_numbers_and_numeric_strings() {
        assert_eq!(normalize_amount(&json!(50.0)), 50.0);
        assert_eq!(normalize_amount(&json!("50.00")), 50.0);
        assert_eq!(normalize_amount(&json!("1,234.56")), 1234.56);
        assert_eq!(normalize_amount(&json!("$19.99")), 19.99);
    }

    #[test]
    fn normalize_maps_garbage_to_zero() {
        assert_eq!(normalize_amount(&json!("not a number")), 0.0);
        assert_eq!(normalize_amount(&json!(null)), 0.0);
        assert_eq!(normalize_amount(&json!(true)), 0.0);
        assert_eq!(normalize_amount(&json!("-12.50")), 0.0);
    }

    #[test]
    fn sale_deserializes_string_total() {
        let sale: Sale = serde_json::from_value(json!({
            "id": "s-1",
            "total": "50.00",
            "items": 2,
            "paymentMethod": "card",
            "status": "COMPLETED",
            "createdAt": "2026-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(sale.total, 50.0);
        assert_eq!(sale.status, SaleStatus::Completed);
    }

    #[test]
    fn today_window_starts_at_local_midnight() {
        let tz: Tz = "UTC".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 30, 0).unwrap();
        let range = TimeWindow::Today.current(now, tz);
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap())
        );
        assert!(range.contains(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 59).unwrap()));
    }

    #[test]
    fn previous_week_window_precedes_current() {
        let tz: Tz = "UTC".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let current = TimeWindow::Week.current(now, tz);
        let previous = TimeWindow::Week.previous(now, tz).unwrap();
        assert_eq!(previous.end, current.start.unwrap());
        assert_eq!(previous.start, Some(now - Duration::days(14)));
    }

    #[test]
    fn total_window_has_no_previous() {
        let tz: Tz = "UTC".parse().unwrap();
        let now = Utc::now();
        assert!(TimeWindow::Total.previous(now, tz).is_none());
        assert!(TimeWindow::Total
            .current(now, tz)
            .contains(now - Duration::days(10_000)));
    }

    #[test]
    fn error_rate_counts_only_requested_sources() {
        let snapshot = AggregateSnapshot {
            sales: Some(FetchOutcome::Fulfilled(vec![])),
            users: Some(FetchOutcome::Rejected("timeout".into())),
            products: None,
            cash_registers: None,
            captured_at: Utc::now(),
            api_response_time_ms: 5,
        };
        assert_eq!(snapshot.requested_sources(), 2);
        assert_eq!(snapshot.rejected_sources(), 1);
        assert_eq!(snapshot.error_rate(), 0.5);
    }
}
