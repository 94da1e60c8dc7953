// src/services/metrics.rs
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::models::{
    ActivePartition, ActivityEvent, ActivityKind, AggregateSnapshot, ChartSelection,
    CountByWindow, DashboardCharts, DashboardMetrics, DashboardPayload, DateRange, Sale,
    SaleStatus, SumByWindow, SyncStatus, SystemStatus, TimeWindow, UserMetrics, WindowRange,
};
use crate::services::charts;

/// Period-over-period growth percentage.
///
/// A zero baseline yields 100 when there is any current activity and 0 when
/// there is none; the 0/0 case must not produce NaN or infinity.
pub fn growth_rate(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Count and revenue of completed sales inside a window.
fn window_sales(sales: &[Sale], range: &WindowRange) -> (u64, f64) {
    let mut count = 0u64;
    let mut revenue = 0.0f64;
    for sale in sales {
        if sale.status == SaleStatus::Completed && range.contains(sale.created_at) {
            count += 1;
            revenue += sale.total;
        }
    }
    (count, revenue)
}

fn partition_active<T>(items: &[T], is_active: impl Fn(&T) -> bool) -> ActivePartition {
    let active = items.iter().filter(|item| is_active(item)).count() as u64;
    ActivePartition {
        total: items.len() as u64,
        active,
        inactive: items.len() as u64 - active,
    }
}

fn count_in<T>(items: &[T], range: &WindowRange, created_at: impl Fn(&T) -> DateTime<Utc>) -> u64 {
    items
        .iter()
        .filter(|item| range.contains(created_at(item)))
        .count() as u64
}

/// Derive the per-window counts, sums, growth percentages, and partitions
/// from one settled snapshot. Rejected sources contribute empty record sets;
/// they never abort the computation.
pub fn compute_metrics(snapshot: &AggregateSnapshot, now: DateTime<Utc>, tz: Tz) -> DashboardMetrics {
    let sales = snapshot.sale_records();

    let today = TimeWindow::Today.current(now, tz);
    let week = TimeWindow::Week.current(now, tz);
    let month = TimeWindow::Month.current(now, tz);
    let total = TimeWindow::Total.current(now, tz);

    let (sales_today, revenue_today) = window_sales(sales, &today);
    let (sales_week, revenue_week) = window_sales(sales, &week);
    let (sales_month, revenue_month) = window_sales(sales, &month);
    let (sales_total, revenue_total) = window_sales(sales, &total);

    // Growth compares the trailing week against the week before it.
    let prev_week = TimeWindow::Week
        .previous(now, tz)
        .unwrap_or(WindowRange { start: None, end: now });
    let (sales_prev_week, revenue_prev_week) = window_sales(sales, &prev_week);

    let users = snapshot.user_records();
    let user_partition = partition_active(users, |u| u.active);
    let new_this_week = count_in(users, &week, |u| u.created_at);
    let new_prev_week = count_in(users, &prev_week, |u| u.created_at);

    DashboardMetrics {
        sales: CountByWindow {
            today: sales_today,
            week: sales_week,
            month: sales_month,
            total: sales_total,
            growth: growth_rate(sales_week as f64, sales_prev_week as f64),
        },
        revenue: SumByWindow {
            today: revenue_today,
            week: revenue_week,
            month: revenue_month,
            total: revenue_total,
            growth: growth_rate(revenue_week, revenue_prev_week),
        },
        users: UserMetrics {
            total: user_partition.total,
            active: user_partition.active,
            inactive: user_partition.inactive,
            new_this_week,
            growth: growth_rate(new_this_week as f64, new_prev_week as f64),
        },
        products: partition_active(snapshot.product_records(), |p| p.active),
        cash_registers: partition_active(snapshot.register_records(), |r| r.active),
    }
}

/// Most recent records across all sources as typed events, newest first,
/// bounded by `limit` and a `hours` lookback.
pub fn recent_activity(
    snapshot: &AggregateSnapshot,
    now: DateTime<Utc>,
    limit: usize,
    hours: u32,
) -> Vec<ActivityEvent> {
    let cutoff = now - Duration::hours(hours as i64);
    let mut events: Vec<ActivityEvent> = Vec::new();

    for sale in snapshot.sale_records() {
        if sale.created_at >= cutoff {
            let verb = match sale.status {
                SaleStatus::Completed => "completed",
                SaleStatus::Cancelled => "cancelled",
                SaleStatus::Pending => "pending",
            };
            events.push(ActivityEvent {
                kind: ActivityKind::Sale,
                description: format!("Sale {} {}", sale.id, verb),
                amount: Some(sale.total),
                timestamp: sale.created_at,
            });
        }
    }
    for user in snapshot.user_records() {
        if user.created_at >= cutoff {
            events.push(ActivityEvent {
                kind: ActivityKind::User,
                description: format!("User {} registered", user.id),
                amount: None,
                timestamp: user.created_at,
            });
        }
    }
    for product in snapshot.product_records() {
        if product.created_at >= cutoff {
            events.push(ActivityEvent {
                kind: ActivityKind::Product,
                description: format!("Product {} added", product.id),
                amount: None,
                timestamp: product.created_at,
            });
        }
    }
    for register in snapshot.register_records() {
        if register.created_at >= cutoff {
            let state = if register.active { "opened" } else { "closed" };
            events.push(ActivityEvent {
                kind: ActivityKind::Register,
                description: format!("Register {} {}", register.id, state),
                amount: None,
                timestamp: register.created_at,
            });
        }
    }

    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(limit);
    events
}

/// Assemble the full aggregate payload for one snapshot: metrics, the
/// selected chart series, system status, and per-source quality flags.
pub fn build_dashboard_payload(
    snapshot: &AggregateSnapshot,
    now: DateTime<Utc>,
    tz: Tz,
    range: &DateRange,
    selection: ChartSelection,
) -> DashboardPayload {
    let metrics = compute_metrics(snapshot, now, tz);
    let sales = snapshot.sale_records();
    let completed: Vec<&Sale> = sales
        .iter()
        .filter(|s| s.status == SaleStatus::Completed)
        .collect();

    let charts = DashboardCharts {
        daily_sales: selection.includes_daily().then(|| {
            charts::daily_series(&completed, *range, tz, |s| s.created_at, |s| s.total)
        }),
        weekly_revenue: selection.includes_weekly().then(|| {
            charts::weekly_series(
                &completed,
                now,
                tz,
                charts::WEEKLY_LOOKBACK,
                |s| s.created_at,
                |s| s.total,
            )
        }),
        payment_methods: selection
            .includes_payments()
            .then(|| charts::payment_method_series(sales)),
    };

    let error_rate = snapshot.error_rate();
    DashboardPayload {
        metrics,
        charts,
        system: SystemStatus {
            api_response_time: snapshot.api_response_time_ms,
            error_rate,
            sync_status: SyncStatus::from_error_rate(error_rate),
        },
        data_quality: snapshot.data_quality(),
        last_updated: snapshot.captured_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchOutcome, User};
    use chrono::TimeZone;
    use serde_json::json;

    fn utc() -> Tz {
        "UTC".parse().unwrap()
    }

    fn sale_at(created_at: DateTime<Utc>, total: f64, status: SaleStatus) -> Sale {
        Sale {
            id: format!("s-{}", created_at.timestamp()),
            total,
            items: 1,
            payment_method: Some("card".to_string()),
            status,
            created_at,
        }
    }

    fn user_at(created_at: DateTime<Utc>, active: bool) -> User {
        User {
            id: format!("u-{}", created_at.timestamp()),
            name: String::new(),
            email: String::new(),
            active,
            created_at,
        }
    }

    fn snapshot_with_sales(sales: Vec<Sale>, now: DateTime<Utc>) -> AggregateSnapshot {
        AggregateSnapshot {
            sales: Some(FetchOutcome::Fulfilled(sales)),
            users: Some(FetchOutcome::Fulfilled(vec![])),
            products: Some(FetchOutcome::Fulfilled(vec![])),
            cash_registers: Some(FetchOutcome::Fulfilled(vec![])),
            captured_at: now,
            api_response_time_ms: 12,
        }
    }

    #[test]
    fn growth_rate_zero_baseline_rules() {
        assert_eq!(growth_rate(5.0, 0.0), 100.0);
        assert_eq!(growth_rate(0.0, 0.0), 0.0);
        assert_eq!(growth_rate(150.0, 100.0), 50.0);
        assert_eq!(growth_rate(50.0, 100.0), -50.0);
    }

    #[test]
    fn revenue_is_identical_for_numeric_and_string_totals() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let numeric: Sale = serde_json::from_value(json!({
            "id": "a", "total": 50.0, "status": "COMPLETED",
            "createdAt": now.to_rfc3339()
        }))
        .unwrap();
        let textual: Sale = serde_json::from_value(json!({
            "id": "b", "total": "25.50", "status": "COMPLETED",
            "createdAt": now.to_rfc3339()
        }))
        .unwrap();

        let mixed = snapshot_with_sales(vec![numeric.clone(), textual.clone()], now);
        let swapped = {
            let numeric_as_string: Sale = serde_json::from_value(json!({
                "id": "a", "total": "50.00", "status": "COMPLETED",
                "createdAt": now.to_rfc3339()
            }))
            .unwrap();
            let textual_as_number: Sale = serde_json::from_value(json!({
                "id": "b", "total": 25.5, "status": "COMPLETED",
                "createdAt": now.to_rfc3339()
            }))
            .unwrap();
            snapshot_with_sales(vec![numeric_as_string, textual_as_number], now)
        };

        let a = compute_metrics(&mixed, now, utc());
        let b = compute_metrics(&swapped, now, utc());
        assert_eq!(a.revenue.today, 75.5);
        assert_eq!(a.revenue.today, b.revenue.today);
        assert_eq!(a.revenue.total, b.revenue.total);
    }

    #[test]
    fn only_completed_sales_count_toward_sales_and_revenue() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let sales = vec![
            sale_at(now - Duration::hours(1), 50.0, SaleStatus::Completed),
            sale_at(now - Duration::hours(2), 80.0, SaleStatus::Cancelled),
            sale_at(now - Duration::hours(3), 30.0, SaleStatus::Pending),
        ];
        let metrics = compute_metrics(&snapshot_with_sales(sales, now), now, utc());
        assert_eq!(metrics.sales.today, 1);
        assert_eq!(metrics.revenue.today, 50.0);
    }

    #[test]
    fn active_partition_sums_to_fulfilled_length() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let users = vec![
            user_at(now - Duration::days(1), true),
            user_at(now - Duration::days(40), true),
            user_at(now - Duration::days(400), false),
        ];
        let snapshot = AggregateSnapshot {
            sales: Some(FetchOutcome::Fulfilled(vec![])),
            users: Some(FetchOutcome::Fulfilled(users)),
            products: Some(FetchOutcome::Fulfilled(vec![])),
            cash_registers: Some(FetchOutcome::Fulfilled(vec![])),
            captured_at: now,
            api_response_time_ms: 1,
        };
        let metrics = compute_metrics(&snapshot, now, utc());
        assert_eq!(metrics.users.active + metrics.users.inactive, metrics.users.total);
        assert_eq!(metrics.users.total, 3);
        assert_eq!(metrics.users.new_this_week, 1);
    }

    #[test]
    fn rejected_source_leaves_other_metrics_untouched() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let sales = vec![sale_at(now - Duration::hours(1), 50.0, SaleStatus::Completed)];

        let healthy = snapshot_with_sales(sales.clone(), now);
        let mut degraded = snapshot_with_sales(sales, now);
        degraded.products = Some(FetchOutcome::Rejected("connect error".into()));

        let a = compute_metrics(&healthy, now, utc());
        let b = compute_metrics(&degraded, now, utc());
        assert_eq!(a.sales.today, b.sales.today);
        assert_eq!(a.revenue.today, b.revenue.today);
        assert_eq!(a.users.total, b.users.total);
        assert_eq!(b.products.total, 0);
        assert!(!degraded.data_quality().products_available);
        assert_eq!(
            SyncStatus::from_error_rate(degraded.error_rate()),
            SyncStatus::Warning
        );
    }

    #[test]
    fn activity_feed_is_newest_first_and_bounded() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let sales = vec![
            sale_at(now - Duration::hours(1), 10.0, SaleStatus::Completed),
            sale_at(now - Duration::hours(2), 20.0, SaleStatus::Completed),
            sale_at(now - Duration::hours(30), 30.0, SaleStatus::Completed),
        ];
        let mut snapshot = snapshot_with_sales(sales, now);
        snapshot.users = Some(FetchOutcome::Fulfilled(vec![user_at(
            now - Duration::minutes(30),
            true,
        )]));

        let events = recent_activity(&snapshot, now, 10, 24);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, ActivityKind::User);
        assert!(events.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let capped = recent_activity(&snapshot, now, 2, 24);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn payload_reports_sync_error_when_everything_rejected() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let snapshot = AggregateSnapshot {
            sales: Some(FetchOutcome::Rejected("down".into())),
            users: Some(FetchOutcome::Rejected("down".into())),
            products: Some(FetchOutcome::Rejected("down".into())),
            cash_registers: Some(FetchOutcome::Rejected("down".into())),
            captured_at: now,
            api_response_time_ms: 3,
        };
        let range = DateRange::trailing_days(now, utc(), 7);
        let payload = build_dashboard_payload(&snapshot, now, utc(), &range, ChartSelection::All);
        assert_eq!(payload.system.sync_status, SyncStatus::Error);
        assert_eq!(payload.system.error_rate, 1.0);
        assert_eq!(payload.metrics.sales.total, 0);
        assert_eq!(payload.metrics.revenue.total, 0.0);
        assert!(!payload.data_quality.sales_available);
    }
}
