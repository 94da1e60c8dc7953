// src/services/charts.rs
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

use crate::models::{ChartPoint, ChartSeries, DateRange, Sale, SeriesSummary, Trend};

/// Number of trailing week buckets in the weekly series.
pub const WEEKLY_LOOKBACK: usize = 4;

/// Half-mean difference below this magnitude (percent) classifies as stable.
const TREND_THRESHOLD_PCT: f64 = 10.0;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Compare the mean of the second half of the series against the first half
/// (midpoint split, integer floor). A zero first-half mean gives no
/// meaningful percentage base and classifies as stable, as does any series
/// shorter than two points.
pub fn classify_trend(values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::Stable;
    }
    let (first, second) = values.split_at(values.len() / 2);
    let first_mean = mean(first);
    if first_mean == 0.0 {
        return Trend::Stable;
    }
    let difference = (mean(second) - first_mean) / first_mean * 100.0;
    if difference > TREND_THRESHOLD_PCT {
        Trend::Up
    } else if difference < -TREND_THRESHOLD_PCT {
        Trend::Down
    } else {
        Trend::Stable
    }
}

fn summarize(points: &[ChartPoint]) -> SeriesSummary {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let total: f64 = values.iter().sum();
    SeriesSummary {
        total,
        average: mean(&values),
        peak: values.iter().copied().fold(0.0, f64::max),
        trend: classify_trend(&values),
    }
}

fn finish(points: Vec<ChartPoint>) -> ChartSeries {
    let summary = summarize(&points);
    ChartSeries { points, summary }
}

/// One bucket per calendar day over the inclusive `range`, ascending, with
/// zero-activity days present rather than omitted. A record lands in the
/// bucket whose local `[00:00, 24:00)` interval contains its timestamp.
pub fn daily_series<T>(
    items: &[T],
    range: DateRange,
    tz: Tz,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
    weight: impl Fn(&T) -> f64,
) -> ChartSeries {
    let mut by_day: HashMap<chrono::NaiveDate, f64> = HashMap::new();
    for item in items {
        let day = timestamp(item).with_timezone(&tz).date_naive();
        if day >= range.start && day <= range.end {
            *by_day.entry(day).or_insert(0.0) += weight(item);
        }
    }

    let mut points = Vec::with_capacity(range.num_days() as usize);
    let mut day = range.start;
    while day <= range.end {
        points.push(ChartPoint {
            label: day.format("%Y-%m-%d").to_string(),
            value: by_day.get(&day).copied().unwrap_or(0.0),
        });
        day = day + Duration::days(1);
    }
    finish(points)
}

/// Trailing week buckets `[now - (i+1)*7d, now - i*7d)`, oldest first, each
/// labelled with its start day in the business timezone.
pub fn weekly_series<T>(
    items: &[T],
    now: DateTime<Utc>,
    tz: Tz,
    weeks: usize,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
    weight: impl Fn(&T) -> f64,
) -> ChartSeries {
    let mut points = Vec::with_capacity(weeks);
    for i in (0..weeks).rev() {
        let start = now - Duration::days((i as i64 + 1) * 7);
        let end = now - Duration::days(i as i64 * 7);
        let value = items
            .iter()
            .filter(|item| {
                let t = timestamp(item);
                t >= start && t < end
            })
            .map(&weight)
            .sum();
        points.push(ChartPoint {
            label: start.with_timezone(&tz).date_naive().format("%Y-%m-%d").to_string(),
            value,
        });
    }
    finish(points)
}

/// Group sales by payment method (missing methods under a default label),
/// count per group, descending; ties keep first-seen order.
pub fn payment_method_series(sales: &[Sale]) -> ChartSeries {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    for sale in sales {
        let label = sale
            .payment_method
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        if !counts.contains_key(&label) {
            order.push(label.clone());
        }
        *counts.entry(label).or_insert(0) += 1;
    }

    let mut grouped: Vec<(String, u64)> = order
        .into_iter()
        .map(|label| {
            let count = counts.get(&label).copied().unwrap_or(0);
            (label, count)
        })
        .collect();
    // Vec::sort_by is stable, so equal counts keep first-seen order.
    grouped.sort_by(|a, b| b.1.cmp(&a.1));

    finish(
        grouped
            .into_iter()
            .map(|(label, count)| ChartPoint {
                label,
                value: count as f64,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SaleStatus;
    use chrono::{NaiveDate, TimeZone};

    fn utc() -> Tz {
        "UTC".parse().unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sale_at(created_at: DateTime<Utc>, total: f64) -> Sale {
        Sale {
            id: format!("s-{}", created_at.timestamp()),
            total,
            items: 1,
            payment_method: Some("card".to_string()),
            status: SaleStatus::Completed,
            created_at,
        }
    }

    fn sale_with_method(method: Option<&str>) -> Sale {
        Sale {
            id: "s".to_string(),
            total: 1.0,
            items: 1,
            payment_method: method.map(|m| m.to_string()),
            status: SaleStatus::Completed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn daily_series_is_gapless_and_conserves_totals() {
        let range = DateRange {
            start: day(2026, 3, 1),
            end: day(2026, 3, 7),
        };
        let sales = vec![
            sale_at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(), 10.0),
            sale_at(Utc.with_ymd_and_hms(2026, 3, 1, 21, 0, 0).unwrap(), 5.0),
            sale_at(Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap(), 20.0),
            // Outside the range, must not leak into any bucket.
            sale_at(Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap(), 99.0),
        ];

        let series = daily_series(&sales, range, utc(), |s| s.created_at, |s| s.total);

        assert_eq!(series.points.len() as i64, range.num_days());
        assert_eq!(series.points.len(), 7);
        assert_eq!(series.points[0].label, "2026-03-01");
        assert_eq!(series.points[0].value, 15.0);
        assert_eq!(series.points[1].value, 0.0);
        assert_eq!(series.points[3].value, 20.0);
        let sum: f64 = series.points.iter().map(|p| p.value).sum();
        assert_eq!(sum, 35.0);
        assert_eq!(series.summary.total, 35.0);
        assert_eq!(series.summary.peak, 20.0);

        let labels: std::collections::HashSet<&str> =
            series.points.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels.len(), series.points.len());
    }

    #[test]
    fn weekly_series_buckets_oldest_first() {
        let now = Utc.with_ymd_and_hms(2026, 3, 28, 12, 0, 0).unwrap();
        let sales = vec![
            sale_at(now - Duration::days(1), 10.0),  // newest bucket
            sale_at(now - Duration::days(8), 20.0),  // second newest
            sale_at(now - Duration::days(27), 40.0), // oldest bucket
            sale_at(now - Duration::days(30), 99.0), // outside lookback
        ];

        let series = weekly_series(&sales, now, utc(), WEEKLY_LOOKBACK, |s| s.created_at, |s| {
            s.total
        });

        assert_eq!(series.points.len(), 4);
        assert_eq!(series.points[0].value, 40.0);
        assert_eq!(series.points[2].value, 20.0);
        assert_eq!(series.points[3].value, 10.0);
        let sum: f64 = series.points.iter().map(|p| p.value).sum();
        assert_eq!(sum, 70.0);
    }

    #[test]
    fn trend_fixtures() {
        assert_eq!(classify_trend(&[10.0, 10.0, 20.0, 20.0]), Trend::Up);
        assert_eq!(classify_trend(&[20.0, 20.0, 10.0, 10.0]), Trend::Down);
        assert_eq!(classify_trend(&[10.0, 11.0, 9.0, 10.0]), Trend::Stable);
        assert_eq!(classify_trend(&[10.0]), Trend::Stable);
        assert_eq!(classify_trend(&[]), Trend::Stable);
    }

    #[test]
    fn trend_with_zero_first_half_is_stable() {
        assert_eq!(classify_trend(&[0.0, 0.0, 10.0, 10.0]), Trend::Stable);
    }

    #[test]
    fn payment_breakdown_sorts_by_count_with_stable_ties() {
        let sales = vec![
            sale_with_method(Some("cash")),
            sale_with_method(Some("card")),
            sale_with_method(Some("card")),
            sale_with_method(None),
            sale_with_method(Some("voucher")),
        ];

        let series = payment_method_series(&sales);
        let labels: Vec<&str> = series.points.iter().map(|p| p.label.as_str()).collect();
        // card leads with 2; cash/unknown/voucher tie at 1 in first-seen order.
        assert_eq!(labels, vec!["card", "cash", "unknown", "voucher"]);
        assert_eq!(series.points[0].value, 2.0);
        assert_eq!(series.summary.total, 5.0);
    }

    #[test]
    fn summary_of_empty_series_is_all_zero_and_stable() {
        let series = payment_method_series(&[]);
        assert!(series.points.is_empty());
        assert_eq!(series.summary.total, 0.0);
        assert_eq!(series.summary.average, 0.0);
        assert_eq!(series.summary.peak, 0.0);
        assert_eq!(series.summary.trend, Trend::Stable);
    }
}
