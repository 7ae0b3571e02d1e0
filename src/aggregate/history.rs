//! Per-name performance attribution

use super::{conversion_rate, Product};
use crate::dates::{inclusive_span_days, ReportDate};
use serde::{Deserialize, Serialize};

/// How a product performed while it carried one particular name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamePerformance {
    pub name: String,
    pub total_revenue: f64,
    pub total_units_sold: u64,
    pub total_views: u64,
    pub daily_average_views: f64,
    pub daily_average_revenue: f64,
    pub conversion_rate: f64,
    pub span_days: i64,
    pub period_start: ReportDate,
    pub period_end: ReportDate,
}

impl NamePerformance {
    /// A name whose span reaches the global watermark is the one in use now
    pub fn is_current(&self, watermark: Option<ReportDate>) -> bool {
        watermark == Some(self.period_end)
    }
}

/// One entry per ledger name, ordered by the start of its span.
///
/// Metrics come from each day's per-name breakdown, so the entries partition
/// the product's totals even when a product carried two names on one date.
pub fn performance_by_name(product: &Product) -> Vec<NamePerformance> {
    let mut entries: Vec<NamePerformance> = product
        .name_ledger
        .iter()
        .map(|record| {
            let mut revenue = 0.0;
            let mut views = 0u64;
            let mut units = 0u64;
            for bucket in product
                .daily_history
                .iter()
                .filter_map(|d| d.metrics_for(&record.name))
            {
                revenue += bucket.revenue;
                views += bucket.views;
                units += bucket.units_sold;
            }

            // Never below one day, so the averages are always defined
            let span_days = inclusive_span_days(record.first_seen, record.last_seen);

            NamePerformance {
                name: record.name.clone(),
                total_revenue: revenue,
                total_units_sold: units,
                total_views: views,
                daily_average_views: views as f64 / span_days as f64,
                daily_average_revenue: revenue / span_days as f64,
                conversion_rate: conversion_rate(units, views),
                span_days,
                period_start: record.first_seen,
                period_end: record.last_seen,
            }
        })
        .collect();

    entries.sort_by_key(|e| e.period_start);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{day, row, sample_files};
    use crate::aggregate::Aggregate;

    #[test]
    fn test_performance_for_rename() {
        let mut agg = Aggregate::new();
        agg.merge_file(day("2024-01-05"), vec![row("A", "Widget", 100.0, 10, 2)]);
        agg.merge_file(day("2024-01-06"), vec![row("A", "Widget Pro", 50.0, 5, 1)]);
        agg.merge_file(day("2024-01-08"), vec![row("A", "Widget Pro", 30.0, 5, 0)]);

        let perf = performance_by_name(agg.product("A").unwrap());
        assert_eq!(perf.len(), 2);

        assert_eq!(perf[0].name, "Widget");
        assert_eq!(perf[0].span_days, 1);
        assert_eq!(perf[0].daily_average_views, 10.0);
        assert!((perf[0].conversion_rate - 0.2).abs() < 1e-12);
        assert!(!perf[0].is_current(agg.watermark()));

        assert_eq!(perf[1].name, "Widget Pro");
        assert_eq!(perf[1].span_days, 3);
        assert_eq!(perf[1].total_revenue, 80.0);
        assert_eq!(perf[1].total_views, 10);
        assert!((perf[1].daily_average_revenue - 80.0 / 3.0).abs() < 1e-9);
        assert!(perf[1].is_current(agg.watermark()));
    }

    #[test]
    fn test_name_entries_partition_daily_history() {
        let mut files = sample_files();
        files.push((day("2024-02-02"), vec![row("A", "Widget Pro", 9.0, 3, 1)]));

        let mut agg = Aggregate::new();
        for (date, rows) in files {
            agg.merge_file(date, rows);
        }

        for product in agg.products.values() {
            for rec in &product.daily_history {
                let owners: Vec<_> = product
                    .name_ledger
                    .iter()
                    .filter(|n| n.name == rec.name_used)
                    .collect();
                assert_eq!(owners.len(), 1, "{} on {}", product.product_id, rec.date);
                assert!(owners[0].covers(rec.date));
            }

            let perf = performance_by_name(product);
            assert_eq!(perf.len(), product.name_count());
            let revenue: f64 = perf.iter().map(|p| p.total_revenue).sum();
            let views: u64 = perf.iter().map(|p| p.total_views).sum();
            let units: u64 = perf.iter().map(|p| p.total_units_sold).sum();
            assert_eq!(revenue, product.total_revenue);
            assert_eq!(views, product.total_views);
            assert_eq!(units, product.total_units_sold);

            let starts: Vec<_> = perf.iter().map(|p| p.period_start).collect();
            let mut sorted = starts.clone();
            sorted.sort();
            assert_eq!(starts, sorted);
        }
    }

    #[test]
    fn test_same_date_names_are_credited_separately() {
        let mut agg = Aggregate::new();
        agg.merge_file(day("2024-01-05"), vec![row("A", "Widget", 100.0, 10, 2)]);
        agg.merge_file(day("2024-01-05"), vec![row("A", "Widget Pro", 40.0, 4, 1)]);

        let perf = performance_by_name(agg.product("A").unwrap());
        assert_eq!(perf.len(), 2);
        let widget = perf.iter().find(|p| p.name == "Widget").unwrap();
        let pro = perf.iter().find(|p| p.name == "Widget Pro").unwrap();
        assert_eq!(widget.total_revenue, 100.0);
        assert_eq!(widget.total_views, 10);
        assert_eq!(pro.total_revenue, 40.0);
        assert_eq!(pro.total_units_sold, 1);
    }

    #[test]
    fn test_zero_views_has_zero_conversion() {
        let mut agg = Aggregate::new();
        agg.merge_file(day("2024-01-05"), vec![row("C", "Doohickey", 5.0, 0, 0)]);
        let perf = performance_by_name(agg.product("C").unwrap());
        assert_eq!(perf[0].conversion_rate, 0.0);
        assert_eq!(perf[0].daily_average_views, 0.0);
    }
}
