//! Incremental aggregation
//!
//! An [`Aggregate`] holds everything merged so far: per-product totals with
//! their name ledger and daily history, global per-day and per-month roll-ups,
//! and the latest reporting date seen. New files are folded in additively, so
//! an aggregate restored from the last published snapshot keeps accumulating
//! without reprocessing earlier files.

mod history;

pub use history::*;

use crate::dates::{MonthKey, ReportDate};
use crate::rows::Row;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Global roll-up for one day or one month
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodBucket {
    pub revenue: f64,
    pub views: u64,
    pub units_sold: u64,
}

impl PeriodBucket {
    fn from_row(row: &Row) -> Self {
        let mut bucket = Self::default();
        bucket.add(row);
        bucket
    }

    fn add(&mut self, row: &Row) {
        self.revenue += row.revenue;
        self.views += row.views;
        self.units_sold += row.units_sold;
    }
}

/// One distinct display name a product has used, with the dates it was seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameRecord {
    pub name: String,
    pub first_seen: ReportDate,
    pub last_seen: ReportDate,
}

impl NameRecord {
    pub fn covers(&self, date: ReportDate) -> bool {
        self.first_seen <= date && date <= self.last_seen
    }
}

/// A product's metrics for one reporting day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRecord {
    pub date: ReportDate,
    pub revenue: f64,
    pub views: u64,
    pub units_sold: u64,
    /// Name the product carried that day. When several were seen, the one
    /// latest in the name ledger.
    pub name_used: String,
    /// The day's metrics split by the name each row carried
    #[serde(default)]
    pub by_name: BTreeMap<String, PeriodBucket>,
}

impl DayRecord {
    /// Metrics this day attributes to `name`
    pub fn metrics_for(&self, name: &str) -> Option<PeriodBucket> {
        if self.by_name.is_empty() {
            // Snapshots without a breakdown credit the whole day to one name
            return (self.name_used == name).then(|| PeriodBucket {
                revenue: self.revenue,
                views: self.views,
                units_sold: self.units_sold,
            });
        }
        self.by_name.get(name).cloned()
    }
}

/// Accumulated state for one product id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: String,
    pub display_name: String,
    pub total_revenue: f64,
    pub total_views: u64,
    pub total_units_sold: u64,
    pub name_ledger: Vec<NameRecord>,
    pub daily_history: Vec<DayRecord>,
}

impl Product {
    fn new(product_id: &str, name: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            display_name: name.to_string(),
            total_revenue: 0.0,
            total_views: 0,
            total_units_sold: 0,
            name_ledger: Vec::new(),
            daily_history: Vec::new(),
        }
    }

    /// Units sold per detail-page view; 0 when there were no views
    pub fn conversion_rate(&self) -> f64 {
        conversion_rate(self.total_units_sold, self.total_views)
    }

    pub fn name_count(&self) -> usize {
        self.name_ledger.len()
    }

    pub fn has_name_changes(&self) -> bool {
        self.name_ledger.len() > 1
    }

    fn record(&mut self, date: ReportDate, row: &Row) {
        self.total_revenue += row.revenue;
        self.total_views += row.views;
        self.total_units_sold += row.units_sold;

        match self.name_ledger.iter_mut().find(|n| n.name == row.name) {
            Some(entry) => {
                entry.first_seen = entry.first_seen.min(date);
                entry.last_seen = entry.last_seen.max(date);
            }
            None => self.name_ledger.push(NameRecord {
                name: row.name.clone(),
                first_seen: date,
                last_seen: date,
            }),
        }

        match self.daily_history.iter_mut().rev().find(|d| d.date == date) {
            Some(day) => {
                day.revenue += row.revenue;
                day.views += row.views;
                day.units_sold += row.units_sold;
                day.by_name
                    .entry(row.name.clone())
                    .or_default()
                    .add(row);
            }
            None => self.daily_history.push(DayRecord {
                date,
                revenue: row.revenue,
                views: row.views,
                units_sold: row.units_sold,
                name_used: row.name.clone(),
                by_name: BTreeMap::from([(row.name.clone(), PeriodBucket::from_row(row))]),
            }),
        }
    }

    /// Restore date ordering and pick the most recently seen names
    fn settle(&mut self) {
        self.name_ledger.sort_by_key(|n| n.first_seen);
        self.daily_history.sort_by_key(|d| d.date);

        let ledger = &self.name_ledger;
        let rank = |name: &str| {
            ledger
                .iter()
                .find(|n| n.name == name)
                .map(|n| (n.last_seen, n.first_seen))
        };

        for day in &mut self.daily_history {
            if let Some(name) = day
                .by_name
                .keys()
                .max_by(|a, b| rank(a.as_str()).cmp(&rank(b.as_str())).then_with(|| a.cmp(b)))
            {
                day.name_used = name.clone();
            }
        }

        if let Some(latest) = self.name_ledger.iter().max_by(|a, b| {
            (a.last_seen, a.first_seen)
                .cmp(&(b.last_seen, b.first_seen))
                .then_with(|| a.name.cmp(&b.name))
        }) {
            self.display_name = latest.name.clone();
        }
    }
}

pub(crate) fn conversion_rate(units_sold: u64, views: u64) -> f64 {
    if views > 0 {
        units_sold as f64 / views as f64
    } else {
        0.0
    }
}

/// Counts from folding one file into an aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMergeStats {
    pub rows_merged: usize,
    pub products_created: usize,
}

/// The full merged dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub products: BTreeMap<String, Product>,
    pub daily: BTreeMap<ReportDate, PeriodBucket>,
    pub monthly: BTreeMap<MonthKey, PeriodBucket>,
    /// Latest known reporting date across every merged file
    pub global_max_date: Option<NaiveDate>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.daily.is_empty() && self.monthly.is_empty()
    }

    /// Drop everything merged so far
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn product(&self, product_id: &str) -> Option<&Product> {
        self.products.get(product_id)
    }

    /// The watermark as a report date, for comparisons against ledger spans
    pub fn watermark(&self) -> Option<ReportDate> {
        self.global_max_date.map(ReportDate::Day)
    }

    /// Fold one file's normalized rows into the running totals.
    ///
    /// Deduplication is by (product, date) only: merging the same file twice
    /// counts its rows twice.
    pub fn merge_file<I>(&mut self, date: ReportDate, rows: I) -> FileMergeStats
    where
        I: IntoIterator<Item = Row>,
    {
        if let Some(day) = date.as_date() {
            if self.global_max_date.map_or(true, |max| day > max) {
                self.global_max_date = Some(day);
            }
        }

        let month = date.month();
        self.daily.entry(date).or_default();
        self.monthly.entry(month).or_default();

        let mut stats = FileMergeStats::default();
        let mut touched: Vec<String> = Vec::new();

        for row in rows {
            if !self.products.contains_key(&row.product_id) {
                stats.products_created += 1;
            }
            self.products
                .entry(row.product_id.clone())
                .or_insert_with(|| Product::new(&row.product_id, &row.name))
                .record(date, &row);

            if let Some(bucket) = self.daily.get_mut(&date) {
                bucket.add(&row);
            }
            if let Some(bucket) = self.monthly.get_mut(&month) {
                bucket.add(&row);
            }

            touched.push(row.product_id);
            stats.rows_merged += 1;
        }

        touched.sort();
        touched.dedup();
        for id in &touched {
            if let Some(product) = self.products.get_mut(id) {
                product.settle();
            }
        }

        debug!(
            date = %date,
            rows = stats.rows_merged,
            products = touched.len(),
            "Merged file into aggregate"
        );

        stats
    }
}
