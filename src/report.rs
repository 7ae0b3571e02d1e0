//! Read-only views over an aggregate for the dashboard
//!
//! Summary totals, month-over-month change and a filterable, sortable
//! product listing. Nothing here mutates the aggregate.

use crate::aggregate::{conversion_rate, Aggregate, PeriodBucket, Product};
use crate::dates::{MonthKey, ReportDate};
use crate::error::{Error, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::str::FromStr;

/// Dashboard headline numbers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub product_count: usize,
    pub total_revenue: f64,
    pub total_units_sold: u64,
    pub total_views: u64,
    /// Views divided by the number of distinct reporting days
    pub daily_average_views: f64,
    pub conversion_rate: f64,
    pub first_date: Option<ReportDate>,
    pub last_date: Option<ReportDate>,
    pub month_over_month: Option<MonthOverMonth>,
}

/// Percentage change between the two latest months
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthOverMonth {
    pub month: MonthKey,
    pub previous_month: Option<MonthKey>,
    pub revenue_change: Option<f64>,
    pub units_change: Option<f64>,
    pub views_change: Option<f64>,
}

pub fn summarize(aggregate: &Aggregate) -> Summary {
    let total_revenue: f64 = aggregate.products.values().map(|p| p.total_revenue).sum();
    let total_units_sold: u64 = aggregate.products.values().map(|p| p.total_units_sold).sum();
    let total_views: u64 = aggregate.products.values().map(|p| p.total_views).sum();

    let days = aggregate.daily.len();
    let daily_average_views = if days > 0 {
        total_views as f64 / days as f64
    } else {
        0.0
    };

    Summary {
        product_count: aggregate.products.len(),
        total_revenue,
        total_units_sold,
        total_views,
        daily_average_views,
        conversion_rate: conversion_rate(total_units_sold, total_views),
        first_date: aggregate.daily.keys().find(|d| d.is_known()).copied(),
        last_date: aggregate.daily.keys().rev().find(|d| d.is_known()).copied(),
        month_over_month: month_over_month(aggregate),
    }
}

/// Compare the latest monthly bucket with the one before it.
///
/// Rows without a known date are left out. `None` when there are no dated
/// months at all; individual changes are `None` when there is no previous
/// month or its value was zero.
pub fn month_over_month(aggregate: &Aggregate) -> Option<MonthOverMonth> {
    let mut months = aggregate
        .monthly
        .iter()
        .rev()
        .filter(|(key, _)| **key != MonthKey::Unknown);
    let (month, latest) = months.next()?;
    let previous = months.next();

    let change = |pick: fn(&PeriodBucket) -> f64| {
        previous.and_then(|(_, prev)| percent_change(pick(latest), pick(prev)))
    };

    Some(MonthOverMonth {
        month: *month,
        previous_month: previous.map(|(key, _)| *key),
        revenue_change: change(|b| b.revenue),
        units_change: change(|b| b.units_sold as f64),
        views_change: change(|b| b.views as f64),
    })
}

fn percent_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

/// Product listing sort keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Revenue,
    Views,
    Units,
    Conversion,
    NameCount,
    Name,
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "revenue" => Ok(SortKey::Revenue),
            "views" => Ok(SortKey::Views),
            "units" | "sales" => Ok(SortKey::Units),
            "conversion" => Ok(SortKey::Conversion),
            "names" | "name-count" => Ok(SortKey::NameCount),
            "name" => Ok(SortKey::Name),
            _ => Err(Error::Config(format!(
                "Unknown sort key '{}'; expected revenue, views, units, conversion, names or name",
                s
            ))),
        }
    }
}

/// Product listing filter and ordering
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    /// Case-insensitive match on display name or product id
    pub search: Option<String>,
    /// Only products that have carried more than one name
    pub name_changed_only: bool,
    pub sort: SortKey,
    pub ascending: bool,
    pub limit: Option<usize>,
}

/// One row of the product listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRow {
    pub product_id: String,
    pub display_name: String,
    pub total_revenue: f64,
    pub total_views: u64,
    pub total_units_sold: u64,
    pub conversion_rate: f64,
    pub name_count: usize,
}

impl From<&Product> for ProductRow {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.product_id.clone(),
            display_name: product.display_name.clone(),
            total_revenue: product.total_revenue,
            total_views: product.total_views,
            total_units_sold: product.total_units_sold,
            conversion_rate: product.conversion_rate(),
            name_count: product.name_count(),
        }
    }
}

impl ProductQuery {
    fn matches(&self, product: &Product) -> bool {
        if self.name_changed_only && !product.has_name_changes() {
            return false;
        }
        match &self.search {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                product.display_name.to_lowercase().contains(&term)
                    || product.product_id.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }

    fn compare(&self, a: &ProductRow, b: &ProductRow) -> Ordering {
        let ordering = match self.sort {
            SortKey::Revenue => a.total_revenue.total_cmp(&b.total_revenue),
            SortKey::Views => a.total_views.cmp(&b.total_views),
            SortKey::Units => a.total_units_sold.cmp(&b.total_units_sold),
            SortKey::Conversion => a.conversion_rate.total_cmp(&b.conversion_rate),
            SortKey::NameCount => a.name_count.cmp(&b.name_count),
            SortKey::Name => a.display_name.cmp(&b.display_name),
        };
        let ordering = if self.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        // Stable listing for equal keys
        ordering.then_with(|| a.product_id.cmp(&b.product_id))
    }
}

/// Filter, sort and truncate the product listing
pub fn query_products(aggregate: &Aggregate, query: &ProductQuery) -> Vec<ProductRow> {
    let mut rows: Vec<ProductRow> = aggregate
        .products
        .values()
        .filter(|p| query.matches(p))
        .map(ProductRow::from)
        .collect();

    rows.sort_by(|a, b| query.compare(a, b));
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    rows
}
