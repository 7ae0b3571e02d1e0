//! Product listing and detail commands

use super::load_latest;
use crate::aggregate::{performance_by_name, DayRecord, NamePerformance};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::report::{query_products, ProductQuery, ProductRow};
use crate::store::StoreSession;
use serde::Serialize;
use tracing::debug;

/// Product listing
#[derive(Debug, Clone, Serialize)]
pub struct ProductList {
    pub deployment_id: Option<String>,
    pub total_products: usize,
    pub products: Vec<ProductRow>,
}

/// One name a product carried, flagged when it is the one in use now
#[derive(Debug, Clone, Serialize)]
pub struct NameEntry {
    #[serde(flatten)]
    pub performance: NamePerformance,
    pub current: bool,
}

/// Everything known about one product
#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    pub product: ProductRow,
    pub names: Vec<NameEntry>,
    pub daily_history: Vec<DayRecord>,
}

/// List products from the latest snapshot
pub async fn cmd_products(
    config: &Config,
    session: &StoreSession,
    query: &ProductQuery,
) -> Result<ProductList> {
    let subscriber = load_latest(config, session).await?;
    let aggregate = subscriber.aggregate();

    let products = query_products(aggregate, query);
    debug!("{} of {} products matched", products.len(), aggregate.products.len());

    Ok(ProductList {
        deployment_id: subscriber.applied_deployment().map(|id| id.to_string()),
        total_products: aggregate.products.len(),
        products,
    })
}

/// Show per-name performance for one product
pub async fn cmd_product(
    config: &Config,
    session: &StoreSession,
    product_id: &str,
) -> Result<ProductDetail> {
    let subscriber = load_latest(config, session).await?;
    let aggregate = subscriber.aggregate();

    let product = aggregate
        .product(product_id)
        .ok_or_else(|| Error::Other(format!("Unknown product: {}", product_id)))?;

    let watermark = aggregate.watermark();
    let names = performance_by_name(product)
        .into_iter()
        .map(|performance| NameEntry {
            current: performance.is_current(watermark),
            performance,
        })
        .collect();

    Ok(ProductDetail {
        product: ProductRow::from(product),
        names,
        daily_history: product.daily_history.clone(),
    })
}

/// Print the product listing to console
pub fn print_products(list: &ProductList) {
    if list.products.is_empty() {
        println!("No products found.");
        return;
    }

    println!(
        "\n{:<16} {:<32} {:>14} {:>10} {:>8} {:>8} {:>6}",
        "ID", "Name", "Revenue", "Views", "Units", "Conv%", "Names"
    );
    println!("{}", "-".repeat(100));
    for row in &list.products {
        println!(
            "{:<16} {:<32} {:>14.0} {:>10} {:>8} {:>8.2} {:>6}",
            truncate(&row.product_id, 16),
            truncate(&row.display_name, 32),
            row.total_revenue,
            row.total_views,
            row.total_units_sold,
            row.conversion_rate * 100.0,
            row.name_count
        );
    }
    println!(
        "\nShowing {} of {} products",
        list.products.len(),
        list.total_products
    );
}

/// Print a product's name history to console
pub fn print_product_detail(detail: &ProductDetail) {
    let product = &detail.product;
    println!("\n📦 {} ({})\n", product.display_name, product.product_id);
    println!("Revenue: {:.0}", product.total_revenue);
    println!("Views: {}", product.total_views);
    println!("Units sold: {}", product.total_units_sold);
    println!("Conversion rate: {:.2}%", product.conversion_rate * 100.0);

    println!("\nNames:");
    for entry in &detail.names {
        let perf = &entry.performance;
        let marker = if entry.current { " [current]" } else { "" };
        println!("  {}{}", perf.name, marker);
        println!(
            "    {} .. {} ({} days)",
            perf.period_start, perf.period_end, perf.span_days
        );
        println!(
            "    revenue {:.0}, views {}, units {}, {:.1} views/day, {:.0} revenue/day, {:.2}% conversion",
            perf.total_revenue,
            perf.total_views,
            perf.total_units_sold,
            perf.daily_average_views,
            perf.daily_average_revenue,
            perf.conversion_rate * 100.0
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
