//! Fetch and watch commands

use crate::config::Config;
use crate::error::Result;
use crate::report::{summarize, Summary};
use crate::store::{SnapshotMetadata, StoreSession};
use crate::sync::{Subscriber, SyncOutcome, WatchStats};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// Result of a single fetch
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub outcome: SyncOutcome,
    pub deployment: Option<SnapshotMetadata>,
    pub summary: Summary,
}

/// Bring the local snapshot up to date with the store
pub async fn cmd_fetch(config: &Config, session: &StoreSession) -> Result<FetchResult> {
    let mut subscriber = Subscriber::from_config(session.clone(), config).await?;
    subscriber.restore_from_cache().await?;

    let outcome = subscriber.sync_once().await?;
    info!("Fetch finished: {:?}", outcome);

    Ok(FetchResult {
        outcome,
        deployment: subscriber.applied_metadata().cloned(),
        summary: summarize(subscriber.aggregate()),
    })
}

/// Poll for new deployments until `shutdown` resolves, printing each one
pub async fn cmd_watch<S>(
    config: &Config,
    session: &StoreSession,
    shutdown: S,
    json: bool,
) -> Result<WatchStats>
where
    S: Future<Output = ()>,
{
    let mut subscriber = Subscriber::from_config(session.clone(), config).await?;
    if let Some(deployment) = subscriber.restore_from_cache().await? {
        info!("Showing cached deployment {} until the first poll", deployment);
    }

    let interval = Duration::from_secs(config.sync.poll_interval_secs);
    info!("Watching {} every {:?}", session.describe(), interval);

    subscriber
        .watch(interval, shutdown, |aggregate, outcome| {
            let summary = summarize(aggregate);
            if json {
                let line = serde_json::json!({ "outcome": outcome, "summary": summary });
                println!("{}", line);
            } else {
                if let SyncOutcome::Applied { deployment_id, .. } = outcome {
                    println!("\n🔄 Deployment {}", deployment_id);
                }
                print_summary(&summary);
            }
        })
        .await
}

/// Print a fetch result to console
pub fn print_fetch_result(result: &FetchResult) {
    match &result.outcome {
        SyncOutcome::NothingPublished => {
            println!("\nNothing has been published yet.");
            return;
        }
        SyncOutcome::Unchanged { deployment_id } => {
            println!("\n✓ Up to date (deployment {})", deployment_id);
        }
        SyncOutcome::Applied {
            deployment_id,
            source,
            chunk_count,
        } => {
            println!(
                "\n✓ Applied deployment {} ({} chunks, from {:?})",
                deployment_id, chunk_count, source
            );
        }
    }

    if let Some(deployment) = &result.deployment {
        if !deployment.author_id.is_empty() {
            println!(
                "Published {} by {}",
                deployment.published_at, deployment.author_id
            );
        }
    }
    print_summary(&result.summary);
}

/// Print the dashboard summary to console
pub fn print_summary(summary: &Summary) {
    println!("\n📊 Dashboard\n");
    println!("Products: {}", summary.product_count);
    println!(
        "Revenue: {:.0}{}",
        summary.total_revenue,
        change_suffix(summary.month_over_month.as_ref().and_then(|m| m.revenue_change))
    );
    println!(
        "Units sold: {}{}",
        summary.total_units_sold,
        change_suffix(summary.month_over_month.as_ref().and_then(|m| m.units_change))
    );
    println!(
        "Views: {}{}",
        summary.total_views,
        change_suffix(summary.month_over_month.as_ref().and_then(|m| m.views_change))
    );
    println!("Daily average views: {:.0}", summary.daily_average_views);
    println!("Conversion rate: {:.2}%", summary.conversion_rate * 100.0);

    if let (Some(first), Some(last)) = (summary.first_date, summary.last_date) {
        println!("Dates: {} .. {}", first, last);
    }
}

fn change_suffix(change: Option<f64>) -> String {
    match change {
        Some(pct) if pct >= 0.0 => format!("  (▲ {:.1}% MoM)", pct),
        Some(pct) => format!("  (▼ {:.1}% MoM)", pct.abs()),
        None => String::new(),
    }
}
