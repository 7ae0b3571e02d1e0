//! Ingest command implementation

use super::load_current;
use crate::aggregate::Aggregate;
use crate::cache::PublishRecord;
use crate::config::Config;
use crate::dates::{resolve_report_date, ReportDate};
use crate::error::{Error, Result};
use crate::rows::{is_row_file, normalize_row, JsonRowSource, Row, RowSource};
use crate::store::{SnapshotMetadata, StoreSession};
use crate::sync::{GcStats, Publisher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Ingest options
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Merge and report, but do not publish
    pub dry_run: bool,
    /// Refuse to publish if someone else published since the base was read
    pub fail_on_conflict: bool,
}

/// Summary of the deployment an ingest published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSummary {
    pub deployment_id: String,
    pub chunk_count: usize,
    pub payload_bytes: usize,
    pub published_at: String,
    pub gc_chunks_deleted: usize,
    pub gc_delete_failures: usize,
}

impl PublishSummary {
    pub(crate) fn new(metadata: &SnapshotMetadata, payload_bytes: usize, gc: &GcStats) -> Self {
        Self {
            deployment_id: metadata.deployment_id.to_string(),
            chunk_count: metadata.chunk_count,
            payload_bytes,
            published_at: metadata.published_at.clone(),
            gc_chunks_deleted: gc.chunks_deleted,
            gc_delete_failures: gc.delete_failures,
        }
    }
}

/// Statistics from an ingestion run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub files_found: usize,
    pub files_merged: usize,
    pub files_skipped: usize,
    pub rows_merged: usize,
    pub rows_skipped: usize,
    pub products_created: usize,
    /// Deployment the new rows were merged onto
    pub base_deployment: Option<String>,
    pub published: Option<PublishSummary>,
    pub errors: Vec<String>,
}

/// Collect row exports from files and directories, in path order
pub fn collect_row_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(Error::InvalidPath(format!(
                "{}: no such file or directory",
                path.display()
            )));
        }

        if path.is_file() {
            files.push(path.clone());
            continue;
        }

        for entry in WalkDir::new(path).follow_links(true) {
            match entry {
                Ok(e) if e.file_type().is_file() && is_row_file(e.path()) => {
                    files.push(e.path().to_path_buf());
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry: {}", e),
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Merge export files into the latest published aggregate and publish it
pub async fn cmd_ingest(
    config: &Config,
    session: &StoreSession,
    paths: &[PathBuf],
    options: IngestOptions,
) -> Result<IngestStats> {
    let files = collect_row_files(paths)?;
    ingest_files(config, session, &JsonRowSource, &files, options).await
}

/// Merge `files` read through `source`, then publish the result.
///
/// A file that fails to read is skipped and recorded; files merged before it
/// stay merged. Nothing is published when no file could be merged.
pub async fn ingest_files(
    config: &Config,
    session: &StoreSession,
    source: &dyn RowSource,
    files: &[PathBuf],
    options: IngestOptions,
) -> Result<IngestStats> {
    let mut stats = IngestStats {
        files_found: files.len(),
        ..Default::default()
    };
    info!("Found {} files to ingest", files.len());

    // Merging onto anything but the current deployment would drop newer publishes
    let mut subscriber = load_current(config, session).await?;
    let base = subscriber.applied_deployment();
    stats.base_deployment = base.map(|id| id.to_string());
    let mut aggregate = subscriber.aggregate().clone();

    for path in files {
        match merge_one(config, source, path, &mut aggregate) {
            Ok((date, rows_merged, rows_skipped, products_created)) => {
                debug!("Merged {} ({}): {} rows", path.display(), date, rows_merged);
                stats.files_merged += 1;
                stats.rows_merged += rows_merged;
                stats.rows_skipped += rows_skipped;
                stats.products_created += products_created;
            }
            Err(e) => {
                let error_msg = format!("{}: {}", path.display(), e);
                warn!("{}", error_msg);
                stats.errors.push(error_msg);
                stats.files_skipped += 1;
            }
        }

        // Let other tasks run between files
        tokio::task::yield_now().await;
    }

    if stats.files_merged == 0 {
        info!("No files merged; nothing to publish");
        return Ok(stats);
    }

    if options.dry_run {
        info!("Dry run; skipping publish");
        return Ok(stats);
    }

    let publisher = Publisher::new(session.clone(), config)?;
    let publication = if options.fail_on_conflict {
        publisher.publish_expecting(&aggregate, base).await?
    } else {
        publisher.publish(&aggregate).await?
    };

    let gc = publication.gc.await.unwrap_or_else(|e| {
        warn!("Garbage collection task failed: {}", e);
        GcStats::default()
    });
    let summary = PublishSummary::new(&publication.metadata, publication.payload.len(), &gc);

    if let Some(cache) = subscriber.cache() {
        let record = PublishRecord {
            deployment_id: summary.deployment_id.clone(),
            published_at: summary.published_at.clone(),
            chunk_count: summary.chunk_count as i64,
            payload_bytes: summary.payload_bytes as i64,
            files_merged: stats.files_merged as i64,
            rows_merged: stats.rows_merged as i64,
        };
        if let Err(e) = cache.record_publish(&record).await {
            warn!("Failed to record publish: {}", e);
        }
    }
    subscriber
        .adopt(publication.metadata, aggregate, &publication.payload)
        .await;

    stats.published = Some(summary);
    Ok(stats)
}

/// Fold one file into `aggregate`: (date, rows merged, rows skipped, products created)
fn merge_one(
    config: &Config,
    source: &dyn RowSource,
    path: &Path,
    aggregate: &mut Aggregate,
) -> Result<(ReportDate, usize, usize, usize)> {
    let raw = source.read_rows(path)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
    let date = resolve_report_date(file_name);
    if !date.is_known() {
        warn!("No date in file name {}; merging under unknown date", file_name);
    }

    let rows: Vec<Row> = raw
        .iter()
        .filter_map(|record| normalize_row(record, &config.columns))
        .collect();
    let skipped = raw.len() - rows.len();
    if skipped > 0 {
        debug!("Skipped {} rows without a product id in {}", skipped, file_name);
    }

    let merged = aggregate.merge_file(date, rows);
    Ok((date, merged.rows_merged, skipped, merged.products_created))
}

/// Print ingest stats to console
pub fn print_ingest_stats(stats: &IngestStats) {
    println!("\n📥 Ingest Complete\n");
    if let Some(base) = &stats.base_deployment {
        println!("Merged onto deployment: {}", base);
    }
    println!("Files merged: {} of {}", stats.files_merged, stats.files_found);
    println!("Rows merged: {}", stats.rows_merged);
    if stats.rows_skipped > 0 {
        println!("Rows skipped (no product id): {}", stats.rows_skipped);
    }
    println!("New products: {}", stats.products_created);

    match &stats.published {
        Some(published) => {
            println!("\nPublished deployment {}", published.deployment_id);
            println!(
                "  {} chunks, {} bytes",
                published.chunk_count, published.payload_bytes
            );
            if published.gc_chunks_deleted > 0 {
                println!("  Reclaimed {} old chunks", published.gc_chunks_deleted);
            }
            if published.gc_delete_failures > 0 {
                println!(
                    "  ⚠ {} old chunks could not be deleted (will retry on next publish)",
                    published.gc_delete_failures
                );
            }
        }
        None => println!("\nNothing published"),
    }

    if !stats.errors.is_empty() {
        println!("\n⚠ Skipped files:");
        for error in &stats.errors {
            println!("  - {}", error);
        }
    }
}
