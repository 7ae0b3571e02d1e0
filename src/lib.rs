//! salesboard - incremental sales-report aggregation with shared snapshots
//!
//! This crate provides:
//! - Row normalization and report-date resolution for daily export files
//! - An incremental aggregation engine with product name history
//! - A chunked, versioned publish/subscribe protocol over a document store
//!   with a per-document size ceiling
//! - A local SQLite snapshot cache and the `salesboard` CLI commands

pub mod aggregate;
pub mod cache;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod dates;
pub mod error;
pub mod report;
pub mod rows;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
