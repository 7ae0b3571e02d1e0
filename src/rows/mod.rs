//! Row normalization
//!
//! This module is the only place that touches the loosely-typed rows coming
//! out of a spreadsheet export. It:
//! - Picks the five columns the engine cares about and ignores the rest
//! - Coerces numeric cells, defaulting anything unusable to zero
//! - Rejects rows without a usable product identifier

mod json;

pub use json::*;

use crate::config::ColumnConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Display name used when a row carries no product name
pub const UNNAMED_PRODUCT: &str = "Unnamed";

/// One raw spreadsheet row: column header -> cell value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A validated row
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub product_id: String,
    pub name: String,
    pub revenue: f64,
    pub views: u64,
    pub units_sold: u64,
}

/// Convert a raw record into a [`Row`], or `None` if it has no product id.
pub fn normalize_row(raw: &RawRecord, columns: &ColumnConfig) -> Option<Row> {
    let product_id = coerce_product_id(raw.get(&columns.product_id))?;

    let name = match raw.get(&columns.name) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => UNNAMED_PRODUCT.to_string(),
    };

    Some(Row {
        product_id,
        name,
        revenue: coerce_amount(raw.get(&columns.revenue)),
        views: coerce_count(raw.get(&columns.views)),
        units_sold: coerce_count(raw.get(&columns.units_sold)),
    })
}

fn coerce_product_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let id = s.trim();
            if id.is_empty() || id == "undefined" || id == "null" {
                None
            } else {
                Some(id.to_string())
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                // Spreadsheet exports often turn integer ids into floats
                let f = n.as_f64()?;
                if !f.is_finite() {
                    None
                } else if f.fract() == 0.0 {
                    Some(format!("{:.0}", f))
                } else {
                    Some(n.to_string())
                }
            }
        }
        _ => None,
    }
}

/// Non-negative amount; anything unusable becomes 0
fn coerce_amount(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

fn coerce_count(value: Option<&Value>) -> u64 {
    coerce_amount(value).trunc() as u64
}
