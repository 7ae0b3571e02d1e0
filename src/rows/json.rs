//! JSON export adapter
//!
//! Reads the row list a spreadsheet-to-JSON export produces: either a JSON
//! array of objects, or JSON Lines with one object per line.

use super::RawRecord;
use crate::error::{Error, Result};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Source of raw rows for one export file
pub trait RowSource: Send + Sync {
    /// Read every raw row of a file. A file that cannot be read or parsed as a
    /// whole is an error; individual non-object rows are dropped.
    fn read_rows(&self, path: &Path) -> Result<Vec<RawRecord>>;
}

/// Reads `.json` (array) and `.jsonl` (one object per line) exports
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowSource;

impl RowSource for JsonRowSource {
    fn read_rows(&self, path: &Path) -> Result<Vec<RawRecord>> {
        let content = std::fs::read_to_string(path)?;
        parse_rows(&content).map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))
    }
}

/// Parse row content in either supported layout
pub fn parse_rows(content: &str) -> Result<Vec<RawRecord>> {
    let trimmed = content.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, serde_json::Error>>()?
    };

    let total = values.len();
    let records: Vec<RawRecord> = values
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(RawRecord::from(map)),
            _ => None,
        })
        .collect();

    if records.len() < total {
        debug!("Dropped {} non-object rows", total - records.len());
    }

    Ok(records)
}

/// Whether a path looks like a row export this adapter can read
pub fn is_row_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_array() {
        let rows = parse_rows(r#"[{"상품ID": "A", "상품명": "Widget"}, 3, {"상품ID": "B"}]"#).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("상품ID").unwrap(), "B");
    }

    #[test]
    fn test_parse_json_lines() {
        let rows = parse_rows("{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_rows("[{\"a\": 1}").is_err());
        assert!(parse_rows("").unwrap().is_empty());
    }

    #[test]
    fn test_read_rows_reports_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("2024-01-05.json");
        std::fs::write(&path, "not json").unwrap();

        let err = JsonRowSource.read_rows(&path).unwrap_err();
        assert!(matches!(err, Error::Parse(ref msg) if msg.contains("2024-01-05.json")));
    }

    #[test]
    fn test_is_row_file() {
        assert!(is_row_file(Path::new("a/2024-01-05.json")));
        assert!(is_row_file(Path::new("b.jsonl")));
        assert!(!is_row_file(Path::new("c.xlsx")));
    }
}
