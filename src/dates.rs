//! Reporting-date resolution
//!
//! Each export carries its reporting day in the file name, possibly more than
//! once (e.g. `sales_2024-1-5_to_2024-1-6.json`). The resolver normalizes every
//! `YYYY-M-D` match and keeps the latest one.

use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Serialized form of the "no date found" bucket
pub const UNKNOWN_KEY: &str = "unknown";

/// The reporting day of a file.
///
/// `Unknown` orders before every real date, so it can never raise the
/// global watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportDate {
    Unknown,
    Day(NaiveDate),
}

impl ReportDate {
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            ReportDate::Unknown => None,
            ReportDate::Day(d) => Some(*d),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ReportDate::Day(_))
    }

    /// The year-month bucket this date rolls up into
    pub fn month(&self) -> MonthKey {
        match self {
            ReportDate::Unknown => MonthKey::Unknown,
            ReportDate::Day(d) => MonthKey::Month {
                year: d.year(),
                month: d.month(),
            },
        }
    }
}

impl From<NaiveDate> for ReportDate {
    fn from(date: NaiveDate) -> Self {
        ReportDate::Day(date)
    }
}

impl fmt::Display for ReportDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportDate::Unknown => write!(f, "{}", UNKNOWN_KEY),
            ReportDate::Day(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl FromStr for ReportDate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == UNKNOWN_KEY {
            return Ok(ReportDate::Unknown);
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(ReportDate::Day)
            .map_err(|e| Error::Parse(format!("Invalid report date '{}': {}", s, e)))
    }
}

impl Serialize for ReportDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReportDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Year-month key for monthly roll-ups
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonthKey {
    Unknown,
    Month { year: i32, month: u32 },
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonthKey::Unknown => write!(f, "{}", UNKNOWN_KEY),
            MonthKey::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
        }
    }
}

impl FromStr for MonthKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == UNKNOWN_KEY {
            return Ok(MonthKey::Unknown);
        }
        let invalid = || Error::Parse(format!("Invalid month key '{}'", s));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(MonthKey::Month { year, month })
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([0-9]{4})-([0-9]{1,2})-([0-9]{1,2})").unwrap())
}

/// Resolve the reporting date embedded in a file name.
///
/// Every `YYYY-M-D` match is zero-padded and the latest valid calendar date
/// wins. Matches such as `2024-13-40` are ignored. No valid match yields
/// [`ReportDate::Unknown`].
pub fn resolve_report_date(file_name: &str) -> ReportDate {
    date_pattern()
        .captures_iter(file_name)
        .filter_map(|caps| {
            let year: i32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            let day: u32 = caps[3].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
        .max()
        .map(ReportDate::Day)
        .unwrap_or(ReportDate::Unknown)
}

/// Inclusive day count between two dates; a single day counts as one.
///
/// Unknown endpoints cannot be measured and count as a single day.
pub fn inclusive_span_days(start: ReportDate, end: ReportDate) -> i64 {
    match (start, end) {
        (ReportDate::Day(a), ReportDate::Day(b)) => (b - a).num_days().abs() + 1,
        _ => 1,
    }
}
