//! Row schema for stored price partitions.
//!
//! One `PriceRow` per instrument per trading day. The on-disk column order is
//! fixed by [`COLUMNS`]; nulls are written as empty fields and numbers use the
//! locale-independent `.` decimal point produced by `f64::to_string`.
//!
//! Provider payloads are converted into rows by [`map_provider_record`], a
//! total mapping with a defined null policy per field, so the coercion can be
//! tested without any network call.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Header of every partition file, in order.
pub const COLUMNS: [&str; 8] = [
    "date",
    "instrument_id",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "adjusted_close",
];

/// One instrument-day observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub instrument_id: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
    pub adjusted_close: Option<f64>,
}

/// Errors raised while decoding a stored record.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("invalid date '{0}'")]
    InvalidDate(String),

    #[error("invalid value '{value}' in column '{column}'")]
    InvalidNumber { column: &'static str, value: String },

    #[error("empty instrument_id")]
    EmptyInstrument,

    #[error("unexpected header {0:?}")]
    Header(Vec<String>),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

impl PriceRow {
    /// A row with every value field null.
    pub fn empty(date: NaiveDate, instrument_id: impl Into<String>) -> Self {
        Self {
            date,
            instrument_id: instrument_id.into(),
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            adjusted_close: None,
        }
    }

    /// Ordering by `(date, instrument_id)`.
    pub fn key_cmp(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then_with(|| self.instrument_id.cmp(&other.instrument_id))
    }

    /// Textual field for a column, as written to disk.
    pub fn field(&self, column: Column) -> String {
        match column {
            Column::Date => self.date.format("%Y-%m-%d").to_string(),
            Column::InstrumentId => self.instrument_id.clone(),
            Column::Open => fmt_f64(self.open),
            Column::High => fmt_f64(self.high),
            Column::Low => fmt_f64(self.low),
            Column::Close => fmt_f64(self.close),
            Column::Volume => self.volume.map(|v| v.to_string()).unwrap_or_default(),
            Column::AdjustedClose => fmt_f64(self.adjusted_close),
        }
    }

    /// All eight fields in [`COLUMNS`] order.
    pub fn to_record(&self) -> [String; 8] {
        Column::ALL.map(|c| self.field(c))
    }

    /// Decode a record laid out in [`COLUMNS`] order.
    pub fn from_fields<'a, I>(fields: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let fields: Vec<&str> = fields.into_iter().collect();
        if fields.len() != COLUMNS.len() {
            return Err(SchemaError::FieldCount {
                expected: COLUMNS.len(),
                found: fields.len(),
            });
        }

        let instrument_id = fields[1].trim();
        if instrument_id.is_empty() {
            return Err(SchemaError::EmptyInstrument);
        }

        Ok(Self {
            date: parse_date(fields[0])?,
            instrument_id: instrument_id.to_string(),
            open: parse_f64("open", fields[2])?,
            high: parse_f64("high", fields[3])?,
            low: parse_f64("low", fields[4])?,
            close: parse_f64("close", fields[5])?,
            volume: parse_volume(fields[6])?,
            adjusted_close: parse_f64("adjusted_close", fields[7])?,
        })
    }
}

/// Check that a header row matches [`COLUMNS`] exactly.
pub fn check_header<'a, I>(header: I) -> Result<(), SchemaError>
where
    I: IntoIterator<Item = &'a str>,
{
    let found: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
    if found.len() == COLUMNS.len() && found.iter().zip(COLUMNS).all(|(a, b)| a == b) {
        Ok(())
    } else {
        Err(SchemaError::Header(found))
    }
}

/// Parse a calendar date, discarding any time-of-day suffix.
///
/// Accepts `YYYY-MM-DD`, optionally followed by `T` or a space and a time.
pub fn parse_date(s: &str) -> Result<NaiveDate, SchemaError> {
    let s = s.trim();
    let day = match s.len() {
        10 => s,
        n if n > 10 && matches!(s.as_bytes()[10], b'T' | b' ') => &s[..10],
        _ => return Err(SchemaError::InvalidDate(s.to_string())),
    };
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| SchemaError::InvalidDate(s.to_string()))
}

/// Deduplicate by `(date, instrument_id)` keeping the last occurrence, then
/// sort ascending by the same key.
pub fn dedupe_and_sort(rows: Vec<PriceRow>) -> Vec<PriceRow> {
    let mut seen: HashSet<(NaiveDate, String)> = HashSet::with_capacity(rows.len());
    let mut out: Vec<PriceRow> = rows
        .into_iter()
        .rev()
        .filter(|r| seen.insert((r.date, r.instrument_id.clone())))
        .collect();
    out.sort_by(PriceRow::key_cmp);
    out
}

fn fmt_f64(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => x.to_string(),
        _ => String::new(),
    }
}

fn parse_f64(column: &'static str, s: &str) -> Result<Option<f64>, SchemaError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        Ok(_) => Ok(None),
        Err(_) => Err(SchemaError::InvalidNumber {
            column,
            value: s.to_string(),
        }),
    }
}

fn parse_volume(s: &str) -> Result<Option<u64>, SchemaError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    if let Ok(v) = s.parse::<u64>() {
        return Ok(Some(v));
    }
    // Some writers emit integral floats ("1200.0").
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => Ok(Some(v as u64)),
        _ => Err(SchemaError::InvalidNumber {
            column: "volume",
            value: s.to_string(),
        }),
    }
}

// ── Columns ─────────────────────────────────────────────────────────

/// A stored column, used for projections on the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Date,
    InstrumentId,
    Open,
    High,
    Low,
    Close,
    Volume,
    AdjustedClose,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::Date,
        Column::InstrumentId,
        Column::Open,
        Column::High,
        Column::Low,
        Column::Close,
        Column::Volume,
        Column::AdjustedClose,
    ];

    pub fn name(self) -> &'static str {
        COLUMNS[self as usize]
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Column::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| SchemaError::UnknownColumn(s.to_string()))
    }
}

// ── Provider payload mapping ────────────────────────────────────────

/// A loosely typed observation as a provider reports it.
///
/// Every value may be missing or non-finite; `timestamp` is Unix seconds and
/// may carry a time of day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRecord {
    pub instrument_id: String,
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub adjusted_close: Option<f64>,
}

/// Map a provider record onto the fixed row schema.
///
/// Null policy:
/// - non-finite prices become `None`
/// - volume must be finite and non-negative, else `None`; fractional volume is truncated
/// - the date is the UTC calendar day of `timestamp`
///
/// Returns `None` for records that cannot be a trading-day row: an empty
/// instrument id, an out-of-range timestamp, or every price and volume absent.
pub fn map_provider_record(rec: &ProviderRecord) -> Option<PriceRow> {
    let instrument_id = rec.instrument_id.trim();
    if instrument_id.is_empty() {
        return None;
    }
    let date = DateTime::from_timestamp(rec.timestamp, 0)?.date_naive();

    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
    let row = PriceRow {
        date,
        instrument_id: instrument_id.to_string(),
        open: finite(rec.open),
        high: finite(rec.high),
        low: finite(rec.low),
        close: finite(rec.close),
        volume: finite(rec.volume).filter(|v| *v >= 0.0).map(|v| v as u64),
        adjusted_close: finite(rec.adjusted_close),
    };

    if row.open.is_none()
        && row.high.is_none()
        && row.low.is_none()
        && row.close.is_none()
        && row.volume.is_none()
    {
        return None;
    }
    Some(row)
}
