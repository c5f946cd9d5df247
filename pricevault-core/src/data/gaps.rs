//! Gap detection: which date ranges still need fetching.
//!
//! Two entry points feed the orchestrator:
//! - [`resume_start_date`] for forward downloads (restart at the last stored month)
//! - [`find_gap_dates`] + [`plan_backfill`] for holes inside already covered spans

use super::index::PartitionIndex;
use super::schema::PriceRow;
use super::store::{PartitionKey, PartitionStore, StoreError};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::info;

/// Default distance (in days) beyond which two gap dates get separate windows.
pub const DEFAULT_MAX_GAP_DAYS: i64 = 30;

/// Half-open date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FetchRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Range covering `first..=last`.
    pub fn inclusive(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            start: first,
            end: last.succ_opt().unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days().max(0)
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Where a run should start.
///
/// With `force_reset`, every partition is deleted first and the configured
/// start is returned. Otherwise resumption begins on the first day of the
/// latest stored month, so a month the previous run left half-filled is
/// fetched again in full.
pub fn resume_start_date(
    store: &PartitionStore,
    configured_start: NaiveDate,
    force_reset: bool,
) -> Result<(NaiveDate, Option<PartitionKey>), StoreError> {
    if force_reset {
        let deleted = store.delete_all_partitions()?;
        info!(deleted, start = %configured_start, "force reset");
        return Ok((configured_start, None));
    }

    match store.latest_partition()? {
        Some(key) => {
            info!(latest = %key, start = %key.first_day(), "resuming from latest partition");
            Ok((key.first_day(), Some(key)))
        }
        None => Ok((configured_start, None)),
    }
}

/// Every `(year, month)` from the month of `start` through the month of `end`.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<PartitionKey> {
    let last = PartitionKey::of(end);
    let mut current = PartitionKey::of(start);
    let mut months = Vec::new();
    while current <= last {
        months.push(current);
        current = current.next();
    }
    months
}

/// First and last calendar day of a month.
pub fn month_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    PartitionKey::new(year, month).map(|key| (key.first_day(), key.last_day()))
}

/// Coalesce missing dates into fetch windows.
///
/// A new window opens whenever two consecutive gap dates are more than
/// `max_gap_days` apart. Each window ends the day after its last gap date.
pub fn missing_ranges_from_gaps(gap_dates: &[NaiveDate], max_gap_days: i64) -> Vec<FetchRange> {
    let sorted: BTreeSet<NaiveDate> = gap_dates.iter().copied().collect();
    let mut dates = sorted.into_iter();

    let Some(first) = dates.next() else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let (mut window_start, mut prev) = (first, first);
    for date in dates {
        if date - prev > Duration::days(max_gap_days) {
            ranges.push(FetchRange::inclusive(window_start, prev));
            window_start = date;
        }
        prev = date;
    }
    ranges.push(FetchRange::inclusive(window_start, prev));
    ranges
}

/// Dates missing per instrument inside its own stored span.
///
/// The reference calendar is every date on which any instrument has a row.
/// An instrument's gaps are the calendar dates between its first and last
/// stored date where it has no row. Instruments with no rows at all have no
/// span and therefore no gaps.
pub fn find_gap_dates(rows: &[PriceRow], instrument_ids: &[String]) -> BTreeMap<String, Vec<NaiveDate>> {
    let calendar: BTreeSet<NaiveDate> = rows.iter().map(|r| r.date).collect();

    let wanted: HashSet<&str> = instrument_ids.iter().map(String::as_str).collect();
    let mut held: HashMap<&str, BTreeSet<NaiveDate>> = HashMap::new();
    for row in rows {
        if wanted.contains(row.instrument_id.as_str()) {
            held.entry(row.instrument_id.as_str()).or_default().insert(row.date);
        }
    }

    let mut gaps = BTreeMap::new();
    for id in instrument_ids {
        let Some(dates) = held.get(id.as_str()) else {
            continue;
        };
        let (Some(&first), Some(&last)) = (dates.first(), dates.last()) else {
            continue;
        };
        let missing: Vec<NaiveDate> = calendar
            .range(first..=last)
            .filter(|d| !dates.contains(d))
            .copied()
            .collect();
        if !missing.is_empty() {
            gaps.insert(id.clone(), missing);
        }
    }
    gaps
}

/// Fetch windows plus the exact dates to keep from each fetched window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillPlan {
    pub ranges: BTreeMap<String, Vec<FetchRange>>,
    pub keep: HashMap<String, HashSet<NaiveDate>>,
}

impl BackfillPlan {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn gap_count(&self) -> usize {
        self.keep.values().map(HashSet::len).sum()
    }
}

/// Turn per-instrument gap dates into a backfill plan.
pub fn plan_backfill(gaps: &BTreeMap<String, Vec<NaiveDate>>, max_gap_days: i64) -> BackfillPlan {
    let mut plan = BackfillPlan::default();
    for (id, dates) in gaps {
        let ranges = missing_ranges_from_gaps(dates, max_gap_days);
        if ranges.is_empty() {
            continue;
        }
        plan.ranges.insert(id.clone(), ranges);
        plan.keep.insert(id.clone(), dates.iter().copied().collect());
    }
    plan
}
