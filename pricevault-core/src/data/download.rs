//! Month-by-month sync: walks calendar months and tops up each partition
//! from the day after its last stored row.
//!
//! Unlike the batched orchestrator this makes one provider call per month for
//! the whole instrument list, which suits a short daily catch-up run.

use super::gaps::{months_between, FetchRange};
use super::provider::FetchClient;
use super::schema::PriceRow;
use super::store::{PartitionKey, PartitionStore, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Per-month tallies of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    /// Months that received new rows.
    pub updated: usize,
    /// Months whose partition already reached the month end.
    pub up_to_date: usize,
    /// Months where the provider returned nothing (or failed).
    pub no_new_data: usize,
    /// Partitions left alone because they failed to parse.
    pub corrupt: Vec<PartitionKey>,
}

impl DownloadStats {
    pub fn months(&self) -> usize {
        self.updated + self.up_to_date + self.no_new_data + self.corrupt.len()
    }

    pub fn summary(&self) -> String {
        let mut s = format!(
            "Updated: {} | Up to date: {} | No new data: {}",
            self.updated, self.up_to_date, self.no_new_data
        );
        if !self.corrupt.is_empty() {
            s.push_str(&format!(" | Corrupt: {}", self.corrupt.len()));
        }
        s
    }
}

/// Sync every month from `start` through `end_cap` (inclusive).
///
/// For an existing partition the fetch window starts the day after its
/// latest stored date; for a missing one it covers the whole month. The last
/// month is cut off at `end_cap`.
pub fn sync_months(
    client: &dyn FetchClient,
    store: &PartitionStore,
    instrument_ids: &[String],
    start: NaiveDate,
    end_cap: NaiveDate,
) -> Result<DownloadStats, StoreError> {
    let mut stats = DownloadStats::default();
    let wanted: HashSet<&str> = instrument_ids.iter().map(String::as_str).collect();

    for key in months_between(start, end_cap) {
        let month_end = key.last_day().min(end_cap);
        let month_start = key.first_day().max(start);

        let existing = match store.load_existing(key) {
            Ok(rows) => rows,
            Err(e) if e.is_corrupt() => {
                warn!(partition = %key, error = %e, "skipping corrupt partition");
                stats.corrupt.push(key);
                continue;
            }
            Err(e) => return Err(e),
        };

        let fetch_start = match existing.as_deref().and_then(|rows| rows.iter().map(|r| r.date).max()) {
            Some(last) => match last.succ_opt() {
                Some(next) => next.max(month_start),
                None => {
                    stats.up_to_date += 1;
                    continue;
                }
            },
            None => month_start,
        };
        if fetch_start > month_end {
            debug!(partition = %key, "up to date");
            stats.up_to_date += 1;
            continue;
        }

        let range = FetchRange::inclusive(fetch_start, month_end);
        let rows: Vec<PriceRow> = match client.fetch(instrument_ids, range.start, range.end) {
            Ok(rows) => rows
                .into_iter()
                .filter(|r| PartitionKey::of(r.date) == key && range.contains(r.date))
                .filter(|r| wanted.contains(r.instrument_id.as_str()))
                .collect(),
            Err(e) => {
                warn!(partition = %key, %range, error = %e, "fetch failed");
                Vec::new()
            }
        };
        if rows.is_empty() {
            debug!(partition = %key, %range, "no new data");
            stats.no_new_data += 1;
            continue;
        }

        let path = store.resolve_partition_path(key.year(), key.month())?;
        match store.merge_and_save(&path, rows) {
            Ok(report) => {
                info!(partition = %key, rows = report.total_rows, "partition updated");
                stats.updated += 1;
            }
            Err(e) if e.is_corrupt() => {
                warn!(partition = %key, error = %e, "skipping corrupt partition");
                stats.corrupt.push(key);
            }
            Err(e) => return Err(e),
        }
    }

    info!("{}", stats.summary());
    Ok(stats)
}
