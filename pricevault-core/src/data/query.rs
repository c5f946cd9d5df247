//! Read path: load rows across partitions with instrument, date and column
//! filters.
//!
//! Partitions in range are parsed in parallel (rayon); the result is
//! deduplicated and sorted by `(date, instrument_id)` like a single partition.

use super::schema::{dedupe_and_sort, Column, PriceRow};
use super::store::{PartitionKey, PartitionStore, StoreError};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::debug;

/// Filter for [`load_rows`]. Empty `instrument_ids` means every instrument;
/// `start` and `end` are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowQuery {
    pub instrument_ids: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl RowQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instruments<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instrument_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn start(mut self, date: NaiveDate) -> Self {
        self.start = Some(date);
        self
    }

    pub fn end(mut self, date: NaiveDate) -> Self {
        self.end = Some(date);
        self
    }

    fn covers_partition(&self, key: PartitionKey) -> bool {
        self.start.map_or(true, |s| key >= PartitionKey::of(s))
            && self.end.map_or(true, |e| key <= PartitionKey::of(e))
    }

    fn matches(&self, row: &PriceRow, ids: &HashSet<&str>) -> bool {
        (ids.is_empty() || ids.contains(row.instrument_id.as_str()))
            && self.start.map_or(true, |s| row.date >= s)
            && self.end.map_or(true, |e| row.date <= e)
    }
}

/// Load every stored row matching `query`.
///
/// Partitions deleted between listing and reading are skipped; a corrupt
/// partition fails the whole query.
pub fn load_rows(store: &PartitionStore, query: &RowQuery) -> Result<Vec<PriceRow>, StoreError> {
    let paths: Vec<_> = store
        .partitions()?
        .into_iter()
        .filter(|(key, _)| query.covers_partition(*key))
        .map(|(_, path)| path)
        .collect();
    debug!(partitions = paths.len(), "loading rows");

    let ids: HashSet<&str> = query.instrument_ids.iter().map(String::as_str).collect();
    let chunks: Vec<Vec<PriceRow>> = paths
        .par_iter()
        .map(|path| match store.load_partition(path) {
            Ok(rows) => Ok(rows.into_iter().filter(|r| query.matches(r, &ids)).collect()),
            Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        })
        .collect::<Result<_, _>>()?;

    Ok(dedupe_and_sort(chunks.into_iter().flatten().collect()))
}

/// Project rows onto `columns`, in the given order, as rendered strings.
pub fn project(rows: &[PriceRow], columns: &[Column]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| columns.iter().map(|c| row.field(*c)).collect())
        .collect()
}
