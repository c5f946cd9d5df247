//! Read-only wide panel of prices for pairwise analysis.
//!
//! Built once from loaded rows (date × instrument, adjusted close with close
//! as fallback) and shared behind an `Arc`. Workers only read it; nothing
//! mutates a snapshot after construction.

use crate::data::schema::PriceRow;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Fewest jointly observed dates for a pair to be usable.
pub const MIN_OBS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct PanelSnapshot {
    dates: Vec<NaiveDate>,
    instruments: Vec<String>,
    index: HashMap<String, usize>,
    /// One column per instrument, aligned with `dates`.
    columns: Vec<Vec<Option<f64>>>,
}

impl PanelSnapshot {
    /// Pivot rows into a panel. A row without adjusted close or close leaves
    /// its cell empty; a later duplicate `(date, instrument)` wins.
    pub fn from_rows(rows: &[PriceRow]) -> Self {
        let dates: Vec<NaiveDate> = rows
            .iter()
            .map(|r| r.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let instruments: Vec<String> = rows
            .iter()
            .map(|r| r.instrument_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(String::from)
            .collect();

        let date_pos: HashMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
        let index: HashMap<String, usize> = instruments
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut columns = vec![vec![None; dates.len()]; instruments.len()];
        for row in rows {
            if let (Some(&col), Some(&pos)) = (index.get(&row.instrument_id), date_pos.get(&row.date)) {
                columns[col][pos] = row.adjusted_close.or(row.close);
            }
        }

        Self {
            dates,
            instruments,
            index,
            columns,
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn series(&self, instrument_id: &str) -> Option<&[Option<f64>]> {
        self.index
            .get(instrument_id)
            .map(|&i| self.columns[i].as_slice())
    }

    /// Values of `a` and `b` on the dates where both are present.
    ///
    /// `None` when either instrument is unknown or fewer than [`MIN_OBS`]
    /// dates overlap.
    pub fn aligned_pair(&self, a: &str, b: &str) -> Option<(Vec<f64>, Vec<f64>)> {
        let (xa, xb) = (self.series(a)?, self.series(b)?);
        let (left, right): (Vec<f64>, Vec<f64>) = xa
            .iter()
            .zip(xb)
            .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
            .unzip();
        (left.len() >= MIN_OBS).then_some((left, right))
    }

    /// Run `f` over every pair in parallel against this one snapshot.
    /// Pairs with too little overlap are skipped; input order is kept.
    pub fn map_pairs<F, R>(&self, pairs: &[(String, String)], f: F) -> Vec<(String, String, R)>
    where
        F: Fn(&[f64], &[f64]) -> R + Sync + Send,
        R: Send,
    {
        pairs
            .par_iter()
            .filter_map(|(a, b)| {
                let (xa, xb) = self.aligned_pair(a, b)?;
                Some((a.clone(), b.clone(), f(&xa, &xb)))
            })
            .collect()
    }
}
