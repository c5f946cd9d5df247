//! Fetch client capability and structured error types.
//!
//! The FetchClient trait abstracts over data providers (Yahoo Finance, test
//! doubles) so the orchestrator can batch, retry and pace without knowing
//! which provider it talks to.

use super::gaps::FetchRange;
use super::schema::PriceRow;
use chrono::NaiveDate;
use thiserror::Error;

/// Transport-level failures. Ordinary absence of data is an empty `Ok`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,
}

/// A provider of daily rows.
///
/// `end` is exclusive. Implementations return an empty set when there is no
/// data, and omit instrument ids they do not recognise instead of failing
/// the whole call.
pub trait FetchClient: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch rows for every id in `instrument_ids` over `[start, end)`.
    fn fetch(
        &self,
        instrument_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRow>, FetchError>;

    /// Whether the provider will currently accept requests (e.g. circuit
    /// breaker closed).
    fn is_available(&self) -> bool {
        true
    }
}

/// Progress callback for ingestion runs.
pub trait IngestProgress: Send + Sync {
    /// Called before a batch is fetched.
    fn on_batch_start(&self, index: usize, total: usize, instrument_ids: &[String], range: FetchRange);

    /// Called after a batch finished; `rows_stored` is zero when it failed.
    fn on_batch_complete(&self, index: usize, total: usize, rows_stored: usize);

    /// Called once at the end of a run.
    fn on_run_complete(&self, stored: usize, failed: usize);
}

/// Progress reporter that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl IngestProgress for NoProgress {
    fn on_batch_start(&self, _: usize, _: usize, _: &[String], _: FetchRange) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize) {}
    fn on_run_complete(&self, _: usize, _: usize) {}
}

/// Simple progress reporter that prints to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutProgress;

impl IngestProgress for StdoutProgress {
    fn on_batch_start(&self, index: usize, total: usize, instrument_ids: &[String], range: FetchRange) {
        println!(
            "[{}/{}] Fetching {} instrument(s) {range}...",
            index + 1,
            total,
            instrument_ids.len()
        );
    }

    fn on_batch_complete(&self, _index: usize, _total: usize, rows_stored: usize) {
        if rows_stored > 0 {
            println!("  OK: {rows_stored} rows stored");
        } else {
            println!("  EMPTY: nothing stored");
        }
    }

    fn on_run_complete(&self, stored: usize, failed: usize) {
        println!("\nIngest complete: {stored} instrument(s) stored, {failed} failed");
    }
}
