//! Yahoo Finance fetch client.
//!
//! Fetches daily rows from Yahoo's v8 chart API, one request per instrument.
//! The API has no batch endpoint, so a multi-instrument fetch is a loop here;
//! retries and pacing belong to the ingestion orchestrator.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. A 403 is treated as an IP ban and trips the circuit breaker.
//!
//! A failure on one instrument skips that instrument; the call only fails
//! when nothing was fetched. A 429 or a tripped breaker ends the batch early.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{FetchClient, FetchError};
use super::schema::{map_provider_record, PriceRow, ProviderRecord};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CHART_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Result of one per-instrument request.
enum Fetched {
    Rows(Vec<PriceRow>),
    NotFound,
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: CHART_BASE_URL.to_string(),
        })
    }

    /// Point at a different chart endpoint (mirrors, local stubs).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `period2` is midnight of `end`, which makes the window end-exclusive.
    fn chart_url(&self, instrument_id: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::default()).and_utc().timestamp();
        let end_ts = end.and_time(chrono::NaiveTime::default()).and_utc().timestamp();
        format!(
            "{}/{instrument_id}?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true",
            self.base_url
        )
    }

    /// Map one chart response into rows.
    ///
    /// Rows with no OHLCV at all (holidays) are dropped; an unknown symbol
    /// comes back as `NotFound`.
    fn parse_response(instrument_id: &str, resp: ChartResponse) -> Result<Fetched, FetchError> {
        let Some(result) = resp.chart.result else {
            return match resp.chart.error {
                Some(err) if err.code == "Not Found" => Ok(Fetched::NotFound),
                Some(err) => Err(FetchError::ResponseFormat(format!(
                    "{}: {}",
                    err.code, err.description
                ))),
                None => Err(FetchError::ResponseFormat("empty result with no error".into())),
            };
        };

        let Some(data) = result.into_iter().next() else {
            return Ok(Fetched::Rows(Vec::new()));
        };
        // No timestamps means no trading days in the window.
        let Some(timestamps) = data.timestamp else {
            return Ok(Fetched::Rows(Vec::new()));
        };

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormat("no quote data".into()))?;
        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose)
            .unwrap_or_default();

        let at = |v: &[Option<f64>], i: usize| v.get(i).copied().flatten();
        let rows = timestamps
            .iter()
            .enumerate()
            .filter_map(|(i, &timestamp)| {
                map_provider_record(&ProviderRecord {
                    instrument_id: instrument_id.to_string(),
                    timestamp,
                    open: at(&quote.open, i),
                    high: at(&quote.high, i),
                    low: at(&quote.low, i),
                    close: at(&quote.close, i),
                    volume: at(&quote.volume, i),
                    adjusted_close: at(&adj_closes, i),
                })
            })
            .collect();
        Ok(Fetched::Rows(rows))
    }

    fn fetch_one(&self, instrument_id: &str, start: NaiveDate, end: NaiveDate) -> Result<Fetched, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitBreakerTripped);
        }

        let url = self.chart_url(instrument_id, start, end);
        let resp = self.client.get(&url).send().map_err(|e| {
            self.circuit_breaker.record_failure();
            FetchError::Transport(e.to_string())
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(FetchError::CircuitBreakerTripped);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(FetchError::RateLimited { retry_after_secs });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Fetched::NotFound);
        }
        if !status.is_success() {
            self.circuit_breaker.record_failure();
            return Err(FetchError::Transport(format!("HTTP {status} for {instrument_id}")));
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            FetchError::ResponseFormat(format!("failed to parse response for {instrument_id}: {e}"))
        })?;
        let fetched = Self::parse_response(instrument_id, chart)?;
        self.circuit_breaker.record_success();
        Ok(fetched)
    }
}

impl FetchClient for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        instrument_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRow>, FetchError> {
        let mut rows = Vec::new();
        let mut last_err = None;
        for id in instrument_ids {
            match self.fetch_one(id, start, end) {
                Ok(Fetched::Rows(mut fetched)) => {
                    debug!(instrument = %id, rows = fetched.len(), "yahoo fetch");
                    rows.append(&mut fetched);
                }
                Ok(Fetched::NotFound) => warn!(instrument = %id, "symbol not found, skipping"),
                // Rate limit or ban: later ids would fail the same way.
                Err(e @ (FetchError::RateLimited { .. } | FetchError::CircuitBreakerTripped)) => {
                    warn!(instrument = %id, error = %e, fetched = rows.len(), "stopping batch");
                    last_err = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(instrument = %id, error = %e, "fetch failed, skipping");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if rows.is_empty() => Err(e),
            _ => Ok(rows),
        }
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
