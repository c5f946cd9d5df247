//! End-to-end ingestion tests against a real storage root and a scripted
//! provider: resume, batch failures, backoff bounds, backfill and reset.

use chrono::NaiveDate;
use pricevault_core::data::{
    find_gap_dates, load_rows, plan_backfill, resume_start_date, FetchClient, FetchError,
    FetchRange, IngestRequest, Ingestor, PacingConfig, PartitionKey, PartitionStore, PriceRow,
    RowQuery, Sleeper,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn row(date: NaiveDate, id: &str, close: f64) -> PriceRow {
    PriceRow {
        open: Some(close),
        high: Some(close),
        low: Some(close),
        close: Some(close),
        volume: Some(1_000),
        adjusted_close: Some(close),
        ..PriceRow::empty(date, id)
    }
}

// ── Test doubles ─────────────────────────────────────────────────────

/// Serves rows from a fixed table, filtered to the requested ids and window.
struct TableClient {
    table: Vec<PriceRow>,
    /// Ids the provider pretends not to know.
    missing: Vec<String>,
    calls: Mutex<Vec<(Vec<String>, FetchRange)>>,
}

impl TableClient {
    fn new(table: Vec<PriceRow>) -> Self {
        Self {
            table,
            missing: Vec::new(),
            calls: Mutex::default(),
        }
    }

    fn calls(&self) -> Vec<(Vec<String>, FetchRange)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FetchClient for TableClient {
    fn name(&self) -> &str {
        "table"
    }

    fn fetch(&self, ids: &[String], start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceRow>, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((ids.to_vec(), FetchRange::new(start, end)));
        Ok(self
            .table
            .iter()
            .filter(|r| ids.contains(&r.instrument_id) && !self.missing.contains(&r.instrument_id))
            .filter(|r| r.date >= start && r.date < end)
            .cloned()
            .collect())
    }
}

/// Always fails.
struct DownClient;

impl FetchClient for DownClient {
    fn name(&self) -> &str {
        "down"
    }

    fn fetch(&self, _: &[String], _: NaiveDate, _: NaiveDate) -> Result<Vec<PriceRow>, FetchError> {
        Err(FetchError::RateLimited { retry_after_secs: 1 })
    }
}

#[derive(Default)]
struct RecordingSleeper(Mutex<Vec<Duration>>);

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

fn quiet_pacing() -> PacingConfig {
    PacingConfig {
        base_delay: Duration::ZERO,
        ..PacingConfig::default()
    }
}

// ── End to end ───────────────────────────────────────────────────────

#[test]
fn january_run_writes_only_january_partition() {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionStore::new(dir.path());
    let client = TableClient::new(vec![row(d(2024, 1, 2), "X", 10.0), row(d(2024, 1, 3), "X", 11.0)]);

    let outcome = Ingestor::new(&client, &store, quiet_pacing())
        .run(&IngestRequest::uniform(["X"], FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
        .unwrap();

    assert_eq!(outcome.stored, BTreeMap::from([("X".to_string(), 2)]));
    assert!(outcome.failed.is_empty());

    let jan = store.load_existing(PartitionKey::of(d(2024, 1, 1))).unwrap().unwrap();
    assert_eq!(jan.len(), 2);
    assert!(store.load_existing(PartitionKey::of(d(2024, 2, 1))).unwrap().is_none());

    let path = store.partition_path(PartitionKey::of(d(2024, 1, 1)));
    assert!(path.ends_with("2024/PRICES_2024-M01.csv"));
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.starts_with("date,instrument_id,open,high,low,close,volume,adjusted_close\n"));
}

#[test]
fn partial_batch_marks_missing_instrument_failed() {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionStore::new(dir.path());
    let mut client = TableClient::new(vec![
        row(d(2024, 1, 2), "A", 1.0),
        row(d(2024, 1, 2), "B", 2.0),
        row(d(2024, 1, 2), "C", 3.0),
    ]);
    client.missing = vec!["C".to_string()];

    let outcome = Ingestor::new(&client, &store, quiet_pacing())
        .run(&IngestRequest::uniform(["A", "B", "C"], FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
        .unwrap();

    assert_eq!(outcome.stored.keys().collect::<Vec<_>>(), vec!["A", "B"]);
    assert_eq!(outcome.failed, vec!["C".to_string()]);
    // The batch as a whole succeeded, so it was not retried.
    assert_eq!(client.calls().len(), 1);
}

#[test]
fn backoff_between_attempts_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionStore::new(dir.path());
    let sleeper = Arc::new(RecordingSleeper::default());
    let pacing = PacingConfig {
        max_batch_size: 1,
        base_delay: Duration::from_millis(300),
        max_retries: 6,
        ..PacingConfig::default()
    };
    let ids: Vec<String> = (0..8).map(|i| format!("S{i}")).collect();

    let outcome = Ingestor::new(&DownClient, &store, pacing.clone())
        .with_sleeper(sleeper.clone())
        .run(&IngestRequest::uniform(ids.clone(), FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
        .unwrap();

    assert_eq!(outcome.failed, ids);
    let sleeps = sleeper.0.lock().unwrap().clone();
    // max_retries - 1 waits per batch, none after the final attempt.
    assert_eq!(sleeps.len(), 8 * 5);
    assert!(sleeps.iter().all(|s| *s <= pacing.backoff_cap));
    assert!(sleeps.contains(&pacing.backoff_cap));
    assert!(store.partitions().unwrap().is_empty());
}

#[test]
fn batching_respects_max_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionStore::new(dir.path());
    let ids: Vec<String> = (0..45).map(|i| format!("S{i:02}")).collect();
    let client = TableClient::new(ids.iter().map(|id| row(d(2024, 1, 2), id, 1.0)).collect());

    let outcome = Ingestor::new(&client, &store, quiet_pacing())
        .run(&IngestRequest::uniform(ids.clone(), FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
        .unwrap();

    let sizes: Vec<usize> = client.calls().iter().map(|(ids, _)| ids.len()).collect();
    assert_eq!(sizes, vec![20, 20, 5]);
    assert_eq!(outcome.stored.len(), 45);
    let jan = store.load_existing(PartitionKey::of(d(2024, 1, 2))).unwrap().unwrap();
    assert_eq!(jan.len(), 45);
}

// ── Resume and reset ─────────────────────────────────────────────────

#[test]
fn second_run_resumes_from_latest_month_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionStore::new(dir.path());
    let table = vec![
        row(d(2024, 2, 28), "A", 1.0),
        row(d(2024, 3, 1), "A", 2.0),
        row(d(2024, 3, 4), "A", 3.0),
    ];
    let client = TableClient::new(table);
    let configured = d(2024, 1, 1);
    let end = d(2024, 3, 5);

    let (start, latest) = resume_start_date(&store, configured, false).unwrap();
    assert_eq!((start, latest), (configured, None));
    let req = IngestRequest::uniform(["A"], FetchRange::new(start, end));
    Ingestor::new(&client, &store, quiet_pacing()).run(&req).unwrap();

    let feb_path = store.partition_path(PartitionKey::of(d(2024, 2, 1)));
    let mar_path = store.partition_path(PartitionKey::of(d(2024, 3, 1)));
    let feb_before = std::fs::read(&feb_path).unwrap();
    let mar_before = std::fs::read(&mar_path).unwrap();

    let (start, latest) = resume_start_date(&store, configured, false).unwrap();
    assert_eq!(start, d(2024, 3, 1));
    assert_eq!(latest, PartitionKey::new(2024, 3));

    let req = IngestRequest::uniform(["A"], FetchRange::new(start, end));
    let outcome = Ingestor::new(&client, &store, quiet_pacing()).run(&req).unwrap();
    assert_eq!(outcome.stored["A"], 2);

    assert_eq!(std::fs::read(&feb_path).unwrap(), feb_before);
    assert_eq!(std::fs::read(&mar_path).unwrap(), mar_before);
}

#[test]
fn forced_reset_starts_from_configured_date() {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionStore::new(dir.path());
    store
        .merge_rows(vec![row(d(2023, 12, 1), "A", 1.0), row(d(2024, 5, 1), "A", 1.0)])
        .unwrap();

    let (start, latest) = resume_start_date(&store, d(2020, 1, 1), true).unwrap();

    assert_eq!(start, d(2020, 1, 1));
    assert_eq!(latest, None);
    assert!(store.partitions().unwrap().is_empty());
}

// ── Backfill ─────────────────────────────────────────────────────────

#[test]
fn backfill_fills_only_gap_dates() {
    let dir = tempfile::tempdir().unwrap();
    let store = PartitionStore::new(dir.path());
    let days = [d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4), d(2024, 1, 5)];
    let mut stored: Vec<PriceRow> = days.iter().map(|&day| row(day, "A", 1.0)).collect();
    stored.push(row(days[0], "B", 1.0));
    stored.push(row(days[3], "B", 1.0));
    store.merge_rows(stored).unwrap();

    let ids = vec!["A".to_string(), "B".to_string()];
    let rows = load_rows(&store, &RowQuery::new()).unwrap();
    let gaps = find_gap_dates(&rows, &ids);
    assert_eq!(gaps, BTreeMap::from([("B".to_string(), vec![days[1], days[2]])]));

    // The provider has a revised value for A too; A is not in the plan.
    let client = TableClient::new(
        days.iter()
            .flat_map(|&day| [row(day, "A", 9.0), row(day, "B", 2.0)])
            .collect(),
    );
    let plan = plan_backfill(&gaps, 30);
    assert_eq!(plan.gap_count(), 2);
    let outcome = Ingestor::new(&client, &store, quiet_pacing())
        .run(&plan.into())
        .unwrap();

    assert_eq!(outcome.stored, BTreeMap::from([("B".to_string(), 2)]));
    let after = load_rows(&store, &RowQuery::new()).unwrap();
    assert_eq!(after.len(), 8);
    let b_closes: HashMap<NaiveDate, Option<f64>> = after
        .iter()
        .filter(|r| r.instrument_id == "B")
        .map(|r| (r.date, r.close))
        .collect();
    assert_eq!(b_closes[&days[0]], Some(1.0));
    assert_eq!(b_closes[&days[1]], Some(2.0));
    assert!(after.iter().filter(|r| r.instrument_id == "A").all(|r| r.close == Some(1.0)));
}
