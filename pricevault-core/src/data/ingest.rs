//! Ingestion orchestrator — batches, retries, paces and stores fetched rows.
//!
//! Instruments that share an identical fetch window are served by one
//! provider call (split into batches of at most `max_batch_size`). Each batch
//! gets up to `max_retries` attempts with exponential backoff; an empty
//! result counts as a failed attempt, since "no data" and "rate limited" look
//! the same from here and have the same remedy. One adaptive delay paces the
//! whole run.
//!
//! Batches are issued strictly one after another. Cancellation is checked
//! between batches; whatever was merged before that stays on disk.

use super::gaps::{BackfillPlan, FetchRange};
use super::pacing::{
    AdaptiveDelay, Backoff, CancelFlag, SharedPacer, Sleeper, ThreadSleeper, DEFAULT_ADAPTIVE_CAP,
    DEFAULT_BACKOFF_CAP, DEFAULT_DECAY,
};
use super::provider::{FetchClient, IngestProgress, NoProgress};
use super::schema::{dedupe_and_sort, PriceRow};
use super::store::{split_by_partition, PartitionStore, StoreError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Batching, retry and pacing knobs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    pub max_batch_size: usize,
    /// Zero turns off both pacing and retry backoff.
    pub base_delay: Duration,
    pub max_retries: u32,
    pub backoff_cap: Duration,
    pub adaptive_cap: Duration,
    pub decay: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            base_delay: Duration::from_millis(300),
            max_retries: 3,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            adaptive_cap: DEFAULT_ADAPTIVE_CAP,
            decay: DEFAULT_DECAY,
        }
    }
}

/// What to fetch: one or more windows per instrument, plus optional keep-sets.
///
/// When an instrument has a keep-set, only rows on those dates are stored;
/// anything else the provider returns for it is discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestRequest {
    pub ranges: BTreeMap<String, Vec<FetchRange>>,
    pub keep: HashMap<String, HashSet<NaiveDate>>,
}

impl IngestRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same window for every instrument.
    pub fn uniform<I, S>(instrument_ids: I, range: FetchRange) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut req = Self::new();
        for id in instrument_ids {
            req.add_range(id, range);
        }
        req
    }

    pub fn add_range(&mut self, instrument_id: impl Into<String>, range: FetchRange) -> &mut Self {
        self.ranges.entry(instrument_id.into()).or_default().push(range);
        self
    }

    pub fn keep_only<I>(&mut self, instrument_id: impl Into<String>, dates: I) -> &mut Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        self.keep
            .entry(instrument_id.into())
            .or_default()
            .extend(dates);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl From<BackfillPlan> for IngestRequest {
    fn from(plan: BackfillPlan) -> Self {
        Self {
            ranges: plan.ranges,
            keep: plan.keep,
        }
    }
}

/// Per-run result.
///
/// `failed` holds every requested instrument that ended the run with zero
/// rows stored. That covers both "the provider kept failing" and "there was
/// simply no trading data"; the two cannot be told apart from here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionOutcome {
    /// Distinct `(date, instrument)` rows written per instrument.
    pub stored: BTreeMap<String, usize>,
    pub failed: Vec<String>,
    /// Partitions skipped for the rest of the run because they failed to parse.
    pub corrupt: Vec<PathBuf>,
    pub cancelled: bool,
}

impl IngestionOutcome {
    pub fn total_rows(&self) -> usize {
        self.stored.values().sum()
    }

    pub fn all_stored(&self) -> bool {
        self.failed.is_empty() && self.corrupt.is_empty() && !self.cancelled
    }
}

/// Errors that abort a run. Provider failures never do.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Instruments fetched together in one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub range: FetchRange,
    pub instrument_ids: Vec<String>,
}

/// Group instruments by identical window, then chunk each group.
///
/// Batches come out ordered by window, instruments sorted within a batch.
/// Empty windows are dropped.
pub fn plan_batches(request: &IngestRequest, max_batch_size: usize) -> Vec<Batch> {
    let mut groups: BTreeMap<FetchRange, BTreeSet<&str>> = BTreeMap::new();
    for (id, ranges) in &request.ranges {
        for range in ranges {
            if range.is_empty() {
                debug!(instrument = %id, %range, "skipping empty range");
                continue;
            }
            groups.entry(*range).or_default().insert(id.as_str());
        }
    }

    let size = max_batch_size.max(1);
    let mut batches = Vec::new();
    for (range, ids) in groups {
        let ids: Vec<String> = ids.into_iter().map(String::from).collect();
        for chunk in ids.chunks(size) {
            batches.push(Batch {
                range,
                instrument_ids: chunk.to_vec(),
            });
        }
    }
    batches
}

/// Drives fetch → filter → merge for one storage root.
pub struct Ingestor<'a> {
    client: &'a dyn FetchClient,
    store: &'a PartitionStore,
    pacing: PacingConfig,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancelFlag,
}

impl<'a> Ingestor<'a> {
    pub fn new(client: &'a dyn FetchClient, store: &'a PartitionStore, pacing: PacingConfig) -> Self {
        Self {
            client,
            store,
            pacing,
            sleeper: Arc::new(ThreadSleeper),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    pub fn run(&self, request: &IngestRequest) -> Result<IngestionOutcome, IngestError> {
        self.run_with_progress(request, &NoProgress)
    }

    pub fn run_with_progress(
        &self,
        request: &IngestRequest,
        progress: &dyn IngestProgress,
    ) -> Result<IngestionOutcome, IngestError> {
        let batches = plan_batches(request, self.pacing.max_batch_size);
        let total = batches.len();
        let pacer = SharedPacer::new(AdaptiveDelay::new(
            self.pacing.base_delay,
            self.pacing.adaptive_cap,
            self.pacing.decay,
        ));

        info!(
            client = self.client.name(),
            instruments = request.ranges.len(),
            batches = total,
            "starting ingest"
        );

        // Distinct dates stored per instrument; overlapping windows count once.
        let mut stored: HashMap<String, HashSet<NaiveDate>> = HashMap::new();
        let mut poisoned: BTreeSet<PathBuf> = BTreeSet::new();
        let mut cancelled = false;

        for (i, batch) in batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(remaining = total - i, "ingest cancelled");
                cancelled = true;
                break;
            }
            if !self.client.is_available() {
                warn!(
                    client = self.client.name(),
                    remaining = total - i,
                    "provider unavailable, abandoning remaining batches"
                );
                break;
            }

            progress.on_batch_start(i, total, &batch.instrument_ids, batch.range);
            let rows = self.fetch_with_retry(batch, &pacer);

            if rows.is_empty() {
                let delay = pacer.on_failure();
                warn!(
                    range = %batch.range,
                    instruments = batch.instrument_ids.len(),
                    delay_ms = delay.as_millis() as u64,
                    "batch returned nothing after retries"
                );
                progress.on_batch_complete(i, total, 0);
                continue;
            }

            let written = self.store_batch(batch, rows, &request.keep, &mut poisoned, &mut stored)?;
            progress.on_batch_complete(i, total, written);

            let delay = pacer.on_success();
            if i + 1 < total {
                self.sleeper.sleep(delay);
            }
        }

        let mut outcome = IngestionOutcome {
            cancelled,
            corrupt: poisoned.into_iter().collect(),
            ..Default::default()
        };
        for id in request.ranges.keys() {
            match stored.get(id) {
                Some(dates) if !dates.is_empty() => {
                    outcome.stored.insert(id.clone(), dates.len());
                }
                _ => outcome.failed.push(id.clone()),
            }
        }

        progress.on_run_complete(outcome.stored.len(), outcome.failed.len());
        info!(
            stored = outcome.stored.len(),
            failed = outcome.failed.len(),
            rows = outcome.total_rows(),
            cancelled,
            "ingest finished"
        );
        Ok(outcome)
    }

    /// Up to `max_retries` attempts; an empty result or an error both count
    /// as failure. Returns an empty set when every attempt failed.
    fn fetch_with_retry(&self, batch: &Batch, pacer: &SharedPacer) -> Vec<PriceRow> {
        let attempts = self.pacing.max_retries.max(1);
        let mut backoff = Backoff::new(pacer.current(), self.pacing.backoff_cap);

        for attempt in 1..=attempts {
            match self
                .client
                .fetch(&batch.instrument_ids, batch.range.start, batch.range.end)
            {
                Ok(rows) if !rows.is_empty() => {
                    debug!(range = %batch.range, attempt, rows = rows.len(), "batch fetched");
                    return rows;
                }
                Ok(_) => debug!(range = %batch.range, attempt, "empty result"),
                Err(e) => warn!(range = %batch.range, attempt, error = %e, "fetch failed"),
            }
            if attempt < attempts {
                self.sleeper.sleep(backoff.next_delay());
            }
        }
        Vec::new()
    }

    /// Filter a successful batch and merge it partition by partition.
    ///
    /// Rows for instruments outside the batch are ignored. A partition that
    /// turns out to be corrupt is skipped for the rest of the run; other I/O
    /// errors abort it.
    fn store_batch(
        &self,
        batch: &Batch,
        rows: Vec<PriceRow>,
        keep: &HashMap<String, HashSet<NaiveDate>>,
        poisoned: &mut BTreeSet<PathBuf>,
        stored: &mut HashMap<String, HashSet<NaiveDate>>,
    ) -> Result<usize, IngestError> {
        let members: HashSet<&str> = batch.instrument_ids.iter().map(String::as_str).collect();
        let kept: Vec<PriceRow> = rows
            .into_iter()
            .filter(|r| members.contains(r.instrument_id.as_str()))
            .filter(|r| keep.get(&r.instrument_id).map_or(true, |k| k.contains(&r.date)))
            .collect();
        let kept = dedupe_and_sort(kept);

        let mut written = 0;
        for (key, part) in split_by_partition(kept) {
            let path = self.store.resolve_partition_path(key.year(), key.month())?;
            if poisoned.contains(&path) {
                continue;
            }

            let keys: Vec<(String, NaiveDate)> = part
                .iter()
                .map(|r| (r.instrument_id.clone(), r.date))
                .collect();

            match self.store.merge_and_save(&path, part) {
                Ok(_) => {
                    written += keys.len();
                    for (id, date) in keys {
                        stored.entry(id).or_default().insert(date);
                    }
                }
                Err(e) if e.is_corrupt() => {
                    warn!(partition = %key, error = %e, "skipping corrupt partition for this run");
                    poisoned.insert(path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::FetchError;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(date: NaiveDate, id: &str, close: f64) -> PriceRow {
        PriceRow {
            close: Some(close),
            ..PriceRow::empty(date, id)
        }
    }

    /// Replays scripted responses; once exhausted, returns empty.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<Vec<PriceRow>, FetchError>>>,
        calls: Mutex<Vec<(Vec<String>, FetchRange)>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Vec<PriceRow>, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<(Vec<String>, FetchRange)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl FetchClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fetch(&self, ids: &[String], start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceRow>, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push((ids.to_vec(), FetchRange::new(start, end)));
            self.responses.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Duration>>);

    impl Sleeper for Recorder {
        fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn pacing(base: Duration, retries: u32) -> PacingConfig {
        PacingConfig {
            max_batch_size: 2,
            base_delay: base,
            max_retries: retries,
            ..Default::default()
        }
    }

    #[test]
    fn batches_group_by_window_and_chunk() {
        let jan = FetchRange::new(d(2024, 1, 1), d(2024, 2, 1));
        let feb = FetchRange::new(d(2024, 2, 1), d(2024, 3, 1));
        let mut req = IngestRequest::uniform(["C", "A", "B"], jan);
        req.add_range("A", feb);
        req.add_range("D", FetchRange::new(d(2024, 2, 1), d(2024, 2, 1)));

        let batches = plan_batches(&req, 2);
        assert_eq!(
            batches,
            vec![
                Batch { range: jan, instrument_ids: vec!["A".into(), "B".into()] },
                Batch { range: jan, instrument_ids: vec!["C".into()] },
                Batch { range: feb, instrument_ids: vec!["A".into()] },
            ]
        );
        assert_eq!(plan_batches(&req, 0).len(), 4);
    }

    #[test]
    fn retries_with_doubling_backoff_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let client = Scripted::new(vec![
            Ok(Vec::new()),
            Err(FetchError::Transport("reset".into())),
            Ok(vec![row(d(2024, 1, 2), "A", 1.0)]),
        ]);
        let sleeper = Arc::new(Recorder::default());

        let outcome = Ingestor::new(&client, &store, pacing(secs(1), 3))
            .with_sleeper(sleeper.clone())
            .run(&IngestRequest::uniform(["A"], FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
            .unwrap();

        assert_eq!(outcome.stored["A"], 1);
        assert_eq!(client.calls().len(), 3);
        // Two waits between three attempts; no pacing sleep after the last batch.
        assert_eq!(*sleeper.0.lock().unwrap(), vec![secs(1), secs(2)]);
    }

    #[test]
    fn exhausted_retries_mark_instrument_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let client = Scripted::new(Vec::new());
        let sleeper = Arc::new(Recorder::default());

        let outcome = Ingestor::new(&client, &store, pacing(Duration::ZERO, 4))
            .with_sleeper(sleeper)
            .run(&IngestRequest::uniform(["A"], FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
            .unwrap();

        assert!(outcome.stored.is_empty());
        assert_eq!(outcome.failed, vec!["A".to_string()]);
        assert_eq!(client.calls().len(), 4);
        assert!(store.partitions().unwrap().is_empty());
    }

    #[test]
    fn failed_batches_raise_backoff_seed_up_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let client = Scripted::new(Vec::new());
        let sleeper = Arc::new(Recorder::default());
        let mut req = IngestRequest::new();
        for m in 1..=5 {
            req.add_range("A", FetchRange::new(d(2024, m, 1), d(2024, m, 2)));
        }

        Ingestor::new(&client, &store, pacing(secs(1), 3))
            .with_sleeper(sleeper.clone())
            .run(&req)
            .unwrap();

        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![
                secs(1), secs(2),
                secs(2), secs(4),
                secs(4), secs(8),
                secs(5), secs(10),
                secs(5), secs(10),
            ]
        );
    }

    #[test]
    fn success_decays_delay_and_paces_next_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let client = Scripted::new(vec![
            Ok(Vec::new()),
            Ok(Vec::new()),
            Ok(vec![row(d(2024, 2, 1), "A", 1.0)]),
            Ok(vec![row(d(2024, 3, 1), "A", 1.0)]),
        ]);
        let sleeper = Arc::new(Recorder::default());
        let mut req = IngestRequest::new();
        req.add_range("A", FetchRange::new(d(2024, 1, 1), d(2024, 1, 2)));
        req.add_range("A", FetchRange::new(d(2024, 2, 1), d(2024, 2, 2)));
        req.add_range("A", FetchRange::new(d(2024, 3, 1), d(2024, 3, 2)));

        let outcome = Ingestor::new(&client, &store, pacing(secs(1), 2))
            .with_sleeper(sleeper.clone())
            .run(&req)
            .unwrap();

        assert_eq!(outcome.stored["A"], 2);
        // batch 1: backoff 1s, fails -> delay 2s
        // batch 2: succeeds first try -> delay 1.6s, paced before batch 3
        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![secs(1), Duration::from_millis(1600)]
        );
    }

    #[test]
    fn keep_set_filters_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let client = Scripted::new(vec![Ok(vec![
            row(d(2024, 1, 2), "A", 1.0),
            row(d(2024, 1, 3), "A", 2.0),
            row(d(2024, 1, 4), "A", 3.0),
        ])]);
        let mut req = IngestRequest::uniform(["A"], FetchRange::new(d(2024, 1, 2), d(2024, 1, 5)));
        req.keep_only("A", [d(2024, 1, 3)]);

        let outcome = Ingestor::new(&client, &store, pacing(Duration::ZERO, 1))
            .run(&req)
            .unwrap();

        assert_eq!(outcome.stored["A"], 1);
        let rows = store.load_existing(crate::data::PartitionKey::of(d(2024, 1, 3))).unwrap().unwrap();
        assert_eq!(rows, vec![row(d(2024, 1, 3), "A", 2.0)]);
    }

    #[test]
    fn keep_set_emptying_result_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let client = Scripted::new(vec![Ok(vec![row(d(2024, 1, 2), "A", 1.0)])]);
        let mut req = IngestRequest::uniform(["A"], FetchRange::new(d(2024, 1, 2), d(2024, 1, 3)));
        req.keep_only("A", [d(2024, 1, 9)]);

        let outcome = Ingestor::new(&client, &store, pacing(Duration::ZERO, 1))
            .run(&req)
            .unwrap();

        assert_eq!(outcome.failed, vec!["A".to_string()]);
        assert!(store.partitions().unwrap().is_empty());
    }

    #[test]
    fn corrupt_partition_is_skipped_others_still_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let jan = store.resolve_partition_path(2024, 1).unwrap();
        fs::write(&jan, "garbage\n").unwrap();

        let client = Scripted::new(vec![Ok(vec![
            row(d(2024, 1, 31), "A", 1.0),
            row(d(2024, 2, 1), "A", 2.0),
        ])]);
        let outcome = Ingestor::new(&client, &store, pacing(Duration::ZERO, 1))
            .run(&IngestRequest::uniform(["A"], FetchRange::new(d(2024, 1, 31), d(2024, 2, 2))))
            .unwrap();

        assert_eq!(outcome.stored["A"], 1);
        assert_eq!(outcome.corrupt, vec![jan.clone()]);
        assert_eq!(fs::read_to_string(&jan).unwrap(), "garbage\n");
        assert!(!outcome.all_stored());
    }

    #[test]
    fn cancellation_stops_before_next_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let client = Scripted::new(vec![Ok(vec![row(d(2024, 1, 2), "A", 1.0)])]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let outcome = Ingestor::new(&client, &store, pacing(Duration::ZERO, 1))
            .with_cancel(cancel)
            .run(&IngestRequest::uniform(["A"], FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
            .unwrap();

        assert!(outcome.cancelled);
        assert!(client.calls().is_empty());
        assert_eq!(outcome.failed, vec!["A".to_string()]);
    }

    struct Blocked;

    impl FetchClient for Blocked {
        fn name(&self) -> &str {
            "blocked"
        }

        fn fetch(&self, _: &[String], _: NaiveDate, _: NaiveDate) -> Result<Vec<PriceRow>, FetchError> {
            panic!("must not be called while unavailable")
        }

        fn is_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn unavailable_provider_is_not_called() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let outcome = Ingestor::new(&Blocked, &store, pacing(Duration::ZERO, 3))
            .run(&IngestRequest::uniform(["A", "B"], FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
            .unwrap();

        assert_eq!(outcome.failed, vec!["A".to_string(), "B".to_string()]);
        assert!(!outcome.cancelled);
    }

    #[test]
    fn rows_for_foreign_instruments_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let client = Scripted::new(vec![Ok(vec![
            row(d(2024, 1, 2), "A", 1.0),
            row(d(2024, 1, 2), "ZZZ", 1.0),
        ])]);
        let outcome = Ingestor::new(&client, &store, pacing(Duration::ZERO, 1))
            .run(&IngestRequest::uniform(["A"], FetchRange::new(d(2024, 1, 1), d(2024, 2, 1))))
            .unwrap();

        assert_eq!(outcome.stored.len(), 1);
        let rows = store.load_existing(crate::data::PartitionKey::of(d(2024, 1, 2))).unwrap().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn overlapping_windows_count_each_row_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let days = |from: u32, to: u32| -> Vec<PriceRow> {
            (from..to).map(|day| row(d(2024, 1, day), "A", 1.0)).collect()
        };
        let client = Scripted::new(vec![Ok(days(1, 11)), Ok(days(6, 16))]);
        let mut req = IngestRequest::new();
        req.add_range("A", FetchRange::new(d(2024, 1, 1), d(2024, 1, 11)));
        req.add_range("A", FetchRange::new(d(2024, 1, 6), d(2024, 1, 16)));

        let outcome = Ingestor::new(&client, &store, pacing(Duration::ZERO, 1))
            .run(&req)
            .unwrap();

        let on_disk = store.load_existing(crate::data::PartitionKey::of(d(2024, 1, 1))).unwrap().unwrap();
        assert_eq!(on_disk.len(), 15);
        assert_eq!(outcome.stored["A"], 15);
        assert_eq!(outcome.total_rows(), 15);
    }
}
