//! Monthly partition store.
//!
//! Layout: `{root}/{year}/PRICES_{year}-M{MM}.csv`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Merge with last-write-wins dedupe on `(date, instrument_id)`
//! - Deterministic row order (`date`, then `instrument_id`)
//! - Strict load: a malformed file is reported as corrupt, never partially read
//! - One in-process lock per partition path, held for the whole merge

use super::index::{self, FsPartitionIndex, PartitionIndex};
use super::schema::{check_header, dedupe_and_sort, PriceRow, COLUMNS};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// File name prefix shared by all partitions.
pub const PARTITION_PREFIX: &str = "PRICES_";

/// File extension of a partition.
pub const PARTITION_EXT: &str = "csv";

/// Errors raised by the partition store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("partition not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("corrupt partition {}: {reason}", path.display())]
    CorruptPartition { path: PathBuf, reason: String },

    #[error("invalid partition month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl fmt::Display) -> Self {
        StoreError::CorruptPartition {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::CorruptPartition { .. })
    }
}

// ── Partition keys ──────────────────────────────────────────────────

/// A `(year, month)` partition address. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    year: i32,
    month: u32,
}

impl PartitionKey {
    /// Returns `None` for a month outside 1..=12 or a year chrono cannot represent.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    /// The partition a date belongs to.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MAX)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.first_day()
            .checked_add_months(Months::new(1))
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    /// The following month.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// `PRICES_{year}-M{MM}.csv`
    pub fn file_name(&self) -> String {
        format!(
            "{PARTITION_PREFIX}{}-M{:02}.{PARTITION_EXT}",
            self.year, self.month
        )
    }

    /// Inverse of [`file_name`](Self::file_name). Anything else yields `None`.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name
            .strip_prefix(PARTITION_PREFIX)?
            .strip_suffix(PARTITION_EXT)?
            .strip_suffix('.')?;
        let (year, month) = stem.split_once("-M")?;
        if month.len() != 2 {
            return None;
        }
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-M{:02}", self.year, self.month)
    }
}

/// Group rows by the partition their date falls in.
pub fn split_by_partition(rows: Vec<PriceRow>) -> BTreeMap<PartitionKey, Vec<PriceRow>> {
    let mut by_month: BTreeMap<PartitionKey, Vec<PriceRow>> = BTreeMap::new();
    for row in rows {
        by_month.entry(PartitionKey::of(row.date)).or_default().push(row);
    }
    by_month
}

// ── Store ───────────────────────────────────────────────────────────

/// What a single merge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub path: PathBuf,
    pub existing_rows: usize,
    pub incoming_rows: usize,
    pub total_rows: usize,
    /// False when the rewritten file is byte-identical to the previous one.
    pub changed: bool,
}

/// The partition store. Sole owner of on-disk partition state under `root`.
#[derive(Debug)]
pub struct PartitionStore {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PartitionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a partition, without touching the filesystem.
    pub fn partition_path(&self, key: PartitionKey) -> PathBuf {
        self.root
            .join(key.year().to_string())
            .join(key.file_name())
    }

    /// Path of the `(year, month)` partition; creates the year directory.
    pub fn resolve_partition_path(&self, year: i32, month: u32) -> Result<PathBuf, StoreError> {
        let key = PartitionKey::new(year, month).ok_or(StoreError::InvalidMonth { year, month })?;
        let path = self.partition_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        Ok(path)
    }

    /// Load every row of one partition.
    pub fn load_partition(&self, path: &Path) -> Result<Vec<PriceRow>, StoreError> {
        let bytes = read_partition_bytes(path)?;
        parse_partition(path, &bytes)
    }

    /// Load a partition by key; `Ok(None)` when it does not exist yet.
    pub fn load_existing(&self, key: PartitionKey) -> Result<Option<Vec<PriceRow>>, StoreError> {
        match self.load_partition(&self.partition_path(key)) {
            Ok(rows) => Ok(Some(rows)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Merge `incoming` into the partition at `path`.
    ///
    /// Existing rows come first, so an incoming row replaces a stored row with
    /// the same key. The result is deduplicated, sorted, and written through a
    /// temp file in the same directory, so readers see either the old or the
    /// new content. A corrupt existing file aborts the merge untouched.
    pub fn merge_and_save(
        &self,
        path: &Path,
        incoming: Vec<PriceRow>,
    ) -> Result<MergeReport, StoreError> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (previous, mut rows) = match read_partition_bytes(path) {
            Ok(bytes) => {
                let rows = parse_partition(path, &bytes)?;
                (Some(bytes), rows)
            }
            Err(StoreError::NotFound { .. }) => (None, Vec::new()),
            Err(e) => return Err(e),
        };

        let existing_rows = rows.len();
        let incoming_rows = incoming.len();
        rows.extend(incoming);
        let merged = dedupe_and_sort(rows);

        // A header-only file would count as stored data.
        if previous.is_none() && merged.is_empty() {
            debug!(path = %path.display(), "nothing to merge into missing partition");
            return Ok(MergeReport {
                path: path.to_path_buf(),
                existing_rows,
                incoming_rows,
                total_rows: 0,
                changed: false,
            });
        }

        let bytes = encode_partition(path, &merged)?;
        let changed = previous
            .as_deref()
            .map_or(true, |old| blake3::hash(old) != blake3::hash(&bytes));

        if changed {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            write_atomic(path, &bytes)?;
        }

        debug!(
            path = %path.display(),
            existing_rows,
            incoming_rows,
            total_rows = merged.len(),
            changed,
            "merged partition"
        );

        Ok(MergeReport {
            path: path.to_path_buf(),
            existing_rows,
            incoming_rows,
            total_rows: merged.len(),
            changed,
        })
    }

    /// Route rows to their monthly partitions and merge each one.
    ///
    /// Stops at the first failing partition; partitions merged before it stay
    /// written.
    pub fn merge_rows(&self, rows: Vec<PriceRow>) -> Result<Vec<MergeReport>, StoreError> {
        let mut reports = Vec::new();
        for (key, part) in split_by_partition(rows) {
            let path = self.resolve_partition_path(key.year(), key.month())?;
            reports.push(self.merge_and_save(&path, part)?);
        }
        Ok(reports)
    }

    /// All partitions under the root, oldest first.
    pub fn partitions(&self) -> Result<Vec<(PartitionKey, PathBuf)>, StoreError> {
        index::scan_partitions(&self.root)
    }

    /// Greatest `(year, month)` stored, or `None` for an empty or absent root.
    pub fn find_latest_partition_with_data(&self) -> Result<Option<PartitionKey>, StoreError> {
        FsPartitionIndex::new(&self.root).latest_partition()
    }

    /// Latest stored date per requested instrument; unseen instruments map to `None`.
    pub fn find_last_date_per_instrument(
        &self,
        instrument_ids: &[String],
    ) -> Result<HashMap<String, Option<NaiveDate>>, StoreError> {
        FsPartitionIndex::new(&self.root).last_date_per_instrument(instrument_ids)
    }

    /// Remove every partition file under the root. Irreversible.
    ///
    /// Leftover temp files from interrupted writes are removed as well but
    /// not counted.
    pub fn delete_all_partitions(&self) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for year_dir in index::year_dirs(&self.root)? {
            let entries = fs::read_dir(&year_dir).map_err(|e| StoreError::io(&year_dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| StoreError::io(&year_dir, e))?;
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let is_partition = PartitionKey::parse_file_name(name).is_some();
                let is_temp = name.starts_with(PARTITION_PREFIX) && name.ends_with(".tmp");
                if !(is_partition || is_temp) {
                    continue;
                }
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                if is_partition {
                    deleted += 1;
                }
            }
        }
        info!(root = %self.root.display(), deleted, "deleted all partitions");
        Ok(deleted)
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

impl PartitionIndex for PartitionStore {
    fn partition_keys(&self) -> Result<Vec<PartitionKey>, StoreError> {
        FsPartitionIndex::new(&self.root).partition_keys()
    }

    fn last_date_per_instrument(
        &self,
        instrument_ids: &[String],
    ) -> Result<HashMap<String, Option<NaiveDate>>, StoreError> {
        self.find_last_date_per_instrument(instrument_ids)
    }
}

// ── CSV I/O helpers ─────────────────────────────────────────────────

fn read_partition_bytes(path: &Path) -> Result<Vec<u8>, StoreError> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound {
            path: path.to_path_buf(),
        },
        _ => StoreError::io(path, e),
    })
}

/// Parse a whole partition; any bad header or record fails the load.
fn parse_partition(path: &Path, bytes: &[u8]) -> Result<Vec<PriceRow>, StoreError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let header = rdr.headers().map_err(|e| StoreError::corrupt(path, e))?;
    check_header(header.iter()).map_err(|e| StoreError::corrupt(path, e))?;

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| StoreError::corrupt(path, e))?;
        let row = PriceRow::from_fields(record.iter())
            .map_err(|e| StoreError::corrupt(path, format!("row {}: {e}", i + 1)))?;
        rows.push(row);
    }
    Ok(rows)
}

fn encode_partition(path: &Path, rows: &[PriceRow]) -> Result<Vec<u8>, StoreError> {
    let encode_err = |e: csv::Error| StoreError::io(path, io::Error::other(e));

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(COLUMNS).map_err(encode_err)?;
    for row in rows {
        wtr.write_record(row.to_record()).map_err(encode_err)?;
    }
    wtr.into_inner()
        .map_err(|e| StoreError::io(path, io::Error::other(e.to_string())))
}

/// Write to `{path}.tmp`, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp_path = path.with_extension(format!("{PARTITION_EXT}.tmp"));

    let write = || -> io::Result<()> {
        use std::io::Write;
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(&tmp_path, e));
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })
}
