//! Partition directory index.
//!
//! The resume logic only needs two questions answered: which partitions
//! exist, and what is the latest stored date per instrument. `PartitionIndex`
//! captures that contract so a non-filesystem backend can answer it without
//! a directory scan. `FsPartitionIndex` is the scanning implementation.

use super::schema::{check_header, parse_date};
use super::store::{PartitionKey, StoreError};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Read-side catalogue of stored partitions.
pub trait PartitionIndex {
    /// Every stored partition, oldest first.
    fn partition_keys(&self) -> Result<Vec<PartitionKey>, StoreError>;

    /// Latest stored date per requested instrument; unseen ones map to `None`.
    fn last_date_per_instrument(
        &self,
        instrument_ids: &[String],
    ) -> Result<HashMap<String, Option<NaiveDate>>, StoreError>;

    /// Greatest stored `(year, month)`.
    fn latest_partition(&self) -> Result<Option<PartitionKey>, StoreError> {
        Ok(self.partition_keys()?.into_iter().max())
    }
}

/// Index backed by scanning `{root}/{year}/PRICES_*.csv`.
#[derive(Debug, Clone)]
pub struct FsPartitionIndex {
    root: PathBuf,
}

impl FsPartitionIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PartitionIndex for FsPartitionIndex {
    fn partition_keys(&self) -> Result<Vec<PartitionKey>, StoreError> {
        Ok(scan_partitions(&self.root)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Streams each partition reading only `date` and `instrument_id`; memory
    /// stays proportional to the number of requested instruments.
    fn last_date_per_instrument(
        &self,
        instrument_ids: &[String],
    ) -> Result<HashMap<String, Option<NaiveDate>>, StoreError> {
        let mut last: HashMap<String, Option<NaiveDate>> =
            instrument_ids.iter().map(|id| (id.clone(), None)).collect();
        if last.is_empty() {
            return Ok(last);
        }

        for (_, path) in scan_partitions(&self.root)? {
            let mut rdr = match csv::Reader::from_path(&path) {
                Ok(rdr) => rdr,
                Err(e) => return Err(csv_open_error(&path, e)),
            };
            let header = rdr.headers().map_err(|e| StoreError::corrupt(&path, e))?;
            check_header(header.iter()).map_err(|e| StoreError::corrupt(&path, e))?;

            let mut record = csv::StringRecord::new();
            loop {
                match rdr.read_record(&mut record) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => return Err(StoreError::corrupt(&path, e)),
                }
                let (Some(date), Some(id)) = (record.get(0), record.get(1)) else {
                    return Err(StoreError::corrupt(&path, "short record"));
                };
                let Some(slot) = last.get_mut(id.trim()) else {
                    continue;
                };
                let date = parse_date(date).map_err(|e| StoreError::corrupt(&path, e))?;
                if slot.map_or(true, |prev| date > prev) {
                    *slot = Some(date);
                }
            }
        }
        Ok(last)
    }
}

/// Year directories directly under `root`. Absent root yields nothing.
pub(crate) fn year_dirs(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(root, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(root, e))?;
        let path = entry.path();
        let is_year = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.parse::<i32>().is_ok());
        if is_year && path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Every partition file under `root`, sorted by key.
///
/// Files whose name does not parse, or whose year disagrees with their
/// directory, are ignored.
pub fn scan_partitions(root: &Path) -> Result<Vec<(PartitionKey, PathBuf)>, StoreError> {
    let mut found = Vec::new();
    for dir in year_dirs(root)? {
        let dir_year = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<i32>().ok());

        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            let key = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(PartitionKey::parse_file_name);
            match key {
                Some(key) if Some(key.year()) == dir_year && path.is_file() => {
                    found.push((key, path))
                }
                _ => {}
            }
        }
    }
    found.sort_by_key(|(key, _)| *key);
    Ok(found)
}

fn csv_open_error(path: &Path, e: csv::Error) -> StoreError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) if io.kind() == io::ErrorKind::NotFound => StoreError::NotFound {
            path: path.to_path_buf(),
        },
        csv::ErrorKind::Io(io) => StoreError::io(path, io),
        other => StoreError::corrupt(path, format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::PriceRow;
    use crate::data::store::PartitionStore;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn row(date: NaiveDate, id: &str) -> PriceRow {
        PriceRow {
            close: Some(1.0),
            ..PriceRow::empty(date, id)
        }
    }

    #[test]
    fn empty_or_absent_root_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(FsPartitionIndex::new(dir.path()).latest_partition().unwrap(), None);
        assert_eq!(
            FsPartitionIndex::new(dir.path().join("nope")).latest_partition().unwrap(),
            None
        );
    }

    #[test]
    fn latest_partition_spans_years() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        store
            .merge_rows(vec![
                row(d(2023, 11, 1), "A"),
                row(d(2024, 3, 4), "A"),
                row(d(2024, 1, 2), "A"),
            ])
            .unwrap();
        // Stray files are not partitions.
        fs::write(dir.path().join("2024").join("PRICES_2024-M12.csv.tmp"), "").unwrap();
        fs::create_dir_all(dir.path().join("misc")).unwrap();
        fs::write(dir.path().join("misc").join("PRICES_2099-M01.csv"), "").unwrap();
        fs::write(dir.path().join("2023").join("PRICES_2030-M01.csv"), "").unwrap();

        let index = FsPartitionIndex::new(dir.path());
        assert_eq!(
            index.latest_partition().unwrap(),
            PartitionKey::new(2024, 3)
        );
        assert_eq!(index.partition_keys().unwrap().len(), 3);
    }

    #[test]
    fn last_date_per_instrument_scans_all_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        store
            .merge_rows(vec![
                row(d(2024, 1, 30), "A"),
                row(d(2024, 2, 2), "A"),
                row(d(2024, 1, 31), "B"),
                row(d(2024, 2, 5), "C"),
            ])
            .unwrap();

        let ids = vec!["A".to_string(), "B".to_string(), "Z".to_string()];
        let last = FsPartitionIndex::new(dir.path())
            .last_date_per_instrument(&ids)
            .unwrap();

        assert_eq!(last.len(), 3);
        assert_eq!(last["A"], Some(d(2024, 2, 2)));
        assert_eq!(last["B"], Some(d(2024, 1, 31)));
        assert_eq!(last["Z"], None);
        assert!(!last.contains_key("C"));
    }

    #[test]
    fn last_date_reports_corrupt_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let path = store.resolve_partition_path(2024, 1).unwrap();
        fs::write(
            &path,
            "date,instrument_id,open,high,low,close,volume,adjusted_close\nnot-a-date,A,,,,,,\n",
        )
        .unwrap();

        let err = FsPartitionIndex::new(dir.path())
            .last_date_per_instrument(&["A".to_string()])
            .unwrap_err();
        assert!(err.is_corrupt());
    }
}
