//! Append-only prediction history
//!
//! Records live in a comma-delimited file with a header row. Appends add a
//! single row in the file's own column order and never rewrite earlier
//! rows or the header. Reads parse the whole file and refuse to guess: a
//! missing required column is a schema error and an unparsable row is a
//! corrupt store. Neither failure touches the file.

use crate::error::{FilterError, HistoryError};
use crate::models::{
    timestamp_format, CropType, PredictionRecord, SensorReading, READING_COLUMNS, TIMESTAMP_FORMAT,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Required header columns, in the order new files are written
pub const HISTORY_COLUMNS: [&str; 9] = [
    "crop_type",
    "soil_type",
    "soil_moisture",
    "temperature",
    "humidity",
    "nutrient_level",
    "soil_pH",
    "predicted_action",
    "timestamp",
];

/// Keyword that lifts a filter dimension
pub const FILTER_ALL: &str = "all";

/// File-backed prediction log shared by every session of a process
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    // Serializes this handle's appends and reads; the file lock covers
    // other handles and processes
    lock: Mutex<()>,
}

impl HistoryStore {
    /// Open a store at `path`. The file is created on first append.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_err(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one record, creating the file with a header if needed.
    ///
    /// The header check and the write happen under an exclusive lock on
    /// the file, so writers in other processes cannot interleave with it.
    pub fn append(&self, record: &PredictionRecord) -> Result<(), HistoryError> {
        let _guard = self.guard();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let _lock = FileLock::exclusive(&file).map_err(|e| self.io_err(e))?;

        let mut existing = Vec::new();
        (&file).read_to_end(&mut existing).map_err(|e| self.io_err(e))?;

        let mut payload = Vec::new();
        if is_blank(&existing) {
            // Nothing but whitespace: start over with a header
            if !existing.is_empty() {
                file.set_len(0).map_err(|e| self.io_err(e))?;
            }
            let columns: Vec<String> = HISTORY_COLUMNS.iter().map(|c| c.to_string()).collect();
            payload.extend(encode_rows(&columns, std::slice::from_ref(record))?);
        } else {
            let columns = read_header(&existing)?;
            check_columns(&columns)?;
            if existing.last() != Some(&b'\n') {
                payload.push(b'\n');
            }
            let rows = encode_rows(&columns, std::slice::from_ref(record))?;
            payload.extend(strip_header(rows));
        }

        (&file).write_all(&payload).map_err(|e| self.io_err(e))?;
        (&file).flush().map_err(|e| self.io_err(e))?;

        debug!(
            event = "history_appended",
            path = %self.path.display(),
            action = %record.predicted_action,
            "Prediction recorded"
        );
        Ok(())
    }

    /// Snapshot of every record, in append order. A missing file is empty.
    pub fn read_all(&self) -> Result<Vec<PredictionRecord>, HistoryError> {
        let bytes = {
            let _guard = self.guard();
            let file = match File::open(&self.path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(self.io_err(e)),
            };
            let _lock = FileLock::shared(&file).map_err(|e| self.io_err(e))?;
            let mut bytes = Vec::new();
            (&file).read_to_end(&mut bytes).map_err(|e| self.io_err(e))?;
            bytes
        };

        parse_history(&bytes).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, kind = e.kind(), "History unreadable");
            e
        })
    }

    /// Records matching every constraint of `filter`, in append order
    pub fn query(&self, filter: &HistoryFilter) -> Result<Vec<PredictionRecord>, HistoryError> {
        let records = self.read_all()?;
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }

    pub fn len(&self) -> Result<usize, HistoryError> {
        self.read_all().map(|r| r.len())
    }

    pub fn is_empty(&self) -> Result<bool, HistoryError> {
        self.len().map(|n| n == 0)
    }
}

/// Advisory whole-file lock, released on drop
struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    fn exclusive(file: &'a File) -> std::io::Result<Self> {
        flock(file, LockMode::Exclusive)?;
        Ok(Self { file })
    }

    fn shared(file: &'a File) -> std::io::Result<Self> {
        flock(file, LockMode::Shared)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = flock(self.file, LockMode::Unlock) {
            warn!(error = %e, "Failed to release history lock");
        }
    }
}

#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
    Unlock,
}

#[cfg(unix)]
fn flock(file: &File, mode: LockMode) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let operation = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
        LockMode::Unlock => libc::LOCK_UN,
    };
    loop {
        // Blocks until the lock is granted
        let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if result == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

// Other platforms only get the in-process mutex
#[cfg(not(unix))]
fn flock(_file: &File, _mode: LockMode) -> std::io::Result<()> {
    Ok(())
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

fn read_header(bytes: &[u8]) -> Result<Vec<String>, HistoryError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(bytes);
    let headers = reader.headers().map_err(|e| HistoryError::Corrupt {
        line: 1,
        reason: e.to_string(),
    })?;
    Ok(headers.iter().map(|h| h.trim().to_string()).collect())
}

fn check_columns<S: AsRef<str>>(columns: &[S]) -> Result<(), HistoryError> {
    let missing: Vec<String> = HISTORY_COLUMNS
        .iter()
        .filter(|required| !columns.iter().any(|c| c.as_ref() == **required))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(HistoryError::Schema { missing })
    }
}

fn record_value(record: &PredictionRecord, column: &str) -> String {
    if let Some(i) = READING_COLUMNS.iter().position(|c| *c == column) {
        return record.reading.to_fields()[i].clone();
    }
    match column {
        "predicted_action" => record.predicted_action.clone(),
        "timestamp" => record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        _ => String::new(),
    }
}

/// Header row followed by one row per record, in `columns` order
fn encode_rows(columns: &[String], records: &[PredictionRecord]) -> Result<Vec<u8>, HistoryError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for record in records {
        writer.write_record(columns.iter().map(|c| record_value(record, c)))?;
    }
    writer
        .into_inner()
        .map_err(|e| HistoryError::Encode(csv::Error::from(e.into_error())))
}

fn strip_header(mut rows: Vec<u8>) -> Vec<u8> {
    match rows.iter().position(|&b| b == b'\n') {
        Some(end) => rows.split_off(end + 1),
        None => Vec::new(),
    }
}

/// Parse a whole history file
pub fn parse_history(bytes: &[u8]) -> Result<Vec<PredictionRecord>, HistoryError> {
    if is_blank(bytes) {
        return Ok(Vec::new());
    }

    let columns = read_header(bytes)?;
    check_columns(&columns)?;
    let mut reader = csv::ReaderBuilder::new().from_reader(bytes);
    let index: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| HistoryError::Corrupt {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            reason: e.to_string(),
        })?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let field = |name: &str| index.get(name).and_then(|&i| row.get(i));

        let record = parse_record(field).map_err(|reason| HistoryError::Corrupt { line, reason })?;
        records.push(record);
    }
    Ok(records)
}

fn parse_record<'a>(field: impl Fn(&str) -> Option<&'a str>) -> Result<PredictionRecord, String> {
    let reading = SensorReading::from_fields(&field)?;
    let predicted_action = field("predicted_action")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or("missing value for predicted_action")?;
    let raw_timestamp = field("timestamp").map(str::trim).unwrap_or_default();
    let timestamp = NaiveDateTime::parse_from_str(raw_timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| format!("bad timestamp {:?}: {}", raw_timestamp, e))?;

    Ok(PredictionRecord {
        reading,
        predicted_action: predicted_action.to_string(),
        timestamp,
    })
}

/// Serialize records in the persisted format, for download
pub fn export(records: &[PredictionRecord]) -> Result<Vec<u8>, HistoryError> {
    let columns: Vec<String> = HISTORY_COLUMNS.iter().map(|c| c.to_string()).collect();
    encode_rows(&columns, records)
}

/// Crop and calendar-date constraints; `None` imposes nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub crop_type: Option<CropType>,
    pub date: Option<NaiveDate>,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse user-facing filter values; absent or `all` lifts a dimension
    pub fn parse(crop_type: Option<&str>, date: Option<&str>) -> Result<Self, FilterError> {
        let crop_type = match lifted(crop_type) {
            None => None,
            Some(value) => Some(value.parse::<CropType>().map_err(|reason| FilterError {
                dimension: "crop_type",
                value: value.to_string(),
                reason,
            })?),
        };
        let date = match lifted(date) {
            None => None,
            Some(value) => Some(NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
                FilterError {
                    dimension: "date",
                    value: value.to_string(),
                    reason: e.to_string(),
                }
            })?),
        };
        Ok(Self { crop_type, date })
    }

    pub fn matches(&self, record: &PredictionRecord) -> bool {
        self.crop_type
            .map_or(true, |crop| record.reading.crop_type == crop)
            && self.date.map_or(true, |date| record.timestamp.date() == date)
    }
}

fn lifted(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(FILTER_ALL))
}

/// One point of the environmental time series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
}

/// Counts per action plus the time-ordered series for charting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total: usize,
    pub counts: BTreeMap<String, usize>,
    pub series: Vec<SeriesPoint>,
}

/// Group records by action and order their readings by time
pub fn aggregate(records: &[PredictionRecord]) -> HistorySummary {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.predicted_action.clone()).or_insert(0) += 1;
    }

    let mut series: Vec<SeriesPoint> = records
        .iter()
        .map(|r| SeriesPoint {
            timestamp: r.timestamp,
            soil_moisture: r.reading.soil_moisture,
            temperature: r.reading.temperature,
            humidity: r.reading.humidity,
        })
        .collect();
    series.sort_by_key(|p| p.timestamp);

    HistorySummary {
        total: records.len(),
        counts,
        series,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{low_nutrient_wheat, reading};
    use crate::models::SoilType;
    use tempfile::TempDir;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), TIMESTAMP_FORMAT).unwrap()
    }

    fn record(crop: CropType, action: &str, timestamp: NaiveDateTime) -> PredictionRecord {
        PredictionRecord {
            reading: reading(crop, SoilType::Loamy, 42.5, 2),
            predicted_action: action.to_string(),
            timestamp,
        }
    }

    fn store(dir: &TempDir) -> HistoryStore {
        HistoryStore::open(dir.path().join("data").join("prediction_history.csv"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.read_all().unwrap().is_empty());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_append_is_monotonic_and_ordered() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let records = vec![
            record(CropType::Wheat, "Fertilize", at("2024-05-01", "09:00:00")),
            record(CropType::Rice, "Irrigate", at("2024-05-01", "08:00:00")),
            record(CropType::Corn, "None", at("2024-05-02", "10:30:15")),
        ];

        for (n, r) in records.iter().enumerate() {
            store.append(r).unwrap();
            assert_eq!(store.len().unwrap(), n + 1);
        }
        assert_eq!(store.read_all().unwrap(), records);

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.lines().next().unwrap(), HISTORY_COLUMNS.join(","));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_query_all_returns_everything_in_order() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for r in [
            record(CropType::Corn, "None", at("2024-05-03", "12:00:00")),
            record(CropType::Wheat, "Fertilize", at("2024-05-01", "12:00:00")),
        ] {
            store.append(&r).unwrap();
        }

        let filter = HistoryFilter::parse(Some("all"), Some("all")).unwrap();
        assert_eq!(filter, HistoryFilter::all());
        assert_eq!(store.query(&filter).unwrap(), store.read_all().unwrap());
    }

    #[test]
    fn test_query_filters_by_crop_and_date() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for r in [
            record(CropType::Wheat, "Fertilize", at("2024-05-01", "09:00:00")),
            record(CropType::Rice, "Irrigate", at("2024-05-01", "23:59:59")),
            record(CropType::Wheat, "None", at("2024-05-02", "00:00:00")),
        ] {
            store.append(&r).unwrap();
        }

        let wheat = HistoryFilter::parse(Some("wheat"), None).unwrap();
        let actions: Vec<_> = store
            .query(&wheat)
            .unwrap()
            .into_iter()
            .map(|r| r.predicted_action)
            .collect();
        assert_eq!(actions, vec!["Fertilize", "None"]);

        let first_day = HistoryFilter::parse(None, Some("2024-05-01")).unwrap();
        assert_eq!(store.query(&first_day).unwrap().len(), 2);

        let both = HistoryFilter::parse(Some("Wheat"), Some("2024-05-02")).unwrap();
        assert_eq!(store.query(&both).unwrap().len(), 1);
    }

    #[test]
    fn test_bad_filter_values_are_rejected() {
        assert_eq!(
            HistoryFilter::parse(Some("Barley"), None).unwrap_err().dimension,
            "crop_type"
        );
        assert_eq!(
            HistoryFilter::parse(None, Some("05/01/2024")).unwrap_err().dimension,
            "date"
        );
    }

    #[test]
    fn test_export_round_trips_through_query() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut odd = record(CropType::Soybean, "Irrigate", at("2024-06-01", "07:15:00"));
        odd.reading.soil_moisture = 33.333333333333336;
        odd.reading.soil_ph = 0.1;
        for r in [
            record(CropType::Wheat, "Fertilize", at("2024-06-01", "06:00:00")),
            odd,
        ] {
            store.append(&r).unwrap();
        }

        let selected = store.query(&HistoryFilter::all()).unwrap();
        let exported = export(&selected).unwrap();
        assert_eq!(parse_history(&exported).unwrap(), selected);

        let export_dir = TempDir::new().unwrap();
        let copy = HistoryStore::open(export_dir.path().join("export.csv"));
        fs::write(copy.path(), &exported).unwrap();
        assert_eq!(copy.query(&HistoryFilter::all()).unwrap(), selected);
    }

    #[test]
    fn test_missing_timestamp_column_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let original = "crop_type,soil_type,soil_moisture,temperature,humidity,nutrient_level,soil_pH,predicted_action\n\
                        Wheat,Clay,45,28,60,1,6.2,Fertilize\n";
        fs::write(store.path(), original).unwrap();

        match store.query(&HistoryFilter::all()) {
            Err(HistoryError::Schema { missing }) => assert_eq!(missing, vec!["timestamp"]),
            other => panic!("expected SchemaError, got {:?}", other),
        }

        let err = store
            .append(&PredictionRecord::now(low_nutrient_wheat(), "Fertilize"))
            .unwrap_err();
        assert_eq!(err.kind(), "SchemaError");
        assert_eq!(fs::read_to_string(store.path()).unwrap(), original);
    }

    #[test]
    fn test_unparsable_row_is_corrupt_and_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .append(&record(CropType::Wheat, "Fertilize", at("2024-05-01", "09:00:00")))
            .unwrap();
        let mut text = fs::read_to_string(store.path()).unwrap();
        text.push_str("Wheat,Clay,forty,28,60,1,6.2,None,2024-05-01 10:00:00\n");
        fs::write(store.path(), &text).unwrap();

        match store.read_all() {
            Err(HistoryError::Corrupt { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected HistoryCorrupt, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(store.path()).unwrap(), text);
    }

    #[test]
    fn test_ragged_row_is_corrupt() {
        let bytes = format!("{}\nWheat,Clay,45\n", HISTORY_COLUMNS.join(","));
        assert_eq!(
            parse_history(bytes.as_bytes()).unwrap_err().kind(),
            "HistoryCorrupt"
        );
    }

    #[test]
    fn test_append_follows_existing_column_order() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            "timestamp,predicted_action,crop_type,soil_type,soil_moisture,temperature,humidity,nutrient_level,soil_pH",
        )
        .unwrap();

        let r = record(CropType::Rice, "Irrigate", at("2024-07-04", "18:00:00"));
        store.append(&r).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("2024-07-04 18:00:00,Irrigate,Rice,Loamy"));
        assert_eq!(store.read_all().unwrap(), vec![r]);
    }

    #[test]
    fn test_concurrent_appends_keep_rows_intact() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(store(&dir));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let ts = at("2024-08-01", &format!("10:{:02}:{:02}", t, i));
                        store.append(&record(CropType::Corn, "None", ts)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len().unwrap(), 80);
    }

    #[test]
    fn test_separate_handles_share_one_header() {
        use std::sync::{Arc, Barrier};

        let dir = TempDir::new().unwrap();
        for round in 0..25 {
            let path = dir.path().join(format!("history_{}.csv", round));
            let barrier = Arc::new(Barrier::new(2));
            let writers: Vec<_> = (0..2)
                .map(|t| {
                    let path = path.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        let store = HistoryStore::open(&path);
                        let ts = at("2024-08-02", &format!("11:00:{:02}", t));
                        barrier.wait();
                        store.append(&record(CropType::Rice, "Irrigate", ts)).unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            let text = fs::read_to_string(&path).unwrap();
            let headers = text.lines().filter(|l| l.starts_with("crop_type,")).count();
            assert_eq!(headers, 1, "round {}: {:?}", round, text);
            assert_eq!(HistoryStore::open(&path).len().unwrap(), 2);
        }
    }

    #[test]
    fn test_blank_file_gets_a_header_on_append() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "\n  \n").unwrap();
        assert!(store.is_empty().unwrap());

        let r = record(CropType::Wheat, "Fertilize", at("2024-05-01", "09:00:00"));
        store.append(&r).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with(&HISTORY_COLUMNS.join(",")));
        assert_eq!(store.read_all().unwrap(), vec![r]);
    }

    #[test]
    fn test_aggregate_counts_and_orders_series() {
        let records = vec![
            record(CropType::Wheat, "Fertilize", at("2024-05-02", "09:00:00")),
            record(CropType::Rice, "Irrigate", at("2024-05-01", "09:00:00")),
            record(CropType::Corn, "Fertilize", at("2024-05-03", "09:00:00")),
        ];
        let summary = aggregate(&records);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.counts["Fertilize"], 2);
        assert_eq!(summary.counts["Irrigate"], 1);
        let times: Vec<_> = summary.series.iter().map(|p| p.timestamp).collect();
        assert_eq!(
            times,
            vec![
                at("2024-05-01", "09:00:00"),
                at("2024-05-02", "09:00:00"),
                at("2024-05-03", "09:00:00")
            ]
        );
    }
}
