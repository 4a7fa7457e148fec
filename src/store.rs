//! Whole-collection persistence plus CSV import/export of single traces.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionRecord;
use crate::time_series::{SeriesError, TimeSeries};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid series: {0}")]
    Series(#[from] SeriesError),
    #[error("unsupported collection format version {0}")]
    UnsupportedVersion(u32),
    #[error("session {index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: String },
    #[error("no collection stored at {0}")]
    NotFound(PathBuf),
}

/// Reads and writes a whole session collection as one artifact.
pub trait CollectionStore {
    fn load(&self, path: &Path) -> Result<Vec<SessionRecord>, PersistenceError>;
    fn save(&self, path: &Path, sessions: &[SessionRecord]) -> Result<(), PersistenceError>;
}

#[derive(Serialize)]
struct CollectionFileOut<'a> {
    format_version: u32,
    saved_at: DateTime<Utc>,
    sessions: &'a [SessionRecord],
}

#[derive(Deserialize)]
struct CollectionFileIn {
    format_version: u32,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    sessions: Vec<serde_json::Value>,
}

pub fn encode_collection(sessions: &[SessionRecord]) -> Result<String, PersistenceError> {
    let file = CollectionFileOut {
        format_version: FORMAT_VERSION,
        saved_at: Utc::now(),
        sessions,
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Parses a collection document. Records are checked one by one so a broken
/// record is reported by position instead of as a bare JSON error.
pub fn decode_collection(data: &str) -> Result<Vec<SessionRecord>, PersistenceError> {
    let file: CollectionFileIn = serde_json::from_str(data)?;
    if file.format_version != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(file.format_version));
    }
    if let Some(saved_at) = file.saved_at {
        debug!("collection saved at {}", saved_at.to_rfc3339());
    }

    file.sessions
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let index = i + 1;
            if value.get("raw").map_or(true, |raw| raw.is_null()) {
                return Err(PersistenceError::InvalidRecord {
                    index,
                    reason: "missing raw series".into(),
                });
            }
            let record: SessionRecord =
                serde_json::from_value(value).map_err(|e| PersistenceError::InvalidRecord {
                    index,
                    reason: e.to_string(),
                })?;
            record
                .validate()
                .map_err(|reason| PersistenceError::InvalidRecord { index, reason })?;
            Ok(record)
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct JsonCollectionStore;

impl CollectionStore for JsonCollectionStore {
    fn load(&self, path: &Path) -> Result<Vec<SessionRecord>, PersistenceError> {
        let data = fs::read_to_string(path)?;
        decode_collection(&data)
    }

    fn save(&self, path: &Path, sessions: &[SessionRecord]) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let data = encode_collection(sessions)?;
        // Write beside the target and rename so a failed write leaves the old file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// In-memory store for tests and dry runs. Can be told to fail writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RefCell<HashMap<PathBuf, String>>,
    fail_writes: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
    }

    pub fn insert(&self, path: &Path, sessions: &[SessionRecord]) -> Result<(), PersistenceError> {
        let data = encode_collection(sessions)?;
        self.files.borrow_mut().insert(path.to_path_buf(), data);
        Ok(())
    }
}

impl CollectionStore for MemoryStore {
    fn load(&self, path: &Path) -> Result<Vec<SessionRecord>, PersistenceError> {
        let files = self.files.borrow();
        let data = files
            .get(path)
            .ok_or_else(|| PersistenceError::NotFound(path.to_path_buf()))?;
        decode_collection(data)
    }

    fn save(&self, path: &Path, sessions: &[SessionRecord]) -> Result<(), PersistenceError> {
        if self.fail_writes.get() {
            return Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "write refused",
            )));
        }
        self.insert(path, sessions)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvSample {
    time: f64,
    value: Option<f64>,
}

/// `time,value` rows; an empty or `NaN` value is a missing sample.
pub fn read_series_csv(path: &Path) -> Result<TimeSeries, PersistenceError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let (mut t, mut values) = (Vec::new(), Vec::new());
    for row in rdr.deserialize() {
        let sample: CsvSample = row?;
        t.push(sample.time);
        values.push(sample.value.unwrap_or(f64::NAN));
    }
    Ok(TimeSeries::from_columns(t, values)?)
}

pub fn write_series_csv(path: &Path, series: &TimeSeries) -> Result<(), PersistenceError> {
    let mut wtr = csv::Writer::from_path(path)?;
    for p in series.points() {
        wtr.serialize(CsvSample {
            time: p.t,
            value: (!p.is_missing()).then_some(p.value),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// One session per CSV file, named after the file stem.
pub fn import_sessions(paths: &[PathBuf]) -> Result<Vec<SessionRecord>, PersistenceError> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let raw = read_series_csv(path)?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("session{}", i + 1));
            let record = SessionRecord::new(name, raw);
            record
                .validate()
                .map_err(|reason| PersistenceError::InvalidRecord {
                    index: i + 1,
                    reason,
                })?;
            Ok(record)
        })
        .collect()
}

/// Writes each session's `output` to `dir`. Excluded sessions and sessions
/// without output are skipped.
pub fn export_outputs(
    sessions: &[SessionRecord],
    dir: &Path,
    include_excluded: bool,
) -> Result<Vec<PathBuf>, PersistenceError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (i, session) in sessions.iter().enumerate() {
        let index = i + 1;
        if session.exclude && !include_excluded {
            debug!("session {index} excluded, not exported");
            continue;
        }
        let Some(output) = session.output.as_ref().filter(|o| !o.is_empty()) else {
            warn!("session {index} has no output yet, not exported");
            continue;
        };
        let path = dir.join(export_file_name(index, &session.name));
        write_series_csv(&path, output)?;
        written.push(path);
    }
    Ok(written)
}

fn export_file_name(index: usize, name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if clean.is_empty() {
        format!("{index:03}.csv")
    } else {
        format!("{index:03}_{clean}.csv")
    }
}
