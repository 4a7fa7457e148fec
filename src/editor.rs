use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::store::{read_series_csv, PersistenceError};
use crate::time_series::TimeSeries;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("could not read edited trace: {0}")]
    Read(#[from] PersistenceError),
    #[error("edited trace is empty")]
    Empty,
}

#[derive(Debug, Clone)]
pub enum EditOutcome {
    Accepted(TimeSeries),
    Discarded,
}

/// Manual correction hand-off. Gets a read-only view of the reconstructed
/// trace and hands back an owned result; it never keeps a handle.
pub trait ManualEditor {
    fn edit(&mut self, reconstructed: &TimeSeries) -> Result<EditOutcome, EditorError>;
}

/// Takes the corrected trace from a `time,value` CSV. A missing file means the
/// user did not save anything, which is a discard.
#[derive(Debug, Clone)]
pub struct CsvEditor {
    path: PathBuf,
}

impl CsvEditor {
    pub fn new<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl ManualEditor for CsvEditor {
    fn edit(&mut self, _reconstructed: &TimeSeries) -> Result<EditOutcome, EditorError> {
        if !self.path.exists() {
            return Ok(EditOutcome::Discarded);
        }
        let edited = read_series_csv(&self.path)?;
        if edited.is_empty() {
            return Err(EditorError::Empty);
        }
        Ok(EditOutcome::Accepted(edited))
    }
}

/// Replays queued outcomes; discards once the queue runs dry. Records what it
/// was handed so tests can check the copy-in.
#[derive(Debug, Default)]
pub struct ScriptedEditor {
    outcomes: VecDeque<EditOutcome>,
    pub seen: Vec<TimeSeries>,
}

impl ScriptedEditor {
    pub fn new(outcomes: impl IntoIterator<Item = EditOutcome>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
            seen: Vec::new(),
        }
    }
}

impl ManualEditor for ScriptedEditor {
    fn edit(&mut self, reconstructed: &TimeSeries) -> Result<EditOutcome, EditorError> {
        self.seen.push(reconstructed.clone());
        Ok(self.outcomes.pop_front().unwrap_or(EditOutcome::Discarded))
    }
}
