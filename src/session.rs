use serde::{Deserialize, Serialize};

use crate::completeness::{DerivedField, FieldState};
use crate::filter::FilterConfig;
use crate::time_series::{BlinkMarker, TimeSeries};

/// One subject/session: the raw recording plus everything derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub name: String,
    raw: TimeSeries,
    #[serde(default)]
    pub filter_config: Option<FilterConfig>,
    #[serde(default)]
    pub undo_config: Option<FilterConfig>,
    #[serde(default)]
    pub velocity: Option<TimeSeries>,
    #[serde(default)]
    pub blink_onset: Option<Vec<BlinkMarker>>,
    #[serde(default)]
    pub blink_offset: Option<Vec<BlinkMarker>>,
    #[serde(default)]
    pub reconstructed: Option<TimeSeries>,
    #[serde(default)]
    pub output: Option<TimeSeries>,
    /// Raw at the algorithm's working rate, when an earlier run kept it.
    #[serde(default)]
    pub resampled: Option<TimeSeries>,
    #[serde(default)]
    pub manual_changes: bool,
    #[serde(default)]
    pub exclude: bool,
}

impl SessionRecord {
    pub fn new(name: impl Into<String>, raw: TimeSeries) -> Self {
        Self {
            name: name.into(),
            raw,
            filter_config: None,
            undo_config: None,
            velocity: None,
            blink_onset: None,
            blink_offset: None,
            reconstructed: None,
            output: None,
            resampled: None,
            manual_changes: false,
            exclude: false,
        }
    }

    /// The input recording. There is no mutable access.
    pub fn raw(&self) -> &TimeSeries {
        &self.raw
    }

    /// Structural check done before a collection is accepted.
    pub fn validate(&self) -> Result<(), String> {
        if self.raw.is_empty() {
            return Err("raw series is empty".into());
        }
        Ok(())
    }

    pub fn field_state(&self, field: DerivedField) -> FieldState {
        fn series(s: &Option<TimeSeries>) -> FieldState {
            match s {
                None => FieldState::Absent,
                Some(s) if s.is_empty() => FieldState::Empty,
                Some(_) => FieldState::Populated,
            }
        }
        fn markers(m: &Option<Vec<BlinkMarker>>) -> FieldState {
            match m {
                None => FieldState::Absent,
                Some(m) if m.is_empty() => FieldState::Empty,
                Some(_) => FieldState::Populated,
            }
        }

        match field {
            DerivedField::Output => series(&self.output),
            DerivedField::Reconstructed => series(&self.reconstructed),
            DerivedField::Velocity => series(&self.velocity),
            DerivedField::BlinkOnset => markers(&self.blink_onset),
            DerivedField::BlinkOffset => markers(&self.blink_offset),
            DerivedField::FilterConfig => match self.filter_config {
                None => FieldState::Absent,
                Some(_) => FieldState::Populated,
            },
        }
    }

    /// `reconstructed`, if it exists and holds samples.
    pub fn populated_reconstruction(&self) -> Option<&TimeSeries> {
        self.reconstructed.as_ref().filter(|s| !s.is_empty())
    }

    /// Drop every derived field. `raw`, `name` and `exclude` stay.
    pub fn clear_derived(&mut self) {
        self.velocity = None;
        self.blink_onset = None;
        self.blink_offset = None;
        self.reconstructed = None;
        self.output = None;
        self.resampled = None;
        self.manual_changes = false;
    }
}
