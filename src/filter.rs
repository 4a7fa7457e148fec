use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HANN_WIN: usize = 11;
pub const DEFAULT_RESAMPLE_RATE: f64 = 120.0;
pub const DEFAULT_RESAMPLE_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_POS_THRESHOLD_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_NEG_THRESHOLD_MULTIPLIER: f64 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum FilterConfigError {
    #[error("hann window must be at least 1 sample")]
    HannWindow,
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },
}

/// Filter parameters without the session they belong to. This is what the
/// user edits and what the config file stores as defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FilterParams {
    pub hann_win: usize,
    pub resample_rate: f64,
    pub resample_multiplier: f64,
    pub pos_threshold_multiplier: f64,
    pub neg_threshold_multiplier: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            hann_win: DEFAULT_HANN_WIN,
            resample_rate: DEFAULT_RESAMPLE_RATE,
            resample_multiplier: DEFAULT_RESAMPLE_MULTIPLIER,
            pos_threshold_multiplier: DEFAULT_POS_THRESHOLD_MULTIPLIER,
            neg_threshold_multiplier: DEFAULT_NEG_THRESHOLD_MULTIPLIER,
        }
    }
}

impl FilterParams {
    pub fn validate(&self) -> Result<(), FilterConfigError> {
        if self.hann_win == 0 {
            return Err(FilterConfigError::HannWindow);
        }
        positive("resample_rate", self.resample_rate)?;
        positive("resample_multiplier", self.resample_multiplier)?;
        finite("pos_threshold_multiplier", self.pos_threshold_multiplier)?;
        finite("neg_threshold_multiplier", self.neg_threshold_multiplier)?;
        Ok(())
    }

    pub fn patched(&self, patch: &FilterPatch) -> Result<Self, FilterConfigError> {
        let next = Self {
            hann_win: patch.hann_win.unwrap_or(self.hann_win),
            resample_rate: patch.resample_rate.unwrap_or(self.resample_rate),
            resample_multiplier: patch.resample_multiplier.unwrap_or(self.resample_multiplier),
            pos_threshold_multiplier: patch
                .pos_threshold_multiplier
                .unwrap_or(self.pos_threshold_multiplier),
            neg_threshold_multiplier: patch
                .neg_threshold_multiplier
                .unwrap_or(self.neg_threshold_multiplier),
        };
        next.validate()?;
        Ok(next)
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), FilterConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FilterConfigError::NonPositive { name, value })
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), FilterConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FilterConfigError::NonFinite { name, value })
    }
}

/// Filter configuration attached to one session. Never mutated in place:
/// every edit builds a new value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    #[serde(flatten)]
    pub params: FilterParams,
    /// 1-based position of the owning session.
    pub session_index: usize,
}

impl FilterConfig {
    pub fn new(params: FilterParams, session_index: usize) -> Self {
        Self {
            params,
            session_index,
        }
    }

    pub fn with_patch(&self, patch: &FilterPatch) -> Result<Self, FilterConfigError> {
        Ok(Self::new(self.params.patched(patch)?, self.session_index))
    }

    /// Same parameters, stamped for another session.
    pub fn for_session(&self, session_index: usize) -> Self {
        Self::new(self.params, session_index)
    }

    pub fn hann_win(&self) -> usize {
        self.params.hann_win
    }

    pub fn resample_rate(&self) -> f64 {
        self.params.resample_rate
    }
}

/// Partial parameter edit; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterPatch {
    pub hann_win: Option<usize>,
    pub resample_rate: Option<f64>,
    pub resample_multiplier: Option<f64>,
    pub pos_threshold_multiplier: Option<f64>,
    pub neg_threshold_multiplier: Option<f64>,
}

impl FilterPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
