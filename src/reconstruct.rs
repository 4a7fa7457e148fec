//! Automatic blink detection and interpolation.
//!
//! The workflow only depends on the [`Reconstructor`] trait. [`BlinkInterpolator`]
//! is the implementation the binary uses: Hann-smoothed velocity, threshold
//! excursions plus missing runs as blink windows, linear fill across each
//! window.

use std::cell::Cell;
use std::f64::consts::PI;

use log::debug;
use thiserror::Error;

use crate::filter::FilterConfig;
use crate::resample::{bridge_missing, infer_source_rate, resample, RateConversionError};
use crate::time_series::{BlinkMarker, TimeSeries, TimeSeriesPoint};
use crate::util::{mean, present, std_dev};

/// Thresholds sit this many standard deviations from the mean velocity,
/// before the per-config multipliers are applied.
pub const THRESHOLD_SD: f64 = 3.0;

/// Longest dip that still counts as a blink when velocity never rebounds
/// within it.
pub const MAX_BLINK_SECS: f64 = 0.5;

#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error(transparent)]
    RateConversion(#[from] RateConversionError),
    #[error("hann window of {window} samples is longer than the {samples}-sample trace")]
    WindowTooLong { window: usize, samples: usize },
}

/// Everything one automatic run derives from a raw trace.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub velocity: TimeSeries,
    pub blink_onset: Vec<BlinkMarker>,
    pub blink_offset: Vec<BlinkMarker>,
    pub reconstructed: TimeSeries,
}

/// Deterministic raw-trace → reconstruction function.
pub trait Reconstructor {
    fn reconstruct(
        &self,
        raw: &TimeSeries,
        config: &FilterConfig,
    ) -> Result<Reconstruction, ReconstructionError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BlinkInterpolator;

impl Reconstructor for BlinkInterpolator {
    fn reconstruct(
        &self,
        raw: &TimeSeries,
        config: &FilterConfig,
    ) -> Result<Reconstruction, ReconstructionError> {
        let multiplier = config.params.resample_multiplier;
        let work_rate = infer_source_rate(raw)? * multiplier;
        // Non-positive pupil sizes are tracker dropouts.
        let masked = raw.map_values(|v| if v > 0.0 { v } else { f64::NAN });
        let work = if (multiplier - 1.0).abs() < f64::EPSILON {
            masked
        } else {
            resample(&masked, work_rate)?
        };

        if config.hann_win() > work.len() {
            return Err(ReconstructionError::WindowTooLong {
                window: config.hann_win(),
                samples: work.len(),
            });
        }

        let timestamps = work.timestamps();
        let values = work.values();
        let is_present: Vec<bool> = values.iter().map(|v| !v.is_nan()).collect();

        let Some(bridged) = bridge_missing(&work) else {
            return Ok(Reconstruction {
                velocity: work.map_values(|_| f64::NAN),
                blink_onset: vec![],
                blink_offset: vec![],
                reconstructed: work,
            });
        };

        let smoothed = hann_smooth(&bridged, config.hann_win());
        let velocity: Vec<f64> = derivative(&timestamps, &smoothed)
            .into_iter()
            .zip(&is_present)
            .map(|(v, &p)| if p { v } else { f64::NAN })
            .collect();

        let observed = present(&velocity);
        let thresholds = match (mean(&observed), std_dev(&observed)) {
            (Some(m), Some(sd)) if sd > f64::EPSILON => Some((
                m - config.params.neg_threshold_multiplier * THRESHOLD_SD * sd,
                m + config.params.pos_threshold_multiplier * THRESHOLD_SD * sd,
            )),
            _ => None,
        };

        let max_len = (MAX_BLINK_SECS * work_rate).ceil() as usize;
        let mut windows = missing_runs(&is_present);
        if let Some((neg, pos)) = thresholds {
            windows.extend(velocity_windows(&velocity, neg, pos, max_len));
        }
        let windows = merge_windows(windows);
        debug!(
            "{} blink windows over {} samples (hann {}, rate {:.1} Hz)",
            windows.len(),
            values.len(),
            config.hann_win(),
            work_rate
        );

        let n = values.len();
        let mut filled = values.clone();
        let mut blink_onset = Vec::new();
        let mut blink_offset = Vec::new();
        let marker = |i: usize| BlinkMarker {
            t: timestamps[i],
            value: values[i],
            velocity: velocity[i],
        };

        for &(lo, hi) in &windows {
            let onset = lo.checked_sub(1).filter(|&i| is_present[i]);
            let offset = Some(hi + 1).filter(|&i| i < n && is_present[i]);
            match (onset, offset) {
                (Some(a), Some(b)) => {
                    let slope = (values[b] - values[a]) / (timestamps[b] - timestamps[a]);
                    for (i, v) in filled.iter_mut().enumerate().take(b).skip(a + 1) {
                        *v = values[a] + slope * (timestamps[i] - timestamps[a]);
                    }
                    blink_onset.push(marker(a));
                    blink_offset.push(marker(b));
                }
                // No anchor on one side: leave the window missing.
                _ => {
                    for v in &mut filled[lo..=hi] {
                        *v = f64::NAN;
                    }
                    if let Some(a) = onset {
                        blink_onset.push(marker(a));
                    }
                    if let Some(b) = offset {
                        blink_offset.push(marker(b));
                    }
                }
            }
        }

        let points = |vals: &[f64]| {
            timestamps
                .iter()
                .zip(vals)
                .map(|(&t, &v)| TimeSeriesPoint::new(t, v))
                .collect::<Vec<_>>()
        };

        Ok(Reconstruction {
            velocity: TimeSeries::from_sorted_points(points(&velocity)),
            blink_onset,
            blink_offset,
            reconstructed: TimeSeries::from_sorted_points(points(&filled)),
        })
    }
}

/// Wraps another reconstructor and counts invocations.
#[derive(Debug, Default)]
pub struct CountingReconstructor<R> {
    inner: R,
    calls: Cell<usize>,
}

impl<R> CountingReconstructor<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl<R: Reconstructor> Reconstructor for CountingReconstructor<R> {
    fn reconstruct(
        &self,
        raw: &TimeSeries,
        config: &FilterConfig,
    ) -> Result<Reconstruction, ReconstructionError> {
        self.calls.set(self.calls.get() + 1);
        self.inner.reconstruct(raw, config)
    }
}

/// Symmetric Hann window without zero end points, normalised per output
/// sample so the edges are not pulled toward zero.
fn hann_smooth(values: &[f64], width: usize) -> Vec<f64> {
    if width <= 1 {
        return values.to_vec();
    }
    let weights: Vec<f64> = (1..=width)
        .map(|k| 0.5 * (1.0 - (2.0 * PI * k as f64 / (width + 1) as f64).cos()))
        .collect();
    let half = (width / 2) as isize;
    let n = values.len() as isize;

    (0..n)
        .map(|i| {
            let (mut acc, mut wsum) = (0.0, 0.0);
            for (k, w) in weights.iter().enumerate() {
                let j = i + k as isize - half;
                if (0..n).contains(&j) {
                    acc += w * values[j as usize];
                    wsum += w;
                }
            }
            acc / wsum
        })
        .collect()
}

/// Central differences, one-sided at the ends.
fn derivative(t: &[f64], v: &[f64]) -> Vec<f64> {
    let n = v.len();
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| {
            let (a, b) = match i {
                0 => (0, 1),
                _ if i == n - 1 => (n - 2, n - 1),
                _ => (i - 1, i + 1),
            };
            (v[b] - v[a]) / (t[b] - t[a])
        })
        .collect()
}

/// Inclusive index ranges of missing samples.
fn missing_runs(is_present: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &p) in is_present.iter().enumerate() {
        match (p, start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                runs.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, is_present.len() - 1));
    }
    runs
}

/// A drop below `neg` opens a window. It closes once velocity has gone above
/// `pos` and settled back; dips that never rebound within `max_len` samples
/// are ignored.
fn velocity_windows(velocity: &[f64], neg: f64, pos: f64, max_len: usize) -> Vec<(usize, usize)> {
    let n = velocity.len();
    let mut windows = Vec::new();
    let mut i = 0;
    while i < n {
        let dips = velocity[i] < neg;
        if !dips {
            i += 1;
            continue;
        }
        let mut rebounded = false;
        let mut end = None;
        for (j, &v) in velocity.iter().enumerate().skip(i).take(max_len) {
            if v > pos {
                rebounded = true;
            } else if rebounded && v <= pos {
                end = Some(j);
                break;
            }
        }
        match end {
            Some(j) => {
                windows.push((i, j - 1));
                i = j;
            }
            None => i += 1,
        }
    }
    windows
}

fn merge_windows(mut windows: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    windows.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(windows.len());
    for (lo, hi) in windows {
        match merged.last_mut() {
            Some(last) if lo <= last.1 + 1 => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}
