//! Rate conversion that keeps blink gaps missing.
//!
//! Resampling runs a Lanczos kernel over a gap-bridged copy of the input,
//! then every output timestamp that falls inside a gap of the *input* is set
//! back to NaN. Only that second step decides missingness in the output.

use std::f64::consts::PI;

use thiserror::Error;

use crate::gaps::{find_gaps, in_any_gap};
use crate::time_series::{TimeSeries, TimeSeriesPoint};
use crate::util::median;

/// Kernel half-width in source samples (before anti-alias stretching).
pub const LANCZOS_LOBES: f64 = 3.0;

// Slack when counting grid points, so a span of 0.999999... periods still
// lands on the final sample.
const GRID_EPSILON: f64 = 1e-9;

// Rates this close count as equal; inferred rates carry rounding noise.
const RATE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum RateConversionError {
    #[error("target rate must be positive and finite, got {0}")]
    InvalidRate(f64),
    #[error("at least 2 samples are needed to infer a source rate, got {0}")]
    TooShort(usize),
}

/// Source rate from the median sample spacing.
pub fn infer_source_rate(series: &TimeSeries) -> Result<f64, RateConversionError> {
    if series.len() < 2 {
        return Err(RateConversionError::TooShort(series.len()));
    }
    let spacings: Vec<f64> = series.points().windows(2).map(|w| w[1].t - w[0].t).collect();
    match median(&spacings) {
        Some(dt) if dt > 0.0 => Ok(1.0 / dt),
        _ => Err(RateConversionError::TooShort(series.len())),
    }
}

/// Resample `series` onto `t0 + k / target_rate` and re-impose its gaps.
pub fn resample(series: &TimeSeries, target_rate: f64) -> Result<TimeSeries, RateConversionError> {
    if !(target_rate.is_finite() && target_rate > 0.0) {
        return Err(RateConversionError::InvalidRate(target_rate));
    }
    let source_rate = infer_source_rate(series)?;

    let timestamps = series.timestamps();
    let gaps = find_gaps(series);
    let bridged = bridge_missing(series);
    // Stretching the kernel when downsampling turns it into the low-pass.
    let ratio = source_rate / target_rate;
    let scale = if ratio > 1.0 + RATE_TOLERANCE { ratio } else { 1.0 };

    let t0 = timestamps[0];
    let span = timestamps[timestamps.len() - 1] - t0;
    let n_out = (span * target_rate + GRID_EPSILON).floor() as usize + 1;

    let points = (0..n_out)
        .map(|k| {
            let t = t0 + k as f64 / target_rate;
            let value = match &bridged {
                Some(values) if !in_any_gap(&gaps, t) => {
                    let pos = fractional_index(&timestamps, t);
                    lanczos_at(values, pos, scale)
                }
                _ => f64::NAN,
            };
            TimeSeriesPoint::new(t, value)
        })
        .collect();

    Ok(TimeSeries::from_sorted_points(points))
}

/// Values with missing runs filled by linear interpolation in time. Runs at
/// either edge hold the nearest present value. `None` when nothing is present.
pub(crate) fn bridge_missing(series: &TimeSeries) -> Option<Vec<f64>> {
    let points = series.points();
    let present: Vec<usize> = (0..points.len()).filter(|&i| !points[i].is_missing()).collect();
    let (&first, &last) = (present.first()?, present.last()?);

    let mut out = series.values();
    for v in out.iter_mut().take(first) {
        *v = points[first].value;
    }
    for v in out.iter_mut().skip(last + 1) {
        *v = points[last].value;
    }
    for pair in present.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (pa, pb) = (points[a], points[b]);
        let slope = (pb.value - pa.value) / (pb.t - pa.t);
        for (i, v) in out.iter_mut().enumerate().take(b).skip(a + 1) {
            *v = pa.value + slope * (points[i].t - pa.t);
        }
    }
    Some(out)
}

/// Position of `t` in sample-index units, linear between neighbouring
/// timestamps so jittered sampling is handled.
fn fractional_index(timestamps: &[f64], t: f64) -> f64 {
    let idx = timestamps.partition_point(|&x| x <= t);
    if idx == 0 {
        return 0.0;
    }
    if idx >= timestamps.len() {
        return (timestamps.len() - 1) as f64;
    }
    let i = idx - 1;
    i as f64 + (t - timestamps[i]) / (timestamps[i + 1] - timestamps[i])
}

fn lanczos_at(values: &[f64], pos: f64, scale: f64) -> f64 {
    let nearest = pos.round();
    if scale == 1.0 && (pos - nearest).abs() < GRID_EPSILON {
        return values[nearest as usize];
    }

    let support = LANCZOS_LOBES * scale;
    let lo = (pos - support).ceil().max(0.0) as usize;
    let hi = ((pos + support).floor() as usize).min(values.len() - 1);

    let (mut acc, mut weight_sum) = (0.0, 0.0);
    for (j, value) in values.iter().enumerate().take(hi + 1).skip(lo) {
        let w = lanczos((j as f64 - pos) / scale);
        acc += w * value;
        weight_sum += w;
    }
    if weight_sum.abs() < f64::EPSILON {
        values[(nearest as usize).min(values.len() - 1)]
    } else {
        acc / weight_sum
    }
}

fn lanczos(x: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    if x.abs() >= LANCZOS_LOBES {
        return 0.0;
    }
    let px = PI * x;
    LANCZOS_LOBES * px.sin() * (px / LANCZOS_LOBES).sin() / (px * px)
}
