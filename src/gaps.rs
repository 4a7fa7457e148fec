use itertools::Itertools;

use crate::time_series::TimeSeries;

/// Closed interval `[start, end]` covering one run of missing samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gap {
    pub start: f64,
    pub end: f64,
}

impl Gap {
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Every maximal run of missing samples, in time order. Bounds are the first
/// and last timestamps inside the run, so a series sampled at another rate can
/// be checked against them.
pub fn find_gaps(series: &TimeSeries) -> Vec<Gap> {
    let runs = series.points().iter().chunk_by(|p| p.is_missing());
    let gaps = runs
        .into_iter()
        .filter(|(missing, _)| *missing)
        .filter_map(|(_, mut run)| {
            let first = run.next()?;
            let last = run.last().unwrap_or(first);
            Some(Gap {
                start: first.t,
                end: last.t,
            })
        })
        .collect();
    gaps
}

/// `gaps` must be sorted and disjoint, as `find_gaps` returns them.
pub fn in_any_gap(gaps: &[Gap], t: f64) -> bool {
    let idx = gaps.partition_point(|g| g.end < t);
    gaps.get(idx).is_some_and(|g| g.contains(t))
}
