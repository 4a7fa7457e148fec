use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSeriesPoint {
    pub t: f64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(t: f64, value: f64) -> Self {
        Self { t, value }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_nan()
    }
}

impl From<(f64, f64)> for TimeSeriesPoint {
    fn from(v: (f64, f64)) -> Self {
        TimeSeriesPoint { t: v.0, value: v.1 }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("timestamp and value columns differ in length ({timestamps} vs {values})")]
    LengthMismatch { timestamps: usize, values: usize },
    #[error("timestamp at sample {index} is not finite")]
    NonFiniteTimestamp { index: usize },
    #[error("timestamps must strictly increase (sample {index})")]
    NonIncreasing { index: usize },
    #[error("value at sample {index} is infinite")]
    InfiniteValue { index: usize },
}

/// Ordered `(t, value)` samples with strictly increasing timestamps.
/// A NaN value marks a missing sample; infinite values are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "SeriesRepr", into = "SeriesRepr")]
pub struct TimeSeries {
    points: Vec<TimeSeriesPoint>,
}

impl TimeSeries {
    pub fn from_points(points: Vec<TimeSeriesPoint>) -> Result<Self, SeriesError> {
        for (index, p) in points.iter().enumerate() {
            if !p.t.is_finite() {
                return Err(SeriesError::NonFiniteTimestamp { index });
            }
            if index > 0 && p.t <= points[index - 1].t {
                return Err(SeriesError::NonIncreasing { index });
            }
            if p.value.is_infinite() {
                return Err(SeriesError::InfiniteValue { index });
            }
        }
        Ok(Self { points })
    }

    /// For grids built internally with increasing timestamps.
    pub(crate) fn from_sorted_points(points: Vec<TimeSeriesPoint>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].t < w[1].t));
        Self { points }
    }

    pub fn from_columns(t: Vec<f64>, values: Vec<f64>) -> Result<Self, SeriesError> {
        if t.len() != values.len() {
            return Err(SeriesError::LengthMismatch {
                timestamps: t.len(),
                values: values.len(),
            });
        }
        Self::from_points(
            t.into_iter()
                .zip(values)
                .map(TimeSeriesPoint::from)
                .collect(),
        )
    }

    /// Uniformly sampled series starting at `t0`.
    pub fn uniform(t0: f64, rate: f64, values: Vec<f64>) -> Result<Self, SeriesError> {
        let t = (0..values.len()).map(|k| t0 + k as f64 / rate).collect();
        Self::from_columns(t, values)
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.t).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn first_t(&self) -> Option<f64> {
        self.points.first().map(|p| p.t)
    }

    pub fn last_t(&self) -> Option<f64> {
        self.points.last().map(|p| p.t)
    }

    pub fn missing_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_missing()).count()
    }

    /// Same timestamps, values passed through `f`.
    pub fn map_values<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| TimeSeriesPoint::new(p.t, f(p.value)))
                .collect(),
        }
    }

    /// Bit-level equality. NaN placement counts; `PartialEq` on f64 would not.
    pub fn same_bits(&self, other: &TimeSeries) -> bool {
        self.points.len() == other.points.len()
            && self
                .points
                .iter()
                .zip(&other.points)
                .all(|(a, b)| a.t.to_bits() == b.t.to_bits() && a.value.to_bits() == b.value.to_bits())
    }
}

/// Parallel-column wire form; `null` stands for a missing value.
#[derive(Serialize, Deserialize)]
struct SeriesRepr {
    t: Vec<f64>,
    value: Vec<Option<f64>>,
}

impl TryFrom<SeriesRepr> for TimeSeries {
    type Error = SeriesError;

    fn try_from(repr: SeriesRepr) -> Result<Self, Self::Error> {
        let values = repr
            .value
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        TimeSeries::from_columns(repr.t, values)
    }
}

impl From<TimeSeries> for SeriesRepr {
    fn from(series: TimeSeries) -> Self {
        let (t, value) = series
            .points
            .into_iter()
            .map(|p| (p.t, (!p.is_missing()).then_some(p.value)))
            .unzip();
        SeriesRepr { t, value }
    }
}

/// One detected blink transition: where it sits in time, the pupil value
/// there, and the velocity at the same instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlinkMarker {
    pub t: f64,
    #[serde(with = "nan_as_null")]
    pub value: f64,
    #[serde(with = "nan_as_null")]
    pub velocity: f64,
}

impl BlinkMarker {
    pub fn same_bits(&self, other: &BlinkMarker) -> bool {
        self.t.to_bits() == other.t.to_bits()
            && self.value.to_bits() == other.value.to_bits()
            && self.velocity.to_bits() == other.velocity.to_bits()
    }
}

pub fn markers_same_bits(a: &[BlinkMarker], b: &[BlinkMarker]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_bits(y))
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            s.serialize_none()
        } else {
            s.serialize_f64(*v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}
