//! Time-indexed temperature series, resampling, and the two-source merge.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Sampling period of the working series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    #[default]
    Daily,
}

impl Frequency {
    /// Start of the bucket `ts` falls into
    pub fn bucket(self, ts: NaiveDateTime) -> NaiveDateTime {
        match self {
            Frequency::Daily => ts.date().and_hms_opt(0, 0, 0).unwrap_or(ts),
            Frequency::Hourly => ts
                .date()
                .and_hms_opt(ts.hour(), 0, 0)
                .unwrap_or(ts),
        }
    }

    pub fn step(self) -> Duration {
        match self {
            Frequency::Daily => Duration::days(1),
            Frequency::Hourly => Duration::hours(1),
        }
    }

    /// ISO-8601 period used by the Meteomatics time-range syntax
    pub fn iso_interval(self) -> &'static str {
        match self {
            Frequency::Daily => "P1D",
            Frequency::Hourly => "PT1H",
        }
    }

    /// Timestamp layout for tabular output
    pub fn date_format(self) -> &'static str {
        match self {
            Frequency::Daily => "%Y-%m-%d",
            Frequency::Hourly => "%Y-%m-%d %H:%M:%S",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "1D"),
            Frequency::Hourly => write!(f, "1H"),
        }
    }
}

/// Scalar readings keyed by timestamp, in increasing order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    points: BTreeMap<NaiveDateTime, f64>,
}

impl TimeSeries {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: BTreeMap::new(),
        }
    }

    pub fn from_points<I>(name: impl Into<String>, points: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDateTime, f64)>,
    {
        Self {
            name: name.into(),
            points: points.into_iter().collect(),
        }
    }

    /// Bucket raw readings by `freq` and average each bucket.
    ///
    /// NaN readings are skipped; buckets with no valid reading are dropped.
    pub fn resample_mean<I>(name: impl Into<String>, readings: I, freq: Frequency) -> Self
    where
        I: IntoIterator<Item = (NaiveDateTime, f64)>,
    {
        let mut sums: BTreeMap<NaiveDateTime, (f64, usize)> = BTreeMap::new();
        for (ts, value) in readings {
            if value.is_nan() {
                continue;
            }
            let entry = sums.entry(freq.bucket(ts)).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        Self {
            name: name.into(),
            points: sums
                .into_iter()
                .map(|(ts, (sum, count))| (ts, sum / count as f64))
                .collect(),
        }
    }

    pub fn insert(&mut self, ts: NaiveDateTime, value: f64) {
        self.points.insert(ts, value);
    }

    pub fn get(&self, ts: &NaiveDateTime) -> Option<f64> {
        self.points.get(ts).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.points.keys().next().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.points.keys().next_back().copied()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = &NaiveDateTime> {
        self.points.keys()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.values().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDateTime, &f64)> {
        self.points.iter()
    }
}

/// Merges the file and network series into one gap-free series on the
/// regular `freq` grid.
///
/// The network series wins wherever both have a finite value for the same
/// timestamp. Grid points neither source covers are filled by linear
/// interpolation between their neighbours, and the edges by carrying the
/// nearest value outward.
pub fn merge_and_clean(file_series: &TimeSeries, network_series: &TimeSeries, freq: Frequency) -> Result<TimeSeries, DataError> {
    let mut combined: BTreeMap<NaiveDateTime, f64> = BTreeMap::new();
    for (ts, value) in file_series.iter() {
        if value.is_finite() {
            combined.insert(freq.bucket(*ts), *value);
        }
    }
    for (ts, value) in network_series.iter() {
        if value.is_finite() {
            combined.insert(freq.bucket(*ts), *value);
        }
    }

    let (start, end) = match (combined.keys().next(), combined.keys().next_back()) {
        (Some(&start), Some(&end)) => (start, end),
        _ => return Err(DataError::EmptySeries),
    };

    let mut grid = Vec::new();
    let mut ts = start;
    while ts <= end {
        grid.push((ts, combined.get(&ts).copied()));
        ts += freq.step();
    }

    let filled = fill_gaps(&grid.iter().map(|(_, v)| *v).collect::<Vec<_>>());

    Ok(TimeSeries::from_points(
        "temperature",
        grid.into_iter().map(|(ts, _)| ts).zip(filled),
    ))
}

/// Linear interpolation between known points, nearest-value fill at the
/// edges. Assumes at least one known point.
fn fill_gaps(values: &[Option<f64>]) -> Vec<f64> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();

    let mut out = vec![0.0; values.len()];
    let (first_idx, first_val) = known[0];
    let (last_idx, last_val) = known[known.len() - 1];

    for slot in out.iter_mut().take(first_idx) {
        *slot = first_val;
    }
    for pair in known.windows(2) {
        let (i0, v0) = pair[0];
        let (i1, v1) = pair[1];
        for (i, slot) in out.iter_mut().enumerate().take(i1).skip(i0) {
            let alpha = (i - i0) as f64 / (i1 - i0) as f64;
            *slot = v0 + alpha * (v1 - v0);
        }
    }
    for slot in out.iter_mut().skip(last_idx) {
        *slot = last_val;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_resample_daily_mean_skips_nan() {
        let readings = vec![
            (day(1) + Duration::hours(3), 10.0),
            (day(1) + Duration::hours(15), 14.0),
            (day(2) + Duration::hours(1), f64::NAN),
            (day(3), 7.0),
        ];
        let series = TimeSeries::resample_mean("t", readings, Frequency::Daily);

        assert_eq!(series.len(), 2);
        assert_eq!(series.get(&day(1)), Some(12.0));
        assert_eq!(series.get(&day(2)), None);
        assert_eq!(series.get(&day(3)), Some(7.0));
    }

    #[test]
    fn test_hourly_bucket_truncates_minutes() {
        let ts = day(5) + Duration::minutes(135);
        assert_eq!(Frequency::Hourly.bucket(ts), day(5) + Duration::hours(2));
    }

    #[test]
    fn test_merge_prefers_network_and_falls_back_to_file() {
        let file = TimeSeries::from_points("nc", vec![(day(1), 1.0), (day(2), 2.0), (day(3), 3.0)]);
        let net = TimeSeries::from_points("met", vec![(day(2), 20.0), (day(4), 40.0)]);

        let merged = merge_and_clean(&file, &net, Frequency::Daily).unwrap();

        assert_eq!(merged.get(&day(1)), Some(1.0));
        assert_eq!(merged.get(&day(2)), Some(20.0));
        assert_eq!(merged.get(&day(3)), Some(3.0));
        assert_eq!(merged.get(&day(4)), Some(40.0));
    }

    #[test]
    fn test_merge_interpolates_interior_gaps() {
        let file = TimeSeries::from_points("nc", vec![(day(1), 0.0)]);
        let net = TimeSeries::from_points("met", vec![(day(5), 8.0)]);

        let merged = merge_and_clean(&file, &net, Frequency::Daily).unwrap();

        assert_eq!(merged.len(), 5);
        assert_eq!(merged.values(), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_merge_skips_non_finite_network_values() {
        let file = TimeSeries::from_points("nc", vec![(day(1), 5.0), (day(2), 6.0)]);
        let net = TimeSeries::from_points("met", vec![(day(2), f64::NAN)]);

        let merged = merge_and_clean(&file, &net, Frequency::Daily).unwrap();
        assert_eq!(merged.get(&day(2)), Some(6.0));
    }

    #[test]
    fn test_merge_of_empty_inputs_fails() {
        let empty = TimeSeries::new("x");
        assert!(matches!(
            merge_and_clean(&empty, &empty, Frequency::Daily),
            Err(DataError::EmptySeries)
        ));
    }

    #[test]
    fn test_fill_gaps_carries_edges() {
        let filled = fill_gaps(&[None, Some(2.0), None, Some(4.0), None]);
        assert_eq!(filled, vec![2.0, 2.0, 3.0, 4.0, 4.0]);
    }
}
