//! Bucketing and quantization of raw readings into chart series.
//!
//! Both paths produce a [`SeriesResult`] whose columns follow the order of
//! the `sensors` slice they are given, so a sensor without any reading still
//! gets a column of gaps.

use std::collections::{BTreeSet, HashMap};

use common::req::SeriesResult;

use crate::reading::{Reading, SensorId};

pub const MINUTE: i64 = 60;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;

/// Upper bound on buckets per summary query.
pub const MAX_BUCKETS: i64 = 100_000;

/// Largest magnitude accepted for query bounds and widths, leaving headroom
/// for aligning and stepping past either bound.
pub const MAX_TIMESTAMP: i64 = i64::MAX / 4;

/// Bucket width for a query spanning `span` seconds.
pub fn window_for_span(span: i64) -> i64 {
    if span < DAY {
        MINUTE
    } else if span < 7 * DAY {
        HOUR
    } else if span < 32 * DAY {
        3 * HOUR
    } else {
        DAY
    }
}

/// Floors `ts` to a multiple of `width` counted from the epoch.
pub fn align(ts: i64, width: i64) -> i64 {
    ts.div_euclid(width) * width
}

/// Reduced statistic over `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub start: i64,
    pub end: i64,
    pub low: f64,
    pub high: f64,
    pub average: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    low: f64,
    high: f64,
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn new(v: f64) -> Self {
        Self {
            low: v,
            high: v,
            sum: v,
            count: 1,
        }
    }

    fn push(&mut self, v: f64) {
        self.low = self.low.min(v);
        self.high = self.high.max(v);
        self.sum += v;
        self.count += 1;
    }

    fn finish(self, start: i64, width: i64) -> Bucket {
        Bucket {
            start,
            end: start + width,
            low: self.low,
            high: self.high,
            // float summation may land a hair outside the band
            average: (self.sum / self.count as f64).clamp(self.low, self.high),
            count: self.count,
        }
    }
}

/// Bucket starts partitioning `[start, end)` at `width`.
pub fn bucket_starts(start: i64, end: i64, width: i64) -> Vec<i64> {
    let first = align(start, width);
    (0..)
        .map(|i| first + i * width)
        .take_while(|ts| *ts < end)
        .collect()
}

/// Buckets of a single sensor; `None` marks a bucket without readings.
pub fn buckets<'a>(
    readings: impl IntoIterator<Item = &'a Reading>,
    start: i64,
    end: i64,
    width: i64,
) -> Vec<Option<Bucket>> {
    let starts = bucket_starts(start, end, width);
    let first = starts.first().copied().unwrap_or(start);
    let mut acc: Vec<Option<Accumulator>> = vec![None; starts.len()];

    for r in readings {
        let Some(value) = r.value else { continue };
        if r.timestamp < start || r.timestamp >= end {
            continue;
        }
        let slot = ((align(r.timestamp, width) - first) / width) as usize;
        match &mut acc[slot] {
            Some(a) => a.push(value),
            empty => *empty = Some(Accumulator::new(value)),
        }
    }

    acc.into_iter()
        .zip(starts)
        .map(|(a, start)| a.map(|a| a.finish(start, width)))
        .collect()
}

/// Summary series: per sensor three columns (low, high, average).
pub fn summarize(
    readings: &[Reading],
    sensors: &[SensorId],
    start: i64,
    end: i64,
    width: i64,
) -> SeriesResult {
    let mut by_sensor: HashMap<&str, Vec<&Reading>> = HashMap::new();
    for r in readings {
        by_sensor.entry(r.sensor.as_str()).or_default().push(r);
    }

    let timestamps = bucket_starts(start, end, width);
    let mut columns = Vec::with_capacity(sensors.len() * 3);
    for sensor in sensors {
        let own = by_sensor.remove(sensor.as_str()).unwrap_or_default();
        let buckets = buckets(own, start, end, width);
        columns.push(buckets.iter().map(|b| b.map(|b| b.low)).collect());
        columns.push(buckets.iter().map(|b| b.map(|b| b.high)).collect());
        columns.push(buckets.iter().map(|b| b.map(|b| b.average)).collect());
    }

    SeriesResult {
        timestamps,
        columns,
    }
}

/// Raw series on a shared x-axis of `quantum`-floored instants.
///
/// `readings` must be sorted by timestamp within each sensor; when several
/// readings of one sensor share a slot the latest non-null one wins.
pub fn quantize(readings: &[Reading], sensors: &[SensorId], quantum: i64) -> SeriesResult {
    let timestamps: Vec<i64> = readings
        .iter()
        .map(|r| align(r.timestamp, quantum))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let slots: HashMap<i64, usize> = timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| (*ts, i))
        .collect();
    let columns_of: HashMap<&str, usize> = sensors
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    let mut columns = vec![vec![None; timestamps.len()]; sensors.len()];
    for r in readings {
        let Some(col) = columns_of.get(r.sensor.as_str()) else {
            continue;
        };
        if r.value.is_some() {
            columns[*col][slots[&align(r.timestamp, quantum)]] = r.value;
        }
    }

    SeriesResult {
        timestamps,
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::req::MeasurementType;

    const T: i64 = 1_699_999_980; // minute aligned

    fn temp(sensor: &str, ts: i64, value: f64) -> Reading {
        Reading::new(sensor, MeasurementType::Temperature, ts, Some(value))
    }

    fn ids(ids: &[&str]) -> Vec<SensorId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn window_depends_only_on_span() {
        assert_eq!(window_for_span(12 * HOUR), 60);
        assert_eq!(window_for_span(DAY - 1), 60);
        assert_eq!(window_for_span(DAY), 3600);
        assert_eq!(window_for_span(3 * DAY), 3600);
        assert_eq!(window_for_span(10 * DAY), 10800);
        assert_eq!(window_for_span(32 * DAY), 86400);
        assert_eq!(window_for_span(40 * DAY), 86400);
    }

    #[test]
    fn align_floors_from_epoch() {
        assert_eq!(align(125, 60), 120);
        assert_eq!(align(120, 60), 120);
        assert_eq!(align(-1, 60), -60);
        assert_eq!(align(T + 59, MINUTE), T);
    }

    #[test]
    fn boundaries_are_stable_across_shifted_queries() {
        let a = bucket_starts(T + 17, T + 17 + 10 * MINUTE, MINUTE);
        let b = bucket_starts(T + 45, T + 45 + 10 * MINUTE, MINUTE);
        assert_eq!(a, b);
        assert_eq!(a.first(), Some(&T));
        assert_eq!(a.len(), 11);
    }

    #[test]
    fn buckets_reduce_low_high_average() {
        let readings = vec![
            temp("A", T, 3.0),
            temp("A", T + 10, 1.0),
            temp("A", T + 59, 2.0),
            temp("A", T + 150, 7.0),
        ];
        let res = buckets(&readings, T, T + 180, MINUTE);

        assert_eq!(
            res[0],
            Some(Bucket {
                start: T,
                end: T + 60,
                low: 1.0,
                high: 3.0,
                average: 2.0,
                count: 3,
            })
        );
        assert_eq!(res[1], None);
        assert_eq!(res[2].map(|b| (b.low, b.high, b.count)), Some((7.0, 7.0, 1)));
    }

    #[test]
    fn average_stays_within_band() {
        let readings: Vec<_> = (0..10).map(|i| temp("A", T + i, 0.1)).collect();
        let bucket = buckets(&readings, T, T + 60, MINUTE)[0].unwrap();
        assert!(bucket.low <= bucket.average && bucket.average <= bucket.high);
    }

    #[test]
    fn null_values_do_not_fill_buckets() {
        let readings = vec![Reading::new("A", MeasurementType::Humidity, T, None)];
        assert_eq!(buckets(&readings, T, T + 60, MINUTE), vec![None]);
    }

    #[test]
    fn summaries_list_known_sensors_as_gaps() {
        let readings = vec![temp("A", T, 1.0), temp("A", T + 61, 3.0)];
        let res = summarize(&readings, &ids(&["A", "B"]), T, T + 120, MINUTE);

        assert_eq!(res.timestamps, vec![T, T + 60]);
        assert_eq!(res.columns.len(), 6);
        assert_eq!(res.columns[0], vec![Some(1.0), Some(3.0)]);
        assert_eq!(res.columns[2], vec![Some(1.0), Some(3.0)]);
        for col in &res.columns[3..] {
            assert_eq!(col, &vec![None, None]);
        }
        assert!(res.is_aligned());
    }

    #[test]
    fn quantize_shares_minute_axis() {
        let readings = vec![
            temp("A", T, 10.0),
            temp("A", T + 60, 10.5),
            temp("A", T + 130, 11.0),
        ];
        let res = quantize(&readings, &ids(&["A"]), MINUTE);

        assert_eq!(res.timestamps, vec![T, T + 60, T + 120]);
        assert_eq!(res.columns, vec![vec![Some(10.0), Some(10.5), Some(11.0)]]);
    }

    #[test]
    fn quantize_aligns_independent_sensors() {
        let readings = vec![
            temp("A", T + 5, 1.0),
            temp("A", T + 70, 2.0),
            temp("B", T + 30, 5.0),
            temp("B", T + 40, 6.0),
        ];
        let res = quantize(&readings, &ids(&["A", "B", "C"]), MINUTE);

        assert_eq!(res.timestamps, vec![T, T + 60]);
        assert_eq!(res.columns[0], vec![Some(1.0), Some(2.0)]);
        assert_eq!(res.columns[1], vec![Some(6.0), None]);
        assert_eq!(res.columns[2], vec![None, None]);
    }

    #[test]
    fn quantize_empty_input() {
        let res = quantize(&[], &ids(&["A"]), MINUTE);
        assert!(res.timestamps.is_empty());
        assert_eq!(res.columns, vec![Vec::<Option<f64>>::new()]);
    }
}
