use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
};

use common::req::{BufferStats, MeasurementType};
use log::debug;

use crate::{
    reading::{Reading, SensorFilter, SensorId},
    utils::Clock,
};

#[derive(Debug, Clone, Copy)]
struct Sample {
    timestamp: i64,
    value: Option<f64>,
}

type SeriesKey = (SensorId, MeasurementType);
type Series = Arc<Mutex<VecDeque<Sample>>>;

/// In-memory window over the newest readings.
///
/// Every (sensor, type) pair owns its own sorted series behind its own lock,
/// so an append only ever contends with readers of that same series.
pub struct RecentBuffer {
    retention: i64, // s
    clock: Arc<dyn Clock>,
    series: RwLock<BTreeMap<SeriesKey, Series>>,
    dropped: AtomicU64,
}

impl RecentBuffer {
    pub fn new(retention: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            retention,
            clock,
            series: RwLock::new(BTreeMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn retention(&self) -> i64 {
        self.retention
    }

    /// Oldest timestamp the buffer still answers for.
    pub fn horizon(&self) -> i64 {
        self.clock.now() - self.retention
    }

    /// Inserts `reading` at its sorted position.
    ///
    /// Returns `false` if the reading was malformed or already past the
    /// horizon; such readings are only counted.
    pub fn append(&self, reading: Reading) -> bool {
        let horizon = self.horizon();
        if !reading.is_well_formed() || reading.timestamp < horizon {
            debug!("Dropping reading {:?}", reading);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let series = self.series_for(reading.sensor, reading.kind);
        let mut samples = series.lock().unwrap_or_else(PoisonError::into_inner);
        trim(&mut samples, horizon);

        let sample = Sample {
            timestamp: reading.timestamp,
            value: reading.value,
        };
        match samples.back() {
            Some(last) if last.timestamp >= sample.timestamp => {
                let idx = samples.partition_point(|s| s.timestamp < sample.timestamp);
                if samples[idx].timestamp == sample.timestamp {
                    samples[idx] = sample;
                } else {
                    samples.insert(idx, sample);
                }
            }
            _ => samples.push_back(sample),
        }
        true
    }

    /// Readings of `kind` within `[start, end)`, sorted by sensor then timestamp.
    pub fn query(
        &self,
        filter: &SensorFilter,
        kind: MeasurementType,
        start: i64,
        end: i64,
    ) -> Vec<Reading> {
        let start = start.max(self.horizon());
        if start >= end {
            return vec![];
        }

        let selected: Vec<(SensorId, Series)> = {
            let map = self.series.read().unwrap_or_else(PoisonError::into_inner);
            map.iter()
                .filter(|((sensor, k), _)| *k == kind && filter.matches(sensor))
                .map(|((sensor, _), series)| (sensor.clone(), series.clone()))
                .collect()
        };

        let mut res = vec![];
        for (sensor, series) in selected {
            let samples = series.lock().unwrap_or_else(PoisonError::into_inner);
            let from = samples.partition_point(|s| s.timestamp < start);
            let to = samples.partition_point(|s| s.timestamp < end);
            res.extend(samples.range(from..to).map(|s| Reading {
                sensor: sensor.clone(),
                kind,
                timestamp: s.timestamp,
                value: s.value,
            }));
        }
        res
    }

    /// Drops everything older than the horizon and forgets empty series.
    pub fn evict(&self) -> usize {
        let horizon = self.horizon();
        let mut removed = 0;

        let mut map = self.series.write().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, series| {
            let mut samples = series.lock().unwrap_or_else(PoisonError::into_inner);
            removed += trim(&mut samples, horizon);
            // a concurrent append may still hold a handle to this series
            !samples.is_empty() || Arc::strong_count(series) > 1
        });
        removed
    }

    /// Bulk-loads readings, e.g. from the store after a restart.
    pub fn warm(&self, readings: impl IntoIterator<Item = Reading>) -> usize {
        readings
            .into_iter()
            .map(|r| self.append(r))
            .filter(|accepted| *accepted)
            .count()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BufferStats {
        let map = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let readings = map
            .values()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum();

        BufferStats {
            series: map.len(),
            readings,
            dropped: self.dropped(),
        }
    }

    fn series_for(&self, sensor: SensorId, kind: MeasurementType) -> Series {
        let key = (sensor, kind);
        if let Some(series) = self
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return series.clone();
        }

        self.series
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }
}

fn trim(samples: &mut VecDeque<Sample>, horizon: i64) -> usize {
    let stale = samples.partition_point(|s| s.timestamp < horizon);
    samples.drain(..stale);
    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    const T: i64 = 1_700_000_000;

    fn buffer(clock: &Arc<ManualClock>) -> RecentBuffer {
        RecentBuffer::new(3600, clock.clone())
    }

    fn temp(sensor: &str, ts: i64, value: f64) -> Reading {
        Reading::new(sensor, MeasurementType::Temperature, ts, Some(value))
    }

    fn timestamps(readings: &[Reading]) -> Vec<i64> {
        readings.iter().map(|r| r.timestamp).collect()
    }

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let clock = Arc::new(ManualClock::new(T + 600));
        let buf = buffer(&clock);

        for offset in [300, 0, 120, 480, 60, 240] {
            assert!(buf.append(temp("A", T + offset, offset as f64)));
        }

        let res = buf.query(&SensorFilter::All, MeasurementType::Temperature, T, T + 600);
        assert_eq!(
            timestamps(&res),
            vec![T, T + 60, T + 120, T + 240, T + 300, T + 480]
        );
        assert_eq!(res[2].value, Some(120.0));
    }

    #[test]
    fn query_is_half_open_and_per_type() {
        let clock = Arc::new(ManualClock::new(T + 600));
        let buf = buffer(&clock);
        buf.append(temp("A", T, 1.0));
        buf.append(temp("A", T + 60, 2.0));
        buf.append(Reading::new("A", MeasurementType::Humidity, T + 30, Some(40.0)));

        let res = buf.query(&SensorFilter::All, MeasurementType::Temperature, T, T + 60);
        assert_eq!(timestamps(&res), vec![T]);

        let res = buf.query(&SensorFilter::All, MeasurementType::Humidity, T, T + 600);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].kind, MeasurementType::Humidity);
    }

    #[test]
    fn filter_and_sensor_order() {
        let clock = Arc::new(ManualClock::new(T + 600));
        let buf = buffer(&clock);
        buf.append(temp("B", T, 1.0));
        buf.append(temp("A", T + 10, 2.0));
        buf.append(temp("C", T + 5, 3.0));

        let res = buf.query(&SensorFilter::All, MeasurementType::Temperature, T, T + 600);
        let sensors: Vec<_> = res.iter().map(|r| r.sensor.as_str()).collect();
        assert_eq!(sensors, vec!["A", "B", "C"]);

        let only = SensorFilter::Only(vec!["C".to_owned()]);
        let res = buf.query(&only, MeasurementType::Temperature, T, T + 600);
        assert_eq!(res, vec![temp("C", T + 5, 3.0)]);
    }

    #[test]
    fn same_identity_replaces() {
        let clock = Arc::new(ManualClock::new(T + 600));
        let buf = buffer(&clock);
        buf.append(temp("A", T, 1.0));
        buf.append(temp("A", T + 60, 2.0));
        buf.append(temp("A", T, 5.0));

        let res = buf.query(&SensorFilter::All, MeasurementType::Temperature, T, T + 600);
        assert_eq!(res, vec![temp("A", T, 5.0), temp("A", T + 60, 2.0)]);
    }

    #[test]
    fn horizon_hides_old_data_without_eviction() {
        let clock = Arc::new(ManualClock::new(T + 60));
        let buf = buffer(&clock);
        buf.append(temp("A", T, 1.0));
        buf.append(temp("A", T + 60, 2.0));

        clock.advance(3600);
        let res = buf.query(&SensorFilter::All, MeasurementType::Temperature, T, T + 3700);
        assert_eq!(timestamps(&res), vec![T + 60]);

        clock.advance(3600);
        let res = buf.query(&SensorFilter::All, MeasurementType::Temperature, T, T + 3700);
        assert!(res.is_empty());
        assert_eq!(buf.stats().readings, 2);
    }

    #[test]
    fn evict_removes_stale_readings() {
        let clock = Arc::new(ManualClock::new(T + 60));
        let buf = buffer(&clock);
        buf.append(temp("A", T, 1.0));
        buf.append(temp("B", T + 60, 2.0));

        clock.advance(3601);
        assert_eq!(buf.evict(), 2);
        assert_eq!(
            buf.stats(),
            BufferStats {
                series: 0,
                readings: 0,
                dropped: 0
            }
        );
    }

    #[test]
    fn malformed_and_stale_readings_are_counted() {
        let clock = Arc::new(ManualClock::new(T + 7200));
        let buf = buffer(&clock);

        assert!(!buf.append(temp("A", T, 1.0)));
        assert!(!buf.append(temp("", T + 7000, 1.0)));
        assert!(!buf.append(temp("A", T + 7000, f64::NAN)));
        assert!(buf.append(Reading::new("A", MeasurementType::Pressure, T + 7000, None)));

        assert_eq!(buf.dropped(), 3);
        assert_eq!(buf.stats().readings, 1);
    }

    #[test]
    fn warm_counts_accepted() {
        let clock = Arc::new(ManualClock::new(T + 3600));
        let buf = buffer(&clock);
        let n = buf.warm(vec![temp("A", T - 1, 1.0), temp("A", T + 10, 2.0)]);
        assert_eq!(n, 1);
    }

    #[test]
    fn concurrent_appends_stay_sorted() {
        let clock = Arc::new(ManualClock::new(T + 3000));
        let buf = Arc::new(buffer(&clock));

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let buf = buf.clone();
                std::thread::spawn(move || {
                    for i in (0..250).rev() {
                        let sensor = if i % 2 == 0 { "A" } else { "B" };
                        buf.append(temp(sensor, T + i * 4 + worker, i as f64));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let res = buf.query(&SensorFilter::All, MeasurementType::Temperature, T, T + 3000);
        assert_eq!(res.len(), 1000);
        for pair in res.windows(2) {
            if pair[0].sensor == pair[1].sensor {
                assert!(pair[0].timestamp < pair[1].timestamp);
            }
        }
    }

    #[test]
    fn reads_during_appends_see_sorted_prefixes() {
        let clock = Arc::new(ManualClock::new(T + 3000));
        let buf = Arc::new(buffer(&clock));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let buf = buf.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    let mut last_len = 0;
                    while !done.load(std::sync::atomic::Ordering::SeqCst) {
                        let res = buf.query(
                            &SensorFilter::Only(vec!["A".to_owned()]),
                            MeasurementType::Temperature,
                            T,
                            T + 3000,
                        );
                        assert!(res.len() >= last_len);
                        assert!(res.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
                        last_len = res.len();
                    }
                })
            })
            .collect();
        let writer = {
            let buf = buf.clone();
            std::thread::spawn(move || {
                for i in (0..1000).rev() {
                    buf.append(temp("A", T + i * 2, i as f64));
                }
            })
        };

        writer.join().unwrap();
        done.store(true, std::sync::atomic::Ordering::SeqCst);
        for reader in readers {
            reader.join().unwrap();
        }
        let res = buf.query(&SensorFilter::All, MeasurementType::Temperature, T, T + 3000);
        assert_eq!(res.len(), 1000);
    }
}
