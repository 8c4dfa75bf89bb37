use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use common::req::{MeasurementType, SeriesResponse};
use log::{debug, warn};

use crate::{
    aggregate::{self, MAX_BUCKETS, MAX_TIMESTAMP, MINUTE},
    buffer::RecentBuffer,
    db::MeasurementStore,
    error::QueryError,
    reading::{Reading, SensorFilter, SensorId},
    registry::SensorRegistry,
    utils::Clock,
};

/// Query string of `/measurements.json` and `/summaries.json`.
#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChartParams {
    pub start: i64,
    pub end: i64,
    pub measurement_type: String,
    pub window: Option<i64>,
    /// Comma separated sensor ids; all sensors when absent.
    pub sensors: Option<String>,
}

/// Validated chart request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartQuery {
    pub start: i64,
    pub end: i64,
    pub kind: MeasurementType,
    pub window: Option<i64>,
    pub filter: SensorFilter,
}

impl ChartParams {
    pub fn validate(&self) -> Result<ChartQuery, QueryError> {
        if self.start >= self.end {
            return Err(QueryError::InvalidRange(format!(
                "start ({}) must be before end ({})",
                self.start, self.end
            )));
        }
        let bounds = -MAX_TIMESTAMP..=MAX_TIMESTAMP;
        if !bounds.contains(&self.start) || !bounds.contains(&self.end) {
            return Err(QueryError::InvalidRange(format!(
                "start and end must lie within ±{MAX_TIMESTAMP}"
            )));
        }
        let kind = self.measurement_type.parse::<MeasurementType>()?;
        if matches!(self.window, Some(w) if w <= 0 || w > MAX_TIMESTAMP) {
            return Err(QueryError::InvalidParameter(format!(
                "window must be between 1 and {MAX_TIMESTAMP} seconds"
            )));
        }

        let filter = match self.sensors.as_deref().map(str::trim) {
            None | Some("") => SensorFilter::All,
            Some(ids) => SensorFilter::Only(
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
        };

        Ok(ChartQuery {
            start: self.start,
            end: self.end,
            kind,
            window: self.window,
            filter,
        })
    }
}

/// Where the data for a range lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Buffer,
    Store,
    Both,
}

pub fn route(start: i64, end: i64, now: i64, retention: i64) -> Route {
    let horizon = now - retention;
    if start >= horizon {
        Route::Buffer
    } else if end <= horizon {
        Route::Store
    } else {
        Route::Both
    }
}

/// Store data first, buffer data over it; identical (sensor, timestamp) keep the buffer's.
pub fn merge(stored: Vec<Reading>, recent: Vec<Reading>) -> Vec<Reading> {
    let mut merged = BTreeMap::new();
    for r in stored.into_iter().chain(recent) {
        merged.insert((r.sensor.clone(), r.timestamp), r);
    }
    merged.into_values().collect()
}

struct Fetched {
    readings: Vec<Reading>,
    partial: Option<QueryError>,
}

pub struct QueryService {
    buffer: Arc<RecentBuffer>,
    store: Arc<dyn MeasurementStore>,
    registry: Arc<SensorRegistry>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl QueryService {
    pub fn new(
        buffer: Arc<RecentBuffer>,
        store: Arc<dyn MeasurementStore>,
        registry: Arc<SensorRegistry>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            buffer,
            store,
            registry,
            clock,
            store_timeout,
        }
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn buffer(&self) -> &RecentBuffer {
        &self.buffer
    }

    pub async fn measurements(&self, q: &ChartQuery) -> Result<SeriesResponse, QueryError> {
        let fetched = self.fetch(q).await?;
        let sensors = self.sensor_list(&q.filter, &fetched.readings);
        let quantum = q.window.unwrap_or(MINUTE);

        Ok(SeriesResponse {
            data: aggregate::quantize(&fetched.readings, &sensors, quantum),
            sensors,
            summaries: false,
            window: quantum,
            partial: fetched.partial.map(|e| e.body()),
        })
    }

    pub async fn summaries(&self, q: &ChartQuery) -> Result<SeriesResponse, QueryError> {
        let width = aggregate::window_for_span(q.end - q.start);
        if (q.end - q.start) / width > MAX_BUCKETS {
            return Err(QueryError::InvalidRange(format!(
                "more than {MAX_BUCKETS} buckets of {width}s"
            )));
        }

        let fetched = self.fetch(q).await?;
        let sensors = self.sensor_list(&q.filter, &fetched.readings);

        Ok(SeriesResponse {
            data: aggregate::summarize(&fetched.readings, &sensors, q.start, q.end, width),
            sensors,
            summaries: true,
            window: width,
            partial: fetched.partial.map(|e| e.body()),
        })
    }

    /// Everything the buffer holds for `kind`, never touching the store.
    pub fn recent(&self, kind: MeasurementType) -> SeriesResponse {
        let now = self.clock.now();
        let readings = self
            .buffer
            .query(&SensorFilter::All, kind, now - self.buffer.retention(), now + 1);
        let sensors = self.sensor_list(&SensorFilter::All, &readings);

        SeriesResponse {
            data: aggregate::quantize(&readings, &sensors, MINUTE),
            sensors,
            summaries: false,
            window: MINUTE,
            partial: None,
        }
    }

    async fn fetch(&self, q: &ChartQuery) -> Result<Fetched, QueryError> {
        let now = self.clock.now();
        let route = route(q.start, q.end, now, self.buffer.retention());
        debug!("Routing {:?} to {:?}", q, route);

        let fetched = match route {
            Route::Buffer => Fetched {
                readings: self.buffer.query(&q.filter, q.kind, q.start, q.end),
                partial: None,
            },
            Route::Store => Fetched {
                readings: self.fetch_store(q).await?,
                partial: None,
            },
            Route::Both => {
                let stored = self.fetch_store(q).await;
                let recent = self.buffer.query(&q.filter, q.kind, q.start, q.end);
                match stored {
                    Ok(stored) => Fetched {
                        readings: merge(stored, recent),
                        partial: None,
                    },
                    Err(e) => {
                        warn!("Serving buffer data only: {e}");
                        Fetched {
                            readings: recent,
                            partial: Some(e),
                        }
                    }
                }
            }
        };
        Ok(fetched)
    }

    async fn fetch_store(&self, q: &ChartQuery) -> Result<Vec<Reading>, QueryError> {
        let store = self.store.clone();
        let (start, end, kind, filter) = (q.start, q.end, q.kind, q.filter.clone());
        let task = tokio::task::spawn_blocking(move || store.fetch(&filter, kind, start, end));

        match tokio::time::timeout(self.store_timeout, task).await {
            Ok(Ok(Ok(readings))) => Ok(readings),
            Ok(Ok(Err(e))) => Err(QueryError::StoreUnavailable(format!("{e:#}"))),
            Ok(Err(e)) => Err(QueryError::StoreUnavailable(e.to_string())),
            Err(_) => Err(QueryError::StoreTimeout(self.store_timeout)),
        }
    }

    /// Registry sensors passing `filter` plus any sensor present in `readings`, sorted.
    fn sensor_list(&self, filter: &SensorFilter, readings: &[Reading]) -> Vec<SensorId> {
        self.registry
            .ids()
            .filter(|id| filter.matches(id))
            .chain(readings.iter().map(|r| r.sensor.as_str()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }
}
