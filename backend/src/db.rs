use std::time::Duration;

use crate::{
    reading::{Reading, SensorFilter, SensorId},
    schema::*,
};
use anyhow::{Context, Result};
use common::req::MeasurementType;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use log::{debug, info};

/// Durable history of readings.
///
/// Calls may block for a long time on wide ranges; callers run them on the
/// blocking pool.
pub trait MeasurementStore: Send + Sync + 'static {
    /// Readings of `kind` within `[start, end)`, sorted by sensor then timestamp.
    fn fetch(
        &self,
        filter: &SensorFilter,
        kind: MeasurementType,
        start: i64,
        end: i64,
    ) -> Result<Vec<Reading>>;

    fn insert(&self, readings: &[Reading]) -> Result<()>;

    fn touch_sensor(&self, sensor: &str, last_seen_at: i64) -> Result<()>;

    /// Every sensor that ever reported.
    fn sensors(&self) -> Result<Vec<SensorId>>;
}

#[derive(Debug, Insertable)]
#[diesel(table_name=measurement)]
struct NewMeasurement<'a> {
    recorded_at: i64,
    sensor: &'a str,
    measurement_type: &'a str,
    value: Option<f64>,
}

const POOL_SIZE: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// WAL lets readers run next to the single writer.
#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL;",
            BUSY_TIMEOUT.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub struct Db {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Db {
    pub fn connect(database_url: &str) -> Result<Self> {
        // every connection to ":memory:" is its own database
        let size = if database_url == ":memory:" { 1 } else { POOL_SIZE };
        let pool = Pool::builder()
            .max_size(size)
            .connection_timeout(BUSY_TIMEOUT)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(ConnectionManager::<SqliteConnection>::new(database_url))
            .with_context(|| format!("failed to open {database_url}"))?;
        pool.get()?.batch_execute(CREATE_TABLES)?;
        info!("Opened measurement store {database_url} with {size} connections");

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
        self.pool.get().context("no database connection available")
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> Result<T>) -> Result<T> {
        f(&mut *self.conn()?)
    }
}

impl MeasurementStore for Db {
    fn fetch(
        &self,
        filter: &SensorFilter,
        kind: MeasurementType,
        start: i64,
        end: i64,
    ) -> Result<Vec<Reading>> {
        use crate::schema::measurement::dsl as m;

        let mut query = m::measurement
            .select((m::sensor, m::recorded_at, m::value))
            .filter(m::measurement_type.eq(kind.as_str()))
            .filter(m::recorded_at.ge(start))
            .filter(m::recorded_at.lt(end))
            .order((m::sensor.asc(), m::recorded_at.asc()))
            .into_boxed();
        if let SensorFilter::Only(ids) = filter {
            query = query.filter(m::sensor.eq_any(ids.clone()));
        }

        let rows = self.with_conn(|conn| Ok(query.load::<(String, i64, Option<f64>)>(conn)?))?;
        debug!("Loaded {} {kind} rows from [{start}, {end})", rows.len());

        Ok(rows
            .into_iter()
            .map(|(sensor, timestamp, value)| Reading {
                sensor,
                kind,
                timestamp,
                value,
            })
            .collect())
    }

    fn insert(&self, readings: &[Reading]) -> Result<()> {
        self.with_conn(|conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                for r in readings {
                    diesel::replace_into(measurement::table)
                        .values(&NewMeasurement {
                            recorded_at: r.timestamp,
                            sensor: &r.sensor,
                            measurement_type: r.kind.as_str(),
                            value: r.value,
                        })
                        .execute(conn)?;
                }
                Ok(())
            })?;
            Ok(())
        })
    }

    fn touch_sensor(&self, sensor: &str, last_seen_at: i64) -> Result<()> {
        self.with_conn(|conn| {
            diesel::replace_into(sensor_seen::table)
                .values((
                    sensor_seen::sensor.eq(sensor),
                    sensor_seen::last_seen_at.eq(last_seen_at),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    fn sensors(&self) -> Result<Vec<SensorId>> {
        self.with_conn(|conn| {
            Ok(sensor_seen::table
                .select(sensor_seen::sensor)
                .order(sensor_seen::sensor.asc())
                .load::<String>(conn)?)
        })
    }
}
