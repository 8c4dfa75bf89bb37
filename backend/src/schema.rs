diesel::table! {
    measurement (recorded_at, sensor, measurement_type) {
        recorded_at -> BigInt,
        sensor -> Text,
        measurement_type -> Text,
        value -> Nullable<Double>,
    }
}

diesel::table! {
    sensor_seen (sensor) {
        sensor -> Text,
        last_seen_at -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(measurement, sensor_seen,);

pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS measurement (
    recorded_at INTEGER NOT NULL,
    sensor TEXT NOT NULL,
    measurement_type TEXT NOT NULL,
    value REAL,
    CONSTRAINT measurement_pk PRIMARY KEY (recorded_at, sensor, measurement_type)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_measurement_type_time
    ON measurement (measurement_type, recorded_at);
CREATE TABLE IF NOT EXISTS sensor_seen (
    sensor TEXT NOT NULL PRIMARY KEY,
    last_seen_at INTEGER NOT NULL
);
";
