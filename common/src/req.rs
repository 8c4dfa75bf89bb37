use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Temperature,
    Humidity,
    Pressure,
    BatteryVoltage,
    TxPower,
}

/// Display metadata for one measurement type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementMeta {
    pub label: &'static str,
    pub unit: &'static str,
    /// Sensible default y-axis range.
    pub range: (f64, f64),
}

impl MeasurementType {
    pub const ALL: [MeasurementType; 5] = [
        MeasurementType::Temperature,
        MeasurementType::Humidity,
        MeasurementType::Pressure,
        MeasurementType::BatteryVoltage,
        MeasurementType::TxPower,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::Temperature => "temperature",
            MeasurementType::Humidity => "humidity",
            MeasurementType::Pressure => "pressure",
            MeasurementType::BatteryVoltage => "battery_voltage",
            MeasurementType::TxPower => "tx_power",
        }
    }

    pub fn meta(&self) -> MeasurementMeta {
        match self {
            MeasurementType::Temperature => MeasurementMeta {
                label: "Temperature",
                unit: "°C",
                range: (-30.0, 50.0),
            },
            MeasurementType::Humidity => MeasurementMeta {
                label: "Humidity",
                unit: "%",
                range: (0.0, 100.0),
            },
            MeasurementType::Pressure => MeasurementMeta {
                label: "Pressure",
                unit: "hPa",
                range: (950.0, 1050.0),
            },
            MeasurementType::BatteryVoltage => MeasurementMeta {
                label: "Battery Voltage",
                unit: "V",
                range: (1.6, 3.4),
            },
            MeasurementType::TxPower => MeasurementMeta {
                label: "TX Power",
                unit: "dBm",
                range: (-40.0, 8.0),
            },
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMeasurementType(pub String);

impl fmt::Display for UnknownMeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown measurement type '{}'", self.0)
    }
}

impl std::error::Error for UnknownMeasurementType {}

impl FromStr for MeasurementType {
    type Err = UnknownMeasurementType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MeasurementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownMeasurementType(s.to_owned()))
    }
}

/// Time aligned multi-sensor table.
///
/// On the wire this is `[[timestamps...], [column 1...], ...]`, every column
/// having the same length as the timestamp row. `None` marks a gap.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(try_from = "Vec<Vec<Option<f64>>>")]
pub struct SeriesResult {
    pub timestamps: Vec<i64>,
    pub columns: Vec<Vec<Option<f64>>>,
}

impl SeriesResult {
    pub fn is_aligned(&self) -> bool {
        self.columns
            .iter()
            .all(|c| c.len() == self.timestamps.len())
    }
}

impl serde::Serialize for SeriesResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;

        let mut seq = serializer.serialize_seq(Some(self.columns.len() + 1))?;
        seq.serialize_element(&self.timestamps)?;
        for column in &self.columns {
            seq.serialize_element(column)?;
        }
        seq.end()
    }
}

impl TryFrom<Vec<Vec<Option<f64>>>> for SeriesResult {
    type Error = String;

    fn try_from(mut rows: Vec<Vec<Option<f64>>>) -> Result<Self, Self::Error> {
        if rows.is_empty() {
            return Err("series data has no timestamp row".to_owned());
        }
        let timestamps = rows
            .remove(0)
            .into_iter()
            .map(|ts| ts.map(|ts| ts as i64).ok_or("null timestamp"))
            .collect::<Result<Vec<_>, _>>()?;

        let series = Self {
            timestamps,
            columns: rows,
        };
        if !series.is_aligned() {
            return Err("series columns are not aligned to timestamps".to_owned());
        }
        Ok(series)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Response of `/measurements.json`, `/summaries.json` and the buffer's `/recent`.
///
/// With `summaries` set every sensor owns three consecutive columns
/// (low, high, average), otherwise one.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SeriesResponse {
    pub sensors: Vec<String>,
    pub summaries: bool,
    pub window: i64, // s
    pub data: SeriesResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<ErrorBody>,
}

impl SeriesResponse {
    /// Values of one sensor in a raw response.
    pub fn column(&self, sensor: &str) -> Option<&[Option<f64>]> {
        if self.summaries {
            return None;
        }
        let idx = self.sensors.iter().position(|s| s == sensor)?;
        self.data.columns.get(idx).map(|c| c.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SensorInfo {
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub type SensorMap = BTreeMap<String, SensorInfo>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BufferStats {
    pub series: usize,
    pub readings: usize,
    pub dropped: u64,
}

/// Chart view state, as kept by clients and sent as query parameters.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_type: Option<MeasurementType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<i64>,
}
