use common::req::MeasurementType;

pub type SensorId = String;

/// One timestamped value of one sensor and one measurement type.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor: SensorId,
    pub kind: MeasurementType,
    pub timestamp: i64, // s since epoch
    pub value: Option<f64>,
}

impl Reading {
    pub fn new(sensor: &str, kind: MeasurementType, timestamp: i64, value: Option<f64>) -> Self {
        Self {
            sensor: sensor.to_owned(),
            kind,
            timestamp,
            value,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        !self.sensor.is_empty() && self.timestamp > 0 && self.value.map_or(true, f64::is_finite)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SensorFilter {
    #[default]
    All,
    Only(Vec<SensorId>),
}

impl SensorFilter {
    pub fn matches(&self, sensor: &str) -> bool {
        match self {
            SensorFilter::All => true,
            SensorFilter::Only(ids) => ids.iter().any(|id| id == sensor),
        }
    }
}
