use anyhow::{ensure, Result};
use common::req::MeasurementType;

use crate::reading::Reading;

/// One line from the radio bridge.
#[derive(Debug, Default, serde::Deserialize)]
pub struct Packet {
    pub mac_address: Vec<u8>,
    pub temperature_as_millikelvins: Option<f64>,
    pub humidity_as_ppm: Option<f64>,
    pub pressure_as_pascals: Option<f64>,
    pub battery_potential_as_millivolts: Option<f64>,
    pub tx_power: Option<f64>, // dBm
}

impl Packet {
    pub fn parse(line: &str) -> Result<Self> {
        let packet: Packet = serde_json::from_str(line)?;
        ensure!(!packet.mac_address.is_empty(), "packet without mac address");
        Ok(packet)
    }

    pub fn sensor_id(&self) -> String {
        self.mac_address.iter().map(|b| format!("{b:02X}")).collect()
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature_as_millikelvins.map(|v| v / 1000.0 - 273.15) // °C
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity_as_ppm.map(|v| v / 10_000.0) // percent
    }

    pub fn pressure(&self) -> Option<f64> {
        self.pressure_as_pascals.map(|v| v / 100.0) // hPa
    }

    pub fn battery_voltage(&self) -> Option<f64> {
        self.battery_potential_as_millivolts.map(|v| v / 1000.0) // V
    }

    /// A reading for every quantity present in the packet.
    pub fn readings(&self, timestamp: i64) -> Vec<Reading> {
        let sensor = self.sensor_id();
        [
            (MeasurementType::Temperature, self.temperature()),
            (MeasurementType::Humidity, self.humidity()),
            (MeasurementType::Pressure, self.pressure()),
            (MeasurementType::BatteryVoltage, self.battery_voltage()),
            (MeasurementType::TxPower, self.tx_power),
        ]
        .into_iter()
        .filter_map(|(kind, value)| {
            value.map(|v| Reading::new(&sensor, kind, timestamp, Some(v)))
        })
        .collect()
    }
}
