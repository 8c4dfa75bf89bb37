use std::path::Path;

use anyhow::{Context, Result};
use common::req::SensorMap;
use log::{info, warn};

/// Static sensor id -> display metadata, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: SensorMap,
}

impl SensorRegistry {
    pub fn new(sensors: SensorMap) -> Self {
        Self { sensors }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let sensors: SensorMap = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!("Loaded {} sensors from {}", sensors.len(), path.display());
        Ok(Self::new(sensors))
    }

    /// Like [`SensorRegistry::load`] but a missing or broken file yields an empty registry.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!("No sensor registry: {e:#}");
            Self::default()
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sensors.keys().map(|k| k.as_str())
    }

    pub fn sensors(&self) -> &SensorMap {
        &self.sensors
    }
}
