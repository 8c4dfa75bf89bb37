use std::{path::PathBuf, time::Duration};

use clap::Parser;

/// Collects sensor readings and serves chart queries.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    /// sqlite database holding the measurement history
    #[arg(long, env = "DATABASE_URL", default_value = "measurements.db")]
    pub database_url: String,

    /// Host of the radio bridge
    #[arg(long, env = "BRIDGE_HOST", default_value = "localhost")]
    pub bridge_host: String,

    #[arg(long, env = "BRIDGE_PORT", default_value_t = 22222)]
    pub bridge_port: u16,

    /// Address both HTTP servers bind to
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port of the chart query server
    #[arg(long, env = "HTTP_PORT", default_value_t = 8000)]
    pub http_port: u16,

    /// Port of the recent buffer server
    #[arg(long, env = "BUFFER_PORT", default_value_t = 22223)]
    pub buffer_port: u16,

    /// JSON map of sensor id to display metadata
    #[arg(long, env = "SENSORS_FILE", default_value = "sensors.json")]
    pub sensors_file: PathBuf,

    /// How long the recent buffer keeps readings
    #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(i64).range(1..))]
    pub retention_secs: i64,

    #[arg(long, default_value_t = 30)]
    pub store_timeout_secs: u64,

    #[arg(long, default_value_t = 60)]
    pub evict_interval_secs: u64,

    #[arg(long)]
    pub debug: bool,
}

impl Config {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn evict_interval(&self) -> Duration {
        Duration::from_secs(self.evict_interval_secs.max(1))
    }

    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}
