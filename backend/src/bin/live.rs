//! Terminal live view over the recent buffer server.

use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use common::req::{MeasurementType, SensorMap, SeriesResponse, ViewState};
use log::debug;
use reqwest::header::ACCEPT;

#[derive(Parser, Debug)]
#[command(version, about = "Live statistics of the recent buffer")]
struct Args {
    /// Host of the buffer server
    #[arg(long, default_value = "localhost")]
    hostname: String,

    #[arg(long, default_value_t = 22223)]
    port: u16,

    #[arg(long, default_value = "temperature")]
    measurement_type: MeasurementType,

    #[arg(long, default_value = "sensors.json")]
    sensors_file: PathBuf,

    /// Seconds between refreshes
    #[arg(long, default_value_t = 5)]
    interval: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct SensorStats {
    latest: f64,
    min: f64,
    max: f64,
    median: f64,
    mean: f64,
    trend_1h: Option<f64>,
    trend_5m: Option<f64>,
    trend_1m: Option<f64>,
}

/// Least-squares slope of `points`, per hour.
fn slope_per_hour(points: &[(i64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy, sxy, sxx) = points
        .iter()
        .fold((0.0_f64, 0.0_f64, 0.0_f64, 0.0_f64), |acc, &(t, v)| {
            let t = t as f64;
            (acc.0 + t, acc.1 + v, acc.2 + t * v, acc.3 + t * t)
        });
    let denominator = n * sxx - sx * sx;
    if denominator == 0.0 {
        return Some(0.0);
    }
    Some((n * sxy - sx * sy) / denominator * 3600.0)
}

fn trend_since(points: &[(i64, f64)], since: i64) -> Option<f64> {
    let from = points.partition_point(|(t, _)| *t < since);
    slope_per_hour(&points[from..])
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn sensor_stats(points: &[(i64, f64)], now: i64) -> Option<SensorStats> {
    let (_, latest) = *points.last()?;
    let mut values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    values.sort_by(f64::total_cmp);

    Some(SensorStats {
        latest,
        min: values[0],
        max: values[values.len() - 1],
        median: median(&values),
        mean: values.iter().sum::<f64>() / values.len() as f64,
        trend_1h: slope_per_hour(points),
        trend_5m: trend_since(points, now - 300),
        trend_1m: trend_since(points, now - 60),
    })
}

/// Per sensor statistics of a raw series response.
fn compute(resp: &SeriesResponse, now: i64) -> Vec<(String, SensorStats)> {
    resp.sensors
        .iter()
        .filter_map(|sensor| {
            let points: Vec<(i64, f64)> = resp
                .data
                .timestamps
                .iter()
                .zip(resp.column(sensor)?)
                .filter_map(|(t, v)| v.map(|v| (*t, v)))
                .collect();
            Some((sensor.clone(), sensor_stats(&points, now)?))
        })
        .collect()
}

fn fetch(client: &reqwest::blocking::Client, args: &Args) -> Result<SeriesResponse> {
    let view = ViewState {
        measurement_type: Some(args.measurement_type),
        ..Default::default()
    };
    Ok(client
        .get(format!("http://{}:{}/recent", args.hostname, args.port))
        .query(&view)
        .header(ACCEPT, "application/json")
        .timeout(Duration::from_secs(10))
        .send()?
        .error_for_status()?
        .json::<SeriesResponse>()?)
}

fn load_names(path: &Path) -> SensorMap {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

fn fmt_value(v: f64) -> String {
    format!("{v:>7.1}")
}

fn fmt_trend(v: Option<f64>) -> String {
    v.map_or_else(|| format!("{:>7}", "-"), |v| format!("{v:>+7.2}"))
}

fn render(args: &Args, names: &SensorMap, result: &Result<SeriesResponse>) {
    let meta = args.measurement_type.meta();
    print!("\x1b[2J\x1b[H");
    println!("{} @ {}:{}", meta.label, args.hostname, args.port);
    println!("Updated {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!();

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            println!("Error: {e:#}, retrying...");
            return;
        }
    };

    let mut rows = compute(resp, chrono::Utc::now().timestamp());
    if rows.is_empty() {
        println!("Waiting for data...");
        return;
    }
    let name = |id: &str| names.get(id).map_or(id.to_owned(), |info| info.name.clone());
    rows.sort_by_key(|(id, _)| name(id));

    println!(
        "{:<12} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7}",
        "Sensor", "Latest", "Min", "Max", "Median", "Avg", "1h", "5m", "1m"
    );
    println!("{}", "-".repeat(76));
    for (id, s) in &rows {
        println!(
            "{:<12} {} {} {} {} {} {} {} {}",
            name(id),
            fmt_value(s.latest),
            fmt_value(s.min),
            fmt_value(s.max),
            fmt_value(s.median),
            fmt_value(s.mean),
            fmt_trend(s.trend_1h),
            fmt_trend(s.trend_5m),
            fmt_trend(s.trend_1m),
        );
    }
    println!();
    println!("Trends in {}/hour", meta.unit);
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let names = load_names(&args.sensors_file);
    let client = reqwest::blocking::Client::new();

    loop {
        let result = fetch(&client, &args);
        if let Err(e) = &result {
            debug!("Fetch failed: {e:#}");
        }
        render(&args, &names, &result);
        thread::sleep(Duration::from_secs(args.interval.max(1)));
    }
}
