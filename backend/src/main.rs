use std::sync::Arc;

use actix_web::web::Data;
use anyhow::Result;
use clap::Parser;
use common::req::MeasurementType;
use log::{debug, info, warn};

mod aggregate;
mod api;
mod buffer;
mod config;
mod db;
mod error;
mod ingest;
mod packet;
mod query;
mod reading;
mod registry;
mod schema;
mod utils;
mod web;

use crate::{
    buffer::RecentBuffer,
    config::Config,
    db::{Db, MeasurementStore},
    ingest::Ingest,
    query::QueryService,
    reading::SensorFilter,
    registry::SensorRegistry,
    utils::{Clock, SystemClock},
};

/// Refills the buffer from the store so a restart keeps the live view.
fn warm_buffer(buffer: &RecentBuffer, store: &dyn MeasurementStore, now: i64) -> Result<()> {
    for kind in MeasurementType::ALL {
        let readings = store.fetch(&SensorFilter::All, kind, buffer.horizon(), now + 1)?;
        let n = buffer.warm(readings);
        debug!("Warmed buffer with {n} {kind} readings");
    }
    Ok(())
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_filter()))
        .init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn MeasurementStore> = Arc::new(Db::connect(&config.database_url)?);
    let buffer = Arc::new(RecentBuffer::new(config.retention_secs, clock.clone()));
    if let Err(e) = warm_buffer(&buffer, store.as_ref(), clock.now()) {
        warn!("Starting with an empty buffer: {e:#}");
    }
    info!("Buffer holds {:?}", buffer.stats());

    let registry = Arc::new(SensorRegistry::load_or_default(&config.sensors_file));
    match store.sensors() {
        Ok(seen) => {
            let unnamed: Vec<_> = seen
                .iter()
                .filter(|id| registry.sensors().get(id.as_str()).is_none())
                .collect();
            if !unnamed.is_empty() {
                info!("Sensors without a registry entry: {unnamed:?}");
            }
        }
        Err(e) => warn!("Could not list stored sensors: {e:#}"),
    }
    let service = Data::new(QueryService::new(
        buffer.clone(),
        store.clone(),
        registry,
        clock.clone(),
        config.store_timeout(),
    ));

    let (writes, batches) = tokio::sync::mpsc::channel(ingest::WRITE_QUEUE);
    let writer_task = actix_web::rt::spawn(ingest::write_batches(store, batches));
    let ingest = Ingest::new(buffer.clone(), writes, clock);
    let (host, port) = (config.bridge_host.clone(), config.bridge_port);
    let ingest_task = actix_web::rt::spawn(async move { ingest.run(&host, port).await });

    let evict_buffer = buffer.clone();
    let evict_interval = config.evict_interval();
    let evict_task = actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(evict_interval);
        loop {
            interval.tick().await;
            let removed = evict_buffer.evict();
            if removed > 0 {
                debug!("Evicted {removed} readings");
            }
        }
    });

    let (queries, recent) = tokio::join!(
        api::new_http_server(service.clone(), &config.bind, config.http_port),
        web::new_http_server(service, &config.bind, config.buffer_port),
    );

    ingest_task.abort();
    writer_task.abort();
    evict_task.abort();
    info!("Shut down with {} dropped readings", buffer.dropped());

    queries?;
    recent?;
    Ok(())
}
