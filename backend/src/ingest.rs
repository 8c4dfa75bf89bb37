use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    sync::mpsc::{self, error::TrySendError},
    time::{sleep, timeout},
};

use crate::{
    buffer::RecentBuffer,
    db::MeasurementStore,
    packet::Packet,
    reading::{Reading, SensorId},
    utils::Clock,
};

const READ_TIMEOUT: Duration = Duration::from_secs(120);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const WRITE_QUEUE: usize = 1024;

/// Readings of one packet waiting to be persisted.
#[derive(Debug)]
pub struct Batch {
    sensor: SensorId,
    seen_at: i64,
    readings: Vec<Reading>,
}

/// Persists batches in arrival order until every sender is gone.
pub async fn write_batches(
    store: Arc<dyn MeasurementStore>,
    mut batches: mpsc::Receiver<Batch>,
) {
    while let Some(batch) = batches.recv().await {
        let store = store.clone();
        let res = tokio::task::spawn_blocking(move || -> Result<()> {
            store.touch_sensor(&batch.sensor, batch.seen_at)?;
            store.insert(&batch.readings)
        })
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist readings: {e:#}"),
            Err(e) => warn!("Store writer panicked: {e}"),
        }
    }
    debug!("Store writer stopped");
}

/// Feeds bridge packets into the recent buffer and hands them to the store writer.
pub struct Ingest {
    buffer: Arc<RecentBuffer>,
    writes: mpsc::Sender<Batch>,
    clock: Arc<dyn Clock>,
}

impl Ingest {
    pub fn new(
        buffer: Arc<RecentBuffer>,
        writes: mpsc::Sender<Batch>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            buffer,
            writes,
            clock,
        }
    }

    /// Keeps a bridge connection alive forever.
    pub async fn run(&self, host: &str, port: u16) {
        loop {
            if let Err(e) = self.session(host, port).await {
                warn!("Bridge connection {host}:{port} failed, reconnecting in {RECONNECT_DELAY:?}: {e:#}");
            }
            sleep(RECONNECT_DELAY).await;
        }
    }

    /// Reads lines until the bridge hangs up.
    pub async fn session(&self, host: &str, port: u16) -> Result<()> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to {host}:{port}"))?;
        info!("Connected to bridge {host}:{port}");

        let mut lines = BufReader::new(stream).lines();
        loop {
            let line = match timeout(READ_TIMEOUT, lines.next_line()).await {
                Ok(line) => line?,
                Err(_) => bail!("no data for {READ_TIMEOUT:?}"),
            };
            let Some(line) = line else {
                info!("Bridge closed the connection");
                return Ok(());
            };
            debug!("Received: {line}");
            if let Err(e) = self.handle_line(&line) {
                warn!("Skipping bridge line: {e:#}");
            }
        }
    }

    /// Decodes one packet into the buffer and queues its readings for the store.
    pub fn handle_line(&self, line: &str) -> Result<usize> {
        let packet = Packet::parse(line)?;
        let now = self.clock.now();

        let mut accepted = Vec::new();
        for reading in packet.readings(now) {
            if self.buffer.append(reading.clone()) {
                accepted.push(reading);
            }
        }
        let count = accepted.len();

        let batch = Batch {
            sensor: packet.sensor_id(),
            seen_at: now,
            readings: accepted,
        };
        match self.writes.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                warn!(
                    "Store writer is behind, {} readings of {} stay buffer only",
                    batch.readings.len(),
                    batch.sensor
                );
            }
            Err(TrySendError::Closed(_)) => bail!("store writer is gone"),
        }

        Ok(count)
    }
}
