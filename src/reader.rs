//! Top-level `BinlogReader` — composes C1–C6 behind `start`/`stop`/`poll`.
//!
//! This is the crate's public entry point, analogous to the teacher's
//! `cdc_engine.rs::CdcEngine` but built against the `EventSource` trait
//! boundary instead of embedding wire-protocol logic directly.

use crate::config::ReaderConfig;
use crate::connection::{ConnectionConfig, MySqlConnection};
use crate::dispatcher::{DispatcherState, EventDispatcher};
use crate::error::Result;
use crate::history::InMemorySchemaHistory;
use crate::queue::DownstreamQueue;
use crate::record::ChangeRecord;
use crate::source::{EventSource, MySqlEventSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

fn connection_config(config: &ReaderConfig) -> ConnectionConfig {
    ConnectionConfig {
        hostname: config.hostname.clone(),
        port: config.port,
        username: config.username.clone(),
        password: config.password.clone(),
        database: None,
        server_id: config.server_id,
        timeout: config.connect_timeout,
        keep_alive_interval: config.keep_alive_interval,
    }
}

/// Owns the receiver task and the downstream queue. `start()` spawns a
/// task that drives a `MySqlEventSource` into an `EventDispatcher`;
/// `poll`/`drain_batch` pull the records it produced.
pub struct BinlogReader {
    config: ReaderConfig,
    queue: DownstreamQueue,
    stop_flag: Option<Arc<AtomicBool>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl BinlogReader {
    pub fn new(config: ReaderConfig) -> Self {
        let queue = DownstreamQueue::new(config.queue_capacity);
        BinlogReader {
            config,
            queue,
            stop_flag: None,
            task: None,
        }
    }

    /// Connects once to discover the current binlog coordinates and
    /// GTID set (mirroring `cdc_engine.rs::CdcEngine::start`), then
    /// spawns the receiver task. Per `spec.md` §4.5, a connect-time
    /// failure here is fatal and surfaced to the caller directly — it
    /// never reaches `Failed` state, since streaming never began.
    pub async fn start(&mut self) -> Result<()> {
        let conn_config = connection_config(&self.config);
        let mut conn = MySqlConnection::connect(conn_config.clone()).await?;
        let binlog_status = conn.get_binlog_status().await?;
        let server_id = conn.get_server_id().await?;
        conn.close().await?;

        info!(
            file = %binlog_status.file,
            position = binlog_status.position,
            "starting binlog reader"
        );

        let queue_handle = self.queue.handle();
        let dispatcher = EventDispatcher::from_position(
            &self.config,
            InMemorySchemaHistory::new(),
            queue_handle,
            server_id,
            binlog_status.file.clone(),
            binlog_status.position,
            binlog_status.executed_gtid_set,
        );
        let stop_flag = dispatcher.stop_handle();
        self.stop_flag = Some(stop_flag);

        let mut source =
            MySqlEventSource::new(conn_config, binlog_status.file, binlog_status.position);

        self.task = Some(tokio::spawn(async move {
            let mut dispatcher = dispatcher;
            let result = source.run(&mut dispatcher).await;
            match &result {
                Ok(()) => info!("binlog event source run loop ended"),
                Err(err) if dispatcher.state() == DispatcherState::Stopped => {
                    info!(error = %err, "binlog reader stopped")
                }
                Err(err) => error!(error = %err, "binlog event source run loop failed"),
            }
            result
        }));

        Ok(())
    }

    /// Pull at most `max` records, waiting up to `timeout` for the
    /// first one. Returns an empty vector if nothing arrived in time.
    pub async fn drain_batch(&mut self, max: usize, timeout: Duration) -> Vec<ChangeRecord> {
        self.queue.drain_batch(max, timeout).await
    }

    /// Convenience wrapper around `drain_batch` with a short default timeout.
    pub async fn poll(&mut self) -> Vec<ChangeRecord> {
        self.drain_batch(256, Duration::from_millis(100)).await
    }

    /// Requests a cooperative stop: flips the dispatcher's stop flag and
    /// closes the queue so any blocked `enqueue` unwinds — `spec.md` §5.
    pub async fn stop(&mut self) {
        if let Some(flag) = &self.stop_flag {
            flag.store(true, Ordering::Release);
        }
        self.queue.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_reader_starts_without_a_task() {
        let reader = BinlogReader::new(ReaderConfig::default());
        assert!(reader.task.is_none());
        assert!(reader.stop_flag.is_none());
    }
}
