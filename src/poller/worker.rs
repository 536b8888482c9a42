//! Worker lifecycle (C8): owns the three downstream clients, drives the
//! ticker + reconnect loop, and exposes the surface an admin process would
//! wire up over HTTP.

use super::poll::{PollCoordinator, Stats};
use super::watermark::WatermarkStore;
use crate::akva;
use crate::config::Config;
use crate::error::OmnipollError;
use crate::events::LogEntry;
use crate::logging::LogBuffer;
use crate::mongo;
use crate::mqtt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

const INIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const POLL_DEADLINE: std::time::Duration = std::time::Duration::from_secs(60);
const RECONNECT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Polling worker: the process's single long-lived background task.
pub struct Worker {
    config: Config,
    state: RwLock<WorkerState>,
    running: AtomicBool,

    watermark: Arc<WatermarkStore>,
    akva: RwLock<akva::Client>,
    mqtt_client: RwLock<mqtt::Client>,
    mqtt_publisher: RwLock<Option<mqtt::Publisher>>,
    mongo: RwLock<mongo::Client>,
    coordinator: RwLock<PollCoordinator>,

    logs: LogBuffer,
    stop_signal: tokio::sync::Notify,
}

impl Worker {
    /// `logs` is the same `LogBuffer` installed into the global `tracing`
    /// dispatch (see `logging::init`) so that `get_logs()` reads back what
    /// the tracing layer actually wrote, rather than a private ring nothing
    /// feeds.
    pub fn new(config: Config, logs: LogBuffer) -> Self {
        let watermark = Arc::new(WatermarkStore::new(config.watermark_path.clone()));
        let coordinator = PollCoordinator::new(config.polling.clone());

        Self {
            config,
            state: RwLock::new(WorkerState::Uninitialized),
            running: AtomicBool::new(false),
            watermark,
            akva: RwLock::new(akva::Client::new()),
            mqtt_client: RwLock::new(mqtt::Client::new()),
            mqtt_publisher: RwLock::new(None),
            mongo: RwLock::new(mongo::Client::new()),
            coordinator: RwLock::new(coordinator),
            logs,
            stop_signal: tokio::sync::Notify::new(),
        }
    }

    pub fn logs(&self) -> LogBuffer {
        self.logs.clone()
    }

    pub async fn get_logs(&self) -> Vec<LogEntry> {
        self.logs.get_all()
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connect to all three downstream systems. Individual connection
    /// failures are logged and do not fail initialization — the worker can
    /// reconnect later (spec §4.8).
    pub async fn initialize(&self) -> Result<(), OmnipollError> {
        let init = async {
            self.watermark.load().await?;
            tracing::info!("watermark loaded");

            if let Err(e) = self.akva.write().await.connect(&self.config.sql_server).await {
                tracing::warn!(error = %e, "failed to connect to SQL Server");
            } else {
                tracing::info!("connected to SQL Server");
            }

            if let Err(e) = self.mqtt_client.write().await.connect(&self.config.mqtt).await {
                tracing::warn!(error = %e, "failed to connect to MQTT broker");
            } else {
                tracing::info!("connected to MQTT broker");
            }
            *self.mqtt_publisher.write().await = Some(mqtt::Publisher::new(self.config.mqtt.qos));

            if let Err(e) = self.mongo.write().await.connect(&self.config.mongo).await {
                tracing::warn!(error = %e, "failed to connect to MongoDB");
            } else {
                tracing::info!("connected to MongoDB");
            }

            if self.mongo.read().await.is_connected() {
                self.coordinator
                    .write()
                    .await
                    .refresh_stats(&*self.mongo.read().await)
                    .await;
            }

            Ok::<_, OmnipollError>(())
        };

        tokio::time::timeout(INIT_TIMEOUT, init)
            .await
            .map_err(|_| OmnipollError::Poll(crate::error::PollError::NotInitialized("init timed out")))??;

        *self.state.write().await = WorkerState::Initialized;
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), OmnipollError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OmnipollError::AlreadyRunning);
        }

        if *self.state.read().await == WorkerState::Uninitialized {
            self.initialize().await?;
        }

        *self.state.write().await = WorkerState::Running;
        tracing::info!("worker started");

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            worker.run().await;
        });

        Ok(())
    }

    /// `Running -> Initialized` (spec §4.8's transition table); only
    /// `shutdown` ends in `Stopped`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_signal.notify_waiters();
        *self.state.write().await = WorkerState::Initialized;
        tracing::info!("worker stopped");
    }

    /// The ticker + reconnect-ticker loop (spec §4.8).
    async fn run(self: Arc<Self>) {
        let mut poll_ticker = tokio::time::interval(self.config.polling.interval);
        poll_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut reconnect_ticker = tokio::time::interval(RECONNECT_INTERVAL);
        reconnect_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.do_poll().await;

        loop {
            tokio::select! {
                _ = self.stop_signal.notified() => return,
                _ = poll_ticker.tick() => self.do_poll().await,
                _ = reconnect_ticker.tick() => self.reconnect_if_needed().await,
            }
        }
    }

    async fn do_poll(&self) {
        let outcome = tokio::time::timeout(POLL_DEADLINE, async {
            let publisher_guard = self.mqtt_publisher.read().await;
            let publisher = match publisher_guard.as_ref() {
                Some(p) => p,
                None => return Ok(()),
            };

            self.coordinator
                .write()
                .await
                .poll(
                    &self.watermark,
                    &*self.akva.read().await,
                    &*self.mqtt_client.read().await,
                    publisher,
                    &*self.mongo.read().await,
                )
                .await
        })
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "poll error"),
            Err(_) => tracing::error!("poll cycle exceeded deadline"),
        }
    }

    async fn reconnect_if_needed(&self) {
        if !self.akva.read().await.is_connected() {
            if let Err(e) = self.akva.write().await.connect(&self.config.sql_server).await {
                tracing::warn!(error = %e, "reconnect: SQL Server still unreachable");
            } else {
                tracing::info!("reconnect: SQL Server connection restored");
            }
        }
        if !self.mqtt_client.read().await.is_connected() {
            if let Err(e) = self.mqtt_client.write().await.connect(&self.config.mqtt).await {
                tracing::warn!(error = %e, "reconnect: MQTT broker still unreachable");
            } else {
                tracing::info!("reconnect: MQTT connection restored");
            }
        }
        if !self.mongo.read().await.is_connected() {
            if let Err(e) = self.mongo.write().await.connect(&self.config.mongo).await {
                tracing::warn!(error = %e, "reconnect: MongoDB still unreachable");
            } else {
                tracing::info!("reconnect: MongoDB connection restored");
            }
        }
    }

    pub async fn stats(&self) -> Stats {
        let mut stats = self.coordinator.read().await.stats().clone();
        stats.sql_connected = self.akva.read().await.is_connected();
        stats.mqtt_connected = self.mqtt_client.read().await.is_connected();
        stats.mongo_connected = self.mongo.read().await.is_connected();
        stats
    }

    pub async fn reset_watermark(&self) -> Result<(), OmnipollError> {
        if self.is_running() {
            return Err(OmnipollError::ResetWhileRunning);
        }
        self.watermark.reset().await?;
        Ok(())
    }

    /// Probe-and-release: open (or reuse) a connection, check it, then
    /// close/disconnect before returning (spec §4.8).
    pub async fn test_source_connection(&self) -> bool {
        let mut client = akva::Client::new();
        if client.connect(&self.config.sql_server).await.is_err() {
            return false;
        }
        let ok = client.ping().await;
        client.disconnect();
        ok
    }

    pub async fn test_broker_connection(&self) -> bool {
        let mut client = mqtt::Client::new();
        if client.connect(&self.config.mqtt).await.is_err() {
            return false;
        }
        let ok = client.is_connected();
        client.disconnect();
        ok
    }

    pub async fn test_history_connection(&self) -> bool {
        let mut client = mongo::Client::new();
        if client.connect(&self.config.mongo).await.is_err() {
            return false;
        }
        let ok = client.ping().await;
        client.disconnect();
        ok
    }

    pub async fn get_recent_events(
        &self,
        limit: i64,
    ) -> Result<Vec<mongo::HistoricalEvent>, OmnipollError> {
        let mongo = self.mongo.read().await;
        if !mongo.is_connected() {
            return Ok(Vec::new());
        }
        Ok(mongo::Repository::get_recent_events(&mongo, limit).await?)
    }

    /// Graceful shutdown: stop the loop, then disconnect all three clients,
    /// bounded by `SHUTDOWN_TIMEOUT`.
    pub async fn shutdown(&self) {
        self.stop().await;

        let disconnect_all = async {
            self.akva.write().await.disconnect();
            self.mqtt_client.write().await.disconnect();
            self.mongo.write().await.disconnect();
        };

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, disconnect_all)
            .await
            .is_err()
        {
            tracing::warn!("shutdown: disconnect exceeded timeout, continuing");
        }

        *self.state.write().await = WorkerState::Stopped;
        tracing::info!("worker shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_worker_starts_uninitialized_and_not_running() {
        let worker = Worker::new(Config::default(), LogBuffer::new());
        assert_eq!(worker.state().await, WorkerState::Uninitialized);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn reset_watermark_is_refused_while_running() {
        let worker = Worker::new(Config::default(), LogBuffer::new());
        worker.running.store(true, Ordering::SeqCst);

        let result = worker.reset_watermark().await;
        assert!(matches!(result, Err(OmnipollError::ResetWhileRunning)));
    }

    #[tokio::test]
    async fn reset_watermark_succeeds_when_not_running() {
        let worker = Worker::new(Config::default(), LogBuffer::new());
        assert!(worker.reset_watermark().await.is_ok());
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let worker = Worker::new(Config::default(), LogBuffer::new());
        worker.stop().await;
        assert_eq!(worker.state().await, WorkerState::Uninitialized);
    }

    #[tokio::test]
    async fn stop_returns_to_initialized_not_stopped() {
        let worker = Worker::new(Config::default(), LogBuffer::new());
        *worker.state.write().await = WorkerState::Running;
        worker.running.store(true, Ordering::SeqCst);

        worker.stop().await;

        assert_eq!(worker.state().await, WorkerState::Initialized);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn get_logs_reads_back_the_buffer_passed_into_new() {
        let logs = LogBuffer::new();
        let worker = Worker::new(Config::default(), logs.clone());

        logs.add(crate::events::LogEntry {
            timestamp: chrono::Utc::now(),
            level: crate::events::LogLevel::Info,
            message: "hello".to_string(),
        });

        let entries = worker.get_logs().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "hello");
    }
}
