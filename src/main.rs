// Omnipoll - incremental CDC relay from the Akva feeding-detail table to an
// MQTT broker and a MongoDB history store.
//
// Architecture:
// - Source reader (akva): pulls new rows via a watermark-bounded query
// - Change detector: gates publication to new-or-materially-changed events
// - Broker publisher (mqtt): one message per event, dynamic per-center topic
// - History store (mongo): idempotent persistence, admin read/write surface
// - Worker: owns the lifecycle of all three clients and the poll ticker

mod akva;
mod change_detector;
mod config;
mod error;
mod events;
mod logging;
mod mongo;
mod mqtt;
mod poller;

use anyhow::Result;
use config::Config;
use logging::LogBuffer;
use poller::Worker;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    let worker = Arc::new(Worker::new(config.clone(), LogBuffer::new()));
    logging::init(worker.logs());

    tracing::info!("starting omnipoll");
    tracing::debug!(
        sql_server_host = %config.sql_server.host,
        mqtt_broker = %config.mqtt.broker,
        mongo_uri = %config.mongo.uri,
        watermark_path = %config.watermark_path,
        "configuration loaded"
    );

    // Initialize and start in the background; connection failures during
    // init are retried by the worker's reconnect ticker rather than
    // blocking startup.
    let init_worker = Arc::clone(&worker);
    tokio::spawn(async move {
        if let Err(e) = init_worker.start().await {
            tracing::error!(error = %e, "failed to start worker");
        } else {
            tracing::info!("worker started automatically");
        }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("received shutdown signal, shutting down...");

    worker.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
