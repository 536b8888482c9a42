// Typed errors at each component's public seam (see DESIGN.md, C11). Internal
// plumbing that doesn't need to match on a specific variant uses
// `anyhow::Result`/`Context` in the teacher's style; these enums exist so the
// poll cycle and its tests can distinguish transient-vs-fatal per spec §7.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("failed to read watermark file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse watermark file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to flush watermark file {path}: {source}")]
    Flush {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not connected to SQL Server")]
    NotConnected,
    #[error("SQL Server connection failed: {0}")]
    Connect(String),
    #[error("SQL Server query failed: {0}")]
    Query(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("not connected to history store")]
    NotConnected,
    #[error("history store connection failed: {0}")]
    Connect(String),
    #[error("history store operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("broker connection failed: {0}")]
    Connect(String),
    #[error("{failed} of {total} events failed to publish")]
    BatchFailed { failed: usize, total: usize },
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("worker not initialized (missing {0} client)")]
    NotInitialized(&'static str),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Watermark(#[from] WatermarkError),
}

#[derive(Debug, Error)]
pub enum OmnipollError {
    #[error(transparent)]
    Watermark(#[from] WatermarkError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("worker already running")]
    AlreadyRunning,
    #[error("refusing to reset watermark while worker is running")]
    ResetWhileRunning,
}
