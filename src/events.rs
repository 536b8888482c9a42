// The data model flowing through the poller subsystem: the raw source row,
// the normalized wire/storage event derived from it, and the log entry shape
// the Worker's log ring stores.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A row from `dbo.TB_DetalleAlimentacion`, scanned in source column order.
///
/// Column casing differs from the field names here (e.g. `FisCount` ->
/// `fish_count`, `pelletfishmin` -> `pellet_fish_min`); the mapping is
/// authoritative and lives in `akva::client`'s query text, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedingDetail {
    pub id: String,
    pub name: String,
    pub unit_name: String,
    pub fecha_hora: DateTime<Utc>,
    pub dia: Option<NaiveDate>,
    pub inicio: String,
    pub fin: String,
    pub dif: i32,
    pub amount_grams: f64,
    pub pellet_fish_min: f64,
    /// Source column is an integer (`FisCount`), but the normalized wire
    /// schema widens it to float alongside the other metrics.
    pub fish_count: i32,
    pub peso_prom: f64,
    pub biomasa: f64,
    pub pellet_pk: f64,
    pub feed_name: String,
    pub silo_name: String,
    pub doser_name: String,
    pub grams_per_sec: f64,
    pub kg_ton_min: f64,
    pub marca: i32,
}

/// The constant source tag for every event this process extracts.
pub const SOURCE: &str = "akva";

/// The canonical, stable event shape: wire format for the broker and storage
/// shape for the history store's `payload` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    pub source: String,
    pub name: String,
    pub unit_name: String,
    /// RFC3339, UTC.
    pub fecha_hora: String,
    /// `YYYY-MM-DD`, or empty string if the source `Dia` was unset.
    pub dia: String,
    pub inicio: String,
    pub fin: String,
    pub dif: i32,
    pub amount_grams: f64,
    pub pellet_fish_min: f64,
    pub fish_count: f64,
    pub peso_prom: f64,
    pub biomasa: f64,
    pub pellet_pk: f64,
    pub feed_name: String,
    pub silo_name: String,
    pub doser_name: String,
    pub grams_per_sec: f64,
    pub kg_ton_min: f64,
    pub marca: i32,
    pub ingested_at: DateTime<Utc>,
}

impl NormalizedEvent {
    /// The history store's composite primary key, `source:ID`.
    pub fn composite_key(&self) -> String {
        format!("{}:{}", self.source, self.id)
    }
}

/// A single structured log entry captured from `tracing` into the Worker's
/// bounded ring (see `logging`), and the shape the admin log endpoint reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::TRACE => LogLevel::Trace,
        }
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}
