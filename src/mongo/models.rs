//! Document shape stored in the history store.

use bson::Bson;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single persisted document: `_id = source:ID`, non-key attributes
/// flattened into `payload` so downstream readers can project by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalEvent {
    #[serde(rename = "_id")]
    pub id: String,
    pub source: String,
    #[serde(rename = "fechaHora", with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub fecha_hora: DateTime<Utc>,
    #[serde(rename = "unitName")]
    pub unit_name: String,
    pub payload: HashMap<String, Bson>,
    #[serde(rename = "ingestedAt", with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub ingested_at: DateTime<Utc>,
}
