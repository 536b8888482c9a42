//! Watermark store (C1): the last processed position for incremental
//! polling, persisted atomically to disk.

use crate::error::WatermarkError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// The exclusive lower bound for the next poll: the maximum `fechaHora`
/// observed so far and the set of IDs already processed at that instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watermark {
    #[serde(rename = "lastFechaHora")]
    pub last_fecha_hora: DateTime<Utc>,
    #[serde(rename = "idsAtLastFechaHora")]
    pub ids_at_last_fecha_hora: Vec<String>,
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            last_fecha_hora: DateTime::<Utc>::MIN_UTC,
            ids_at_last_fecha_hora: Vec::new(),
        }
    }
}

/// Manages load/get/update/reset of the on-disk watermark. One `RwLock`
/// per teacher's lock-per-resource style, rather than one global mutex
/// shared across unrelated worker state.
pub struct WatermarkStore {
    watermark: RwLock<Watermark>,
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            watermark: RwLock::new(Watermark::default()),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the watermark file if it exists; a missing file means a fresh
    /// start and is not an error.
    pub async fn load(&self) -> Result<(), WatermarkError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(WatermarkError::Read {
                    path: self.path.display().to_string(),
                    source: e,
                })
            }
        };

        let parsed: Watermark =
            serde_json::from_slice(&data).map_err(|e| WatermarkError::Parse {
                path: self.path.display().to_string(),
                source: e,
            })?;

        *self.watermark.write().await = parsed;
        Ok(())
    }

    pub async fn get(&self) -> Watermark {
        self.watermark.read().await.clone()
    }

    /// Advance the watermark: a strictly later timestamp replaces the ID
    /// set outright; an equal timestamp unions the new IDs into the
    /// existing set (the tie-breaking mechanism behind the boundary drop
    /// in the source reader). Flushes to disk before returning.
    pub async fn update(
        &self,
        fecha_hora: DateTime<Utc>,
        ids: Vec<String>,
    ) -> Result<(), WatermarkError> {
        {
            let mut watermark = self.watermark.write().await;
            if fecha_hora > watermark.last_fecha_hora {
                watermark.last_fecha_hora = fecha_hora;
                watermark.ids_at_last_fecha_hora = ids;
            } else if fecha_hora == watermark.last_fecha_hora {
                let mut seen: HashSet<&str> = watermark
                    .ids_at_last_fecha_hora
                    .iter()
                    .map(String::as_str)
                    .collect();
                for id in &ids {
                    if !seen.contains(id.as_str()) {
                        seen.insert(id);
                        watermark.ids_at_last_fecha_hora.push(id.clone());
                    }
                }
            }
        }

        self.flush().await
    }

    pub async fn reset(&self) -> Result<(), WatermarkError> {
        *self.watermark.write().await = Watermark::default();

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WatermarkError::Flush {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }

    async fn flush(&self) -> Result<(), WatermarkError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WatermarkError::Flush {
                    path: self.path.display().to_string(),
                    source: e,
                })?;
        }

        let snapshot = self.watermark.read().await.clone();
        let data = serde_json::to_vec_pretty(&snapshot).map_err(|e| WatermarkError::Parse {
            path: self.path.display().to_string(),
            source: e,
        })?;

        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| WatermarkError::Flush {
                path: self.path.display().to_string(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn later_timestamp_replaces_id_set() {
        let dir = tempdir();
        let store = WatermarkStore::new(dir.join("later_timestamp.json"));
        store
            .update(ts(100), vec!["a".to_string()])
            .await
            .unwrap();
        store
            .update(ts(200), vec!["b".to_string()])
            .await
            .unwrap();

        let wm = store.get().await;
        assert_eq!(wm.last_fecha_hora, ts(200));
        assert_eq!(wm.ids_at_last_fecha_hora, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn equal_timestamp_unions_ids() {
        let dir = tempdir();
        let store = WatermarkStore::new(dir.join("equal_timestamp.json"));
        store
            .update(ts(100), vec!["a".to_string()])
            .await
            .unwrap();
        store
            .update(ts(100), vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        let wm = store.get().await;
        assert_eq!(wm.last_fecha_hora, ts(100));
        assert_eq!(wm.ids_at_last_fecha_hora, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn reset_clears_state_and_deletes_file() {
        let dir = tempdir();
        let path = dir.join("reset_test.json");
        let store = WatermarkStore::new(&path);
        store.update(ts(100), vec!["a".to_string()]).await.unwrap();
        assert!(path.exists());

        store.reset().await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.get().await.last_fecha_hora, DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn load_missing_file_is_not_an_error() {
        let dir = tempdir();
        let store = WatermarkStore::new(dir.join("does-not-exist.json"));
        store.load().await.unwrap();
        assert_eq!(store.get().await.ids_at_last_fecha_hora.len(), 0);
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "omnipoll-watermark-test-{}",
            std::process::id()
        ));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }
}
