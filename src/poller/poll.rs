//! Poll coordinator (C7): one extraction cycle from source to broker to
//! history store, plus the ingestion-rate stats the Worker exposes.

use crate::akva;
use crate::change_detector;
use crate::config::PollingConfig;
use crate::error::{PollError, SourceError};
use crate::mongo::{self, Repository};
use crate::mqtt;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Point-in-time polling statistics, mirroring the admin collaborator's
/// stats surface.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub last_fecha_hora: Option<DateTime<Utc>>,
    pub events_today: i64,
    pub total_events: i64,
    pub ingestion_rate: f64,
    pub sql_connected: bool,
    pub mqtt_connected: bool,
    pub mongo_connected: bool,

    last_minute_events: i64,
    last_rate_calc: Option<std::time::Instant>,
}

/// Coordinates one polling cycle across the three downstream clients.
pub struct PollCoordinator {
    config: PollingConfig,
    stats: Stats,
}

impl PollCoordinator {
    pub fn new(config: PollingConfig) -> Self {
        Self {
            config,
            stats: Stats {
                last_rate_calc: Some(std::time::Instant::now()),
                ..Stats::default()
            },
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    /// Refresh totals directly from the history store (admin convenience,
    /// spec §4.7's stats reconciliation).
    pub async fn refresh_stats(&mut self, mongo: &mongo::Client) {
        if let Ok(total) = Repository::count_events(mongo).await {
            self.stats.total_events = total;
        }
        if let Ok(today) = Repository::count_events_today(mongo).await {
            self.stats.events_today = today;
        }
    }

    /// One polling cycle (spec §4.7, steps 1-12).
    pub async fn poll(
        &mut self,
        watermark: &super::watermark::WatermarkStore,
        akva: &akva::Client,
        mqtt_client: &mqtt::Client,
        mqtt_publisher: &mqtt::Publisher,
        mongo: &mongo::Client,
    ) -> Result<(), PollError> {
        self.stats.sql_connected = akva.is_connected();
        self.stats.mqtt_connected = mqtt_client.is_connected();
        self.stats.mongo_connected = mongo.is_connected();

        if !self.stats.sql_connected {
            return Err(PollError::Source(SourceError::NotConnected));
        }

        let wm = watermark.get().await;
        let seen_ids: HashSet<String> = wm.ids_at_last_fecha_hora.iter().cloned().collect();

        let rows = akva
            .fetch_new_records(wm.last_fecha_hora, &seen_ids, self.config.batch_size)
            .await?;

        if rows.is_empty() {
            return Ok(());
        }

        tracing::info!(count = rows.len(), "fetched new records from Akva");

        let events: Vec<_> = rows
            .iter()
            .cloned()
            .map(akva::to_normalized_event)
            .collect();

        let changed = change_detector::filter(mongo, events.clone()).await;

        if !changed.is_empty() {
            mqtt_publisher
                .publish_batch(mqtt_client, &changed)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "failed to publish batch, watermark not advanced");
                    e
                })?;
            tracing::info!(count = changed.len(), "published events to MQTT");
        }

        if let Err(e) = Repository::insert_batch(mongo, &events).await {
            tracing::warn!(error = %e, "history insert error (may be duplicates)");
        } else {
            tracing::info!(count = events.len(), "persisted events to history store");
        }

        let mut latest_time = DateTime::<Utc>::MIN_UTC;
        let mut ids_at_latest: Vec<String> = Vec::new();
        for row in &rows {
            if row.fecha_hora > latest_time {
                latest_time = row.fecha_hora;
                ids_at_latest = vec![row.id.clone()];
            } else if row.fecha_hora == latest_time {
                ids_at_latest.push(row.id.clone());
            }
        }

        watermark.update(latest_time, ids_at_latest).await?;
        self.update_stats(latest_time, rows.len() as i64);

        Ok(())
    }

    fn update_stats(&mut self, last_fecha_hora: DateTime<Utc>, new_events: i64) {
        self.stats.last_fecha_hora = Some(last_fecha_hora);
        self.stats.events_today += new_events;
        self.stats.total_events += new_events;
        self.stats.last_minute_events += new_events;

        let now = std::time::Instant::now();
        let elapsed = self
            .stats
            .last_rate_calc
            .map(|last| now.duration_since(last))
            .unwrap_or_default();

        if elapsed >= std::time::Duration::from_secs(60) {
            self.stats.ingestion_rate = self.stats.last_minute_events as f64;
            self.stats.last_minute_events = 0;
            self.stats.last_rate_calc = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coordinator() -> PollCoordinator {
        PollCoordinator::new(PollingConfig {
            interval: std::time::Duration::from_secs(5),
            batch_size: 100,
        })
    }

    #[test]
    fn update_stats_accumulates_totals_without_rolling_the_rate_early() {
        let mut coordinator = coordinator();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        coordinator.update_stats(ts, 3);
        coordinator.update_stats(ts, 2);

        assert_eq!(coordinator.stats().total_events, 5);
        assert_eq!(coordinator.stats().events_today, 5);
        assert_eq!(coordinator.stats().last_fecha_hora, Some(ts));
        // Less than a wall-clock minute has elapsed since construction, so
        // the rate gauge has not rolled over yet.
        assert_eq!(coordinator.stats().ingestion_rate, 0.0);
    }

    #[test]
    fn update_stats_rolls_the_rate_once_a_minute_has_elapsed() {
        let mut coordinator = coordinator();
        coordinator.stats.last_rate_calc =
            Some(std::time::Instant::now() - std::time::Duration::from_secs(61));
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        coordinator.update_stats(ts, 7);

        assert_eq!(coordinator.stats().ingestion_rate, 7.0);
        assert_eq!(coordinator.stats.last_minute_events, 0);
    }
}
