//! Dynamic per-center topic construction and the Spanish-vocabulary payload.

use super::client::Client;
use crate::error::BrokerError;
use crate::events::NormalizedEvent;
use serde_json::json;

const TOPIC_PREFIX: &str = "feeding/mowi/";

/// `lowercase, spaces -> '_', drop anything outside [a-z0-9_]` (spec §4.6).
pub fn normalize_topic_segment(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

fn topic_for(event: &NormalizedEvent) -> String {
    format!("{}{}/", TOPIC_PREFIX, normalize_topic_segment(&event.name))
}

/// `UnitName` stripped to digits only, e.g. "Jaula 7" -> "7".
fn jaula_digits(unit_name: &str) -> String {
    unit_name.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn to_payload(event: &NormalizedEvent) -> serde_json::Value {
    json!({
        "Centro": event.name,
        "Jaula": jaula_digits(&event.unit_name),
        "Gramos": event.amount_grams,
        "Peces": event.fish_count,
        "PesoPromedio": event.peso_prom,
        "Biomasa": event.biomasa,
        "Alimento": event.feed_name,
        "Silo": event.silo_name,
        "Dosificador": event.doser_name,
        "GramsPorSegundo": event.grams_per_sec,
        "KgTonMin": event.kg_ton_min,
        "Marca": event.marca,
        "TimeStampAkva": event.fecha_hora,
        "TimeStampIngresado": event.ingested_at.to_rfc3339(),
        "Dia": event.dia,
        "Inicio": event.inicio,
        "Fin": event.fin,
        "Dif": event.dif,
        "PelletFishMin": event.pellet_fish_min,
        "PelletPK": event.pellet_pk,
        "UnitName": event.unit_name,
        "ID": event.id,
        "Source": event.source,
    })
}

/// Publishes normalized events to the broker, one message per event.
pub struct Publisher {
    qos: u8,
}

impl Publisher {
    pub fn new(qos: u8) -> Self {
        Self { qos }
    }

    pub async fn publish(&self, client: &Client, event: &NormalizedEvent) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(&to_payload(event))
            .map_err(|e| BrokerError::Connect(format!("failed to marshal event: {e}")))?;
        client.publish(&topic_for(event), self.qos, payload).await
    }

    /// Publish every event; aggregate failures rather than stopping at the
    /// first one (spec §4.6).
    pub async fn publish_batch(
        &self,
        client: &Client,
        events: &[NormalizedEvent],
    ) -> Result<(), BrokerError> {
        let total = events.len();
        let mut failed = 0usize;

        for event in events {
            if let Err(e) = self.publish(client, event).await {
                tracing::warn!(id = %event.id, error = %e, "failed to publish event");
                failed += 1;
            }
        }

        if failed > 0 {
            Err(BrokerError::BatchFailed { failed, total })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_strips_punctuation() {
        assert_eq!(normalize_topic_segment("Centro Mowi Sur!"), "centro_mowi_sur");
        assert_eq!(normalize_topic_segment("  Jaula-7  "), "__jaula7__");
    }

    #[test]
    fn jaula_digits_extracts_numeric_suffix() {
        assert_eq!(jaula_digits("Jaula 7"), "7");
        assert_eq!(jaula_digits("J-12B"), "12");
        assert_eq!(jaula_digits("none"), "");
    }
}
