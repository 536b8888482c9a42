//! Change detector (C5): gate broker publication to new-or-materially-changed
//! events relative to the History Store's current record.
//!
//! Net-new relative to the system this was distilled from, which published
//! every fetched row unconditionally — see DESIGN.md.

use crate::events::NormalizedEvent;
use crate::mongo::{Client as MongoClient, Repository};
use bson::Bson;
use std::collections::HashSet;

/// Filter `events` down to those that are new or materially changed,
/// preserving input order. Fails open: if the lookup against the history
/// store errors, every event passes through unchanged.
pub async fn filter(mongo: &MongoClient, events: Vec<NormalizedEvent>) -> Vec<NormalizedEvent> {
    if events.is_empty() {
        return events;
    }

    let ids: HashSet<String> = events.iter().map(|e| e.id.clone()).collect();
    let existing = match Repository::get_events_by_ids(mongo, "akva", &ids).await {
        Ok(existing) => existing,
        Err(e) => {
            tracing::warn!(error = %e, "change detector: history lookup failed, publishing all events");
            return events;
        }
    };

    events
        .into_iter()
        .filter(|event| match existing.get(&event.id) {
            None => true,
            Some(previous) => materially_changed(event, &previous.payload),
        })
        .collect()
}

/// Compares the enumerated attributes exactly; any inequality triggers
/// inclusion (spec §4.5).
fn materially_changed(
    event: &NormalizedEvent,
    previous: &std::collections::HashMap<String, Bson>,
) -> bool {
    floats_differ(event.amount_grams, previous.get("amountGrams"))
        || floats_differ(event.biomasa, previous.get("biomasa"))
        || floats_differ(event.fish_count, previous.get("fishCount"))
        || floats_differ(event.peso_prom, previous.get("pesoProm"))
        || floats_differ(event.pellet_fish_min, previous.get("pelletFishMin"))
        || floats_differ(event.pellet_pk, previous.get("pelletPK"))
        || floats_differ(event.grams_per_sec, previous.get("gramsPerSec"))
        || floats_differ(event.kg_ton_min, previous.get("kgTonMin"))
        || strings_differ(&event.feed_name, previous.get("feedName"))
        || strings_differ(&event.silo_name, previous.get("siloName"))
        || strings_differ(&event.doser_name, previous.get("doserName"))
        || strings_differ(&event.name, previous.get("name"))
        || strings_differ(&event.inicio, previous.get("inicio"))
        || strings_differ(&event.fin, previous.get("fin"))
        || ints_differ(event.dif, previous.get("dif"))
        || ints_differ(event.marca, previous.get("marca"))
}

/// Bit-exact equality; the source field is authoritative and any
/// representational drift re-triggers publication (spec §4.5).
fn floats_differ(current: f64, stored: Option<&Bson>) -> bool {
    match stored.and_then(as_f64) {
        Some(previous) => current != previous,
        None => true,
    }
}

fn ints_differ(current: i32, stored: Option<&Bson>) -> bool {
    match stored.and_then(as_i64) {
        Some(previous) => i64::from(current) != previous,
        None => true,
    }
}

fn strings_differ(current: &str, stored: Option<&Bson>) -> bool {
    match stored.and_then(Bson::as_str) {
        Some(previous) => current != previous,
        None => true,
    }
}

/// Coerce a stored numeric field that may have round-tripped through the
/// document store as `int32`, `int64`, or `double`.
fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(d) => Some(*d),
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        _ => None,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Double(d) => Some(*d as i64),
        Bson::Int32(i) => Some(*i as i64),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn payload() -> HashMap<String, Bson> {
        let mut m = HashMap::new();
        m.insert("amountGrams".to_string(), Bson::Double(1500.0));
        m.insert("biomasa".to_string(), Bson::Double(10200.0));
        m.insert("fishCount".to_string(), Bson::Int32(12000));
        m.insert("pesoProm".to_string(), Bson::Double(850.0));
        m.insert("pelletFishMin".to_string(), Bson::Double(2.5));
        m.insert("pelletPK".to_string(), Bson::Double(1.2));
        m.insert("gramsPerSec".to_string(), Bson::Double(5.0));
        m.insert("kgTonMin".to_string(), Bson::Double(0.3));
        m.insert("feedName".to_string(), Bson::String("Pellet A".to_string()));
        m.insert("siloName".to_string(), Bson::String("Silo 1".to_string()));
        m.insert("doserName".to_string(), Bson::String("Doser 2".to_string()));
        m.insert("name".to_string(), Bson::String("Centro Mowi Sur".to_string()));
        m.insert("inicio".to_string(), Bson::String("08:00".to_string()));
        m.insert("fin".to_string(), Bson::String("08:05".to_string()));
        m.insert("dif".to_string(), Bson::Int32(300));
        m.insert("marca".to_string(), Bson::Int32(1));
        m
    }

    fn sample_event() -> NormalizedEvent {
        NormalizedEvent {
            id: "42".to_string(),
            source: "akva".to_string(),
            name: "Centro Mowi Sur".to_string(),
            unit_name: "Jaula 7".to_string(),
            fecha_hora: "2026-03-01T12:00:00Z".to_string(),
            dia: "2026-03-01".to_string(),
            inicio: "08:00".to_string(),
            fin: "08:05".to_string(),
            dif: 300,
            amount_grams: 1500.0,
            pellet_fish_min: 2.5,
            fish_count: 12000.0,
            peso_prom: 850.0,
            biomasa: 10200.0,
            pellet_pk: 1.2,
            feed_name: "Pellet A".to_string(),
            silo_name: "Silo 1".to_string(),
            doser_name: "Doser 2".to_string(),
            grams_per_sec: 5.0,
            kg_ton_min: 0.3,
            marca: 1,
            ingested_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn identical_payload_is_not_materially_changed() {
        assert!(!materially_changed(&sample_event(), &payload()));
    }

    #[test]
    fn numeric_coercion_across_bson_int_types_is_transparent() {
        let mut stored = payload();
        stored.insert("fishCount".to_string(), Bson::Int64(12000));
        assert!(!materially_changed(&sample_event(), &stored));

        stored.insert("fishCount".to_string(), Bson::Double(12000.0));
        assert!(!materially_changed(&sample_event(), &stored));
    }

    #[test]
    fn a_single_changed_field_triggers_inclusion() {
        let mut event = sample_event();
        event.biomasa = 10500.0;
        assert!(materially_changed(&event, &payload()));
    }

    #[test]
    fn missing_field_in_stored_payload_triggers_inclusion() {
        let mut stored = payload();
        stored.remove("doserName");
        assert!(materially_changed(&sample_event(), &stored));
    }
}
