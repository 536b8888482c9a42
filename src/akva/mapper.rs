//! Event normalizer (C3): `FeedingDetail` -> `NormalizedEvent`.

use crate::events::{FeedingDetail, NormalizedEvent, SOURCE};
use chrono::{SecondsFormat, Utc};

/// Passes already-valid UTF-8 through unchanged; elides invalid byte
/// sequences otherwise (spec §4.3). The TDS driver hands us `String`s that
/// are already guaranteed valid, so this is mostly a defensive no-op today,
/// but it's the seam a future raw-bytes source (e.g. a different driver)
/// would need.
fn sanitize_utf8(s: String) -> String {
    match std::str::from_utf8(s.as_bytes()) {
        Ok(_) => s,
        Err(_) => String::from_utf8_lossy(s.as_bytes()).replace('\u{FFFD}', ""),
    }
}

pub fn to_normalized_event(record: FeedingDetail) -> NormalizedEvent {
    let dia = record
        .dia
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    NormalizedEvent {
        id: sanitize_utf8(record.id),
        source: SOURCE.to_string(),
        name: sanitize_utf8(record.name),
        unit_name: sanitize_utf8(record.unit_name),
        fecha_hora: record.fecha_hora.to_rfc3339_opts(SecondsFormat::Secs, true),
        dia,
        inicio: sanitize_utf8(record.inicio),
        fin: sanitize_utf8(record.fin),
        dif: record.dif,
        amount_grams: record.amount_grams,
        pellet_fish_min: record.pellet_fish_min,
        fish_count: record.fish_count as f64,
        peso_prom: record.peso_prom,
        biomasa: record.biomasa,
        pellet_pk: record.pellet_pk,
        feed_name: sanitize_utf8(record.feed_name),
        silo_name: sanitize_utf8(record.silo_name),
        doser_name: sanitize_utf8(record.doser_name),
        grams_per_sec: record.grams_per_sec,
        kg_ton_min: record.kg_ton_min,
        marca: record.marca,
        ingested_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn sample() -> FeedingDetail {
        FeedingDetail {
            id: "42".to_string(),
            name: "Centro Mowi Sur".to_string(),
            unit_name: "Jaula 7".to_string(),
            fecha_hora: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            dia: NaiveDate::from_ymd_opt(2026, 3, 1),
            inicio: "08:00".to_string(),
            fin: "08:05".to_string(),
            dif: 300,
            amount_grams: 1500.0,
            pellet_fish_min: 2.5,
            fish_count: 12000,
            peso_prom: 850.0,
            biomasa: 10200.0,
            pellet_pk: 1.2,
            feed_name: "Pellet A".to_string(),
            silo_name: "Silo 1".to_string(),
            doser_name: "Doser 2".to_string(),
            grams_per_sec: 5.0,
            kg_ton_min: 0.3,
            marca: 1,
        }
    }

    #[test]
    fn widens_fish_count_to_float_and_stamps_source() {
        let normalized = to_normalized_event(sample());
        assert_eq!(normalized.source, "akva");
        assert_eq!(normalized.fish_count, 12000.0);
        assert_eq!(normalized.dia, "2026-03-01");
        assert!(normalized.fecha_hora.starts_with("2026-03-01T12:00:00"));
    }

    #[test]
    fn missing_dia_becomes_empty_string() {
        let mut record = sample();
        record.dia = None;
        let normalized = to_normalized_event(record);
        assert_eq!(normalized.dia, "");
    }

    #[test]
    fn valid_utf8_passes_through_sanitizer_unchanged() {
        assert_eq!(sanitize_utf8("Centro Ñandú 3".to_string()), "Centro Ñandú 3");
    }

    #[test]
    fn invalid_byte_sequences_are_elided() {
        let invalid = unsafe { String::from_utf8_unchecked(vec![b'A', 0xFF, b'B']) };
        assert_eq!(sanitize_utf8(invalid), "AB");
    }
}
