//! Read/write operations over the history store.

use super::client::Client;
use super::models::HistoricalEvent;
use crate::error::HistoryError;
use crate::events::NormalizedEvent;
use bson::Bson;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, InsertManyOptions, ReturnDocument};
use std::collections::{HashMap, HashSet};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub page: i64,
    pub page_size: i64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub unit_name: Option<String>,
    pub centro: Option<String>,
    pub sort_by: Option<String>,
    pub sort_descending: bool,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub data: Vec<HistoricalEvent>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

pub struct Repository;

impl Repository {
    fn event_to_document(event: &NormalizedEvent) -> Result<HistoricalEvent, HistoryError> {
        let fecha_hora = DateTime::parse_from_rfc3339(&event.fecha_hora)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| HistoryError::Operation(format!("invalid fechaHora: {e}")))?;

        let mut payload = HashMap::new();
        payload.insert("name".to_string(), Bson::String(event.name.clone()));
        payload.insert("dia".to_string(), Bson::String(event.dia.clone()));
        payload.insert("inicio".to_string(), Bson::String(event.inicio.clone()));
        payload.insert("fin".to_string(), Bson::String(event.fin.clone()));
        payload.insert("dif".to_string(), Bson::Int32(event.dif));
        payload.insert("amountGrams".to_string(), Bson::Double(event.amount_grams));
        payload.insert(
            "pelletFishMin".to_string(),
            Bson::Double(event.pellet_fish_min),
        );
        payload.insert("fishCount".to_string(), Bson::Double(event.fish_count));
        payload.insert("pesoProm".to_string(), Bson::Double(event.peso_prom));
        payload.insert("biomasa".to_string(), Bson::Double(event.biomasa));
        payload.insert("pelletPK".to_string(), Bson::Double(event.pellet_pk));
        payload.insert("feedName".to_string(), Bson::String(event.feed_name.clone()));
        payload.insert("siloName".to_string(), Bson::String(event.silo_name.clone()));
        payload.insert(
            "doserName".to_string(),
            Bson::String(event.doser_name.clone()),
        );
        payload.insert(
            "gramsPerSec".to_string(),
            Bson::Double(event.grams_per_sec),
        );
        payload.insert("kgTonMin".to_string(), Bson::Double(event.kg_ton_min));
        payload.insert("marca".to_string(), Bson::Int32(event.marca));

        Ok(HistoricalEvent {
            id: event.composite_key(),
            source: event.source.clone(),
            fecha_hora,
            unit_name: event.unit_name.clone(),
            payload,
            ingested_at: event.ingested_at,
        })
    }

    /// Unordered bulk insert; duplicate-key errors are the expected
    /// idempotency signal and are not surfaced as failures (spec §4.4).
    pub async fn insert_batch(
        client: &Client,
        events: &[NormalizedEvent],
    ) -> Result<(), HistoryError> {
        if events.is_empty() {
            return Ok(());
        }

        let docs: Vec<HistoricalEvent> = events
            .iter()
            .map(Self::event_to_document)
            .collect::<Result<_, _>>()?;

        let collection = client.collection()?;
        let opts = InsertManyOptions::builder().ordered(false).build();
        match collection.insert_many(&docs).with_options(opts).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if is_duplicate_key_only(&e) {
                    tracing::debug!("insert_batch: ignoring duplicate-key entries");
                    Ok(())
                } else {
                    Err(HistoryError::Operation(e.to_string()))
                }
            }
        }
    }

    /// Composite-key lookup for the change detector, keyed by bare ID.
    pub async fn get_events_by_ids(
        client: &Client,
        source: &str,
        ids: &HashSet<String>,
    ) -> Result<HashMap<String, HistoricalEvent>, HistoryError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let composite_ids: Vec<String> = ids.iter().map(|id| format!("{source}:{id}")).collect();
        let filter = doc! { "_id": { "$in": composite_ids } };

        let collection = client.collection()?;
        let mut cursor = collection
            .find(filter)
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?;

        let mut result = HashMap::new();
        while let Some(event) = cursor
            .try_next()
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?
        {
            let bare_id = event
                .id
                .strip_prefix(&format!("{source}:"))
                .unwrap_or(&event.id)
                .to_string();
            result.insert(bare_id, event);
        }

        Ok(result)
    }

    pub async fn get_recent_events(
        client: &Client,
        limit: i64,
    ) -> Result<Vec<HistoricalEvent>, HistoryError> {
        let collection = client.collection()?;
        let opts = FindOptions::builder()
            .sort(doc! { "ingestedAt": -1 })
            .limit(limit)
            .build();

        let cursor = collection
            .find(doc! {})
            .with_options(opts)
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))
    }

    pub async fn count_events(client: &Client) -> Result<i64, HistoryError> {
        let collection = client.collection()?;
        collection
            .count_documents(doc! {})
            .await
            .map(|n| n as i64)
            .map_err(|e| HistoryError::Operation(e.to_string()))
    }

    pub async fn count_events_today(client: &Client) -> Result<i64, HistoryError> {
        let now = Utc::now();
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();

        let collection = client.collection()?;
        collection
            .count_documents(doc! { "ingestedAt": { "$gte": bson::DateTime::from_chrono(start_of_day) } })
            .await
            .map(|n| n as i64)
            .map_err(|e| HistoryError::Operation(e.to_string()))
    }

    /// Filtered, paginated read for the admin collaborator (spec §4.4).
    pub async fn query_events(
        client: &Client,
        mut opts: QueryOptions,
    ) -> Result<QueryResult, HistoryError> {
        let mut filter = doc! {};

        if opts.start_date.is_some() || opts.end_date.is_some() {
            let mut range = doc! {};
            if let Some(start) = opts.start_date {
                range.insert("$gte", bson::DateTime::from_chrono(start));
            }
            if let Some(end) = opts.end_date {
                range.insert("$lte", bson::DateTime::from_chrono(end));
            }
            filter.insert("fechaHora", range);
        }
        if let Some(source) = &opts.source {
            filter.insert("source", source);
        }
        if let Some(unit_name) = &opts.unit_name {
            filter.insert("unitName", doc! { "$regex": unit_name, "$options": "i" });
        }
        if let Some(centro) = &opts.centro {
            filter.insert("payload.name", doc! { "$regex": centro, "$options": "i" });
        }

        let collection = client.collection()?;
        let total = collection
            .count_documents(filter.clone())
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?;

        opts.page = opts.page.max(1);
        opts.page_size = opts.page_size.clamp(1, MAX_PAGE_SIZE);
        if opts.page_size == 0 {
            opts.page_size = DEFAULT_PAGE_SIZE;
        }
        let sort_by = opts.sort_by.clone().unwrap_or_else(|| "ingestedAt".to_string());
        let sort_order = if opts.sort_descending { -1 } else { 1 };

        let skip = ((opts.page - 1) * opts.page_size) as u64;
        let find_opts = FindOptions::builder()
            .skip(skip)
            .limit(opts.page_size)
            .sort(doc! { sort_by: sort_order })
            .build();

        let cursor = collection
            .find(filter)
            .with_options(find_opts)
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?;
        let data: Vec<HistoricalEvent> = cursor
            .try_collect()
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?;

        let total_pages = (total as i64 + opts.page_size - 1) / opts.page_size;

        Ok(QueryResult {
            data,
            total: total as i64,
            page: opts.page,
            page_size: opts.page_size,
            total_pages,
        })
    }

    /// Administrative mutation; `_id` and `ingestedAt` are never overwritten.
    pub async fn update_by_id(
        client: &Client,
        id: &str,
        mut update: HashMap<String, Bson>,
    ) -> Result<(), HistoryError> {
        update.remove("_id");
        update.remove("ingestedAt");

        let update_doc: mongodb::bson::Document = update.into_iter().collect();
        let collection = client.collection()?;
        let opts = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        collection
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": update_doc })
            .with_options(opts)
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?
            .ok_or_else(|| HistoryError::Operation(format!("event {id} not found")))?;

        Ok(())
    }

    pub async fn delete_by_id(client: &Client, id: &str) -> Result<(), HistoryError> {
        let collection = client.collection()?;
        let result = collection
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?;

        if result.deleted_count == 0 {
            return Err(HistoryError::Operation(format!("event {id} not found")));
        }
        Ok(())
    }

    pub async fn delete_by_filter(
        client: &Client,
        source: Option<&str>,
        before: Option<DateTime<Utc>>,
    ) -> Result<i64, HistoryError> {
        let mut filter = doc! {};
        if let Some(source) = source {
            filter.insert("source", source);
        }
        if let Some(before) = before {
            filter.insert("ingestedAt", doc! { "$lt": bson::DateTime::from_chrono(before) });
        }

        let collection = client.collection()?;
        let result = collection
            .delete_many(filter)
            .await
            .map_err(|e| HistoryError::Operation(e.to_string()))?;

        Ok(result.deleted_count as i64)
    }
}

fn is_duplicate_key_only(error: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;
    matches!(error.kind.as_ref(), ErrorKind::BulkWrite(bwe) if bwe
        .write_errors
        .as_ref()
        .map(|errs| errs.iter().all(|e| e.code == 11000))
        .unwrap_or(false))
}
