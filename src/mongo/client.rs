//! MongoDB connection management.

use crate::config::MongoConfig;
use crate::error::HistoryError;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client as MongoClient, Collection, IndexModel};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    collection: Option<Collection<super::models::HistoricalEvent>>,
    client: Option<MongoClient>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            collection: None,
            client: None,
        }
    }

    pub async fn connect(&mut self, cfg: &MongoConfig) -> Result<(), HistoryError> {
        let mut options = ClientOptions::parse(&cfg.uri)
            .await
            .map_err(|e| HistoryError::Connect(e.to_string()))?;
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);

        let client = MongoClient::with_options(options)
            .map_err(|e| HistoryError::Connect(e.to_string()))?;

        client
            .database(&cfg.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| HistoryError::Connect(e.to_string()))?;

        let collection = client
            .database(&cfg.database)
            .collection(&cfg.collection);

        create_indexes(&collection)
            .await
            .map_err(|e| HistoryError::Connect(format!("failed to create indexes: {e}")))?;

        self.client = Some(client);
        self.collection = Some(collection);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.client = None;
        self.collection = None;
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// 5-second ping probe (spec §4.4, §4.8).
    pub async fn ping(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        let probe = client.database("admin").run_command(doc! { "ping": 1 });
        tokio::time::timeout(Duration::from_secs(5), probe)
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    pub(super) fn collection(&self) -> Result<&Collection<super::models::HistoricalEvent>, HistoryError> {
        self.collection.as_ref().ok_or(HistoryError::NotConnected)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

async fn create_indexes(
    collection: &Collection<super::models::HistoricalEvent>,
) -> mongodb::error::Result<()> {
    let background = IndexOptions::builder().build();
    let models = ["fechaHora", "unitName", "source", "ingestedAt"].map(|field| {
        IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(background.clone())
            .build()
    });

    collection.create_indexes(models).await?;
    Ok(())
}
