//! SQL Server connection to the Akva feeding-detail table.

use crate::config::SqlServerConfig;
use crate::error::SourceError;
use crate::events::FeedingDetail;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tiberius::{AuthMethod, Config as TiberiusConfig};

const MAX_OPEN_CONNS: u32 = 5;
const MIN_IDLE_CONNS: u32 = 2;
const CONN_MAX_LIFETIME: Duration = Duration::from_secs(3600);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Floor timestamp substituted for a zero/fresh watermark (spec §4.2).
fn fresh_start_floor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

const QUERY: &str = r#"
    SELECT TOP (@P1)
        ID,
        Name,
        UnitName,
        FechaHora,
        Dia,
        inicio,
        Fin,
        dif,
        AmountGrams,
        pelletfishmin,
        FisCount,
        PesoProm,
        Biomasa,
        pelletpK,
        Feedname,
        SiloName,
        DoserName,
        gramspersec,
        kgtonmin,
        Marca
    FROM dbo.TB_DetalleAlimentacion
    WHERE FechaHora >= @P2
    ORDER BY FechaHora ASC, ID ASC
"#;

/// Source reader client (C2). Holds a pooled connection to the Akva SQL
/// Server database; `None` until `connect()` succeeds.
pub struct Client {
    pool: Option<Pool<ConnectionManager>>,
}

impl Client {
    pub fn new() -> Self {
        Self { pool: None }
    }

    pub async fn connect(&mut self, cfg: &SqlServerConfig) -> Result<(), SourceError> {
        let mut tiberius_cfg = TiberiusConfig::new();
        tiberius_cfg.host(&cfg.host);
        tiberius_cfg.port(cfg.port);
        tiberius_cfg.database(&cfg.database);
        tiberius_cfg.authentication(AuthMethod::sql_server(&cfg.user, &cfg.password));
        tiberius_cfg.trust_cert();

        let manager = ConnectionManager::new(tiberius_cfg);
        let pool = Pool::builder()
            .max_size(MAX_OPEN_CONNS)
            .min_idle(Some(MIN_IDLE_CONNS))
            .max_lifetime(Some(CONN_MAX_LIFETIME))
            .build(manager)
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;

        // Probe once so a bad connection string fails fast at startup.
        let mut conn = pool.get().await.map_err(|e| SourceError::Connect(e.to_string()))?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        drop(conn);

        self.pool = Some(pool);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.pool = None;
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    /// 5-second ping probe against a live connection (spec §4.2, §4.8).
    pub async fn ping(&self) -> bool {
        let Some(pool) = &self.pool else {
            return false;
        };
        let probe = async {
            let mut conn = pool.get().await.ok()?;
            conn.simple_query("SELECT 1").await.ok()?;
            Some(())
        };
        tokio::time::timeout(PING_TIMEOUT, probe)
            .await
            .ok()
            .flatten()
            .is_some()
    }

    /// Fetch rows with `FechaHora >= last_fecha_hora`, dropping any row at
    /// exactly `last_fecha_hora` whose ID is already in `seen_ids`.
    pub async fn fetch_new_records(
        &self,
        last_fecha_hora: DateTime<Utc>,
        seen_ids: &HashSet<String>,
        batch_size: i32,
    ) -> Result<Vec<FeedingDetail>, SourceError> {
        let pool = self.pool.as_ref().ok_or(SourceError::NotConnected)?;
        let mut conn = pool.get().await.map_err(|e| SourceError::Connect(e.to_string()))?;

        let query_timestamp = if last_fecha_hora <= DateTime::<Utc>::MIN_UTC {
            fresh_start_floor()
        } else {
            last_fecha_hora
        };

        let stream = conn
            .query(QUERY, &[&batch_size, &query_timestamp.naive_utc()])
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;
        let rows = stream
            .into_first_result()
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let fecha_hora: chrono::NaiveDateTime = row.get("FechaHora").unwrap_or_default();
            let fecha_hora = Utc.from_utc_datetime(&fecha_hora);

            if fecha_hora == last_fecha_hora {
                let id: &str = row.get("ID").unwrap_or_default();
                if seen_ids.contains(id) {
                    continue;
                }
            }

            records.push(FeedingDetail {
                id: row.get::<&str, _>("ID").unwrap_or_default().to_string(),
                name: row.get::<&str, _>("Name").unwrap_or_default().to_string(),
                unit_name: row
                    .get::<&str, _>("UnitName")
                    .unwrap_or_default()
                    .to_string(),
                fecha_hora,
                dia: row.get::<chrono::NaiveDate, _>("Dia"),
                inicio: row.get::<&str, _>("inicio").unwrap_or_default().to_string(),
                fin: row.get::<&str, _>("Fin").unwrap_or_default().to_string(),
                dif: row.get("dif").unwrap_or_default(),
                amount_grams: row.get("AmountGrams").unwrap_or_default(),
                pellet_fish_min: row.get("pelletfishmin").unwrap_or_default(),
                fish_count: row.get("FisCount").unwrap_or_default(),
                peso_prom: row.get("PesoProm").unwrap_or_default(),
                biomasa: row.get("Biomasa").unwrap_or_default(),
                pellet_pk: row.get("pelletpK").unwrap_or_default(),
                feed_name: row
                    .get::<&str, _>("Feedname")
                    .unwrap_or_default()
                    .to_string(),
                silo_name: row
                    .get::<&str, _>("SiloName")
                    .unwrap_or_default()
                    .to_string(),
                doser_name: row
                    .get::<&str, _>("DoserName")
                    .unwrap_or_default()
                    .to_string(),
                grams_per_sec: row.get("gramspersec").unwrap_or_default(),
                kg_ton_min: row.get("kgtonmin").unwrap_or_default(),
                marca: row.get("Marca").unwrap_or_default(),
            });

            if records.len() as i32 >= batch_size {
                break;
            }
        }

        Ok(records)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
