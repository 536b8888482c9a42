// Configuration for the poller subsystem.
//
// Configuration is env-first: every value has a built-in default and can be
// overridden by an environment variable. The system this spec was distilled
// from also layered a YAML/JSON config file underneath (with at-rest
// password encryption); persisting config to disk and encrypting it are the
// admin collaborator's concern and out of scope here — this module only
// assembles what the poller subsystem itself needs at startup.

use std::time::Duration;

/// Environment variable governing the watermark file location (C1).
pub const WATERMARK_PATH_ENV: &str = "OMNIPOLL_WATERMARK_PATH";
pub const DEFAULT_WATERMARK_PATH: &str = "./data/watermark.json";

/// Top-level configuration assembled at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub sql_server: SqlServerConfig,
    pub mqtt: MqttConfig,
    pub mongo: MongoConfig,
    pub polling: PollingConfig,
    pub watermark_path: String,
}

#[derive(Debug, Clone)]
pub struct SqlServerConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
    pub use_tls: bool,
}

impl MqttConfig {
    /// `ssl://` for the conventional TLS port or when the TLS flag is set,
    /// else `tcp://` (spec §4.6).
    pub fn scheme(&self) -> &'static str {
        if self.use_tls || self.port == 8883 {
            "ssl"
        } else {
            "tcp"
        }
    }
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    pub batch_size: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sql_server: SqlServerConfig {
                host: "localhost".to_string(),
                port: 1433,
                database: "FTFeeding".to_string(),
                user: "sa".to_string(),
                password: String::new(),
            },
            mqtt: MqttConfig {
                broker: "localhost".to_string(),
                port: 1883,
                client_id: "omnipoll-worker".to_string(),
                user: None,
                password: None,
                qos: 1,
                use_tls: false,
            },
            mongo: MongoConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: "omnipoll".to_string(),
                collection: "historical_events".to_string(),
            },
            polling: PollingConfig {
                interval: Duration::from_millis(5000),
                batch_size: 100,
            },
            watermark_path: DEFAULT_WATERMARK_PATH.to_string(),
        }
    }
}

impl Config {
    /// Assemble configuration: env vars override built-in defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let sql_server = SqlServerConfig {
            host: env_or("OMNIPOLL_SQLSERVER_HOST", defaults.sql_server.host),
            port: env_parse_or("OMNIPOLL_SQLSERVER_PORT", defaults.sql_server.port),
            database: env_or("OMNIPOLL_SQLSERVER_DATABASE", defaults.sql_server.database),
            user: env_or("OMNIPOLL_SQLSERVER_USER", defaults.sql_server.user),
            password: env_or("OMNIPOLL_SQLSERVER_PASSWORD", defaults.sql_server.password),
        };

        let mqtt = MqttConfig {
            broker: env_or("OMNIPOLL_MQTT_BROKER", defaults.mqtt.broker),
            port: env_parse_or("OMNIPOLL_MQTT_PORT", defaults.mqtt.port),
            client_id: env_or("OMNIPOLL_MQTT_CLIENT_ID", defaults.mqtt.client_id),
            user: std::env::var("OMNIPOLL_MQTT_USER").ok(),
            password: std::env::var("OMNIPOLL_MQTT_PASSWORD").ok(),
            qos: env_parse_or("OMNIPOLL_MQTT_QOS", defaults.mqtt.qos),
            use_tls: std::env::var("OMNIPOLL_MQTT_TLS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.mqtt.use_tls),
        };

        let mongo = MongoConfig {
            uri: env_or("OMNIPOLL_MONGODB_URI", defaults.mongo.uri),
            database: env_or("OMNIPOLL_MONGODB_DATABASE", defaults.mongo.database),
            collection: env_or("OMNIPOLL_MONGODB_COLLECTION", defaults.mongo.collection),
        };

        let interval_ms: u64 = env_parse_or(
            "OMNIPOLL_POLL_INTERVAL_MS",
            defaults.polling.interval.as_millis() as u64,
        );
        let polling = PollingConfig {
            interval: Duration::from_millis(interval_ms),
            batch_size: env_parse_or("OMNIPOLL_BATCH_SIZE", defaults.polling.batch_size),
        };

        let watermark_path = env_or(WATERMARK_PATH_ENV, defaults.watermark_path);

        Self {
            sql_server,
            mqtt,
            mongo,
            polling,
            watermark_path,
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.sql_server.port, 1433);
        assert_eq!(cfg.mqtt.qos, 1);
        assert_eq!(cfg.polling.batch_size, 100);
        assert_eq!(cfg.watermark_path, DEFAULT_WATERMARK_PATH);
    }

    #[test]
    fn mqtt_scheme_selects_tls_by_port_or_flag() {
        let mut cfg = MqttConfig {
            broker: "b".into(),
            port: 1883,
            client_id: "c".into(),
            user: None,
            password: None,
            qos: 1,
            use_tls: false,
        };
        assert_eq!(cfg.scheme(), "tcp");
        cfg.port = 8883;
        assert_eq!(cfg.scheme(), "ssl");
        cfg.port = 1883;
        cfg.use_tls = true;
        assert_eq!(cfg.scheme(), "ssl");
    }
}
