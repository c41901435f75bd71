use crate::actuation::DEFAULT_BUZZER_WINDOW;
use crate::errors::{Error, Result};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: String,
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// `None` disables MQTT ingestion.
    pub mqtt_broker: Option<String>,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub buzzer_window: Duration,
    pub ws_write_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars().collect())
    }

    fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();

        Ok(Self {
            http_addr: get("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            database_url: get("DATABASE_URL"),
            db_max_connections: parse(&vars, "DB_MAX_CONNECTIONS", 20)?,
            mqtt_broker: get("MQTT_BROKER"),
            mqtt_port: parse(&vars, "MQTT_PORT", 1883)?,
            mqtt_topic: get("MQTT_TOPIC").unwrap_or_else(|| "telemetry/#".to_string()),
            buzzer_window: Duration::from_secs(parse(
                &vars,
                "BUZZER_WINDOW_SECS",
                DEFAULT_BUZZER_WINDOW.as_secs(),
            )?),
            ws_write_timeout: Duration::from_millis(parse(&vars, "WS_WRITE_TIMEOUT_MS", 5000)?),
        })
    }
}

fn parse<T: FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match vars.get(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
