use crate::errors::{Error, Result};
use crate::metrics::DB_RETRIES_TOTAL;
use crate::model::{Alert, Device, Image, SensorReading};
use crate::store::{AlertSink, DeviceStore, ImageSink, ReadingSink};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 3;

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_reading(&self, reading: &SensorReading) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_readings (id, device_id, sensor_type, payload, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(reading.id)
        .bind(reading.device_id)
        .bind(&reading.sensor_type)
        .bind(Json(&reading.payload))
        .bind(reading.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ReadingSink for PgStore {
    /// Readings are the record of truth, so connection-class failures get a
    /// couple of retries before the error reaches the pipeline.
    async fn create_reading(&self, reading: &SensorReading) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.insert_reading(reading).await {
                Ok(()) => return Ok(()),
                Err(Error::Database(db_err))
                    if attempts < MAX_ATTEMPTS && is_transient_error(&db_err) =>
                {
                    // 100ms, 200ms
                    let wait_ms = 100 * 2_u64.pow(attempts - 1);
                    warn!(
                        "Reading insert failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts, MAX_ATTEMPTS, wait_ms, db_err
                    );
                    DB_RETRIES_TOTAL.inc();
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e) => {
                    error!(
                        "Reading insert for device {} failed after {} attempt(s): {}",
                        reading.device_id, attempts, e
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl AlertSink for PgStore {
    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, device_id, alert_type, severity, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(alert.id)
        .bind(alert.device_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn get_device(&self, id: Uuid) -> Result<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, device_name, location, supervisor_id, buzzer_active, created_at, updated_at
            FROM devices
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn save_device(&self, device: &Device) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, device_name, location, supervisor_id, buzzer_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                device_name = EXCLUDED.device_name,
                location = EXCLUDED.location,
                supervisor_id = EXCLUDED.supervisor_id,
                buzzer_active = EXCLUDED.buzzer_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(device.id)
        .bind(&device.device_name)
        .bind(&device.location)
        .bind(device.supervisor_id)
        .bind(device.buzzer_active)
        .bind(device.created_at)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ImageSink for PgStore {
    async fn create_image(&self, image: &Image) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO images (id, device_id, image_url, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(image.id)
        .bind(image.device_id)
        .bind(&image.image_url)
        .bind(image.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            code == "08000" || // connection_exception
            code == "08003" || // connection_does_not_exist
            code == "08006" || // connection_failure
            code == "57P03" || // cannot_connect_now
            code == "53300" // too_many_connections
        }),
        _ => false,
    }
}
