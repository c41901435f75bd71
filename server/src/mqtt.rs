use crate::errors::{Error, Result};
use crate::pipeline::IngestionPipeline;
use crate::store::postgres::is_transient_error;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2000;

pub async fn run_mqtt(
    broker: String,
    port: u16,
    topic: String,
    client_id: String,
    pipeline: IngestionPipeline,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client
        .subscribe(topic.as_str(), QoS::AtLeastOnce)
        .await
        .map_err(Error::Mqtt)?;

    info!("Subscribed to {} with QoS 1", topic);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    let identity = topic_device_id(&publish.topic);
                    if let Err(e) = ingest_with_retry(&pipeline, &publish.payload, identity).await
                    {
                        warn!("Dropped message on {}: {}", publish.topic, e);
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// `telemetry/<uuid>` → the device the broker authenticated for that topic.
fn topic_device_id(topic: &str) -> Option<Uuid> {
    topic
        .rsplit('/')
        .next()
        .and_then(|segment| Uuid::parse_str(segment).ok())
}

async fn ingest_with_retry(
    pipeline: &IngestionPipeline,
    payload: &[u8],
    identity: Option<Uuid>,
) -> Result<()> {
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match pipeline.ingest(payload, identity).await {
            Ok(_) => {
                if attempt > 1 {
                    info!("Message processed successfully on attempt {}", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES || !is_retryable_error(&e) {
                    return Err(e);
                }

                warn!(
                    "Message processing failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt, MAX_RETRIES, e, backoff_ms
                );

                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

/// Only a failed reading insert is worth retrying; bad input stays bad.
/// Database rejections such as an unknown device (23503) fail the same way
/// on every attempt, so only connection-class causes are retried.
fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::IngestFailed(source) => match source.as_ref() {
            Error::Database(e) => is_transient_error(e),
            _ => true,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub;
    use crate::model::SensorReading;
    use crate::store::memory::MemoryStore;
    use crate::store::ReadingSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails the first `failures` inserts, then stores.
    struct FlakyReadings {
        failures: u32,
        calls: AtomicU32,
        store: MemoryStore,
    }

    #[async_trait]
    impl ReadingSink for FlakyReadings {
        async fn create_reading(&self, reading: &SensorReading) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::Backend("connection refused".to_string()));
            }
            self.store.create_reading(reading).await
        }
    }

    fn pipeline_with(readings: Arc<FlakyReadings>) -> IngestionPipeline {
        let (hub, worker) = hub::channel(Duration::from_secs(1));
        tokio::spawn(worker.run());
        IngestionPipeline::new(readings, Arc::new(MemoryStore::new()), hub)
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable_error(&Error::IngestFailed(Box::new(
            Error::Backend("down".to_string())
        ))));
        assert!(is_retryable_error(&Error::IngestFailed(Box::new(
            Error::Database(sqlx::Error::PoolTimedOut)
        ))));
        assert!(!is_retryable_error(&Error::IngestFailed(Box::new(
            Error::Database(sqlx::Error::RowNotFound)
        ))));
        assert!(!is_retryable_error(&Error::DeviceIdRequired));
        assert!(!is_retryable_error(&Error::MalformedInput("test".to_string())));
    }

    #[test]
    fn test_topic_device_id() {
        let id = Uuid::new_v4();
        assert_eq!(topic_device_id(&format!("telemetry/{}", id)), Some(id));
        assert_eq!(topic_device_id("telemetry/dev-1"), None);
        assert_eq!(topic_device_id("telemetry"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let readings = Arc::new(FlakyReadings {
            failures: 2,
            calls: AtomicU32::new(0),
            store: MemoryStore::new(),
        });
        let pipeline = pipeline_with(readings.clone());

        let payload = br#"{"temp": 25.0}"#;
        assert!(ingest_with_retry(&pipeline, payload, Some(Uuid::new_v4()))
            .await
            .is_ok());
        assert_eq!(readings.calls.load(Ordering::SeqCst), 3);
        assert_eq!(readings.store.readings().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let readings = Arc::new(FlakyReadings {
            failures: 10,
            calls: AtomicU32::new(0),
            store: MemoryStore::new(),
        });
        let pipeline = pipeline_with(readings.clone());

        let result = ingest_with_retry(&pipeline, br#"{"temp": 25.0}"#, Some(Uuid::new_v4())).await;
        assert!(matches!(result, Err(Error::IngestFailed(_))));
        assert_eq!(readings.calls.load(Ordering::SeqCst), MAX_RETRIES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_database_failure_not_retried() {
        struct RejectingReadings {
            calls: AtomicU32,
        }

        #[async_trait]
        impl ReadingSink for RejectingReadings {
            async fn create_reading(&self, _reading: &SensorReading) -> Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Database(sqlx::Error::RowNotFound))
            }
        }

        let readings = Arc::new(RejectingReadings {
            calls: AtomicU32::new(0),
        });
        let (hub, worker) = hub::channel(Duration::from_secs(1));
        tokio::spawn(worker.run());
        let pipeline = IngestionPipeline::new(readings.clone(), Arc::new(MemoryStore::new()), hub);

        let result = ingest_with_retry(&pipeline, br#"{"temp": 25.0}"#, Some(Uuid::new_v4())).await;
        assert!(matches!(result, Err(Error::IngestFailed(_))));
        assert_eq!(readings.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_payload_not_retried() {
        tokio_test::block_on(async {
            let readings = Arc::new(FlakyReadings {
                failures: 0,
                calls: AtomicU32::new(0),
                store: MemoryStore::new(),
            });
            let (hub, _worker) = hub::channel(Duration::from_secs(1));
            let pipeline = IngestionPipeline::new(readings.clone(), Arc::new(MemoryStore::new()), hub);

            assert!(ingest_with_retry(&pipeline, b"invalid json", None).await.is_err());
            assert_eq!(readings.calls.load(Ordering::SeqCst), 0);
        });
    }
}
