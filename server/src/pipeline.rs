use crate::errors::{Error, Result};
use crate::hazard::{self, Hazard};
use crate::hub::HubHandle;
use crate::metrics::{
    ALERTS_RAISED_TOTAL, ALERT_PERSIST_FAILURES_TOTAL, INGEST_FAILURES_TOTAL,
    INGEST_LATENCY_SECONDS, INVALID_MESSAGES_TOTAL, MESSAGES_TOTAL, READINGS_STORED_TOTAL,
};
use crate::model::{Alert, BroadcastEvent, SensorReading};
use crate::normalize::normalize;
use crate::store::{AlertSink, ReadingSink};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What one successfully ingested message produced.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub reading: SensorReading,
    /// Alerts that were actually persisted; matches that failed to persist are absent.
    pub alerts: Vec<Alert>,
}

/// Normalize → persist reading → evaluate hazards → persist alerts → broadcast.
#[derive(Clone)]
pub struct IngestionPipeline {
    readings: Arc<dyn ReadingSink>,
    alerts: Arc<dyn AlertSink>,
    hub: HubHandle,
}

impl IngestionPipeline {
    pub fn new(readings: Arc<dyn ReadingSink>, alerts: Arc<dyn AlertSink>, hub: HubHandle) -> Self {
        Self {
            readings,
            alerts,
            hub,
        }
    }

    /// Runs one message through the pipeline. `authenticated` is the device
    /// identity vouched for by the transport, if any.
    ///
    /// Only input errors and a failed reading insert are returned. Once the
    /// reading is stored the call succeeds no matter what happens to alerts.
    pub async fn ingest(&self, body: &[u8], authenticated: Option<Uuid>) -> Result<IngestOutcome> {
        MESSAGES_TOTAL.inc();
        let start = Instant::now();

        let normalized = normalize(body, authenticated).map_err(|e| {
            INVALID_MESSAGES_TOTAL.inc();
            debug!("Rejected telemetry: {}", e);
            e
        })?;

        let reading = SensorReading::new(
            normalized.device_id,
            normalized.sensor_type,
            normalized.payload,
        );

        if let Err(e) = self.readings.create_reading(&reading).await {
            INGEST_FAILURES_TOTAL.inc();
            error!(
                "Failed to store {} reading for device {}: {}",
                reading.sensor_type, reading.device_id, e
            );
            return Err(Error::IngestFailed(Box::new(e)));
        }
        READINGS_STORED_TOTAL.inc();

        let mut alerts = Vec::new();
        for hazard in hazard::evaluate(&reading.payload) {
            if let Some(alert) = self.raise(reading.device_id, hazard).await {
                alerts.push(alert);
            }
        }

        self.hub.broadcast(BroadcastEvent::SensorUpdate {
            device_id: reading.device_id,
            sensor_type: reading.sensor_type.clone(),
            payload: reading.payload.clone(),
            timestamp: reading.timestamp,
        });

        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        debug!(
            "Ingested {} reading {} for device {} ({} alert(s))",
            reading.sensor_type,
            reading.id,
            reading.device_id,
            alerts.len()
        );

        Ok(IngestOutcome { reading, alerts })
    }

    /// Persists one alert. A failure is logged and swallowed so the other
    /// rules and the broadcast still go ahead.
    async fn raise(&self, device_id: Uuid, hazard: Hazard) -> Option<Alert> {
        let alert = Alert {
            id: Uuid::new_v4(),
            device_id,
            alert_type: hazard.alert_type,
            severity: hazard.severity,
            message: hazard.message.to_string(),
            created_at: Utc::now(),
        };

        match self.alerts.create_alert(&alert).await {
            Ok(()) => {
                ALERTS_RAISED_TOTAL.inc();
                info!(
                    "{} alert ({}) for device {}: {}",
                    alert.alert_type, alert.severity, device_id, alert.message
                );
                Some(alert)
            }
            Err(e) => {
                ALERT_PERSIST_FAILURES_TOTAL.inc();
                let err = Error::AlertPersistFailed {
                    alert_type: alert.alert_type.to_string(),
                    source: Box::new(e),
                };
                warn!("Device {}: {}", device_id, err);
                None
            }
        }
    }
}
