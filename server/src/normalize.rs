//! Turns an ingestion body into a canonical `(device_id, sensor_type, payload)` triple.
//!
//! Two body shapes are accepted:
//!
//! * a structured envelope `{"device_id": "<uuid>", "sensor_type": "...", "payload": {...}}`
//! * a flat telemetry object, taken wholesale as the payload under `sensor_type = "telemetry"`
//!
//! The envelope is tried first with a strict schema. Only a schema mismatch (or an
//! envelope with an empty `device_id`/`sensor_type`) falls back to the flat shape;
//! a body that is not JSON at all is rejected outright.

use crate::errors::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

pub const FLAT_SENSOR_TYPE: &str = "telemetry";

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    pub device_id: Uuid,
    pub sensor_type: String,
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    device_id: String,
    sensor_type: String,
    #[serde(default)]
    payload: Value,
}

/// Normalizes a raw body. `authenticated` is the device identity established by the
/// transport (header from the authenticating proxy, MQTT topic), if any.
pub fn normalize(body: &[u8], authenticated: Option<Uuid>) -> Result<NormalizedReading> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedInput(format!("JSON parse error: {}", e)))?;

    if !value.is_object() {
        return Err(Error::MalformedInput(
            "Body must be a JSON object".to_string(),
        ));
    }

    match Envelope::deserialize(&value) {
        Ok(envelope) if !envelope.device_id.is_empty() && !envelope.sensor_type.is_empty() => {
            from_envelope(envelope)
        }
        _ => from_flat(value, authenticated),
    }
}

fn from_envelope(envelope: Envelope) -> Result<NormalizedReading> {
    let device_id = Uuid::parse_str(&envelope.device_id)
        .map_err(|_| Error::InvalidDeviceId(envelope.device_id.clone()))?;

    Ok(NormalizedReading {
        device_id,
        sensor_type: envelope.sensor_type,
        payload: envelope.payload,
    })
}

fn from_flat(body: Value, authenticated: Option<Uuid>) -> Result<NormalizedReading> {
    // Transport identity wins over anything the body claims.
    let device_id = authenticated
        .filter(|id| !id.is_nil())
        .or_else(|| body_device_id(&body))
        .ok_or(Error::DeviceIdRequired)?;

    Ok(NormalizedReading {
        device_id,
        sensor_type: FLAT_SENSOR_TYPE.to_string(),
        payload: body,
    })
}

/// `device_id` inside a flat body. Missing, non-string, unparseable and nil all count as absent.
fn body_device_id(body: &Value) -> Option<Uuid> {
    body.get("device_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .filter(|id| !id.is_nil())
}
