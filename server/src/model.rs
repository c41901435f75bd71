use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// One timestamped sensor payload attributed to a device. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: Uuid,
    pub device_id: Uuid,
    pub sensor_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(device_id: Uuid, sensor_type: String, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            sensor_type,
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    #[serde(rename = "Gas Hazard")]
    GasHazard,
    #[serde(rename = "Heat Stress")]
    HeatStress,
    #[serde(rename = "Man-Down")]
    ManDown,
    #[serde(rename = "Structural Warning")]
    StructuralWarning,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::GasHazard => "Gas Hazard",
            AlertType::HeatStress => "Heat Stress",
            AlertType::ManDown => "Man-Down",
            AlertType::StructuralWarning => "Structural Warning",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity. `Medium` and `Caution` are the same tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    Caution,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::Caution => "Caution",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hazard notification derived from one reading. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub device_id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,
    pub device_name: String,
    pub location: String,
    /// Relation only; the supervisor is not owned by the device.
    pub supervisor_id: Option<Uuid>,
    pub buzzer_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn new(device_name: impl Into<String>, location: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            device_name: device_name.into(),
            location: location.into(),
            supervisor_id: None,
            buzzer_active: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Image {
    pub id: Uuid,
    pub device_id: Uuid,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCommand {
    BuzzerOn,
    BuzzerOff,
}

/// Messages pushed to every live observer connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    SensorUpdate {
        device_id: Uuid,
        sensor_type: String,
        payload: Value,
        timestamp: DateTime<Utc>,
    },
    ImageUpdate {
        payload: Image,
    },
    DeviceCommand {
        device_id: Uuid,
        command: DeviceCommand,
        is_active: bool,
        timestamp: DateTime<Utc>,
    },
}

impl BroadcastEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastEvent::SensorUpdate { .. } => "sensor_update",
            BroadcastEvent::ImageUpdate { .. } => "image_update",
            BroadcastEvent::DeviceCommand { .. } => "device_command",
        }
    }
}
