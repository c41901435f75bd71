use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),

    #[error("Device ID required (in token or body)")]
    DeviceIdRequired,

    #[error("Failed to persist reading: {0}")]
    IngestFailed(#[source] Box<Error>),

    #[error("Failed to persist {alert_type} alert: {source}")]
    AlertPersistFailed {
        alert_type: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Device not found: {0}")]
    DeviceNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors caused by what the submitter sent, as opposed to server-side failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedInput(_) | Error::InvalidDeviceId(_) | Error::DeviceIdRequired
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            e if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            Error::DeviceNotFound(_) => (StatusCode::NOT_FOUND, "Device not found".to_string()),
            Error::IngestFailed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process data".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
