use crate::actuation::{ActivationResponse, BuzzerController};
use crate::errors::Error;
use crate::hub::HubHandle;
use crate::model::{BroadcastEvent, Device, Image};
use crate::pipeline::IngestionPipeline;
use crate::store::{DeviceStore, ImageSink};
use crate::ws::serve_observer;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Header carrying the device identity verified by the authenticating proxy.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: IngestionPipeline,
    pub buzzer: BuzzerController,
    pub devices: Arc<dyn DeviceStore>,
    pub images: Arc<dyn ImageSink>,
    pub hub: HubHandle,
}

#[derive(Debug, Deserialize)]
pub struct CreateDeviceInput {
    device_name: String,
    #[serde(default)]
    location: String,
    /// Empty means no supervisor.
    #[serde(default)]
    supervisor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadImageInput {
    device_id: String,
    image_url: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/v1/sensor-data", post(receive_sensor_data))
        .route("/api/v1/ws", get(observe))
        .route("/api/v1/devices", post(create_device))
        .route("/api/v1/devices/:id", get(get_device))
        .route("/api/v1/devices/:id/buzzer", post(trigger_buzzer))
        .route("/api/v1/images", post(upload_image))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Mining Hazard Detection API is running"
    }))
}

async fn receive_sensor_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, Error> {
    state
        .pipeline
        .ingest(&body, authenticated_device(&headers))
        .await?;

    Ok(Json(json!({ "message": "Data received successfully" })))
}

async fn observe(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_observer(socket, state.hub))
}

async fn create_device(
    State(state): State<AppState>,
    input: Result<Json<CreateDeviceInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Device>), Error> {
    let Json(input) = input.map_err(|e| Error::MalformedInput(e.body_text()))?;
    if input.device_name.is_empty() {
        return Err(Error::MalformedInput("device_name is required".to_string()));
    }
    let supervisor_id = match input.supervisor_id.as_str() {
        "" => None,
        raw => Some(
            Uuid::parse_str(raw)
                .map_err(|_| Error::MalformedInput(format!("Invalid supervisor ID: {}", raw)))?,
        ),
    };

    let mut device = Device::new(input.device_name, input.location);
    device.supervisor_id = supervisor_id;
    state.devices.save_device(&device).await?;
    info!("Registered device {} ({})", device.id, device.device_name);

    Ok((StatusCode::CREATED, Json(device)))
}

async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, Error> {
    let device_id = Uuid::parse_str(&id).map_err(|_| Error::InvalidDeviceId(id))?;
    let device = state
        .devices
        .get_device(device_id)
        .await?
        .ok_or(Error::DeviceNotFound(device_id))?;
    Ok(Json(device))
}

async fn trigger_buzzer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActivationResponse>, Error> {
    let device_id = Uuid::parse_str(&id).map_err(|_| Error::InvalidDeviceId(id))?;
    let response = state.buzzer.activate(device_id).await?;
    Ok(Json(response))
}

async fn upload_image(
    State(state): State<AppState>,
    input: Result<Json<UploadImageInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Image>), Error> {
    let Json(input) = input.map_err(|e| Error::MalformedInput(e.body_text()))?;
    if input.image_url.is_empty() {
        return Err(Error::MalformedInput("image_url is required".to_string()));
    }
    let device_id = Uuid::parse_str(&input.device_id)
        .map_err(|_| Error::InvalidDeviceId(input.device_id.clone()))?;

    let image = Image {
        id: Uuid::new_v4(),
        device_id,
        image_url: input.image_url,
        created_at: Utc::now(),
    };
    state.images.create_image(&image).await?;

    state.hub.broadcast(BroadcastEvent::ImageUpdate {
        payload: image.clone(),
    });

    Ok((StatusCode::CREATED, Json(image)))
}

/// Identity forwarded by the authenticator. Missing or unparseable means none.
fn authenticated_device(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}
