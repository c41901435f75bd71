use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use minesense_server::actuation::BuzzerController;
use minesense_server::hub::{self, Connection, ConnectionError, HubHandle};
use minesense_server::model::{AlertType, Device, Severity};
use minesense_server::pipeline::IngestionPipeline;
use minesense_server::rest::{create_router, AppState, DEVICE_ID_HEADER};
use minesense_server::store::memory::MemoryStore;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

#[derive(Clone, Default)]
struct Observer {
    sent: Arc<Mutex<Vec<String>>>,
}

impl Observer {
    fn messages(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }
}

#[async_trait]
impl Connection for Observer {
    async fn send_text(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&mut self) {}
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    hub: HubHandle,
    observer: Observer,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let (hub, worker) = hub::channel(Duration::from_secs(1));
        tokio::spawn(worker.run());

        let observer = Observer::default();
        hub.register(Box::new(observer.clone()));

        let state = AppState {
            pipeline: IngestionPipeline::new(store.clone(), store.clone(), hub.clone()),
            buzzer: BuzzerController::new(store.clone(), hub.clone(), Duration::from_secs(30)),
            devices: store.clone(),
            images: store.clone(),
            hub: hub.clone(),
        };

        Self {
            router: create_router(state),
            store,
            hub,
            observer,
        }
    }

    async fn post(&self, uri: &str, body: Value, device_header: Option<Uuid>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(id) = device_header {
            request = request.header(DEVICE_ID_HEADER, id.to_string());
        }
        let request = request.body(Body::from(body.to_string())).unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn broadcasts(&self) -> Vec<Value> {
        self.hub.connection_count().await;
        self.observer.messages()
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_gas_envelope_scenario() {
    let app = TestApp::new();
    let device_id = Uuid::new_v4();

    let (status, body) = app
        .post(
            "/api/v1/sensor-data",
            json!({"device_id": device_id.to_string(), "sensor_type": "gas", "payload": {"gas": 750}}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Data received successfully");

    let readings = app.store.readings().await;
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].sensor_type, "gas");

    let alerts = app.store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::GasHazard);
    assert_eq!(alerts[0].severity, Severity::Critical);

    let stored = serde_json::to_value(&alerts[0]).unwrap();
    assert_eq!(stored["alert_type"], "Gas Hazard");
    assert_eq!(stored["severity"], "Critical");

    let sent = app.broadcasts().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "sensor_update");
    assert_eq!(sent[0]["device_id"], device_id.to_string());
}

#[tokio::test]
async fn test_flat_telemetry_with_forwarded_identity() {
    let app = TestApp::new();
    let device_id = Uuid::new_v4();

    let (status, _) = app
        .post(
            "/api/v1/sensor-data",
            json!({"temp": 39.5, "fall": true}),
            Some(device_id),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let readings = app.store.readings().await;
    assert_eq!(readings[0].device_id, device_id);
    assert_eq!(readings[0].sensor_type, "telemetry");
    assert_eq!(readings[0].payload, json!({"temp": 39.5, "fall": true}));

    let kinds: Vec<_> = app
        .store
        .alerts()
        .await
        .iter()
        .map(|a| (a.alert_type, a.severity))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (AlertType::HeatStress, Severity::Critical),
            (AlertType::ManDown, Severity::Critical)
        ]
    );
}

#[tokio::test]
async fn test_envelope_and_flat_store_equivalent_readings() {
    let app = TestApp::new();
    let device_id = Uuid::new_v4();
    let data = json!({"gas": 120, "temp": 25.0});

    app.post(
        "/api/v1/sensor-data",
        json!({"device_id": device_id.to_string(), "sensor_type": "mixed", "payload": data}),
        None,
    )
    .await;
    app.post("/api/v1/sensor-data", data.clone(), Some(device_id))
        .await;

    let readings = app.store.readings().await;
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].device_id, readings[1].device_id);
    assert_eq!(readings[0].payload, readings[1].payload);
    assert_eq!(readings[0].sensor_type, "mixed");
    assert_eq!(readings[1].sensor_type, "telemetry");
}

#[tokio::test]
async fn test_rejected_submissions() {
    let app = TestApp::new();

    let (status, body) = app
        .post("/api/v1/sensor-data", json!({"temp": 25.0}), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Device ID required (in token or body)");

    let (status, _) = app
        .post(
            "/api/v1/sensor-data",
            json!({"device_id": "123", "sensor_type": "gas", "payload": {}}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.store.readings().await.is_empty());
    assert!(app.broadcasts().await.is_empty());
}

#[tokio::test]
async fn test_buzzer_on_known_device() {
    let app = TestApp::new();
    let device = Device::new("helmet-9", "Level 3");
    app.store.insert_device(device.clone()).await;

    let (status, body) = app
        .post(&format!("/api/v1/devices/{}/buzzer", device.id), Value::Null, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["buzzer_active"], true);
    assert_eq!(body["message"], "Buzzer triggered successfully");
    assert!(app.store.device(device.id).await.unwrap().buzzer_active);

    let sent = app.broadcasts().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "device_command");
    assert_eq!(sent[0]["command"], "buzzer_on");
    assert_eq!(sent[0]["is_active"], true);
}

#[tokio::test]
async fn test_buzzer_errors() {
    let app = TestApp::new();

    let (status, _) = app
        .post(&format!("/api/v1/devices/{}/buzzer", Uuid::new_v4()), Value::Null, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/v1/devices/not-a-uuid/buzzer", Value::Null, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.broadcasts().await.is_empty());
}

#[tokio::test]
async fn test_image_upload_broadcasts() {
    let app = TestApp::new();
    let device_id = Uuid::new_v4();

    let (status, body) = app
        .post(
            "/api/v1/images",
            json!({"device_id": device_id.to_string(), "image_url": "https://cdn.example/cam/7.jpg"}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["image_url"], "https://cdn.example/cam/7.jpg");
    assert_eq!(app.store.images().await.len(), 1);

    let sent = app.broadcasts().await;
    assert_eq!(sent[0]["type"], "image_update");
    assert_eq!(sent[0]["payload"]["device_id"], device_id.to_string());

    let (status, _) = app
        .post("/api/v1/images", json!({"device_id": "nope"}), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_then_trigger_buzzer() {
    let app = TestApp::new();
    let supervisor = Uuid::new_v4();

    let (status, created) = app
        .post(
            "/api/v1/devices",
            json!({"device_name": "helmet-7", "location": "Level 3", "supervisor_id": supervisor.to_string()}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["device_name"], "helmet-7");
    assert_eq!(created["location"], "Level 3");
    assert_eq!(created["supervisor_id"], supervisor.to_string());
    assert_eq!(created["buzzer_active"], false);

    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    assert!(app.store.device(id).await.is_some());

    let (status, fetched) = app.get(&format!("/api/v1/devices/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);

    let (status, _) = app
        .post(&format!("/api/v1/devices/{}/buzzer", id), Value::Null, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, fetched) = app.get(&format!("/api/v1/devices/{}", id)).await;
    assert_eq!(fetched["buzzer_active"], true);
}

#[tokio::test]
async fn test_device_registration_errors() {
    let app = TestApp::new();

    let (status, _) = app
        .post("/api/v1/devices", json!({"location": "Level 3"}), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/v1/devices", json!({"device_name": ""}), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/api/v1/devices",
            json!({"device_name": "helmet-8", "supervisor_id": "boss"}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("supervisor"));

    let (status, created) = app
        .post("/api/v1/devices", json!({"device_name": "helmet-9"}), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["location"], "");
    assert_eq!(created["supervisor_id"], Value::Null);

    let (status, body) = app.get(&format!("/api/v1/devices/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Device not found");

    let (status, _) = app.get("/api/v1/devices/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
