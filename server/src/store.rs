//! Persistence collaborators. The core only sees these traits; `postgres` is the
//! production backend and `memory` serves development runs and tests.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::model::{Alert, Device, Image, SensorReading};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn create_reading(&self, reading: &SensorReading) -> Result<()>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn create_alert(&self, alert: &Alert) -> Result<()>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// `Ok(None)` when no device has this id.
    async fn get_device(&self, id: Uuid) -> Result<Option<Device>>;
    async fn save_device(&self, device: &Device) -> Result<()>;
}

#[async_trait]
pub trait ImageSink: Send + Sync {
    async fn create_image(&self, image: &Image) -> Result<()>;
}

/// The set of collaborators handed to the pipeline, the actuation timer and the routes.
#[derive(Clone)]
pub struct Stores {
    pub readings: Arc<dyn ReadingSink>,
    pub alerts: Arc<dyn AlertSink>,
    pub devices: Arc<dyn DeviceStore>,
    pub images: Arc<dyn ImageSink>,
}

impl Stores {
    /// All four collaborators backed by one store.
    pub fn shared<S>(backend: Arc<S>) -> Self
    where
        S: ReadingSink + AlertSink + DeviceStore + ImageSink + 'static,
    {
        Self {
            readings: backend.clone(),
            alerts: backend.clone(),
            devices: backend.clone(),
            images: backend,
        }
    }
}
