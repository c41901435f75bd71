use crate::errors::Result;
use crate::model::{Alert, Device, Image, SensorReading};
use crate::store::{AlertSink, DeviceStore, ImageSink, ReadingSink};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process store used when no database is configured.
///
/// Unlike the Postgres schema it does not enforce that readings, alerts and
/// images reference a known device.
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: RwLock<Vec<SensorReading>>,
    alerts: RwLock<Vec<Alert>>,
    devices: RwLock<HashMap<Uuid, Device>>,
    images: RwLock<Vec<Image>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_device(&self, device: Device) {
        self.devices.write().await.insert(device.id, device);
    }

    pub async fn device(&self, id: Uuid) -> Option<Device> {
        self.devices.read().await.get(&id).cloned()
    }

    pub async fn readings(&self) -> Vec<SensorReading> {
        self.readings.read().await.clone()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }

    pub async fn images(&self) -> Vec<Image> {
        self.images.read().await.clone()
    }
}

#[async_trait]
impl ReadingSink for MemoryStore {
    async fn create_reading(&self, reading: &SensorReading) -> Result<()> {
        self.readings.write().await.push(reading.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertSink for MemoryStore {
    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get_device(&self, id: Uuid) -> Result<Option<Device>> {
        Ok(self.device(id).await)
    }

    async fn save_device(&self, device: &Device) -> Result<()> {
        self.insert_device(device.clone()).await;
        Ok(())
    }
}

#[async_trait]
impl ImageSink for MemoryStore {
    async fn create_image(&self, image: &Image) -> Result<()> {
        self.images.write().await.push(image.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_device_save_overwrites() {
        let store = MemoryStore::new();
        let mut device = Device::new("helmet-7", "Shaft B");
        store.save_device(&device).await.unwrap();

        device.buzzer_active = true;
        store.save_device(&device).await.unwrap();

        let stored = store.get_device(device.id).await.unwrap().unwrap();
        assert!(stored.buzzer_active);
        assert!(store.get_device(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_readings_append_in_order() {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        for gas in [100, 200, 300] {
            let reading = SensorReading::new(device_id, "gas".to_string(), json!({ "gas": gas }));
            store.create_reading(&reading).await.unwrap();
        }

        let readings = store.readings().await;
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[2].payload["gas"], 300);
    }
}
