//! Buzzer on/off cycle with a self-expiring auto-off timer.
//!
//! Each device has at most one pending auto-off. Re-activating a device aborts
//! the pending timer and starts a fresh window, so the buzzer stays on until
//! the latest activation's deadline. Transitions for one device are serialized
//! through that device's own lock, so an expiring timer never interleaves with
//! a re-activation. Store I/O never happens under the shared timer map lock,
//! so a stalled device does not hold up the others.
//!
//! Activation runs in its own task. Dropping the caller's future (a client
//! hanging up mid-request) cannot leave a persisted "on" without its auto-off.

use crate::errors::{Error, Result};
use crate::hub::HubHandle;
use crate::metrics::BUZZER_ACTIVATIONS_TOTAL;
use crate::model::{BroadcastEvent, DeviceCommand};
use crate::store::DeviceStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_BUZZER_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationResponse {
    pub message: String,
    pub buzzer_active: bool,
}

struct PendingOff {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: HashMap<Uuid, PendingOff>,
    device_locks: HashMap<Uuid, Arc<Mutex<()>>>,
}

#[derive(Clone)]
pub struct BuzzerController {
    inner: Arc<Inner>,
}

struct Inner {
    devices: Arc<dyn DeviceStore>,
    hub: HubHandle,
    window: Duration,
    timers: Mutex<Timers>,
}

impl BuzzerController {
    pub fn new(devices: Arc<dyn DeviceStore>, hub: HubHandle, window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                devices,
                hub,
                window,
                timers: Mutex::new(Timers::default()),
            }),
        }
    }

    /// Turns the buzzer on and (re)arms its auto-off. Returns once the "on"
    /// state is persisted and broadcast; the auto-off outcome is not reported.
    pub async fn activate(&self, device_id: Uuid) -> Result<ActivationResponse> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.activate(device_id).await })
            .await
            .map_err(|e| Error::Backend(format!("buzzer activation task failed: {}", e)))?
    }

    /// Devices with an auto-off still pending.
    pub async fn pending_count(&self) -> usize {
        self.inner.timers.lock().await.pending.len()
    }
}

impl Inner {
    async fn device_lock(&self, device_id: Uuid) -> Arc<Mutex<()>> {
        self.timers
            .lock()
            .await
            .device_locks
            .entry(device_id)
            .or_default()
            .clone()
    }

    async fn activate(self: Arc<Self>, device_id: Uuid) -> Result<ActivationResponse> {
        let lock = self.device_lock(device_id).await;
        let _guard = lock.lock().await;

        let mut device = self
            .devices
            .get_device(device_id)
            .await?
            .ok_or(Error::DeviceNotFound(device_id))?;

        device.buzzer_active = true;
        device.updated_at = Utc::now();
        self.devices.save_device(&device).await?;

        self.arm(device_id).await;
        self.broadcast(device_id, DeviceCommand::BuzzerOn, true);
        BUZZER_ACTIVATIONS_TOTAL.inc();

        info!(
            "Buzzer on for device {} (auto-off in {:?})",
            device_id, self.window
        );

        Ok(ActivationResponse {
            message: "Buzzer triggered successfully".to_string(),
            buzzer_active: true,
        })
    }

    /// Replaces the device's pending auto-off with a fresh one. Caller holds
    /// the device lock.
    async fn arm(self: &Arc<Self>, device_id: Uuid) {
        let mut timers = self.timers.lock().await;
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let inner = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(inner.window).await;
            inner.expire(device_id, generation).await;
        });

        if let Some(previous) = timers.pending.insert(device_id, PendingOff { generation, task }) {
            previous.task.abort();
            debug!(
                "Buzzer on {} re-armed, replaced pending auto-off #{}",
                device_id, previous.generation
            );
        }
    }

    async fn expire(&self, device_id: Uuid, generation: u64) {
        let lock = self.device_lock(device_id).await;
        let _guard = lock.lock().await;

        {
            let mut timers = self.timers.lock().await;
            let current = timers.pending.get(&device_id).map(|p| p.generation);
            if current != Some(generation) {
                // Superseded by a later activation.
                return;
            }
            timers.pending.remove(&device_id);
        }

        // Re-read so the latest persisted state is what gets flipped.
        let mut device = match self.devices.get_device(device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!("Device {} vanished before buzzer auto-off", device_id);
                return;
            }
            Err(e) => {
                error!("Buzzer auto-off for {} failed to load device: {}", device_id, e);
                return;
            }
        };

        device.buzzer_active = false;
        device.updated_at = Utc::now();
        if let Err(e) = self.devices.save_device(&device).await {
            error!("Buzzer auto-off for {} failed to save device: {}", device_id, e);
            return;
        }

        self.broadcast(device_id, DeviceCommand::BuzzerOff, false);
        info!("Buzzer off for device {}", device_id);
    }

    fn broadcast(&self, device_id: Uuid, command: DeviceCommand, is_active: bool) {
        self.hub.broadcast(BroadcastEvent::DeviceCommand {
            device_id,
            command,
            is_active,
            timestamp: Utc::now(),
        });
    }
}
