//! In-memory fan-out of [`BroadcastEvent`]s to live observer connections.
//!
//! [`HubHandle`] is the cloneable producer side. Every operation on it is
//! queued to the single [`Hub`] task, which owns the live connection set
//! exclusively; nothing else ever touches the set, so it needs no lock.
//! Delivery is best-effort: a connection whose write fails is closed and
//! evicted, and whatever it missed is lost.

use crate::metrics::{BROADCASTS_TOTAL, CONNECTION_EVICTIONS_TOTAL, HUB_CONNECTIONS};
use crate::model::BroadcastEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub type ConnectionId = u64;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("write failed: {0}")]
    Write(String),

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    /// Peer went away; not worth an error-level log.
    pub fn is_expected_disconnect(&self) -> bool {
        match self {
            ConnectionError::Closed => true,
            ConnectionError::Write(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("broken pipe") || msg.contains("connection reset")
            }
            ConnectionError::Timeout(_) => false,
        }
    }
}

/// One observer's push channel, as seen by the hub.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), ConnectionError>;

    /// Called at most once, when the connection leaves the live set.
    async fn close(&mut self);
}

enum Command {
    Register(ConnectionId, Box<dyn Connection>),
    Unregister(ConnectionId),
    Broadcast(BroadcastEvent),
    Count(oneshot::Sender<usize>),
}

#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Adds a connection to the live set and returns the id to unregister it with.
    pub fn register(&self, conn: Box<dyn Connection>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Register(id, conn));
        id
    }

    /// Idempotent; unknown or already evicted ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        self.send(Command::Unregister(id));
    }

    /// Queues an event for every connection live when the hub gets to it.
    pub fn broadcast(&self, event: BroadcastEvent) {
        self.send(Command::Broadcast(event));
    }

    /// Number of live connections after every previously queued operation has run.
    /// Zero once the hub has stopped.
    pub async fn connection_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Count(tx));
        rx.await.unwrap_or(0)
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("Broadcast hub is not running, dropping operation");
        }
    }
}

pub struct Hub {
    rx: mpsc::UnboundedReceiver<Command>,
    connections: HashMap<ConnectionId, Box<dyn Connection>>,
    write_timeout: Duration,
}

/// Creates a hub and its producer handle. The hub does nothing until [`Hub::run`] is spawned.
pub fn channel(write_timeout: Duration) -> (HubHandle, Hub) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = HubHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
    };
    let hub = Hub {
        rx,
        connections: HashMap::new(),
        write_timeout,
    };
    (handle, hub)
}

impl Hub {
    /// Processes queued operations until every handle is dropped, then closes what is left.
    pub async fn run(mut self) {
        info!(
            "Starting broadcast hub with write_timeout={:?}",
            self.write_timeout
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Register(id, conn) => {
                    self.connections.insert(id, conn);
                    HUB_CONNECTIONS.set(self.connections.len() as f64);
                    info!(
                        "Observer {} connected ({} live)",
                        id,
                        self.connections.len()
                    );
                }
                Command::Unregister(id) => self.remove(id).await,
                Command::Broadcast(event) => self.fan_out(&event).await,
                Command::Count(reply) => {
                    let _ = reply.send(self.connections.len());
                }
            }
        }

        info!(
            "All hub handles dropped, closing {} connection(s)",
            self.connections.len()
        );
        for (_, mut conn) in self.connections.drain() {
            conn.close().await;
        }
        HUB_CONNECTIONS.set(0.0);
        info!("Broadcast hub stopped");
    }

    async fn remove(&mut self, id: ConnectionId) {
        // Membership check first so an evicted connection is never closed twice.
        match self.connections.remove(&id) {
            Some(mut conn) => {
                conn.close().await;
                HUB_CONNECTIONS.set(self.connections.len() as f64);
                info!(
                    "Observer {} disconnected ({} live)",
                    id,
                    self.connections.len()
                );
            }
            None => debug!("Observer {} already removed", id),
        }
    }

    async fn fan_out(&mut self, event: &BroadcastEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.kind(), e);
                return;
            }
        };

        BROADCASTS_TOTAL.inc();
        debug!(
            "Broadcasting {} to {} observer(s)",
            event.kind(),
            self.connections.len()
        );

        let mut dead = Vec::new();
        for (id, conn) in self.connections.iter_mut() {
            let result = match tokio::time::timeout(self.write_timeout, conn.send_text(&text)).await
            {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(self.write_timeout)),
            };

            if let Err(e) = result {
                if e.is_expected_disconnect() {
                    debug!("Observer {} went away: {}", id, e);
                } else {
                    error!("Observer {} write error: {}", id, e);
                }
                conn.close().await;
                dead.push(*id);
            }
        }

        for id in dead {
            self.connections.remove(&id);
            CONNECTION_EVICTIONS_TOTAL.inc();
        }
        HUB_CONNECTIONS.set(self.connections.len() as f64);
    }
}
