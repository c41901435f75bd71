use crate::hub::{Connection, ConnectionError, HubHandle};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::{debug, trace};

/// Server-to-observer half of an upgraded WebSocket.
pub struct WsConnection {
    sink: SplitSink<WebSocket, Message>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| classify_send_error(&e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("Error closing websocket: {}", e);
        }
    }
}

/// axum only exposes the tungstenite error as text. "Already closed" and
/// "connection closed" both mean the peer is gone.
fn classify_send_error(message: &str) -> ConnectionError {
    if message.to_ascii_lowercase().contains("closed") {
        ConnectionError::Closed
    } else {
        ConnectionError::Write(message.to_string())
    }
}

/// Registers an upgraded socket with the hub and holds it until the peer leaves.
///
/// The channel is push-only: anything the observer sends is read and dropped,
/// which also keeps ping/pong and close frames flowing.
pub async fn serve_observer(socket: WebSocket, hub: HubHandle) {
    let (sink, mut stream) = socket.split();
    let id = hub.register(Box::new(WsConnection::new(sink)));

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(other) => trace!("Ignoring inbound frame from observer {}: {:?}", id, other),
            Err(e) => {
                debug!("Observer {} read error: {}", id, e);
                break;
            }
        }
    }

    // No-op if the hub already evicted it after a failed write.
    hub.unregister(id);
}
