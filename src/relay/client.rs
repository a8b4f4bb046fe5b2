use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::{ClientMessage, ServerMessage};
use crate::error::{RelayError, Result};

/// Peer-side link to the relay server
pub struct RelayClient {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    incoming: mpsc::UnboundedReceiver<ServerMessage>,
}

impl RelayClient {
    /// Open the WebSocket link, e.g. `ws://127.0.0.1:3000`
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode relay message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => {
                            if incoming_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring unrecognized relay message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Relay link error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self { outgoing, incoming })
    }

    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.outgoing
            .send(message)
            .map_err(|_| RelayError::LinkClosed.into())
    }

    /// Next message from the relay; `None` once the link is gone
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.incoming.recv().await
    }

    /// Split into the raw queues, for wiring into a `PeerSession`
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<ClientMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        (self.outgoing, self.incoming)
    }
}
