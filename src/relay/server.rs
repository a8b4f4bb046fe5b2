use futures::{SinkExt, StreamExt};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        Message,
    },
};
use tracing::{debug, error, info, warn};

use super::{ClientMessage, SignalingRelay};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::metadata::PeerMetadata;
use crate::registry::PeerRegistry;

/// Request headers the relay reads during the WebSocket upgrade
#[derive(Debug, Default, Clone)]
struct HandshakeHeaders {
    user_agent: Option<String>,
    forwarded_for: Option<String>,
    real_ip: Option<String>,
}

impl HandshakeHeaders {
    fn from_request(request: &Request) -> Self {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };

        Self {
            user_agent: header("user-agent"),
            forwarded_for: header("x-forwarded-for"),
            real_ip: header("x-real-ip"),
        }
    }
}

/// WebSocket front end of the signaling relay
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<SignalingRelay>,
}

impl RelayServer {
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let relay = Arc::new(SignalingRelay::new(PeerRegistry::new(config)));
        Ok(Self { listener, relay })
    }

    /// Serve an existing relay (tests inject deterministic registries this way)
    pub async fn bind_with(listen_addr: SocketAddr, relay: Arc<SignalingRelay>) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        Ok(Self { listener, relay })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn relay(&self) -> Arc<SignalingRelay> {
        self.relay.clone()
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("📡 Relay listening on ws://{}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Relay shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let relay = self.relay.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(relay, stream, remote_addr).await {
                                warn!("Connection from {} ended with error: {}", remote_addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection(
    relay: Arc<SignalingRelay>,
    stream: TcpStream,
    remote_addr: SocketAddr,
) -> Result<()> {
    let mut headers = HandshakeHeaders::default();
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        headers = HandshakeHeaders::from_request(request);
        Ok::<Response, ErrorResponse>(response)
    })
    .await?;

    let metadata = PeerMetadata::from_handshake(
        remote_addr,
        headers.forwarded_for.as_deref(),
        headers.real_ip.as_deref(),
        headers.user_agent.as_deref(),
    );
    let (record, mut outbox) = relay.connect(metadata).await;
    let connection_id = record.connection_id;
    let (mut sink, mut incoming) = ws.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode relay message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = incoming.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => relay.handle(connection_id, message).await,
                Err(e) => warn!("Ignoring unrecognized message from {}: {}", record.short_id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error on {}: {}", record.short_id, e);
                break;
            }
        }
    }

    relay.disconnect(connection_id).await;
    writer.abort();
    Ok(())
}
