//! Signaling relay: resolves short IDs and forwards negotiation messages.
//!
//! The relay keeps no session state. Each live connection owns an outbox;
//! routing a message means looking up the target's outbox and pushing onto
//! it. A vanished target drops the message silently and the sending peer
//! finds out through its own negotiation timeout.

pub mod client;
pub mod messages;
pub mod server;

use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::metadata::PeerMetadata;
use crate::registry::{ConnectionId, PeerRecord, PeerRegistry};

pub use client::RelayClient;
pub use messages::{ClientMessage, OpaqueBlob, ServerMessage};
pub use server::RelayServer;

/// Outbound queue of one relay connection
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Routing hub shared by every connection task of the relay server
pub struct SignalingRelay {
    registry: PeerRegistry,
    outboxes: RwLock<HashMap<ConnectionId, Outbox>>,
}

impl SignalingRelay {
    pub fn new(registry: PeerRegistry) -> Self {
        Self {
            registry,
            outboxes: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Register a new connection and hand back the receiving end of its outbox
    pub async fn connect(
        &self,
        metadata: PeerMetadata,
    ) -> (PeerRecord, mpsc::UnboundedReceiver<ServerMessage>) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.write().await.insert(connection_id, tx);

        let record = self.registry.register(connection_id, metadata).await;
        self.send_to(connection_id, ServerMessage::registered(&record)).await;
        self.broadcast_peer_list().await;

        (record, rx)
    }

    /// Tear down a connection; its short ID becomes free again
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.outboxes.write().await.remove(&connection_id);
        if self.registry.unregister(connection_id).await.is_some() {
            self.broadcast_peer_list().await;
        }
    }

    /// Dispatch one decoded message from `from`
    pub async fn handle(&self, from: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::RenameRequest { name } => self.rename(from, &name).await,
            ClientMessage::ConnectIntent { target_short_id } => {
                self.relay_connect_intent(from, &target_short_id).await
            }
            ClientMessage::Offer {
                target_connection_id,
                blob,
            } => self.relay_offer(from, target_connection_id, blob).await,
            ClientMessage::Answer {
                target_connection_id,
                blob,
            } => self.relay_answer(from, target_connection_id, blob).await,
            ClientMessage::Candidate {
                target_connection_id,
                blob,
            } => self.relay_candidate(from, target_connection_id, blob).await,
        }
    }

    /// Empty names are ignored; accepted names are acknowledged and rebroadcast
    pub async fn rename(&self, from: ConnectionId, new_name: &str) {
        if let Some(name) = self.registry.rename(from, new_name).await {
            self.broadcast_peer_list().await;
            self.send_to(from, ServerMessage::RenameAck { name }).await;
        }
    }

    pub async fn relay_connect_intent(&self, from: ConnectionId, target_short_id: &str) {
        let Some(sender) = self.registry.get(from).await else {
            debug!("Connect intent from unregistered connection {}", from);
            return;
        };

        match self.registry.find_by_short_id(target_short_id).await {
            Some(target) => {
                info!("{} wants to connect to {}", sender.short_id, target_short_id);
                self.send_to(
                    target,
                    ServerMessage::ConnectIntent {
                        from_short_id: sender.short_id,
                        from_connection_id: from,
                    },
                )
                .await;
            }
            None => {
                info!("{} asked for unknown peer {}", sender.short_id, target_short_id);
                self.send_to(
                    from,
                    ServerMessage::PeerNotFound {
                        short_id: target_short_id.to_string(),
                    },
                )
                .await;
            }
        }
    }

    pub async fn relay_offer(&self, from: ConnectionId, target: ConnectionId, blob: OpaqueBlob) {
        let Some(from_short_id) = self.short_id_of(from).await else {
            return;
        };
        debug!("Relaying offer {} -> {}", from, target);
        self.send_to(
            target,
            ServerMessage::Offer {
                from_connection_id: from,
                from_short_id,
                blob,
            },
        )
        .await;
    }

    pub async fn relay_answer(&self, from: ConnectionId, target: ConnectionId, blob: OpaqueBlob) {
        let Some(from_short_id) = self.short_id_of(from).await else {
            return;
        };
        debug!("Relaying answer {} -> {}", from, target);
        self.send_to(
            target,
            ServerMessage::Answer {
                from_connection_id: from,
                from_short_id,
                blob,
            },
        )
        .await;
    }

    pub async fn relay_candidate(&self, from: ConnectionId, target: ConnectionId, blob: OpaqueBlob) {
        self.send_to(
            target,
            ServerMessage::Candidate {
                from_connection_id: from,
                blob,
            },
        )
        .await;
    }

    async fn short_id_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.registry
            .get(connection_id)
            .await
            .map(|record| record.short_id)
    }

    /// Push onto a connection's outbox; false when the target is gone
    async fn send_to(&self, target: ConnectionId, message: ServerMessage) -> bool {
        let outboxes = self.outboxes.read().await;
        match outboxes.get(&target) {
            Some(outbox) if outbox.send(message).is_ok() => true,
            _ => {
                debug!("Dropping message for vanished connection {}", target);
                false
            }
        }
    }

    async fn broadcast_peer_list(&self) {
        let peers = self.registry.peer_list().await;
        let outboxes = self.outboxes.read().await;
        for outbox in outboxes.values() {
            // Closed outboxes belong to connections mid-teardown
            let _ = outbox.send(ServerMessage::PeerList {
                peers: peers.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn metadata() -> PeerMetadata {
        PeerMetadata {
            ip: "127.0.0.1".to_string(),
            avatar: "🐼".to_string(),
            animal_name: "Panda".to_string(),
            device: "Mac".to_string(),
            device_icon: "💻".to_string(),
        }
    }

    fn relay_with_ids(ids: &[&str]) -> SignalingRelay {
        let queue = Mutex::new(ids.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        let registry = PeerRegistry::new(&RelayConfig::default())
            .with_generator(Arc::new(move |_| queue.lock().unwrap().remove(0)));
        SignalingRelay::new(registry)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_notifies_everyone() {
        let relay = relay_with_ids(&["AAAAAA", "BBBBBB"]);
        let (a, mut a_rx) = relay.connect(metadata()).await;

        let first = drain(&mut a_rx);
        assert!(matches!(&first[0], ServerMessage::PeerRegistered { short_id, .. } if short_id == "AAAAAA"));
        assert!(matches!(&first[1], ServerMessage::PeerList { peers } if peers.len() == 1));

        let (_b, _b_rx) = relay.connect(metadata()).await;
        let update = drain(&mut a_rx);
        assert_eq!(update.len(), 1);
        match &update[0] {
            ServerMessage::PeerList { peers } => {
                let ids: Vec<_> = peers.iter().map(|p| p.short_id.as_str()).collect();
                assert_eq!(ids, vec!["AAAAAA", "BBBBBB"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        relay.disconnect(a.connection_id).await;
        assert_eq!(relay.registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_full_list() {
        let relay = relay_with_ids(&["AAAAAA", "BBBBBB"]);
        let (a, _a_rx) = relay.connect(metadata()).await;
        let (_b, mut b_rx) = relay.connect(metadata()).await;
        drain(&mut b_rx);

        relay.disconnect(a.connection_id).await;
        let msgs = drain(&mut b_rx);
        assert!(matches!(&msgs[..], [ServerMessage::PeerList { peers }] if peers.len() == 1 && peers[0].short_id == "BBBBBB"));
    }

    #[tokio::test]
    async fn test_rename_acks_and_broadcasts() {
        let relay = relay_with_ids(&["AAAAAA", "BBBBBB"]);
        let (a, mut a_rx) = relay.connect(metadata()).await;
        let (_b, mut b_rx) = relay.connect(metadata()).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        relay
            .handle(a.connection_id, ClientMessage::RenameRequest { name: " Alice ".to_string() })
            .await;

        let to_a = drain(&mut a_rx);
        assert!(matches!(&to_a[0], ServerMessage::PeerList { .. }));
        assert_eq!(to_a[1], ServerMessage::RenameAck { name: "Alice".to_string() });

        let to_b = drain(&mut b_rx);
        assert!(matches!(&to_b[..], [ServerMessage::PeerList { peers }] if peers.iter().any(|p| p.display_name == "Alice")));
    }

    #[tokio::test]
    async fn test_blank_rename_is_silent() {
        let relay = relay_with_ids(&["AAAAAA"]);
        let (a, mut a_rx) = relay.connect(metadata()).await;
        drain(&mut a_rx);

        relay.rename(a.connection_id, "   ").await;
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(relay.registry().get(a.connection_id).await.unwrap().display_name, "Panda AAAAAA");
    }

    #[tokio::test]
    async fn test_connect_intent_routing() {
        let relay = relay_with_ids(&["AB12CD", "EF34GH"]);
        let (a, mut a_rx) = relay.connect(metadata()).await;
        let (b, mut b_rx) = relay.connect(metadata()).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        relay.relay_connect_intent(b.connection_id, "AB12CD").await;
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerMessage::ConnectIntent {
                from_short_id: "EF34GH".to_string(),
                from_connection_id: b.connection_id,
            }]
        );

        relay.relay_connect_intent(b.connection_id, "NOPE00").await;
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerMessage::PeerNotFound { short_id: "NOPE00".to_string() }]
        );
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_offer_answer_candidate_are_annotated() {
        let relay = relay_with_ids(&["AAAAAA", "BBBBBB"]);
        let (a, mut a_rx) = relay.connect(metadata()).await;
        let (b, mut b_rx) = relay.connect(metadata()).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        let offer = json!({"sdp": "offer"});
        relay.relay_offer(a.connection_id, b.connection_id, offer.clone()).await;
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerMessage::Offer {
                from_connection_id: a.connection_id,
                from_short_id: "AAAAAA".to_string(),
                blob: offer,
            }]
        );

        let answer = json!({"sdp": "answer"});
        relay.relay_answer(b.connection_id, a.connection_id, answer.clone()).await;
        let candidate = json!({"candidate": "c1"});
        relay.relay_candidate(b.connection_id, a.connection_id, candidate.clone()).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerMessage::Answer {
                    from_connection_id: b.connection_id,
                    from_short_id: "BBBBBB".to_string(),
                    blob: answer,
                },
                ServerMessage::Candidate {
                    from_connection_id: b.connection_id,
                    blob: candidate,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_vanished_target_is_dropped() {
        let relay = relay_with_ids(&["AAAAAA", "BBBBBB"]);
        let (a, mut a_rx) = relay.connect(metadata()).await;
        let (b, _b_rx) = relay.connect(metadata()).await;
        relay.disconnect(b.connection_id).await;
        drain(&mut a_rx);

        relay
            .relay_offer(a.connection_id, b.connection_id, json!({"sdp": "late"}))
            .await;
        relay
            .relay_candidate(a.connection_id, b.connection_id, json!({}))
            .await;

        // Nothing bounces back to the sender
        assert!(drain(&mut a_rx).is_empty());
    }
}
