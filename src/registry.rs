//! Peer registry: live connections and their human-facing short IDs.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::metadata::PeerMetadata;

const SHORT_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Opaque identifier of one live relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produces candidate short IDs of the requested length
pub type ShortIdGenerator = Arc<dyn Fn(usize) -> String + Send + Sync>;

/// Random uppercase base-36 short ID
pub fn random_short_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SHORT_ID_ALPHABET[rng.gen_range(0..SHORT_ID_ALPHABET.len())] as char)
        .collect()
}

/// A registered peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub connection_id: ConnectionId,
    /// Immutable for the lifetime of the connection
    pub short_id: String,
    pub display_name: String,
    pub metadata: PeerMetadata,
}

/// One entry of the broadcast peer list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub connection_id: ConnectionId,
    pub short_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub metadata: PeerMetadata,
}

impl From<&PeerRecord> for PeerSummary {
    fn from(record: &PeerRecord) -> Self {
        Self {
            connection_id: record.connection_id,
            short_id: record.short_id.clone(),
            display_name: record.display_name.clone(),
            metadata: record.metadata.clone(),
        }
    }
}

/// Owns every live `PeerRecord`, keyed by connection
pub struct PeerRegistry {
    peers: RwLock<HashMap<ConnectionId, PeerRecord>>,
    max_name_len: usize,
    short_id_len: usize,
    generator: ShortIdGenerator,
}

impl PeerRegistry {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_name_len: config.max_name_len,
            short_id_len: config.short_id_len,
            generator: Arc::new(random_short_id),
        }
    }

    /// Replace the short ID source (deterministic IDs in tests)
    pub fn with_generator(mut self, generator: ShortIdGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Store a new peer under a short ID no live peer currently holds
    pub async fn register(&self, connection_id: ConnectionId, metadata: PeerMetadata) -> PeerRecord {
        let mut peers = self.peers.write().await;

        let short_id = loop {
            let candidate = (self.generator)(self.short_id_len);
            if peers.values().all(|peer| peer.short_id != candidate) {
                break candidate;
            }
            debug!("Short ID {} already live, regenerating", candidate);
        };

        let record = PeerRecord {
            connection_id,
            display_name: metadata.default_display_name(&short_id),
            short_id,
            metadata,
        };
        peers.insert(connection_id, record.clone());

        info!(
            "Registered peer {} ({}) on connection {}",
            record.short_id, record.display_name, connection_id
        );
        record
    }

    /// Rename a peer; returns the stored name, or `None` when nothing changed
    pub async fn rename(&self, connection_id: ConnectionId, new_name: &str) -> Option<String> {
        let trimmed = new_name.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut peers = self.peers.write().await;
        let peer = peers.get_mut(&connection_id)?;
        peer.display_name = trimmed.chars().take(self.max_name_len).collect();

        info!("{} renamed to {}", peer.short_id, peer.display_name);
        Some(peer.display_name.clone())
    }

    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<PeerRecord> {
        let removed = self.peers.write().await.remove(&connection_id);
        if let Some(record) = &removed {
            info!("Unregistered peer {} ({})", record.short_id, connection_id);
        }
        removed
    }

    pub async fn find_by_short_id(&self, short_id: &str) -> Option<ConnectionId> {
        self.peers
            .read()
            .await
            .values()
            .find(|peer| peer.short_id == short_id)
            .map(|peer| peer.connection_id)
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<PeerRecord> {
        self.peers.read().await.get(&connection_id).cloned()
    }

    /// Full snapshot of live peers, ordered by short ID
    pub async fn peer_list(&self) -> Vec<PeerSummary> {
        let mut list: Vec<PeerSummary> = self
            .peers
            .read()
            .await
            .values()
            .map(PeerSummary::from)
            .collect();
        list.sort_by(|a, b| a.short_id.cmp(&b.short_id));
        list
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn metadata() -> PeerMetadata {
        PeerMetadata {
            ip: "127.0.0.1".to_string(),
            avatar: "🦊".to_string(),
            animal_name: "Fox".to_string(),
            device: "Linux".to_string(),
            device_icon: "🐧".to_string(),
        }
    }

    /// Hands out the given IDs in order, then falls back to random ones
    fn scripted(ids: &[&str]) -> ShortIdGenerator {
        let queue = Mutex::new(ids.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        Arc::new(move |len| {
            let mut queue = queue.lock().unwrap();
            if queue.is_empty() {
                random_short_id(len)
            } else {
                queue.remove(0)
            }
        })
    }

    #[test]
    fn test_random_short_id_format() {
        let id = random_short_id(6);
        assert_eq!(id.len(), 6);
        assert!(id.bytes().all(|b| SHORT_ID_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn test_register_assigns_default_name() {
        let registry = PeerRegistry::new(&RelayConfig::default()).with_generator(scripted(&["AB12CD"]));
        let id = ConnectionId::new();

        let record = registry.register(id, metadata()).await;
        assert_eq!(record.short_id, "AB12CD");
        assert_eq!(record.display_name, "Fox AB12CD");
        assert_eq!(registry.find_by_short_id("AB12CD").await, Some(id));
        assert_eq!(registry.find_by_short_id("ZZZZZZ").await, None);
    }

    #[tokio::test]
    async fn test_register_regenerates_on_collision() {
        let registry = PeerRegistry::new(&RelayConfig::default())
            .with_generator(scripted(&["AAAAAA", "AAAAAA", "AAAAAA", "BBBBBB"]));

        let first = registry.register(ConnectionId::new(), metadata()).await;
        let second = registry.register(ConnectionId::new(), metadata()).await;

        assert_eq!(first.short_id, "AAAAAA");
        assert_eq!(second.short_id, "BBBBBB");
    }

    #[tokio::test]
    async fn test_short_id_reusable_after_unregister() {
        let registry = PeerRegistry::new(&RelayConfig::default())
            .with_generator(scripted(&["AAAAAA", "AAAAAA"]));

        let first = ConnectionId::new();
        registry.register(first, metadata()).await;
        registry.unregister(first).await;

        let second = registry.register(ConnectionId::new(), metadata()).await;
        assert_eq!(second.short_id, "AAAAAA");
    }

    #[tokio::test]
    async fn test_live_short_ids_stay_unique() {
        // Two-character IDs make collisions frequent
        let mut config = RelayConfig::default();
        config.short_id_len = 2;
        let registry = PeerRegistry::new(&config);

        let mut live = Vec::new();
        for round in 0..200 {
            if round % 3 == 2 && !live.is_empty() {
                let id = live.remove(round % live.len());
                registry.unregister(id).await;
            } else {
                let id = ConnectionId::new();
                registry.register(id, metadata()).await;
                live.push(id);
            }

            let list = registry.peer_list().await;
            let unique: HashSet<_> = list.iter().map(|p| p.short_id.clone()).collect();
            assert_eq!(unique.len(), list.len());
            assert_eq!(list.len(), live.len());
        }
    }

    #[tokio::test]
    async fn test_rename_rules() {
        let registry = PeerRegistry::new(&RelayConfig::default()).with_generator(scripted(&["AB12CD"]));
        let id = ConnectionId::new();
        registry.register(id, metadata()).await;

        assert_eq!(registry.rename(id, "   ").await, None);
        assert_eq!(registry.rename(id, "").await, None);
        assert_eq!(registry.get(id).await.unwrap().display_name, "Fox AB12CD");

        assert_eq!(registry.rename(id, "  Alice  ").await.as_deref(), Some("Alice"));

        let long = "x".repeat(45);
        let stored = registry.rename(id, &long).await.unwrap();
        assert_eq!(stored.chars().count(), 30);
        assert_eq!(registry.get(id).await.unwrap().display_name, stored);
    }

    #[tokio::test]
    async fn test_rename_unknown_connection() {
        let registry = PeerRegistry::new(&RelayConfig::default());
        assert_eq!(registry.rename(ConnectionId::new(), "Bob").await, None);
    }

    #[test]
    fn test_peer_summary_wire_shape() {
        let record = PeerRecord {
            connection_id: ConnectionId::new(),
            short_id: "AB12CD".to_string(),
            display_name: "Fox AB12CD".to_string(),
            metadata: metadata(),
        };
        let json = serde_json::to_value(PeerSummary::from(&record)).unwrap();
        assert_eq!(json["shortId"], "AB12CD");
        assert_eq!(json["displayName"], "Fox AB12CD");
        assert_eq!(json["deviceIcon"], "🐧");
        assert!(json["connectionId"].is_string());
    }
}
