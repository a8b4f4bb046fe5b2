//! Relay wire messages. One JSON text frame per message, tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{ConnectionId, PeerRecord, PeerSummary};

/// Negotiation payloads are forwarded verbatim; the relay never inspects them
pub type OpaqueBlob = Value;

/// Peer → relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    RenameRequest {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    ConnectIntent {
        target_short_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Offer {
        target_connection_id: ConnectionId,
        blob: OpaqueBlob,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        target_connection_id: ConnectionId,
        blob: OpaqueBlob,
    },
    #[serde(rename_all = "camelCase")]
    Candidate {
        target_connection_id: ConnectionId,
        blob: OpaqueBlob,
    },
}

/// Relay → peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    PeerRegistered {
        connection_id: ConnectionId,
        short_id: String,
        ip: String,
        avatar: String,
        animal_name: String,
        display_name: String,
        device: String,
        device_icon: String,
    },
    PeerList {
        peers: Vec<PeerSummary>,
    },
    RenameAck {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    ConnectIntent {
        from_short_id: String,
        from_connection_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    PeerNotFound {
        short_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Offer {
        from_connection_id: ConnectionId,
        from_short_id: String,
        blob: OpaqueBlob,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        from_connection_id: ConnectionId,
        from_short_id: String,
        blob: OpaqueBlob,
    },
    #[serde(rename_all = "camelCase")]
    Candidate {
        from_connection_id: ConnectionId,
        blob: OpaqueBlob,
    },
}

impl ServerMessage {
    pub fn registered(record: &PeerRecord) -> Self {
        let meta = &record.metadata;
        ServerMessage::PeerRegistered {
            connection_id: record.connection_id,
            short_id: record.short_id.clone(),
            ip: meta.ip.clone(),
            avatar: meta.avatar.clone(),
            animal_name: meta.animal_name.clone(),
            display_name: record.display_name.clone(),
            device: meta.device.clone(),
            device_icon: meta.device_icon.clone(),
        }
    }
}
