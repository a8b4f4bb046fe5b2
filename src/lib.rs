//! P2P File Share Library
//!
//! A signaling relay that lets peers find each other by short ID, the
//! negotiation state machine that brings a direct channel up, and the
//! protocol that shares files over that channel.

pub mod cli;
pub mod config;
pub mod error;
pub mod metadata;
pub mod negotiation;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transfer;

pub use config::Config;
pub use error::{P2PError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        config::Config,
        error::{P2PError, Result},
        negotiation::{ChannelTransport, NegotiationState, Negotiator, TransportEvent},
        registry::{ConnectionId, PeerRegistry, PeerSummary},
        relay::{ClientMessage, RelayClient, RelayServer, ServerMessage, SignalingRelay},
        session::{PeerCommand, PeerEvent, PeerHandle, PeerSession},
        transfer::{
            ChannelMessage, DataChannel, FileCatalogEntry, FileId, ReceivedFile, TransferEngine,
            TransferEvent,
        },
    };

    pub use tokio;
    pub use tracing::{debug, error, info, warn};
}
