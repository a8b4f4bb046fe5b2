//! Channel negotiation: drives offer/answer/candidate exchange over the relay
//! until the transport reports an open channel.
//!
//! ```text
//! initiator: Idle -> OfferSent -> AwaitingRemoteReady -> Open -> Closed
//! responder: Idle -> OfferReceived -> AnswerSent -> AwaitingRemoteReady -> Open -> Closed
//! ```
//!
//! Any state may go to `Closed`. There is no automatic retry; a failed
//! negotiation is torn down and reported to the caller.

use async_trait::async_trait;
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::error::NegotiationError;
use crate::registry::ConnectionId;
use crate::relay::{ClientMessage, OpaqueBlob};
use crate::transfer::channel::{ChannelMessage, DataChannel};

pub type NegotiationResult<T> = std::result::Result<T, NegotiationError>;

/// The point-to-point transport that actually builds the channel.
///
/// Implementations own the low-level path (address discovery, connectivity
/// checks). They report progress through [`TransportEvent`]s.
#[async_trait]
pub trait ChannelTransport: Send {
    /// Produce the local offer blob
    async fn create_offer(&mut self) -> NegotiationResult<OpaqueBlob>;

    /// Apply a remote offer and produce the answer blob
    async fn accept_offer(&mut self, offer: OpaqueBlob) -> NegotiationResult<OpaqueBlob>;

    async fn apply_answer(&mut self, answer: OpaqueBlob) -> NegotiationResult<()>;

    async fn add_remote_candidate(&mut self, candidate: OpaqueBlob) -> NegotiationResult<()>;

    /// Release the channel and the underlying path
    async fn close(&mut self);
}

/// Everything the transport reports back to the endpoint
pub enum TransportEvent {
    /// A connectivity candidate was gathered locally
    LocalCandidate(OpaqueBlob),
    /// A usable bidirectional path exists
    ChannelOpen(Arc<dyn DataChannel>),
    /// A message arrived on the open channel
    Message(ChannelMessage),
    Failed(String),
    Closed,
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::LocalCandidate(blob) => f.debug_tuple("LocalCandidate").field(blob).finish(),
            TransportEvent::ChannelOpen(_) => f.write_str("ChannelOpen"),
            TransportEvent::Message(msg) => f.debug_tuple("Message").field(msg).finish(),
            TransportEvent::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
            TransportEvent::Closed => f.write_str("Closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerSent,
    AwaitingRemoteReady,
    Open,
    Closed,
}

impl NegotiationState {
    /// Still exchanging offer/answer/candidates
    pub fn is_negotiating(&self) -> bool {
        !matches!(self, NegotiationState::Open | NegotiationState::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The single peer link this endpoint is building or holding
#[derive(Debug, Clone)]
pub struct NegotiationSession {
    pub local_connection_id: Option<ConnectionId>,
    pub remote_connection_id: ConnectionId,
    pub remote_short_id: String,
    pub role: Role,
    pub state: NegotiationState,
    pub started_at: Instant,
}

pub struct Negotiator<T: ChannelTransport> {
    transport: T,
    signaling: mpsc::UnboundedSender<ClientMessage>,
    local_connection_id: Option<ConnectionId>,
    session: Option<NegotiationSession>,
}

impl<T: ChannelTransport> Negotiator<T> {
    pub fn new(transport: T, signaling: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self {
            transport,
            signaling,
            local_connection_id: None,
            session: None,
        }
    }

    pub fn set_local_connection_id(&mut self, connection_id: ConnectionId) {
        self.local_connection_id = Some(connection_id);
    }

    pub fn session(&self) -> Option<&NegotiationSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> NegotiationState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(NegotiationState::Idle)
    }

    pub fn is_open(&self) -> bool {
        self.state() == NegotiationState::Open
    }

    /// When a negotiation still in flight should be abandoned
    pub fn deadline(&self, timeout: Duration) -> Option<Instant> {
        self.session
            .as_ref()
            .filter(|s| s.state.is_negotiating())
            .map(|s| s.started_at + timeout)
    }

    /// Initiator path: create an offer and hand it to the relay
    pub async fn initiate(
        &mut self,
        remote_connection_id: ConnectionId,
        remote_short_id: &str,
    ) -> NegotiationResult<()> {
        self.ensure_idle("initiate")?;
        self.session = Some(self.new_session(remote_connection_id, remote_short_id, Role::Initiator));

        let offer = match self.transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(format!("creating offer: {}", e)).await),
        };

        self.signal(ClientMessage::Offer {
            target_connection_id: remote_connection_id,
            blob: offer,
        })
        .await?;
        self.transition(NegotiationState::OfferSent);
        Ok(())
    }

    /// Responder path: answer an incoming offer
    pub async fn on_offer(
        &mut self,
        from_connection_id: ConnectionId,
        from_short_id: &str,
        offer: OpaqueBlob,
    ) -> NegotiationResult<()> {
        self.ensure_idle("accept an offer")?;
        self.session = Some(self.new_session(from_connection_id, from_short_id, Role::Responder));
        self.transition(NegotiationState::OfferReceived);

        let answer = match self.transport.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(format!("answering offer: {}", e)).await),
        };

        self.signal(ClientMessage::Answer {
            target_connection_id: from_connection_id,
            blob: answer,
        })
        .await?;
        self.transition(NegotiationState::AnswerSent);
        self.transition(NegotiationState::AwaitingRemoteReady);
        Ok(())
    }

    pub async fn on_answer(
        &mut self,
        from_connection_id: ConnectionId,
        answer: OpaqueBlob,
    ) -> NegotiationResult<()> {
        match &self.session {
            Some(s) if s.remote_connection_id == from_connection_id && s.state == NegotiationState::OfferSent => {}
            _ => return Err(self.invalid("apply an answer")),
        }

        if let Err(e) = self.transport.apply_answer(answer).await {
            return Err(self.fail(format!("applying answer: {}", e)).await);
        }
        self.transition(NegotiationState::AwaitingRemoteReady);
        Ok(())
    }

    /// Candidates are applied in whatever order they arrive, up until `Open`
    pub async fn on_remote_candidate(
        &mut self,
        from_connection_id: ConnectionId,
        candidate: OpaqueBlob,
    ) -> NegotiationResult<()> {
        match &self.session {
            Some(s) if s.remote_connection_id == from_connection_id && s.state.is_negotiating() => {}
            _ => {
                debug!("Ignoring candidate from {} in state {}", from_connection_id, self.state());
                return Ok(());
            }
        }

        // A bad candidate is not fatal; other candidates may still connect
        if let Err(e) = self.transport.add_remote_candidate(candidate).await {
            warn!("Failed to apply remote candidate: {}", e);
        }
        Ok(())
    }

    pub async fn on_local_candidate(&mut self, candidate: OpaqueBlob) -> NegotiationResult<()> {
        let target = match &self.session {
            Some(s) if s.state.is_negotiating() => s.remote_connection_id,
            _ => {
                debug!("Dropping local candidate in state {}", self.state());
                return Ok(());
            }
        };

        self.signal(ClientMessage::Candidate {
            target_connection_id: target,
            blob: candidate,
        })
        .await
    }

    /// The transport reports a usable path
    pub fn on_channel_open(&mut self) -> NegotiationResult<&NegotiationSession> {
        match self.state() {
            NegotiationState::AwaitingRemoteReady => {
                self.transition(NegotiationState::Open);
                self.session.as_ref().ok_or(NegotiationError::LinkNotReady)
            }
            _ => Err(self.invalid("open the channel")),
        }
    }

    /// Close the link and forget the session
    pub async fn close(&mut self, reason: &str) -> Option<NegotiationSession> {
        let mut session = self.session.take()?;
        info!(
            "Closing link with {} ({}): {}",
            session.remote_short_id, session.state, reason
        );
        session.state = NegotiationState::Closed;
        self.transport.close().await;
        Some(session)
    }

    /// Tear down a negotiation that cannot complete
    pub async fn fail(&mut self, reason: String) -> NegotiationError {
        warn!("Negotiation failed: {}", reason);
        self.close(&reason).await;
        NegotiationError::NegotiationFailed { reason }
    }

    fn new_session(&self, remote_connection_id: ConnectionId, remote_short_id: &str, role: Role) -> NegotiationSession {
        NegotiationSession {
            local_connection_id: self.local_connection_id,
            remote_connection_id,
            remote_short_id: remote_short_id.to_string(),
            role,
            state: NegotiationState::Idle,
            started_at: Instant::now(),
        }
    }

    fn ensure_idle(&self, operation: &str) -> NegotiationResult<()> {
        match self.session {
            None => Ok(()),
            Some(_) => Err(self.invalid(operation)),
        }
    }

    fn invalid(&self, operation: &str) -> NegotiationError {
        NegotiationError::InvalidState {
            state: self.state().to_string(),
            operation: operation.to_string(),
        }
    }

    fn transition(&mut self, next: NegotiationState) {
        if let Some(session) = self.session.as_mut() {
            debug!("Negotiation with {}: {} -> {}", session.remote_short_id, session.state, next);
            session.state = next;
        }
    }

    async fn signal(&mut self, message: ClientMessage) -> NegotiationResult<()> {
        if self.signaling.send(message).is_err() {
            return Err(self.fail("relay link closed".to_string()).await);
        }
        Ok(())
    }
}
