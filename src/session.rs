//! Peer-side event loop tying the relay link, the negotiator and the
//! transfer engine together.
//!
//! The loop multiplexes:
//! - messages from the relay
//! - events from the channel transport
//! - commands from the presentation layer
//! - send-task outcomes and transfer events
//! - the negotiation deadline

use std::path::PathBuf;
use tokio::{
    select,
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{NegotiationError, Result};
use crate::negotiation::{ChannelTransport, Negotiator, TransportEvent};
use crate::registry::{ConnectionId, PeerSummary};
use crate::relay::{ClientMessage, ServerMessage};
use crate::transfer::{FileId, SendOutcome, TransferEngine, TransferEvent};

/// How the relay knows this endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub connection_id: ConnectionId,
    pub short_id: String,
    pub display_name: String,
    pub avatar: String,
    pub device: String,
}

/// Requests from the presentation layer
#[derive(Debug, Clone)]
pub enum PeerCommand {
    Rename(String),
    /// Connect to the peer holding this short ID
    Connect(String),
    Disconnect,
    SharePath(PathBuf),
    ShareBytes {
        name: String,
        media_type: Option<String>,
        bytes: Vec<u8>,
    },
    Unshare(FileId),
    RequestFile(FileId),
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Registered(LocalIdentity),
    PeerList(Vec<PeerSummary>),
    Renamed(String),
    /// Another peer is about to send us an offer
    IncomingConnection { from_short_id: String },
    PeerNotFound { short_id: String },
    LinkOpened { remote_short_id: String },
    LinkClosed { reason: String },
    NegotiationFailed(NegotiationError),
    Transfer(TransferEvent),
    CommandFailed { command: &'static str, reason: String },
}

/// Handle used by the presentation layer
pub struct PeerHandle {
    pub commands: mpsc::UnboundedSender<PeerCommand>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

pub struct PeerSession<T: ChannelTransport> {
    config: Config,
    identity: Option<LocalIdentity>,
    peers: Vec<PeerSummary>,
    /// Short ID we asked for before it showed up in the peer list
    pending_connect: Option<String>,
    negotiator: Negotiator<T>,
    engine: TransferEngine,
    signaling: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedSender<PeerEvent>,
    commands: mpsc::UnboundedReceiver<PeerCommand>,
    transfer_events: mpsc::UnboundedReceiver<TransferEvent>,
    outcomes: mpsc::UnboundedReceiver<SendOutcome>,
}

impl<T: ChannelTransport> PeerSession<T> {
    pub fn new(
        config: Config,
        transport: T,
        signaling: mpsc::UnboundedSender<ClientMessage>,
    ) -> (Self, PeerHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (transfer_tx, transfer_events) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();

        let session = Self {
            negotiator: Negotiator::new(transport, signaling.clone()),
            engine: TransferEngine::new(config.transfer.clone(), transfer_tx, outcomes_tx),
            config,
            identity: None,
            peers: Vec::new(),
            pending_connect: None,
            signaling,
            events,
            commands,
            transfer_events,
            outcomes,
        };
        let handle = PeerHandle {
            commands: commands_tx,
            events: events_rx,
        };
        (session, handle)
    }

    /// Run until the relay link or the command channel closes
    pub async fn run(
        mut self,
        mut relay: mpsc::UnboundedReceiver<ServerMessage>,
        mut transport: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<()> {
        let timeout = self.config.negotiation.timeout();

        loop {
            let deadline = self.negotiator.deadline(timeout);

            select! {
                message = relay.recv() => match message {
                    Some(message) => self.handle_server_message(message).await,
                    None => {
                        info!("Relay link closed");
                        break;
                    }
                },
                event = transport.recv() => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => {
                        debug!("Transport event stream ended");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.transfer_events.recv() => {
                    self.emit(PeerEvent::Transfer(event));
                }
                Some(outcome) = self.outcomes.recv() => {
                    self.engine.complete_send(outcome);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let error = self.negotiator.fail("negotiation timed out".to_string()).await;
                    self.emit(PeerEvent::NegotiationFailed(error));
                }
            }
        }

        self.close_link("session ended").await;
        // Flush whatever the engine reported while closing
        while let Ok(event) = self.transfer_events.try_recv() {
            self.emit(PeerEvent::Transfer(event));
        }
        Ok(())
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::PeerRegistered {
                connection_id,
                short_id,
                avatar,
                display_name,
                device,
                ..
            } => {
                info!("Registered as {} ({})", short_id, display_name);
                self.negotiator.set_local_connection_id(connection_id);
                let identity = LocalIdentity {
                    connection_id,
                    short_id,
                    display_name,
                    avatar,
                    device,
                };
                self.identity = Some(identity.clone());
                self.emit(PeerEvent::Registered(identity));
            }
            ServerMessage::PeerList { peers } => {
                self.peers = peers.clone();
                self.emit(PeerEvent::PeerList(peers));
                self.resume_pending_connect().await;
            }
            ServerMessage::RenameAck { name } => {
                if let Some(identity) = self.identity.as_mut() {
                    identity.display_name = name.clone();
                }
                self.emit(PeerEvent::Renamed(name));
            }
            ServerMessage::ConnectIntent { from_short_id, .. } => {
                info!("{} is connecting", from_short_id);
                self.emit(PeerEvent::IncomingConnection { from_short_id });
            }
            ServerMessage::PeerNotFound { short_id } => {
                if self.pending_connect.as_deref() == Some(short_id.as_str()) {
                    self.pending_connect = None;
                }
                let ours = self
                    .negotiator
                    .session()
                    .is_some_and(|s| s.remote_short_id == short_id);
                if ours {
                    self.negotiator.close("peer not found").await;
                }
                self.emit(PeerEvent::PeerNotFound { short_id });
            }
            ServerMessage::Offer {
                from_connection_id,
                from_short_id,
                blob,
            } => {
                if let Err(e) = self
                    .negotiator
                    .on_offer(from_connection_id, &from_short_id, blob)
                    .await
                {
                    self.report_negotiation_error(e);
                }
            }
            ServerMessage::Answer {
                from_connection_id,
                blob,
                ..
            } => {
                if let Err(e) = self.negotiator.on_answer(from_connection_id, blob).await {
                    self.report_negotiation_error(e);
                }
            }
            ServerMessage::Candidate {
                from_connection_id,
                blob,
            } => {
                if let Err(e) = self
                    .negotiator
                    .on_remote_candidate(from_connection_id, blob)
                    .await
                {
                    self.report_negotiation_error(e);
                }
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(blob) => {
                if let Err(e) = self.negotiator.on_local_candidate(blob).await {
                    self.report_negotiation_error(e);
                }
            }
            TransportEvent::ChannelOpen(channel) => {
                let remote_short_id = match self.negotiator.on_channel_open() {
                    Ok(session) => session.remote_short_id.clone(),
                    Err(e) => {
                        warn!("Unexpected channel open: {}", e);
                        return;
                    }
                };
                info!("🔗 Link open with {}", remote_short_id);
                self.engine.attach(channel).await;
                self.emit(PeerEvent::LinkOpened { remote_short_id });
            }
            TransportEvent::Message(message) => {
                if self.engine.is_ready() {
                    self.engine.handle_message(message);
                } else {
                    debug!("Dropping channel message received while link is down");
                }
            }
            TransportEvent::Failed(reason) => {
                if self.negotiator.is_open() {
                    self.close_link(&reason).await;
                } else if self.negotiator.session().is_some() {
                    let error = self.negotiator.fail(reason).await;
                    self.emit(PeerEvent::NegotiationFailed(error));
                }
            }
            TransportEvent::Closed => self.close_link("channel closed").await,
        }
    }

    async fn handle_command(&mut self, command: PeerCommand) {
        match command {
            PeerCommand::Rename(name) => self.signal("rename", ClientMessage::RenameRequest { name }),
            PeerCommand::Connect(short_id) => self.connect(short_id).await,
            PeerCommand::Disconnect => self.close_link("closed locally").await,
            PeerCommand::SharePath(path) => {
                if let Err(e) = self.engine.share_path(&path).await {
                    self.command_failed("share", e.to_string());
                }
            }
            PeerCommand::ShareBytes {
                name,
                media_type,
                bytes,
            } => {
                self.engine
                    .share_bytes(&name, media_type.as_deref(), bytes)
                    .await;
            }
            PeerCommand::Unshare(file_id) => {
                if !self.engine.unshare(&file_id).await {
                    self.command_failed("unshare", format!("{} is not shared", file_id));
                }
            }
            PeerCommand::RequestFile(file_id) => {
                if let Err(e) = self.engine.request_file(&file_id).await {
                    self.command_failed("request", e.to_string());
                }
            }
        }
    }

    /// Announce the intent through the relay and, when the target is already
    /// in our peer list, start the offer right away
    async fn connect(&mut self, short_id: String) {
        if self.negotiator.session().is_some() {
            self.command_failed("connect", "a peer link is already active".to_string());
            return;
        }
        if self
            .identity
            .as_ref()
            .is_some_and(|identity| identity.short_id == short_id)
        {
            self.command_failed("connect", "cannot connect to yourself".to_string());
            return;
        }

        self.signal(
            "connect",
            ClientMessage::ConnectIntent {
                target_short_id: short_id.clone(),
            },
        );

        self.pending_connect = Some(short_id);
        self.resume_pending_connect().await;
    }

    /// Start the offer once the requested peer appears in the peer list
    async fn resume_pending_connect(&mut self) {
        let Some(short_id) = self.pending_connect.as_deref() else {
            return;
        };
        if self.negotiator.session().is_some() {
            return;
        }
        let Some(target) = self.peers.iter().find(|p| p.short_id == short_id) else {
            debug!("{} not in peer list yet, waiting for the relay", short_id);
            return;
        };
        let target = target.connection_id;
        let Some(short_id) = self.pending_connect.take() else {
            return;
        };

        if let Err(e) = self.negotiator.initiate(target, &short_id).await {
            self.report_negotiation_error(e);
        }
    }

    async fn close_link(&mut self, reason: &str) {
        self.pending_connect = None;
        let was_open = self.negotiator.is_open();
        self.engine.detach(reason);
        if self.negotiator.close(reason).await.is_some() && was_open {
            self.emit(PeerEvent::LinkClosed {
                reason: reason.to_string(),
            });
        }
    }

    fn report_negotiation_error(&self, error: NegotiationError) {
        match error {
            NegotiationError::NegotiationFailed { .. } => {
                self.emit(PeerEvent::NegotiationFailed(error));
            }
            other => debug!("Negotiation event ignored: {}", other),
        }
    }

    fn signal(&self, command: &'static str, message: ClientMessage) {
        if self.signaling.send(message).is_err() {
            self.command_failed(command, "relay link closed".to_string());
        }
    }

    fn command_failed(&self, command: &'static str, reason: String) {
        warn!("{} failed: {}", command, reason);
        self.emit(PeerEvent::CommandFailed { command, reason });
    }

    fn emit(&self, event: PeerEvent) {
        // The presentation layer may have gone away
        let _ = self.events.send(event);
    }
}
