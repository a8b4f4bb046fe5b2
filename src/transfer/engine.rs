use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{sync::mpsc, task::AbortHandle};
use tracing::{debug, info, trace, warn};

use super::catalog::{FileCatalog, FileCatalogEntry, FileId};
use super::channel::{ChannelMessage, DataChannel};
use super::protocol::{decode_frame, ControlMessage};
use super::sender::{SendJob, SendOutcome};
use crate::config::TransferConfig;
use crate::error::TransferError;

/// Upper bound on buffer space reserved from a peer-supplied size
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRole {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Requested, waiting for `transfer-begin`
    Requested,
    Active,
    Completed,
    Aborted,
}

/// Progress of one file in one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    pub file_id: FileId,
    pub role: TransferRole,
    pub name: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub state: TransferState,
}

impl TransferSession {
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64
    }
}

/// A fully received file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_id: FileId,
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// The remote peer replaced its catalog
    CatalogUpdated(Vec<FileCatalogEntry>),
    Started(TransferSession),
    Progress {
        file_id: FileId,
        role: TransferRole,
        transferred_bytes: u64,
        total_bytes: u64,
    },
    /// `file` is set on the receiving side
    Completed {
        file_id: FileId,
        role: TransferRole,
        file: Option<ReceivedFile>,
    },
    Aborted {
        file_id: FileId,
        role: TransferRole,
        error: TransferError,
    },
}

struct Incoming {
    session: TransferSession,
    media_type: String,
    buffer: Vec<u8>,
}

struct Outgoing {
    session: TransferSession,
    sent: Arc<AtomicU64>,
    task: AbortHandle,
}

impl Outgoing {
    fn snapshot(&self) -> TransferSession {
        TransferSession {
            transferred_bytes: self.sent.load(Ordering::Acquire),
            ..self.session.clone()
        }
    }
}

/// Runs the file-sharing protocol over one open channel.
///
/// Owned by a single task; send procedures run as spawned tasks and report
/// back through the outcome queue, which the owner feeds into
/// [`TransferEngine::complete_send`].
pub struct TransferEngine {
    config: TransferConfig,
    channel: Option<Arc<dyn DataChannel>>,
    catalog: FileCatalog,
    remote_catalog: Vec<FileCatalogEntry>,
    incoming: HashMap<FileId, Incoming>,
    outgoing: HashMap<FileId, Outgoing>,
    events: mpsc::UnboundedSender<TransferEvent>,
    outcomes: mpsc::UnboundedSender<SendOutcome>,
}

impl TransferEngine {
    pub fn new(
        config: TransferConfig,
        events: mpsc::UnboundedSender<TransferEvent>,
        outcomes: mpsc::UnboundedSender<SendOutcome>,
    ) -> Self {
        Self {
            config,
            channel: None,
            catalog: FileCatalog::new(),
            remote_catalog: Vec::new(),
            incoming: HashMap::new(),
            outgoing: HashMap::new(),
            events,
            outcomes,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.open_channel().is_some()
    }

    pub fn catalog(&self) -> &FileCatalog {
        &self.catalog
    }

    pub fn remote_catalog(&self) -> &[FileCatalogEntry] {
        &self.remote_catalog
    }

    /// Snapshot of every transfer in flight
    pub fn sessions(&self) -> Vec<TransferSession> {
        self.incoming
            .values()
            .map(|i| i.session.clone())
            .chain(self.outgoing.values().map(Outgoing::snapshot))
            .collect()
    }

    /// The channel just opened: start using it and announce our catalog
    pub async fn attach(&mut self, channel: Arc<dyn DataChannel>) {
        self.channel = Some(channel);
        if let Err(e) = self.announce_catalog().await {
            warn!("Initial catalog announcement failed: {}", e);
        }
    }

    /// The channel closed: abort everything in flight and forget the remote catalog
    pub fn detach(&mut self, reason: &str) {
        self.channel = None;

        for (file_id, outgoing) in self.outgoing.drain() {
            outgoing.task.abort();
            warn!("Aborted sending {}: {}", file_id, reason);
            let _ = self.events.send(TransferEvent::Aborted {
                error: TransferError::TransferAborted {
                    file_id: file_id.to_string(),
                    reason: reason.to_string(),
                },
                file_id,
                role: TransferRole::Sender,
            });
        }

        for (file_id, incoming) in self.incoming.drain() {
            warn!(
                "Aborted receiving {} after {} bytes: {}",
                file_id, incoming.session.transferred_bytes, reason
            );
            let _ = self.events.send(TransferEvent::Aborted {
                error: TransferError::TransferAborted {
                    file_id: file_id.to_string(),
                    reason: reason.to_string(),
                },
                file_id,
                role: TransferRole::Receiver,
            });
        }

        if !self.remote_catalog.is_empty() {
            self.remote_catalog.clear();
            let _ = self.events.send(TransferEvent::CatalogUpdated(Vec::new()));
        }
    }

    pub async fn share_bytes(
        &mut self,
        name: &str,
        media_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> FileId {
        let file_id = self.catalog.add_bytes(name, media_type, bytes);
        self.announce_if_ready().await;
        file_id
    }

    pub async fn share_path(&mut self, path: &Path) -> Result<FileId, TransferError> {
        let file_id = self
            .catalog
            .add_path(path)
            .await
            .map_err(|e| TransferError::SendFailed {
                file_id: path.display().to_string(),
                reason: e.to_string(),
            })?;
        self.announce_if_ready().await;
        Ok(file_id)
    }

    /// Stop offering a file; transfers already running are not affected
    pub async fn unshare(&mut self, file_id: &FileId) -> bool {
        let removed = self.catalog.remove(file_id).is_some();
        if removed {
            self.announce_if_ready().await;
        }
        removed
    }

    /// Send the full local catalog
    pub async fn announce_catalog(&self) -> Result<(), TransferError> {
        let entries = self.catalog.entries();
        debug!("Announcing {} shared files", entries.len());
        self.send_control(ControlMessage::CatalogAnnounce { entries })
            .await
    }

    /// Ask the remote peer for one of its files
    pub async fn request_file(&mut self, file_id: &FileId) -> Result<(), TransferError> {
        if !self.is_ready() {
            return Err(TransferError::LinkNotReady);
        }
        if self.incoming.contains_key(file_id) {
            debug!("Already receiving {}, ignoring repeated request", file_id);
            return Ok(());
        }

        let (name, total_bytes) = self
            .remote_catalog
            .iter()
            .find(|e| &e.file_id == file_id)
            .map(|e| (e.name.clone(), e.byte_size))
            .unwrap_or_else(|| (file_id.to_string(), 0));

        self.send_control(ControlMessage::TransferRequest {
            file_id: file_id.clone(),
        })
        .await?;

        info!("Requested {} ({})", name, file_id);
        self.incoming.insert(
            file_id.clone(),
            Incoming {
                session: TransferSession {
                    file_id: file_id.clone(),
                    role: TransferRole::Receiver,
                    name,
                    total_bytes,
                    transferred_bytes: 0,
                    state: TransferState::Requested,
                },
                media_type: String::new(),
                buffer: Vec::new(),
            },
        );
        Ok(())
    }

    /// Dispatch one message received on the channel
    pub fn handle_message(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::Text(text) => match ControlMessage::decode(&text) {
                Ok(control) => self.handle_control(control),
                Err(e) => warn!("Ignoring control message: {}", e),
            },
            ChannelMessage::Binary(frame) => self.handle_frame(&frame),
        }
    }

    /// Record the end of a send task
    pub fn complete_send(&mut self, outcome: SendOutcome) {
        let Some(mut outgoing) = self.outgoing.remove(&outcome.file_id) else {
            trace!("Late outcome for {}", outcome.file_id);
            return;
        };

        let event = match outcome.result {
            Ok(bytes) => {
                outgoing.session.transferred_bytes = bytes;
                outgoing.session.state = TransferState::Completed;
                TransferEvent::Completed {
                    file_id: outcome.file_id,
                    role: TransferRole::Sender,
                    file: None,
                }
            }
            Err(error) => {
                outgoing.session.state = TransferState::Aborted;
                TransferEvent::Aborted {
                    file_id: outcome.file_id,
                    role: TransferRole::Sender,
                    error,
                }
            }
        };
        let _ = self.events.send(event);
    }

    fn handle_control(&mut self, control: ControlMessage) {
        match control {
            ControlMessage::CatalogAnnounce { entries } => {
                info!("Remote peer shares {} files", entries.len());
                self.remote_catalog = entries.clone();
                let _ = self.events.send(TransferEvent::CatalogUpdated(entries));
            }
            ControlMessage::TransferRequest { file_id } => self.start_send(file_id),
            ControlMessage::TransferBegin {
                file_id,
                name,
                byte_size,
                media_type,
            } => self.begin_receive(file_id, name, byte_size, media_type),
            ControlMessage::TransferEnd { file_id } => self.finish_receive(file_id),
        }
    }

    fn start_send(&mut self, file_id: FileId) {
        let Some(channel) = self.open_channel() else {
            debug!("Request for {} without an open channel", file_id);
            return;
        };
        let Some(shared) = self.catalog.get(&file_id) else {
            debug!("Request for unknown file {}", file_id);
            return;
        };
        if self.outgoing.contains_key(&file_id) {
            debug!("Already sending {}", file_id);
            return;
        }

        let session = TransferSession {
            file_id: file_id.clone(),
            role: TransferRole::Sender,
            name: shared.entry.name.clone(),
            total_bytes: shared.entry.byte_size,
            transferred_bytes: 0,
            state: TransferState::Active,
        };
        let sent = Arc::new(AtomicU64::new(0));
        let job = SendJob {
            entry: shared.entry.clone(),
            source: shared.source.clone(),
            channel,
            config: self.config.clone(),
            progress: sent.clone(),
            events: self.events.clone(),
            outcomes: self.outcomes.clone(),
        };

        let _ = self.events.send(TransferEvent::Started(session.clone()));
        let task = tokio::spawn(job.run()).abort_handle();
        self.outgoing.insert(file_id, Outgoing { session, sent, task });
    }

    fn begin_receive(&mut self, file_id: FileId, name: String, byte_size: u64, media_type: String) {
        if self
            .incoming
            .get(&file_id)
            .is_some_and(|i| i.session.state == TransferState::Active)
        {
            warn!("Duplicate transfer-begin for {}, keeping the running receive", file_id);
            return;
        }
        info!("Receiving {} ({} bytes)", name, byte_size);
        let capacity = usize::try_from(byte_size)
            .unwrap_or(MAX_PREALLOCATION)
            .min(MAX_PREALLOCATION);

        let session = TransferSession {
            file_id: file_id.clone(),
            role: TransferRole::Receiver,
            name,
            total_bytes: byte_size,
            transferred_bytes: 0,
            state: TransferState::Active,
        };
        let _ = self.events.send(TransferEvent::Started(session.clone()));
        self.incoming.insert(
            file_id,
            Incoming {
                session,
                media_type,
                buffer: Vec::with_capacity(capacity),
            },
        );
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let decoded = match decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return;
            }
        };

        let incoming = match self.incoming.get_mut(decoded.file_id) {
            Some(incoming) if incoming.session.state == TransferState::Active => incoming,
            _ => {
                trace!("Dropping chunk for inactive file {}", decoded.file_id);
                return;
            }
        };

        incoming.buffer.extend_from_slice(decoded.chunk);
        incoming.session.transferred_bytes += decoded.chunk.len() as u64;
        trace!(
            "{}: {}/{} bytes",
            decoded.file_id,
            incoming.session.transferred_bytes,
            incoming.session.total_bytes
        );
        let _ = self.events.send(TransferEvent::Progress {
            file_id: incoming.session.file_id.clone(),
            role: TransferRole::Receiver,
            transferred_bytes: incoming.session.transferred_bytes,
            total_bytes: incoming.session.total_bytes,
        });
    }

    fn finish_receive(&mut self, file_id: FileId) {
        match self.incoming.get(&file_id) {
            None => {
                debug!("transfer-end for unknown file {}", file_id);
                return;
            }
            Some(incoming) if incoming.session.state != TransferState::Active => {
                warn!("transfer-end for {} before transfer-begin", file_id);
                return;
            }
            Some(_) => {}
        }
        let Some(mut incoming) = self.incoming.remove(&file_id) else {
            return;
        };

        let received = incoming.buffer.len() as u64;
        if received != incoming.session.total_bytes {
            warn!(
                "{}: expected {} bytes, received {}",
                incoming.session.name, incoming.session.total_bytes, received
            );
        }
        incoming.session.state = TransferState::Completed;
        info!("Received {} ({} bytes)", incoming.session.name, received);

        let _ = self.events.send(TransferEvent::Completed {
            file_id: file_id.clone(),
            role: TransferRole::Receiver,
            file: Some(ReceivedFile {
                file_id,
                name: incoming.session.name,
                media_type: incoming.media_type,
                bytes: incoming.buffer,
            }),
        });
    }

    fn open_channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.as_ref().filter(|c| c.is_open()).cloned()
    }

    async fn announce_if_ready(&self) {
        if self.is_ready() {
            if let Err(e) = self.announce_catalog().await {
                warn!("Catalog announcement failed: {}", e);
            }
        }
    }

    async fn send_control(&self, message: ControlMessage) -> Result<(), TransferError> {
        let channel = self.open_channel().ok_or(TransferError::LinkNotReady)?;
        let text = message.encode().map_err(|e| TransferError::SendFailed {
            file_id: String::new(),
            reason: e.to_string(),
        })?;
        channel.send(ChannelMessage::Text(text)).await
    }
}
