//! The open peer channel as seen by the transfer engine.

use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc;

use crate::error::TransferError;

/// One message on the peer channel. Text carries control messages, binary
/// carries data frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Reliable, ordered, bidirectional message channel
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn send(&self, message: ChannelMessage) -> Result<(), TransferError>;

    /// Bytes queued locally but not yet handed to the network
    async fn buffered_amount(&self) -> usize;
}

/// In-process channel pair. The buffered amount is whatever the owner sets,
/// so senders can be throttled on demand.
pub struct MemoryChannel {
    outgoing: mpsc::UnboundedSender<ChannelMessage>,
    open: Arc<AtomicBool>,
    buffered: AtomicUsize,
}

/// One side of a [`MemoryChannel`] pair
pub struct MemoryEndpoint {
    pub channel: Arc<MemoryChannel>,
    pub inbox: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryEndpoint, MemoryEndpoint) {
        let open = Arc::new(AtomicBool::new(true));
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let side = |outgoing, inbox| MemoryEndpoint {
            channel: Arc::new(MemoryChannel {
                outgoing,
                open: open.clone(),
                buffered: AtomicUsize::new(0),
            }),
            inbox,
        };

        (side(b_tx, a_rx), side(a_tx, b_rx))
    }

    pub fn set_buffered_amount(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    /// Closes both ends
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, message: ChannelMessage) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::LinkNotReady);
        }
        self.outgoing
            .send(message)
            .map_err(|_| TransferError::LinkNotReady)
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, mut b) = MemoryChannel::pair();
        a.channel.send(ChannelMessage::Text("one".into())).await.unwrap();
        a.channel.send(ChannelMessage::Binary(vec![2])).await.unwrap();

        assert_eq!(b.inbox.recv().await, Some(ChannelMessage::Text("one".into())));
        assert_eq!(b.inbox.recv().await, Some(ChannelMessage::Binary(vec![2])));
    }

    #[tokio::test]
    async fn test_close_affects_both_sides() {
        let (a, b) = MemoryChannel::pair();
        b.channel.close();
        assert!(!a.channel.is_open());
        assert_eq!(
            a.channel.send(ChannelMessage::Text("x".into())).await,
            Err(TransferError::LinkNotReady)
        );
    }
}
