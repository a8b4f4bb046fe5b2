//! File-sharing protocol spoken over an open peer channel.

pub mod catalog;
pub mod channel;
pub mod engine;
pub mod protocol;
pub mod sender;

pub use catalog::{FileCatalog, FileCatalogEntry, FileId, FileSource};
pub use channel::{ChannelMessage, DataChannel, MemoryChannel, MemoryEndpoint};
pub use engine::{ReceivedFile, TransferEngine, TransferEvent, TransferRole, TransferSession, TransferState};
pub use protocol::{decode_frame, encode_frame, ControlMessage, DataFrame};
pub use sender::SendOutcome;
