use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{io::AsyncReadExt, sync::mpsc, task::yield_now, time::sleep};
use tracing::{debug, info, warn};

use super::catalog::{FileCatalogEntry, FileId, FileSource};
use super::channel::{ChannelMessage, DataChannel};
use super::engine::{TransferEvent, TransferRole};
use super::protocol::{encode_frame, ControlMessage};
use crate::config::TransferConfig;
use crate::error::TransferError;

/// Reported back to the engine when a send task finishes
#[derive(Debug)]
pub struct SendOutcome {
    pub file_id: FileId,
    pub result: Result<u64, TransferError>,
}

/// Everything a spawned send task needs
pub(crate) struct SendJob {
    pub entry: FileCatalogEntry,
    pub source: FileSource,
    pub channel: Arc<dyn DataChannel>,
    pub config: TransferConfig,
    /// Bytes sent so far, read back by the engine
    pub progress: Arc<AtomicU64>,
    pub events: mpsc::UnboundedSender<TransferEvent>,
    pub outcomes: mpsc::UnboundedSender<SendOutcome>,
}

impl SendJob {
    pub async fn run(self) {
        let file_id = self.entry.file_id.clone();
        let total_bytes = self.entry.byte_size;
        let events = self.events.clone();
        let progress = self.progress.clone();

        let result = send_file(
            self.channel.as_ref(),
            &self.entry,
            &self.source,
            &self.config,
            |transferred_bytes| {
                progress.store(transferred_bytes, Ordering::Release);
                let _ = events.send(TransferEvent::Progress {
                    file_id: file_id.clone(),
                    role: TransferRole::Sender,
                    transferred_bytes,
                    total_bytes,
                });
            },
        )
        .await;

        if let Err(e) = &result {
            warn!("Send of {} stopped: {}", file_id, e);
        }
        let _ = self.outcomes.send(SendOutcome { file_id, result });
    }
}

/// Stream one file: `transfer-begin`, ceil(size / chunk_size) data frames,
/// then `transfer-end`. Returns the number of payload bytes sent.
pub async fn send_file<F>(
    channel: &dyn DataChannel,
    entry: &FileCatalogEntry,
    source: &FileSource,
    config: &TransferConfig,
    mut on_progress: F,
) -> Result<u64, TransferError>
where
    F: FnMut(u64) + Send,
{
    let file_id = &entry.file_id;
    if !channel.is_open() {
        return Err(TransferError::LinkNotReady);
    }

    let failed = |reason: String| TransferError::SendFailed {
        file_id: file_id.to_string(),
        reason,
    };

    let mut reader = source
        .open()
        .await
        .map_err(|e| failed(format!("cannot open source: {}", e)))?;

    send_control(
        channel,
        file_id,
        ControlMessage::TransferBegin {
            file_id: file_id.clone(),
            name: entry.name.clone(),
            byte_size: entry.byte_size,
            media_type: entry.media_type.clone(),
        },
    )
    .await?;
    info!("Sending {} ({} bytes)", entry.name, entry.byte_size);

    let chunk_size = config.chunk_size;
    let mut block = vec![0u8; config.read_block_size.max(chunk_size)];
    // Tail of the previous block that did not fill a whole chunk
    let mut pending: Vec<u8> = Vec::with_capacity(chunk_size);
    let mut sent = 0u64;

    loop {
        let n = reader
            .read(&mut block)
            .await
            .map_err(|e| failed(format!("read error: {}", e)))?;
        if n == 0 {
            break;
        }

        let mut data = &block[..n];
        if !pending.is_empty() {
            let take = (chunk_size - pending.len()).min(data.len());
            pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if pending.len() == chunk_size {
                send_chunk(channel, file_id, &pending, config).await?;
                sent += pending.len() as u64;
                on_progress(sent);
                pending.clear();
            }
        }

        while data.len() >= chunk_size {
            let (chunk, rest) = data.split_at(chunk_size);
            send_chunk(channel, file_id, chunk, config).await?;
            sent += chunk.len() as u64;
            on_progress(sent);
            data = rest;
        }
        pending.extend_from_slice(data);
    }

    if !pending.is_empty() {
        send_chunk(channel, file_id, &pending, config).await?;
        sent += pending.len() as u64;
        on_progress(sent);
    }

    send_control(
        channel,
        file_id,
        ControlMessage::TransferEnd {
            file_id: file_id.clone(),
        },
    )
    .await?;
    info!("Finished sending {} ({} bytes)", entry.name, sent);
    Ok(sent)
}

async fn send_chunk(
    channel: &dyn DataChannel,
    file_id: &FileId,
    chunk: &[u8],
    config: &TransferConfig,
) -> Result<(), TransferError> {
    wait_for_drain(channel, file_id, config).await?;
    channel
        .send(ChannelMessage::Binary(encode_frame(file_id, chunk)))
        .await
        .map_err(|_| aborted(file_id))?;
    // Let other sends and inbound handling run between chunks
    yield_now().await;
    Ok(())
}

async fn send_control(
    channel: &dyn DataChannel,
    file_id: &FileId,
    message: ControlMessage,
) -> Result<(), TransferError> {
    let text = message.encode().map_err(|e| TransferError::SendFailed {
        file_id: file_id.to_string(),
        reason: e.to_string(),
    })?;
    channel
        .send(ChannelMessage::Text(text))
        .await
        .map_err(|_| aborted(file_id))
}

/// Suspend while the channel holds more than the threshold
async fn wait_for_drain(
    channel: &dyn DataChannel,
    file_id: &FileId,
    config: &TransferConfig,
) -> Result<(), TransferError> {
    let mut waited = false;
    while channel.buffered_amount().await > config.backpressure_threshold {
        if !channel.is_open() {
            return Err(aborted(file_id));
        }
        if !waited {
            debug!("Send buffer full, pausing {}", file_id);
            waited = true;
        }
        sleep(config.poll_interval()).await;
    }
    Ok(())
}

fn aborted(file_id: &FileId) -> TransferError {
    TransferError::TransferAborted {
        file_id: file_id.to_string(),
        reason: "channel closed".to_string(),
    }
}
