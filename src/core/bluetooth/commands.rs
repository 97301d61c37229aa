//! Outbound write commands and the queue that serialises them onto the transport.

use std::io;

use log::{debug, error, info};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::core::bluetooth::adapter::TransportWriter;
use crate::core::bluetooth::codec::FrameCodec;
use crate::core::bluetooth::error::{BridgeError, Result};

/// Write commands accepted by a connected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCommand {
    /// Text sent as-is, no delimiter
    Text(String),
    /// Text followed by the configured delimiter
    Line(String),
    /// Raw bytes, passed through untouched
    Bytes(Vec<u8>),
}

impl WriteCommand {
    /// Convert the command to its wire representation
    pub fn to_bytes(&self, codec: &FrameCodec) -> Result<Vec<u8>> {
        match self {
            Self::Text(text) => codec.encode_raw(text.as_bytes()),
            Self::Line(text) => codec.encode(text),
            Self::Bytes(bytes) => codec.encode_raw(bytes),
        }
    }
}

enum QueueItem {
    Write(Vec<u8>, oneshot::Sender<io::Result<()>>),
    Close(oneshot::Sender<io::Result<()>>),
}

/// Single-writer queue in front of the transport.
///
/// Commands are enqueued synchronously on submission, so they reach the wire
/// in submission order with at most one write in flight.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    codec: FrameCodec,
}

impl WriteQueue {
    /// Spawn the writer task that owns `writer`
    pub fn spawn(writer: TransportWriter, codec: FrameCodec) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_writer(writer, rx));
        Self { tx, codec }
    }

    /// Encode and send a command, resolving once it is flushed.
    pub async fn send_command(&self, command: WriteCommand) -> Result<()> {
        let bytes = command.to_bytes(&self.codec)?;
        debug!("Queueing {} byte(s) for {:?}", bytes.len(), command);

        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(QueueItem::Write(bytes, ack_tx))
            .map_err(|_| BridgeError::NotConnected)?;

        match ack_rx.await {
            Ok(result) => result.map_err(BridgeError::from),
            Err(_) => Err(BridgeError::NotConnected),
        }
    }

    /// Flush pending writes, then shut the writer down.
    pub async fn close(&self) -> io::Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(QueueItem::Close(ack_tx)).is_err() {
            return Ok(());
        }
        ack_rx.await.unwrap_or(Ok(()))
    }

    async fn run_writer(mut writer: TransportWriter, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
        while let Some(item) = rx.recv().await {
            match item {
                QueueItem::Write(bytes, ack) => {
                    let result = match writer.write_all(&bytes).await {
                        Ok(()) => writer.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = &result {
                        error!("Failed to write {} byte(s): {}", bytes.len(), e);
                    }
                    let _ = ack.send(result);
                }
                QueueItem::Close(ack) => {
                    let _ = ack.send(writer.shutdown().await);
                    break;
                }
            }
        }
        info!("Writer task stopped");
    }
}
