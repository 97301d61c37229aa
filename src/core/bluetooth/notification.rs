//! Inbound data handling for an open connection
//! This module reads the transport, frames records and publishes them as events

use std::io;

use log::{debug, error, info};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::TransportReader;
use crate::core::bluetooth::codec::{FrameCodec, FrameDecoder};
use crate::core::bluetooth::constants::MAX_READ_CHUNK;
use crate::core::bluetooth::events::{BridgeEvent, EventBus};

/// Why a read loop ended on its own
#[derive(Debug)]
pub enum StreamEnd {
    /// Remote closed the stream
    Closed,
    /// Read failed
    Failed(io::Error),
}

/// Notification handler for inbound data
#[derive(Clone)]
pub struct NotificationHandler {
    events: EventBus,
    codec: FrameCodec,
}

impl NotificationHandler {
    pub fn new(events: EventBus, codec: FrameCodec) -> Self {
        Self { events, codec }
    }

    /// Spawn the read loop for `reader`.
    ///
    /// `on_end` runs when the stream closes or fails, never after `cancel_token` fires.
    pub fn setup_notifications<F>(
        &self,
        reader: TransportReader,
        cancel_token: CancellationToken,
        on_end: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(StreamEnd) + Send + 'static,
    {
        let handler = self.clone();
        tokio::spawn(async move {
            if let Some(end) = handler.process_notifications(reader, cancel_token).await {
                on_end(end);
            }
        })
    }

    async fn process_notifications(
        &self,
        mut reader: TransportReader,
        cancel_token: CancellationToken,
    ) -> Option<StreamEnd> {
        info!("Listening for inbound data...");
        let chunk = self.codec.buffer_size().clamp(1, MAX_READ_CHUNK);
        let mut buf = vec![0u8; chunk];
        let mut decoder = FrameDecoder::new(self.codec.clone());

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!("Read loop cancelled");
                    return None;
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("Connection closed by remote");
                        return Some(StreamEnd::Closed);
                    }
                    Ok(n) => {
                        debug!("Received {} byte(s)", n);
                        for record in decoder.push(&buf[..n]) {
                            self.events.publish(BridgeEvent::DataRead(record));
                        }
                    }
                    Err(e) => {
                        error!("Read error: {}", e);
                        return Some(StreamEnd::Failed(e));
                    }
                }
            }
        }
    }
}
