//! Event fan-out to the host runtime and any other listener.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::core::bluetooth::constants::{
    EVENT_DATA_READ, EVENT_DEVICE_FOUND, EVENT_DEVICE_NAME, EVENT_STATUS_CHANGE,
};
use crate::core::bluetooth::types::{ConnectionStatus, Device};
use crate::utils::lock;

/// Events pushed by a session, serialised as `{"event": .., "payload": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum BridgeEvent {
    #[serde(rename = "deviceFound")]
    DeviceFound(Device),
    #[serde(rename = "dataRead")]
    DataRead(String),
    #[serde(rename = "statusChange")]
    StatusChanged(ConnectionStatus),
    #[serde(rename = "deviceName")]
    DeviceNamed(String),
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceFound(_) => EVENT_DEVICE_FOUND,
            Self::DataRead(_) => EVENT_DATA_READ,
            Self::StatusChanged(_) => EVENT_STATUS_CHANGE,
            Self::DeviceNamed(_) => EVENT_DEVICE_NAME,
        }
    }
}

/// Delivers events to every current subscriber in production order.
///
/// Each subscriber owns a bounded queue. A full queue drops the event for that
/// subscriber only; a dropped subscriber is pruned on the next publish.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<BridgeEvent>>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new listener. Events published before this call are not replayed.
    pub fn subscribe(&self) -> EventSubscriber {
        let (tx, rx) = mpsc::channel(self.capacity);
        lock(&self.subscribers).push(tx);
        EventSubscriber { rx }
    }

    pub fn publish(&self, event: BridgeEvent) {
        let mut subscribers = lock(&self.subscribers);
        debug!(
            "Publishing {} event to {} subscriber(s)",
            event.name(),
            subscribers.len()
        );
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber queue full, dropping {} event", event.name());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

/// Receiving end of an [`EventBus`] subscription. Dropping it unsubscribes.
pub struct EventSubscriber {
    rx: mpsc::Receiver<BridgeEvent>,
}

impl EventSubscriber {
    /// Wait for the next event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new events. Events already queued can still be received,
    /// after which `recv` returns `None`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
