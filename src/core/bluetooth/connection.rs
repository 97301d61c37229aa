//! Connection state machine
//! This module drives connect and disconnect transitions for the single
//! connection owned by a session.
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!      ^                        |  \--fail/timeout--> Disconnected
//!      |                   disconnect
//!      |                        v
//!      +------------------ Disconnecting <--disconnect-- Connected
//! ```
//!
//! All transitions happen under one lock. A disconnect during Connecting
//! cancels the attempt; the attempt settles to Disconnected and its caller
//! gets `Cancelled`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::adapter::{BluetoothAdapter, Transport};
use crate::core::bluetooth::commands::{WriteCommand, WriteQueue};
use crate::core::bluetooth::device::normalize_address;
use crate::core::bluetooth::error::{BridgeError, Result};
use crate::core::bluetooth::events::{BridgeEvent, EventBus};
use crate::core::bluetooth::notification::{NotificationHandler, StreamEnd};
use crate::core::bluetooth::types::{ConnectionStatus, Device};
use crate::utils::lock;

/// Handles held while a transport is open
struct ActiveLink {
    writer: WriteQueue,
    reader_cancel: CancellationToken,
    reader_handle: JoinHandle<()>,
}

struct ConnectionState {
    status: ConnectionStatus,
    remote: Option<Device>,
    link: Option<ActiveLink>,
    /// Cancels the in-flight connect attempt
    attempt: Option<CancellationToken>,
    /// Bumped on every connect so stale tasks can tell they were superseded
    generation: u64,
}

/// A connect that has entered Connecting but not yet reached the adapter
pub(crate) struct ConnectTicket {
    device: Device,
    token: CancellationToken,
    generation: u64,
}

enum DisconnectPlan {
    AlreadyDisconnected,
    WaitForSettle,
    Close(Option<ActiveLink>),
}

/// Connection manager for the session's single connection
#[derive(Clone)]
pub struct ConnectionManager {
    adapter: Arc<dyn BluetoothAdapter>,
    config: Arc<SessionConfig>,
    events: EventBus,
    notification_handler: NotificationHandler,
    connect_timeout: Duration,
    disconnect_timeout: Duration,
    state: Arc<Mutex<ConnectionState>>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectionManager {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        config: Arc<SessionConfig>,
        events: EventBus,
        connect_timeout: Duration,
        disconnect_timeout: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let notification_handler = NotificationHandler::new(events.clone(), config.codec());
        Self {
            adapter,
            config,
            events,
            notification_handler,
            connect_timeout,
            disconnect_timeout,
            state: Arc::new(Mutex::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                remote: None,
                link: None,
                attempt: None,
                generation: 0,
            })),
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.state).status
    }

    /// Watch status transitions
    pub fn status_updates(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// The connected remote, if any
    pub fn remote_device(&self) -> Option<Device> {
        lock(&self.state).remote.clone()
    }

    /// Must be called with the state lock held.
    fn set_status(&self, state: &mut ConnectionState, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        debug!("Connection status {} -> {}", state.status, status);
        state.status = status;
        self.status_tx.send_replace(status);
        self.events.publish(BridgeEvent::StatusChanged(status));
    }

    /// Connect to `device`, resolving with the adapter's snapshot of the remote.
    ///
    /// Only valid from Disconnected. The attempt is bounded by the connect
    /// timeout and is cancelled by a concurrent `disconnect`.
    pub async fn connect(&self, device: Device) -> Result<Device> {
        let ticket = self.begin_connect(device)?;
        self.finish_connect(ticket).await
    }

    /// Validate `device` and move Disconnected to Connecting.
    pub(crate) fn begin_connect(&self, device: Device) -> Result<ConnectTicket> {
        let device = Device {
            address: normalize_address(&device.address)?,
            ..device
        };

        let mut state = lock(&self.state);
        if state.status != ConnectionStatus::Disconnected {
            return Err(BridgeError::InvalidState(format!(
                "cannot connect while {}",
                state.status
            )));
        }
        let token = CancellationToken::new();
        state.generation += 1;
        state.attempt = Some(token.clone());
        self.set_status(&mut state, ConnectionStatus::Connecting);
        Ok(ConnectTicket {
            device,
            token,
            generation: state.generation,
        })
    }

    /// Run the attempt begun with [`Self::begin_connect`].
    pub(crate) async fn finish_connect(&self, ticket: ConnectTicket) -> Result<Device> {
        let ConnectTicket {
            device,
            token,
            generation,
        } = ticket;

        info!("Initiating connection to {}...", device.address);
        // The attempt runs detached so a dropped caller cannot strand the state in Connecting.
        let manager = self.clone();
        let attempt = tokio::spawn(async move { manager.run_attempt(device, token, generation).await });
        match attempt.await {
            Ok(result) => result,
            Err(e) => {
                error!("Connect task failed: {}", e);
                self.abandon_attempt(generation);
                Err(BridgeError::transport(format!("connect task failed: {e}")))
            }
        }
    }

    async fn run_attempt(
        &self,
        device: Device,
        token: CancellationToken,
        generation: u64,
    ) -> Result<Device> {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = tokio::time::timeout(
                self.connect_timeout,
                self.adapter.connect(&device, &self.config),
            ) => Some(match result {
                Ok(Ok(transport)) => Ok(transport),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "timed out after {} ms",
                    self.connect_timeout.as_millis()
                )),
            }),
        };

        let settled = {
            let mut state = lock(&self.state);
            let superseded = token.is_cancelled() || state.generation != generation;
            if superseded {
                if state.generation == generation && state.status == ConnectionStatus::Disconnecting {
                    state.attempt = None;
                    self.set_status(&mut state, ConnectionStatus::Disconnected);
                }
                Err(outcome)
            } else {
                state.attempt = None;
                match outcome {
                    Some(Ok(transport)) => Ok(self.install(&mut state, transport, generation)),
                    Some(Err(reason)) => {
                        self.set_status(&mut state, ConnectionStatus::Disconnected);
                        warn!("Connection to {} failed: {}", device.address, reason);
                        return Err(BridgeError::ConnectFailed { device, reason });
                    }
                    None => {
                        self.set_status(&mut state, ConnectionStatus::Disconnected);
                        Err(None)
                    }
                }
            }
        };

        match settled {
            Ok(remote) => {
                info!("Connected to {} [{}]", remote.name, remote.address);
                if !remote.name.is_empty() {
                    self.events.publish(BridgeEvent::DeviceNamed(remote.name.clone()));
                }
                Ok(remote)
            }
            Err(outcome) => {
                if let Some(Ok(transport)) = outcome {
                    debug!("Releasing transport from a cancelled attempt");
                    let mut writer = transport.writer;
                    if let Err(e) = writer.shutdown().await {
                        warn!("Failed to close abandoned transport: {}", e);
                    }
                }
                info!("Connection attempt to {} cancelled", device.address);
                Err(BridgeError::Cancelled(format!(
                    "connect to {} was cancelled by disconnect",
                    device.address
                )))
            }
        }
    }

    /// Wire up reader and writer for a fresh transport. Lock must be held.
    fn install(&self, state: &mut ConnectionState, transport: Transport, generation: u64) -> Device {
        let Transport { remote, reader, writer } = transport;
        let writer = WriteQueue::spawn(writer, self.config.codec());
        let reader_cancel = CancellationToken::new();
        let manager = self.clone();
        let reader_handle = self.notification_handler.setup_notifications(
            reader,
            reader_cancel.clone(),
            move |end| manager.handle_stream_end(generation, end),
        );

        state.link = Some(ActiveLink {
            writer,
            reader_cancel,
            reader_handle,
        });
        state.remote = Some(remote.clone());
        self.set_status(state, ConnectionStatus::Connected);
        remote
    }

    fn abandon_attempt(&self, generation: u64) {
        let mut state = lock(&self.state);
        if state.generation == generation && state.status.is_active() && state.link.is_none() {
            state.attempt = None;
            self.set_status(&mut state, ConnectionStatus::Disconnected);
        }
    }

    fn handle_stream_end(&self, generation: u64, end: StreamEnd) {
        let mut state = lock(&self.state);
        if state.generation != generation || state.status != ConnectionStatus::Connected {
            return;
        }
        match end {
            StreamEnd::Closed => info!("Remote closed the connection"),
            StreamEnd::Failed(e) => warn!("Connection lost: {}", e),
        }
        // Dropping the queue ends the writer task and releases the write half.
        state.link = None;
        state.remote = None;
        self.set_status(&mut state, ConnectionStatus::Disconnected);
    }

    /// Disconnect, cancelling an in-flight connect. No-op when already Disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let plan = {
            let mut state = lock(&self.state);
            match state.status {
                ConnectionStatus::Disconnected => DisconnectPlan::AlreadyDisconnected,
                ConnectionStatus::Disconnecting => DisconnectPlan::WaitForSettle,
                ConnectionStatus::Connecting => {
                    self.set_status(&mut state, ConnectionStatus::Disconnecting);
                    if let Some(token) = state.attempt.take() {
                        token.cancel();
                    }
                    DisconnectPlan::WaitForSettle
                }
                ConnectionStatus::Connected => {
                    self.set_status(&mut state, ConnectionStatus::Disconnecting);
                    DisconnectPlan::Close(state.link.take())
                }
            }
        };

        match plan {
            DisconnectPlan::AlreadyDisconnected => {
                debug!("Already disconnected");
                Ok(())
            }
            DisconnectPlan::WaitForSettle => self.wait_for_disconnected().await,
            DisconnectPlan::Close(link) => {
                let mut result = Ok(());
                if let Some(link) = link {
                    link.reader_cancel.cancel();
                    result = link.writer.close().await;
                    if let Err(e) = link.reader_handle.await {
                        error!("Read task ended abnormally: {:?}", e);
                    }
                }
                {
                    let mut state = lock(&self.state);
                    if state.status == ConnectionStatus::Disconnecting {
                        state.remote = None;
                        self.set_status(&mut state, ConnectionStatus::Disconnected);
                    }
                }
                info!("Successfully disconnected");
                result.map_err(BridgeError::from)
            }
        }
    }

    async fn wait_for_disconnected(&self) -> Result<()> {
        let mut updates = self.status_tx.subscribe();
        let settled = tokio::time::timeout(self.disconnect_timeout, async move {
            updates
                .wait_for(|status| *status == ConnectionStatus::Disconnected)
                .await
                .map(|_| ())
        })
        .await;
        match settled {
            Ok(_) => Ok(()),
            Err(_) => Err(BridgeError::transport(format!(
                "connection did not close within {} ms",
                self.disconnect_timeout.as_millis()
            ))),
        }
    }

    /// Serialised write on the open transport
    pub async fn write(&self, command: WriteCommand) -> Result<()> {
        let writer = {
            let state = lock(&self.state);
            match (&state.status, &state.link) {
                (ConnectionStatus::Connected, Some(link)) => link.writer.clone(),
                _ => return Err(BridgeError::NotConnected),
            }
        };
        writer.send_command(command).await
    }
}
