//! In-memory adapter.
//!
//! Stands in for a platform radio: serves a fixed set of nearby and bonded
//! devices and opens streams that echo, hand their far end to the caller,
//! hang or fail. Used by the stdio bridge binary and by tests.

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::stream;
use log::{debug, info};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::adapter::{BluetoothAdapter, DiscoveryStream, Transport};
use crate::core::bluetooth::types::Device;
use crate::utils::lock;

const LOOPBACK_STREAM_CAPACITY: usize = 64 * 1024;

/// What `connect` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Everything written comes back as inbound data
    Echo,
    /// The far end of the stream is kept for [`LoopbackAdapter::take_peer`]
    Peer,
    /// The connect never completes
    Hang,
    /// The connect fails immediately
    Refuse,
}

pub struct LoopbackAdapter {
    enabled: AtomicBool,
    refuse_power_changes: AtomicBool,
    behavior: Mutex<ConnectBehavior>,
    nearby: Mutex<Vec<Device>>,
    bonded: Mutex<Vec<Device>>,
    discovery: Mutex<Option<mpsc::UnboundedSender<Device>>>,
    peer: Mutex<Option<DuplexStream>>,
    connect_attempts: AtomicUsize,
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackAdapter {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            refuse_power_changes: AtomicBool::new(false),
            behavior: Mutex::new(ConnectBehavior::Echo),
            nearby: Mutex::new(Vec::new()),
            bonded: Mutex::new(Vec::new()),
            discovery: Mutex::new(None),
            peer: Mutex::new(None),
            connect_attempts: AtomicUsize::new(0),
        }
    }

    /// Devices reported as soon as a scan starts
    pub fn with_nearby(self, devices: Vec<Device>) -> Self {
        *lock(&self.nearby) = devices;
        self
    }

    pub fn with_bonded(self, devices: Vec<Device>) -> Self {
        *lock(&self.bonded) = devices;
        self
    }

    pub fn with_behavior(self, behavior: ConnectBehavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// Make `set_enabled` report that the platform refused the request
    pub fn refuse_power_changes(&self, refuse: bool) {
        self.refuse_power_changes.store(refuse, Ordering::SeqCst);
    }

    /// Report a device to the running scan. Returns false when no scan is running.
    pub fn announce(&self, device: Device) -> bool {
        match lock(&self.discovery).as_ref() {
            Some(tx) => tx.send(device).is_ok(),
            None => false,
        }
    }

    /// End the running scan from the adapter side
    pub fn finish_discovery(&self) {
        if lock(&self.discovery).take().is_some() {
            info!("Loopback discovery finished by adapter");
        }
    }

    pub fn is_discovering(&self) -> bool {
        lock(&self.discovery).is_some()
    }

    /// Far end of the last stream opened with [`ConnectBehavior::Peer`]
    pub fn take_peer(&self) -> Option<DuplexStream> {
        lock(&self.peer).take()
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    fn resolve(&self, device: &Device) -> Device {
        let known = lock(&self.nearby)
            .iter()
            .chain(lock(&self.bonded).iter())
            .find(|known| known.address == device.address)
            .cloned();
        known.unwrap_or_else(|| device.clone())
    }
}

#[async_trait]
impl BluetoothAdapter for LoopbackAdapter {
    async fn is_enabled(&self) -> io::Result<bool> {
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn set_enabled(&self, enabled: bool) -> io::Result<bool> {
        if self.refuse_power_changes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.finish_discovery();
        }
        Ok(true)
    }

    async fn bonded_devices(&self) -> io::Result<Vec<Device>> {
        Ok(lock(&self.bonded).clone())
    }

    async fn start_discovery(&self) -> io::Result<DiscoveryStream> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(io::Error::other("adapter is disabled"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for device in lock(&self.nearby).iter() {
            let _ = tx.send(device.clone());
        }
        *lock(&self.discovery) = Some(tx);
        debug!("Loopback discovery started");

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|device| (device, rx))
        })))
    }

    async fn stop_discovery(&self) -> io::Result<()> {
        lock(&self.discovery).take();
        Ok(())
    }

    async fn connect(&self, device: &Device, _config: &SessionConfig) -> io::Result<Transport> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(io::Error::other("adapter is disabled"));
        }
        let behavior = *lock(&self.behavior);
        let remote = self.resolve(device);

        let (local, far) = tokio::io::duplex(LOOPBACK_STREAM_CAPACITY);
        match behavior {
            ConnectBehavior::Echo => {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = tokio::io::split(far);
                    if let Err(e) = tokio::io::copy(&mut reader, &mut writer).await {
                        debug!("Loopback echo ended: {}", e);
                    }
                });
            }
            ConnectBehavior::Peer => {
                *lock(&self.peer) = Some(far);
            }
            ConnectBehavior::Hang => {
                std::future::pending::<()>().await;
            }
            ConnectBehavior::Refuse => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ));
            }
        }

        let (reader, writer) = tokio::io::split(local);
        Ok(Transport {
            remote,
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}
