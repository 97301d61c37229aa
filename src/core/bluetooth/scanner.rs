//! Discovery lifecycle: start and stop scans, collect results, resolve the
//! pending `start_scan` call once the scan goes idle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::{BluetoothAdapter, DiscoveryStream};
use crate::core::bluetooth::error::{BridgeError, Result};
use crate::core::bluetooth::events::{BridgeEvent, EventBus};
use crate::core::bluetooth::types::{Device, ScanState};
use crate::utils::lock;

struct ScanSession {
    state: ScanState,
    /// Discovery order, one entry per address
    discovered: Vec<Device>,
    pending: Option<oneshot::Sender<Vec<Device>>>,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl ScanSession {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            discovered: Vec::new(),
            pending: None,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
            generation: 0,
        }
    }

    /// Insert a sighting. A repeated address replaces the earlier snapshot in place.
    fn record(&mut self, device: Device) {
        match self
            .discovered
            .iter_mut()
            .find(|known| known.address == device.address)
        {
            Some(known) => *known = device,
            None => self.discovered.push(device),
        }
    }

    /// Move to Idle and hand the collected devices to the pending caller.
    fn finish(&mut self) -> Vec<Device> {
        self.state = ScanState::Idle;
        self.cancel_token.cancel();
        let discovered = std::mem::take(&mut self.discovered);
        if let Some(pending) = self.pending.take() {
            if pending.send(discovered.clone()).is_err() {
                debug!("start_scan caller went away before the scan finished");
            }
        }
        discovered
    }
}

/// A scan that has entered Scanning but not yet reached the adapter
pub(crate) struct ScanTicket {
    result_rx: oneshot::Receiver<Vec<Device>>,
    cancel_token: CancellationToken,
    generation: u64,
}

#[derive(Clone)]
pub struct BluetoothScanner {
    adapter: Arc<dyn BluetoothAdapter>,
    events: EventBus,
    name_filter: Option<String>,
    stop_settle: Duration,
    session: Arc<Mutex<ScanSession>>,
}

impl BluetoothScanner {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        events: EventBus,
        name_filter: Option<String>,
        stop_settle: Duration,
    ) -> Self {
        Self {
            adapter,
            events,
            name_filter,
            stop_settle,
            session: Arc::new(Mutex::new(ScanSession::new())),
        }
    }

    pub fn state(&self) -> ScanState {
        lock(&self.session).state
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == ScanState::Scanning
    }

    /// Devices collected so far by the running scan
    pub fn discovered(&self) -> Vec<Device> {
        lock(&self.session).discovered.clone()
    }

    /// Start a scan and wait for it to go idle, returning every device found.
    pub async fn start_scan(&self) -> Result<Vec<Device>> {
        let ticket = self.begin_scan()?;
        self.run_scan(ticket).await
    }

    /// Move Idle to Scanning without touching the adapter.
    pub(crate) fn begin_scan(&self) -> Result<ScanTicket> {
        let mut session = lock(&self.session);
        if session.state == ScanState::Scanning {
            return Err(BridgeError::AlreadyScanning);
        }
        let (tx, rx) = oneshot::channel();
        session.state = ScanState::Scanning;
        session.discovered.clear();
        session.pending = Some(tx);
        session.cancel_token = CancellationToken::new();
        session.generation += 1;
        Ok(ScanTicket {
            result_rx: rx,
            cancel_token: session.cancel_token.clone(),
            generation: session.generation,
        })
    }

    /// Drive a scan begun with [`Self::begin_scan`] until it goes idle.
    pub(crate) async fn run_scan(&self, ticket: ScanTicket) -> Result<Vec<Device>> {
        let ScanTicket {
            result_rx,
            cancel_token,
            generation,
        } = ticket;

        info!("Starting bluetooth scan");
        let stream = match self.adapter.start_discovery().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start discovery: {}", e);
                let mut session = lock(&self.session);
                if session.generation == generation && session.state == ScanState::Scanning {
                    session.state = ScanState::Idle;
                    session.pending = None;
                }
                return Err(e.into());
            }
        };

        if cancel_token.is_cancelled() {
            info!("Scan stopped before discovery came up, cancelling it");
            if let Err(e) = self.adapter.stop_discovery().await {
                warn!("Failed to stop discovery: {}", e);
            }
        } else {
            let scanner = self.clone();
            let handle = tokio::spawn(async move {
                scanner.internal_scan_task(stream, cancel_token, generation).await;
            });
            let mut session = lock(&self.session);
            if session.generation == generation && session.state == ScanState::Scanning {
                session.scan_task_handle = Some(handle);
            }
        }

        result_rx
            .await
            .map_err(|_| BridgeError::Cancelled("scan session was discarded".to_string()))
    }

    /// Processes discovered devices until the stream ends or the scan is stopped
    async fn internal_scan_task(
        &self,
        mut stream: DiscoveryStream,
        cancel_token: CancellationToken,
        generation: u64,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                next = stream.next() => match next {
                    Some(device) => self.handle_device(generation, device),
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        self.complete(generation);
                        break;
                    }
                }
            }
        }
    }

    fn handle_device(&self, generation: u64, device: Device) {
        debug!("Found device - Address: {}, Name: {:?}, RSSI: {}", device.address, device.name, device.rssi);
        if !device.matches_name_filter(self.name_filter.as_deref()) {
            debug!("Ignoring {} (name filter)", device.address);
            return;
        }
        {
            let mut session = lock(&self.session);
            if session.generation != generation || session.state != ScanState::Scanning {
                return;
            }
            session.record(device.clone());
        }
        self.events.publish(BridgeEvent::DeviceFound(device));
    }

    /// Adapter-driven completion
    fn complete(&self, generation: u64) {
        let mut session = lock(&self.session);
        if session.generation == generation && session.state == ScanState::Scanning {
            session.scan_task_handle = None;
            let found = session.finish();
            info!("Scan completed by adapter with {} device(s)", found.len());
        }
    }

    /// Stop the running scan and return its results. Idle scanners resolve
    /// immediately with an empty list.
    pub async fn stop_scan(&self) -> Result<Vec<Device>> {
        let (discovered, handle) = {
            let mut session = lock(&self.session);
            if session.state == ScanState::Idle {
                debug!("stop_scan while idle");
                return Ok(Vec::new());
            }
            let handle = session.scan_task_handle.take();
            (session.finish(), handle)
        };
        info!("Stopping Bluetooth scan with {} device(s).", discovered.len());

        let stop_result = self.adapter.stop_discovery().await;

        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => debug!("Scan task finished after cancellation."),
                Err(e) if e.is_cancelled() => debug!("Scan task was cancelled."),
                Err(e) => error!("Scan task finished with an unexpected join error: {:?}", e),
            }
        }

        if !self.stop_settle.is_zero() {
            tokio::time::sleep(self.stop_settle).await;
        }

        stop_result?;
        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_deduplicates_by_address() {
        let mut session = ScanSession::new();
        session.record(Device::new("AA:BB:CC:DD:EE:01", "first", -70));
        session.record(Device::new("AA:BB:CC:DD:EE:02", "second", -60));
        session.record(Device::new("AA:BB:CC:DD:EE:01", "first-renamed", -40));
        session.record(Device::new("AA:BB:CC:DD:EE:03", "third", -50));

        let addresses: Vec<_> = session.discovered.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(
            addresses,
            vec!["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02", "AA:BB:CC:DD:EE:03"]
        );
        assert_eq!(session.discovered[0].name, "first-renamed");
        assert_eq!(session.discovered[0].rssi, -40);
    }

    #[test]
    fn test_finish_delivers_and_clears() {
        let mut session = ScanSession::new();
        let (tx, mut rx) = oneshot::channel();
        session.state = ScanState::Scanning;
        session.pending = Some(tx);
        session.record(Device::new("AA:BB:CC:DD:EE:01", "", 0));

        let found = session.finish();
        assert_eq!(found.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), found);
        assert!(session.discovered.is_empty());
        assert_eq!(session.state, ScanState::Idle);
        assert!(session.cancel_token.is_cancelled());
    }
}
