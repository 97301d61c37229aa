use std::sync::Arc;
use std::time::Duration;

use easy_bluetooth_bridge_lib::commands::{self, Outcome, Request};
use easy_bluetooth_bridge_lib::config::{BridgeSettings, SessionConfig};
use easy_bluetooth_bridge_lib::core::bluetooth::{
    BluetoothAdapter, BridgeError, BridgeEvent, ConnectBehavior, ConnectionStatus, Device,
    ErrorKind, EventSubscriber, LoopbackAdapter, SessionManager,
};
use easy_bluetooth_bridge_lib::state::AppState;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Barrier;
use tokio::time::{sleep, timeout};

const HC05: &str = "AA:BB:CC:DD:EE:01";
const PHONE: &str = "AA:BB:CC:DD:EE:02";

fn setup(adapter: &Arc<LoopbackAdapter>, settings: BridgeSettings) -> Arc<SessionManager> {
    let adapter: Arc<dyn BluetoothAdapter> = adapter.clone();
    Arc::new(SessionManager::new(Some(adapter), settings))
}

async fn configured(adapter: &Arc<LoopbackAdapter>) -> Arc<SessionManager> {
    let manager = setup(adapter, BridgeSettings::default());
    manager
        .configure(SessionConfig::new('\n', 1024))
        .await
        .unwrap();
    manager
}

fn nearby_adapter(behavior: ConnectBehavior) -> Arc<LoopbackAdapter> {
    Arc::new(
        LoopbackAdapter::new()
            .with_nearby(vec![Device::new(HC05, "HC-05", -60)])
            .with_behavior(behavior),
    )
}

async fn next_event(subscriber: &mut EventSubscriber) -> BridgeEvent {
    timeout(Duration::from_secs(2), subscriber.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event bus closed")
}

async fn next_data(subscriber: &mut EventSubscriber) -> String {
    loop {
        if let BridgeEvent::DataRead(data) = next_event(subscriber).await {
            return data;
        }
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_scan_collects_unique_devices_in_discovery_order() {
    let adapter = Arc::new(LoopbackAdapter::new());
    let manager = configured(&adapter).await;
    let mut events = manager.subscribe();

    let scan = tokio::spawn({
        let manager = manager.clone();
        async move { manager.start_scan().await }
    });
    wait_until(|| adapter.is_discovering()).await;

    assert!(adapter.announce(Device::new(HC05, "HC-05", -70)));
    assert!(adapter.announce(Device::new(PHONE, "phone", -50)));
    assert!(adapter.announce(Device::new(HC05, "HC-05", -40)));

    let mut sightings = Vec::new();
    while sightings.len() < 3 {
        if let BridgeEvent::DeviceFound(device) = next_event(&mut events).await {
            sightings.push(device.address);
        }
    }
    assert_eq!(sightings, vec![HC05, PHONE, HC05]);

    let stopped = manager.stop_scan().await.unwrap();
    let addresses: Vec<_> = stopped.iter().map(|d| d.address.as_str()).collect();
    assert_eq!(addresses, vec![HC05, PHONE]);
    assert_eq!(stopped[0].rssi, -40);

    let scanned = scan.await.unwrap().unwrap();
    assert_eq!(scanned, stopped);
    assert!(!adapter.is_discovering());
}

#[tokio::test]
async fn test_scan_completed_by_adapter() {
    let adapter = nearby_adapter(ConnectBehavior::Echo);
    let manager = configured(&adapter).await;

    let scan = tokio::spawn({
        let manager = manager.clone();
        async move { manager.start_scan().await }
    });
    wait_until(|| adapter.is_discovering()).await;
    sleep(Duration::from_millis(20)).await;
    adapter.finish_discovery();

    let found = timeout(Duration::from_secs(2), scan)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(found, vec![Device::new(HC05, "HC-05", -60)]);
    assert!(manager.stop_scan().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_scan_is_rejected() {
    let adapter = Arc::new(LoopbackAdapter::new());
    let manager = configured(&adapter).await;

    let scan = tokio::spawn({
        let manager = manager.clone();
        async move { manager.start_scan().await }
    });
    wait_until(|| adapter.is_discovering()).await;

    assert!(matches!(
        manager.start_scan().await,
        Err(BridgeError::AlreadyScanning)
    ));
    manager.stop_scan().await.unwrap();
    assert!(scan.await.unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn test_scan_filters_by_device_name() {
    let adapter = Arc::new(LoopbackAdapter::new().with_nearby(vec![
        Device::new(HC05, "HC-05", -60),
        Device::new(PHONE, "phone", -50),
    ]));
    let manager = setup(&adapter, BridgeSettings::default());
    let mut config = SessionConfig::new('\n', 1024);
    config.device_name = Some("HC".to_string());
    manager.configure(config).await.unwrap();

    let scan = tokio::spawn({
        let manager = manager.clone();
        async move { manager.start_scan().await }
    });
    wait_until(|| adapter.is_discovering()).await;
    sleep(Duration::from_millis(20)).await;
    adapter.finish_discovery();

    let found = scan.await.unwrap().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address, HC05);
}

#[tokio::test]
async fn test_operations_require_configuration() {
    let adapter = Arc::new(LoopbackAdapter::new());
    let manager = setup(&adapter, BridgeSettings::default());

    assert!(matches!(manager.start_scan().await, Err(BridgeError::NotConfigured)));
    assert!(matches!(manager.connect(HC05, None).await, Err(BridgeError::NotConfigured)));
    assert!(matches!(manager.write_line("x").await, Err(BridgeError::NotConfigured)));
    assert!(matches!(manager.status(), Err(BridgeError::NotConfigured)));
    assert!(matches!(manager.stop_session().await, Err(BridgeError::NotConfigured)));
    assert_eq!(adapter.connect_attempts(), 0);
}

#[tokio::test]
async fn test_invalid_address_leaves_disconnected() {
    let adapter = nearby_adapter(ConnectBehavior::Echo);
    let manager = configured(&adapter).await;

    let result = manager.connect("not-an-address", None).await;
    assert!(matches!(result, Err(BridgeError::InvalidAddress(_))));
    assert_eq!(manager.status().unwrap(), ConnectionStatus::Disconnected);
    assert_eq!(adapter.connect_attempts(), 0);
}

#[tokio::test]
async fn test_connect_and_echo_records() {
    let adapter = nearby_adapter(ConnectBehavior::Echo);
    let manager = configured(&adapter).await;
    let mut events = manager.subscribe();

    let remote = manager.connect("aa:bb:cc:dd:ee:01", None).await.unwrap();
    assert_eq!(remote.name, "HC-05");
    assert_eq!(manager.status().unwrap(), ConnectionStatus::Connected);
    assert_eq!(manager.remote_device(), Some(remote));

    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::StatusChanged(ConnectionStatus::Connecting)
    );
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::StatusChanged(ConnectionStatus::Connected)
    );
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::DeviceNamed("HC-05".to_string())
    );

    manager.write_line("hello").await.unwrap();
    assert_eq!(next_data(&mut events).await, "hello");

    manager.write("ab").await.unwrap();
    manager.write_line("cd").await.unwrap();
    assert_eq!(next_data(&mut events).await, "abcd");

    manager.write_bytes(b"raw\n").await.unwrap();
    assert_eq!(next_data(&mut events).await, "raw");

    manager.disconnect().await.unwrap();
    assert_eq!(manager.status().unwrap(), ConnectionStatus::Disconnected);
    assert_eq!(manager.remote_device(), None);
}

#[tokio::test]
async fn test_inbound_records_span_chunks() {
    let adapter = nearby_adapter(ConnectBehavior::Peer);
    let manager = configured(&adapter).await;
    let mut events = manager.subscribe();

    manager.connect(HC05, None).await.unwrap();
    let mut peer = adapter.take_peer().unwrap();

    peer.write_all(b"hel").await.unwrap();
    peer.write_all(b"lo\nwor").await.unwrap();
    peer.write_all(b"ld\n\n").await.unwrap();

    assert_eq!(next_data(&mut events).await, "hello");
    assert_eq!(next_data(&mut events).await, "world");
    assert_eq!(next_data(&mut events).await, "");
}

#[tokio::test]
async fn test_disconnect_cancels_pending_connect() {
    let adapter = nearby_adapter(ConnectBehavior::Hang);
    let manager = configured(&adapter).await;

    let attempt = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect(HC05, None).await }
    });
    wait_until(|| manager.status().ok() == Some(ConnectionStatus::Connecting)).await;

    manager.disconnect().await.unwrap();
    assert!(matches!(attempt.await.unwrap(), Err(BridgeError::Cancelled(_))));
    assert_eq!(manager.status().unwrap(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_connect_timeout_reports_failure() {
    let adapter = nearby_adapter(ConnectBehavior::Hang);
    let manager = setup(
        &adapter,
        BridgeSettings {
            connect_timeout_ms: 50,
            ..BridgeSettings::default()
        },
    );
    manager
        .configure(SessionConfig::new('\n', 1024))
        .await
        .unwrap();
    let mut events = manager.subscribe();

    let result = manager.connect(HC05, Some("HC-05")).await;
    match result {
        Err(BridgeError::ConnectFailed { device, .. }) => assert_eq!(device.address, HC05),
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    assert_eq!(manager.status().unwrap(), ConnectionStatus::Disconnected);
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::StatusChanged(ConnectionStatus::Connecting)
    );
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::StatusChanged(ConnectionStatus::Disconnected)
    );
}

#[tokio::test]
async fn test_refused_connect_can_be_retried() {
    let adapter = nearby_adapter(ConnectBehavior::Refuse);
    let manager = configured(&adapter).await;

    assert!(matches!(
        manager.connect(HC05, None).await,
        Err(BridgeError::ConnectFailed { .. })
    ));
    assert_eq!(manager.status().unwrap(), ConnectionStatus::Disconnected);

    adapter.set_behavior(ConnectBehavior::Echo);
    manager.connect(HC05, None).await.unwrap();
    assert!(matches!(
        manager.connect(HC05, None).await,
        Err(BridgeError::InvalidState(_))
    ));
    assert_eq!(adapter.connect_attempts(), 2);
}

#[tokio::test]
async fn test_write_without_connection_performs_no_io() {
    let adapter = nearby_adapter(ConnectBehavior::Peer);
    let manager = configured(&adapter).await;

    assert!(matches!(manager.write_line("early").await, Err(BridgeError::NotConnected)));

    manager.connect(HC05, None).await.unwrap();
    let mut peer = adapter.take_peer().unwrap();
    manager.disconnect().await.unwrap();

    assert!(matches!(manager.write_line("late").await, Err(BridgeError::NotConnected)));
    let mut received = Vec::new();
    timeout(Duration::from_secs(2), peer.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_frame_limit_applies_to_payload_both_ways() {
    let adapter = nearby_adapter(ConnectBehavior::Peer);
    let manager = setup(&adapter, BridgeSettings::default());
    manager.configure(SessionConfig::new('\n', 8)).await.unwrap();
    manager.connect(HC05, None).await.unwrap();
    let mut events = manager.subscribe();
    let mut peer = adapter.take_peer().unwrap();

    assert!(matches!(
        manager.write_line("123456789").await,
        Err(BridgeError::FrameTooLarge { len: 9, limit: 8 })
    ));
    manager.write_line("12345678").await.unwrap();
    let mut received = [0u8; 9];
    peer.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, b"12345678\n");

    peer.write_all(b"abcdefgh\n").await.unwrap();
    assert_eq!(next_data(&mut events).await, "abcdefgh");

    // The oversized record is dropped whole; its neighbours survive
    peer.write_all(b"ok\n123456789\nafter\n").await.unwrap();
    assert_eq!(next_data(&mut events).await, "ok");
    assert_eq!(next_data(&mut events).await, "after");
}

#[tokio::test]
async fn test_lost_transport_moves_to_disconnected() {
    let adapter = nearby_adapter(ConnectBehavior::Peer);
    let manager = configured(&adapter).await;
    manager.connect(HC05, None).await.unwrap();
    let mut events = manager.subscribe();

    drop(adapter.take_peer());

    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::StatusChanged(ConnectionStatus::Disconnected)
    );
    assert_eq!(manager.status().unwrap(), ConnectionStatus::Disconnected);
    assert!(matches!(manager.write("x").await, Err(BridgeError::NotConnected)));
}

#[tokio::test]
async fn test_session_policies_while_connected() {
    let adapter = nearby_adapter(ConnectBehavior::Echo);
    let manager = configured(&adapter).await;
    manager.connect(HC05, None).await.unwrap();

    assert!(matches!(
        manager.configure(SessionConfig::new(';', 64)).await,
        Err(BridgeError::InvalidState(_))
    ));
    assert!(matches!(manager.start_scan().await, Err(BridgeError::InvalidState(_))));
    assert_eq!(manager.config().unwrap().character_delimiter, '\n');

    manager.stop_session().await.unwrap();
    assert!(!manager.is_configured());
    assert!(matches!(manager.status(), Err(BridgeError::NotConfigured)));
    assert!(manager.configure(SessionConfig::new(';', 64)).await.is_ok());
}

#[tokio::test]
async fn test_adapter_operations() {
    let adapter = Arc::new(
        LoopbackAdapter::new().with_bonded(vec![Device::new(PHONE, "phone", 0)]),
    );
    let manager = setup(&adapter, BridgeSettings::default());

    assert!(manager.is_adapter_enabled().await.unwrap());
    let bonded = manager.list_bonded_devices().await.unwrap();
    assert_eq!(bonded.len(), 1);
    assert_eq!(bonded[0].address, PHONE);

    manager.disable_adapter().await.unwrap();
    assert!(!manager.is_adapter_enabled().await.unwrap());

    adapter.refuse_power_changes(true);
    let refused = manager.enable_adapter().await.unwrap_err();
    assert_eq!(refused.kind(), ErrorKind::TransportError);
    assert!(!manager.is_adapter_enabled().await.unwrap());
}

#[tokio::test]
async fn test_missing_adapter_is_reported() {
    let manager = SessionManager::new(None, BridgeSettings::default());

    assert!(matches!(
        manager.configure(SessionConfig::new('\n', 1024)).await,
        Err(BridgeError::AdapterUnavailable)
    ));
    assert!(matches!(
        manager.is_adapter_enabled().await,
        Err(BridgeError::AdapterUnavailable)
    ));
    assert!(matches!(
        manager.enable_adapter().await,
        Err(BridgeError::AdapterUnavailable)
    ));
    assert!(matches!(
        manager.disable_adapter().await,
        Err(BridgeError::AdapterUnavailable)
    ));
    assert!(matches!(
        manager.list_bonded_devices().await,
        Err(BridgeError::AdapterUnavailable)
    ));
}

#[tokio::test]
async fn test_repeated_disconnect_is_a_no_op() {
    let adapter = nearby_adapter(ConnectBehavior::Echo);
    let manager = configured(&adapter).await;
    manager.disconnect().await.unwrap();

    manager.connect(HC05, None).await.unwrap();
    manager.disconnect().await.unwrap();
    let mut events = manager.subscribe();

    manager.disconnect().await.unwrap();
    assert_eq!(manager.status().unwrap(), ConnectionStatus::Disconnected);
    assert_eq!(events.try_recv(), None);
}

#[tokio::test]
async fn test_reconfigure_stops_running_scan() {
    let adapter = nearby_adapter(ConnectBehavior::Echo);
    let manager = configured(&adapter).await;

    let scan = tokio::spawn({
        let manager = manager.clone();
        async move { manager.start_scan().await }
    });
    wait_until(|| adapter.is_discovering()).await;

    let accepted = manager.configure(SessionConfig::new(';', 64)).await.unwrap();
    assert_eq!(accepted.character_delimiter, ';');

    let found = timeout(Duration::from_secs(2), scan)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(found.iter().all(|device| device.address == HC05));
    assert!(!adapter.is_discovering());
    assert_eq!(manager.config().unwrap().buffer_size, 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scan_and_connect_exclude_each_other() {
    for _ in 0..25 {
        let adapter = nearby_adapter(ConnectBehavior::Hang);
        let manager = configured(&adapter).await;
        let barrier = Arc::new(Barrier::new(2));

        let scan = tokio::spawn({
            let manager = manager.clone();
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                manager.start_scan().await
            }
        });
        let connect = tokio::spawn({
            let manager = manager.clone();
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                manager.connect(HC05, None).await
            }
        });

        // The loser is rejected at once; the winner stays pending
        wait_until(|| scan.is_finished() || connect.is_finished()).await;

        if scan.is_finished() {
            assert!(matches!(scan.await.unwrap(), Err(BridgeError::InvalidState(_))));
            assert_eq!(manager.status().unwrap(), ConnectionStatus::Connecting);
            manager.stop_session().await.unwrap();
            assert!(matches!(connect.await.unwrap(), Err(BridgeError::Cancelled(_))));
        } else {
            assert!(matches!(connect.await.unwrap(), Err(BridgeError::InvalidState(_))));
            assert_eq!(manager.status().unwrap(), ConnectionStatus::Disconnected);
            assert_eq!(adapter.connect_attempts(), 0);
            manager.stop_session().await.unwrap();
            assert!(scan.await.unwrap().is_ok());
        }
    }
}

#[tokio::test]
async fn test_command_envelope() {
    let adapter = nearby_adapter(ConnectBehavior::Echo);
    let adapter_dyn: Arc<dyn BluetoothAdapter> = adapter.clone();
    let app_state = AppState::new(Some(adapter_dyn), BridgeSettings::default());
    let mut events = app_state.session_manager.subscribe();

    let request = |value: serde_json::Value| serde_json::from_value::<Request>(value).unwrap();

    let response = commands::dispatch(
        &app_state,
        request(json!({
            "id": 1,
            "command": "configure",
            "config": {"characterDelimiter": "\n", "bufferSize": 1024}
        })),
    )
    .await;
    assert_eq!(response.id, Some(1));
    assert_eq!(
        response.outcome,
        Outcome::Ok(json!({"characterDelimiter": "\n", "bufferSize": 1024}))
    );

    let response = commands::dispatch(
        &app_state,
        request(json!({"id": 2, "command": "connect", "address": HC05})),
    )
    .await;
    assert!(matches!(response.outcome, Outcome::Ok(_)));

    // 266 keeps its low byte, the delimiter
    let response = commands::dispatch(
        &app_state,
        request(json!({"id": 3, "command": "writeIntArray", "data": [104, 105, 266]})),
    )
    .await;
    assert_eq!(response.outcome, Outcome::Ok(serde_json::Value::Null));
    assert_eq!(next_data(&mut events).await, "hi");

    let response = commands::dispatch(
        &app_state,
        request(json!({"id": 4, "command": "getStatus"})),
    )
    .await;
    assert_eq!(response.outcome, Outcome::Ok(json!("CONNECTED")));

    let response = commands::dispatch(
        &app_state,
        request(json!({"id": 5, "command": "connect", "address": "nope"})),
    )
    .await;
    match response.outcome {
        Outcome::Error(error) => assert_eq!(error.kind, ErrorKind::InvalidAddress),
        other => panic!("expected an error, got {other:?}"),
    }

    let response = commands::dispatch(
        &app_state,
        request(json!({"id": 6, "command": "stopService"})),
    )
    .await;
    assert_eq!(response.outcome, Outcome::Ok(serde_json::Value::Null));
    assert!(!app_state.session_manager.is_configured());
}
