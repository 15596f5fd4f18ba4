mod common;

use std::time::Duration;

use ble_central::core::bluetooth::{
    AdapterState, CharacteristicHandle, PlatformHandle, UUID_HM10_SERVICE, UUID_NORDIC_UART_SERVICE,
    UUID_REDBEAR_SERVICE, UUID_REDBEAR_TX_CHAR,
};
use ble_central::{
    CentralConfig, CentralError, CentralEvent, ErrorKind, PeripheralId, PeripheralRecord,
    PeripheralState, PlatformEvent, ServiceConfig,
};
use ble_central::state;
use common::{
    DriverCall, EventLog, FakePlatform, central, central_with, powered_central, settle,
};
use tokio::sync::oneshot;

const P1: PlatformHandle = PlatformHandle(1);
const P2: PlatformHandle = PlatformHandle(2);
const TX: CharacteristicHandle = CharacteristicHandle(10);
const RX: CharacteristicHandle = CharacteristicHandle(11);

fn id(value: &str) -> PeripheralId {
    PeripheralId::from(value)
}

fn ids(records: &[PeripheralRecord]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

fn error_kinds(events: &[CentralEvent]) -> Vec<ErrorKind> {
    events
        .iter()
        .filter_map(|e| match e {
            CentralEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

type Snapshot = oneshot::Receiver<Vec<PeripheralRecord>>;

fn snapshot_channel() -> (impl FnOnce(Vec<PeripheralRecord>) + Send + 'static, Snapshot) {
    let (tx, rx) = oneshot::channel();
    (
        move |peripherals: Vec<PeripheralRecord>| {
            let _ = tx.send(peripherals);
        },
        rx,
    )
}

/// Discovers the given peripherals in an unbounded scan session and stops it.
async fn discover(
    central: &ble_central::BleCentral,
    platform: &FakePlatform,
    peripherals: &[(&str, u64, i16)],
) -> Vec<PeripheralRecord> {
    let (completion, snapshot) = snapshot_channel();
    central.scan(0, 0, completion).unwrap();
    for (name, handle, rssi) in peripherals {
        platform.advertise(name, *handle, *rssi);
    }
    central.stop_scan().unwrap();
    snapshot.await.unwrap()
}

/// Discovers and connects `name`, answering as a RedBearLab shield with the given handles.
async fn connect_ready(
    central: &ble_central::BleCentral,
    platform: &FakePlatform,
    name: &str,
    handle: u64,
    tx: u64,
    rx: u64,
) {
    central.connect(name).unwrap();
    platform.complete_redbear_connection(handle, tx, rx);
    settle(central).await;
    assert!(central.is_connected(name).await.unwrap());
}

#[tokio::test]
async fn power_cycle_reports_each_transition() {
    let (central, platform, log) = central();
    central.setup().unwrap();
    settle(&central).await;
    assert_eq!(platform.calls(), vec![DriverCall::Setup]);
    assert!(!central.is_ready());

    platform.power(AdapterState::PoweredOn);
    settle(&central).await;
    assert!(central.is_ready());

    platform.power(AdapterState::PoweredOff);
    settle(&central).await;
    assert!(!central.is_ready());
    let (completion, snapshot) = snapshot_channel();
    central.scan(1000, 0, completion).unwrap();
    assert!(snapshot.await.is_err());

    platform.power(AdapterState::PoweredOn);
    settle(&central).await;
    assert!(central.is_ready());
    assert_eq!(
        log.events(),
        vec![
            CentralEvent::PoweredOn,
            CentralEvent::PoweredOff,
            CentralEvent::from(CentralError::NotReady),
            CentralEvent::PoweredOn
        ]
    );
}

#[tokio::test]
async fn ready_watch_follows_adapter() {
    let (central, platform, _log) = central();
    let mut ready = central.ready();
    platform.power(AdapterState::PoweredOn);
    ready.wait_for(|ready| *ready).await.unwrap();
    assert!(central.is_ready());
}

#[tokio::test]
async fn operations_before_power_on_report_not_ready() {
    let (central, _platform, log) = central();
    let (completion, snapshot) = snapshot_channel();
    central.scan(1000, 0, completion).unwrap();
    central.read(None).unwrap();
    settle(&central).await;

    // The rejected session never completes.
    assert!(snapshot.await.is_err());
    assert_eq!(error_kinds(&log.events()), vec![ErrorKind::NotReady, ErrorKind::NotReady]);
}

#[tokio::test]
async fn early_stop_delivers_sorted_snapshot() {
    let (central, platform, log) = powered_central().await;
    let (completion, snapshot) = snapshot_channel();
    central.scan(10_000, 3, completion).unwrap();

    platform.advertise("A", 1, -40);
    platform.advertise("B", 2, -60);
    platform.advertise("B", 2, -62);
    platform.advertise("C", 3, -50);

    let peripherals = snapshot.await.unwrap();
    assert_eq!(ids(&peripherals), vec!["A", "C", "B"]);
    assert_eq!(peripherals[2].rssi, -62);
    assert_eq!(peripherals[0].name.as_deref(), Some("A board"));
    assert!(peripherals.iter().all(|p| p.state == PeripheralState::Discovered));

    // Advertisements after the session ended are ignored.
    platform.advertise("D", 4, -30);
    assert_eq!(ids(&central.peripherals().await.unwrap()), vec!["A", "C", "B"]);
    assert_eq!(
        platform.calls(),
        vec![DriverCall::StartScan(None), DriverCall::StopScan]
    );
    assert!(log.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scan_ends_after_interval() {
    let (central, platform, _log) = powered_central().await;
    let (completion, snapshot) = snapshot_channel();
    central.scan(3000, 0, completion).unwrap();
    platform.advertise("A", 1, -70);
    settle(&central).await;

    let started = tokio::time::Instant::now();
    let peripherals = snapshot.await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(2900));
    assert_eq!(ids(&peripherals), vec!["A"]);
    assert_eq!(platform.calls().last(), Some(&DriverCall::StopScan));
}

#[tokio::test(start_paused = true)]
async fn scan_with_defaults_uses_configured_interval() {
    let config = CentralConfig {
        scan_interval_ms: 500,
        ..CentralConfig::default()
    };
    let (central, platform, _log) = central_with(FakePlatform::new(), &config);
    platform.power(AdapterState::PoweredOn);
    let (completion, snapshot) = snapshot_channel();
    central.scan_with_defaults(completion).unwrap();
    platform.advertise("A", 1, -70);

    assert_eq!(ids(&snapshot.await.unwrap()), vec!["A"]);
}

#[tokio::test]
async fn second_scan_is_busy_and_first_survives() {
    let (central, platform, log) = powered_central().await;
    let (first, first_snapshot) = snapshot_channel();
    let (second, second_snapshot) = snapshot_channel();
    central.scan(0, 0, first).unwrap();
    central.scan(0, 0, second).unwrap();
    platform.advertise("A", 1, -50);
    central.stop_scan().unwrap();

    assert_eq!(ids(&first_snapshot.await.unwrap()), vec!["A"]);
    assert!(second_snapshot.await.is_err());
    assert_eq!(error_kinds(&log.events()), vec![ErrorKind::Busy]);
}

#[tokio::test]
async fn new_scan_clears_previous_results() {
    let (central, platform, _log) = powered_central().await;
    discover(&central, &platform, &[("A", 1, -50)]).await;
    let second = discover(&central, &platform, &[("B", 2, -50)]).await;
    assert_eq!(ids(&second), vec!["B"]);

    // Stopping without a session is a no-op.
    central.stop_scan().unwrap();
    settle(&central).await;
    assert_eq!(
        platform
            .calls()
            .iter()
            .filter(|c| **c == DriverCall::StopScan)
            .count(),
        2
    );
}

#[tokio::test]
async fn scan_filters_by_rssi_floor_and_registry_services() {
    let config = CentralConfig {
        min_rssi: Some(-70),
        scan_for_registry_services: true,
        ..CentralConfig::default()
    };
    let (central, platform, _log) = central_with(FakePlatform::new(), &config);
    platform.power(AdapterState::PoweredOn);

    let found = discover(&central, &platform, &[("near", 1, -60), ("far", 2, -85)]).await;
    assert_eq!(ids(&found), vec!["near"]);
    assert_eq!(
        platform.calls()[0],
        DriverCall::StartScan(Some(vec![
            UUID_REDBEAR_SERVICE,
            UUID_NORDIC_UART_SERVICE,
            UUID_HM10_SERVICE
        ]))
    );
}

#[tokio::test]
async fn connect_discovers_registry_and_reads() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    platform.clear_calls();

    central.connect("P1").unwrap();
    settle(&central).await;
    let active = central.active_peripherals().await.unwrap();
    assert_eq!(active[0].state, PeripheralState::Connecting);
    assert!(!central.is_connected("P1").await.unwrap());

    platform.complete_redbear_connection(1, 10, 11);
    settle(&central).await;
    assert_eq!(log.events(), vec![CentralEvent::Connected(id("P1"))]);
    assert!(central.is_connected("P1").await.unwrap());

    let calls = platform.calls();
    assert_eq!(calls[0], DriverCall::Connect(P1));
    assert_eq!(
        calls[1],
        DriverCall::DiscoverServices(
            P1,
            vec![UUID_REDBEAR_SERVICE, UUID_NORDIC_UART_SERVICE, UUID_HM10_SERVICE]
        )
    );
    assert!(matches!(
        &calls[2],
        DriverCall::DiscoverCharacteristics(P1, service, chars)
            if *service == UUID_REDBEAR_SERVICE && chars.len() == 2
    ));

    central.read(Some("P1")).unwrap();
    settle(&central).await;
    assert_eq!(platform.calls().last(), Some(&DriverCall::ReadValue(P1, TX)));

    platform.post(PlatformEvent::ValueUpdated {
        handle: P1,
        characteristic: TX,
        value: vec![1, 2, 3],
        error: None,
    });
    settle(&central).await;
    assert_eq!(
        log.events().last(),
        Some(&CentralEvent::DataReceived {
            id: id("P1"),
            data: vec![1, 2, 3],
            length: 3
        })
    );
}

#[tokio::test]
async fn notifications_deliver_data() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;
    log.clear();

    central.enable_read_notifications("P1").unwrap();
    // Asking twice subscribes once.
    central.enable_read_notifications("P1").unwrap();
    settle(&central).await;
    let subscriptions: Vec<_> = platform
        .calls()
        .into_iter()
        .filter(|c| matches!(c, DriverCall::SetNotify(..)))
        .collect();
    assert_eq!(subscriptions, vec![DriverCall::SetNotify(P1, TX, true)]);

    platform.post(PlatformEvent::NotificationStateChanged {
        handle: P1,
        characteristic: TX,
        enabled: true,
        error: None,
    });
    platform.post(PlatformEvent::ValueUpdated {
        handle: P1,
        characteristic: TX,
        value: b"hi".to_vec(),
        error: None,
    });
    settle(&central).await;
    assert_eq!(log.events(), vec![CentralEvent::data_received(id("P1"), b"hi".to_vec())]);
}

#[tokio::test]
async fn ready_peripheral_auto_subscribes_when_configured() {
    let config = CentralConfig {
        auto_enable_notifications: true,
        ..CentralConfig::default()
    };
    let (central, platform, _log) = central_with(FakePlatform::new(), &config);
    platform.power(AdapterState::PoweredOn);
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;

    assert_eq!(platform.calls().last(), Some(&DriverCall::SetNotify(P1, TX, true)));
}

#[tokio::test]
async fn write_is_fire_and_forget_without_response() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;
    log.clear();

    central.write(Some("P1"), b"hello").unwrap();
    settle(&central).await;
    assert_eq!(
        platform.calls().last(),
        Some(&DriverCall::WriteValue(P1, RX, b"hello".to_vec(), true))
    );
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn oversized_write_is_rejected() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;
    log.clear();
    platform.clear_calls();

    central.write(None, &[0u8; 21]).unwrap();
    settle(&central).await;
    assert!(platform.calls().is_empty());
    assert_eq!(
        log.events(),
        vec![CentralEvent::from(CentralError::WriteTooLarge {
            len: 21,
            max: 20
        })]
    );
}

#[tokio::test]
async fn platform_write_limit_overrides_default() {
    let platform = FakePlatform::new().with_max_write_len(182);
    let (central, platform, log) = central_with(platform, &CentralConfig::default());
    platform.power(AdapterState::PoweredOn);
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;

    central.write(None, &[7u8; 100]).unwrap();
    settle(&central).await;
    assert_eq!(
        platform.calls().last(),
        Some(&DriverCall::WriteValue(P1, RX, vec![7u8; 100], true))
    );
    assert!(error_kinds(&log.events()).is_empty());
}

#[tokio::test]
async fn connection_loss_and_failure_are_distinguished() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50), ("P2", 2, -60)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;

    platform.post(PlatformEvent::Disconnected {
        handle: P1,
        error: Some("supervision timeout".to_string()),
    });
    central.connect(P2).unwrap();
    platform.post(PlatformEvent::FailedToConnect {
        handle: P2,
        error: Some("peer refused".to_string()),
    });
    settle(&central).await;

    assert_eq!(
        log.events(),
        vec![
            CentralEvent::Connected(id("P1")),
            CentralEvent::ConnectionLost(id("P1")),
            CentralEvent::FailToConnect(id("P2")),
        ]
    );
    assert!(central.active_peripherals().await.unwrap().is_empty());
}

#[tokio::test]
async fn link_dropped_during_discovery_is_a_failed_connect() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    central.connect("P1").unwrap();
    platform.post(PlatformEvent::Connected { handle: P1 });
    platform.post(PlatformEvent::Disconnected {
        handle: P1,
        error: None,
    });
    settle(&central).await;

    assert_eq!(log.events(), vec![CentralEvent::FailToConnect(id("P1"))]);
}

#[tokio::test]
async fn operations_fall_back_to_first_connected() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50), ("P2", 2, -60)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;
    connect_ready(&central, &platform, "P2", 2, 20, 21).await;
    log.clear();

    central.read(None).unwrap();
    settle(&central).await;
    assert_eq!(platform.calls().last(), Some(&DriverCall::ReadValue(P1, TX)));
    central.read(Some("P2")).unwrap();
    settle(&central).await;
    assert_eq!(
        platform.calls().last(),
        Some(&DriverCall::ReadValue(P2, CharacteristicHandle(20)))
    );

    central.disconnect("P1").unwrap();
    settle(&central).await;
    assert_eq!(platform.calls().last(), Some(&DriverCall::Disconnect(P1)));
    platform.post(PlatformEvent::Disconnected {
        handle: P1,
        error: None,
    });
    central.read(None).unwrap();
    settle(&central).await;

    assert_eq!(
        platform.calls().last(),
        Some(&DriverCall::ReadValue(P2, CharacteristicHandle(20)))
    );
    assert_eq!(log.events(), vec![CentralEvent::Disconnected(id("P1"))]);
    assert_eq!(ids(&central.active_peripherals().await.unwrap()), vec!["P2"]);
}

#[tokio::test]
async fn targets_resolve_by_id_and_handle() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;

    central.connect(P1).unwrap();
    central.read(Some("P9")).unwrap();
    central.disconnect("P9").unwrap();
    settle(&central).await;

    assert!(platform.calls().contains(&DriverCall::Connect(P1)));
    assert_eq!(
        error_kinds(&log.events()),
        vec![ErrorKind::NotFound, ErrorKind::NotFound]
    );
}

#[tokio::test]
async fn disconnect_cancels_pending_connect() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    central.connect("P1").unwrap();
    central.disconnect("P1").unwrap();
    settle(&central).await;
    assert_eq!(platform.calls().last(), Some(&DriverCall::CancelConnect(P1)));

    // The link came up before the cancel took effect: no longer wanted.
    platform.post(PlatformEvent::Connected { handle: P1 });
    settle(&central).await;
    assert!(log.events().is_empty());
    assert!(!platform
        .calls()
        .iter()
        .any(|c| matches!(c, DriverCall::DiscoverServices(..))));

    platform.post(PlatformEvent::Disconnected {
        handle: P1,
        error: None,
    });
    settle(&central).await;
    assert_eq!(log.events(), vec![CentralEvent::Disconnected(id("P1"))]);
    assert!(central.active_peripherals().await.unwrap().is_empty());
}

#[tokio::test]
async fn connect_supersedes_pending_disconnect() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;
    log.clear();

    central.disconnect("P1").unwrap();
    central.connect("P1").unwrap();
    // The teardown callback of the replaced link is dropped.
    platform.post(PlatformEvent::Disconnected {
        handle: P1,
        error: None,
    });
    settle(&central).await;
    let active = central.active_peripherals().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].state, PeripheralState::Connecting);

    platform.complete_redbear_connection(1, 12, 13);
    settle(&central).await;
    assert_eq!(log.events(), vec![CentralEvent::Connected(id("P1"))]);
    assert!(central.is_connected("P1").await.unwrap());
}

#[tokio::test]
async fn missing_characteristic_tears_link_down() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    central.connect("P1").unwrap();
    platform.post(PlatformEvent::Connected { handle: P1 });
    platform.post(PlatformEvent::ServicesDiscovered {
        handle: P1,
        services: vec![UUID_REDBEAR_SERVICE],
        error: None,
    });
    platform.post(PlatformEvent::CharacteristicsDiscovered {
        handle: P1,
        service: UUID_REDBEAR_SERVICE,
        characteristics: vec![(UUID_REDBEAR_TX_CHAR, TX)],
        error: None,
    });
    settle(&central).await;
    assert_eq!(platform.calls().last(), Some(&DriverCall::Disconnect(P1)));
    assert!(!central.is_connected("P1").await.unwrap());

    platform.post(PlatformEvent::Disconnected {
        handle: P1,
        error: None,
    });
    settle(&central).await;
    let events = log.events();
    assert_eq!(error_kinds(&events), vec![ErrorKind::CharacteristicMissing]);
    assert_eq!(events.last(), Some(&CentralEvent::FailToConnect(id("P1"))));
}

#[tokio::test]
async fn peripheral_without_registered_services_is_ready() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    central.connect("P1").unwrap();
    platform.post(PlatformEvent::Connected { handle: P1 });
    platform.post(PlatformEvent::ServicesDiscovered {
        handle: P1,
        services: Vec::new(),
        error: None,
    });
    central.read(Some("P1")).unwrap();
    settle(&central).await;

    let events = log.events();
    assert_eq!(events[0], CentralEvent::Connected(id("P1")));
    assert_eq!(error_kinds(&events), vec![ErrorKind::CharacteristicMissing]);
}

#[tokio::test]
async fn stray_callbacks_are_ignored() {
    let (central, platform, log) = powered_central().await;
    platform.post(PlatformEvent::Connected {
        handle: PlatformHandle(99),
    });
    platform.post(PlatformEvent::ValueUpdated {
        handle: PlatformHandle(99),
        characteristic: TX,
        value: vec![1],
        error: None,
    });
    platform.post(PlatformEvent::Disconnected {
        handle: PlatformHandle(99),
        error: None,
    });
    platform.post(PlatformEvent::RssiRead {
        handle: PlatformHandle(99),
        rssi: Ok(-40),
    });
    settle(&central).await;
    assert!(log.events().is_empty());
    assert!(central.active_peripherals().await.unwrap().is_empty());
}

#[tokio::test]
async fn rssi_read_updates_record() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;
    log.clear();

    central.read_rssi(Some("P1")).unwrap();
    settle(&central).await;
    assert_eq!(platform.calls().last(), Some(&DriverCall::ReadRssi(P1)));

    platform.post(PlatformEvent::RssiRead {
        handle: P1,
        rssi: Ok(-42),
    });
    settle(&central).await;
    assert_eq!(
        log.events(),
        vec![CentralEvent::RssiUpdated {
            id: id("P1"),
            rssi: -42
        }]
    );
    assert_eq!(central.active_peripherals().await.unwrap()[0].rssi, -42);
}

#[tokio::test]
async fn power_loss_ends_scan_and_drops_links() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50), ("P2", 2, -60)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;
    central.connect("P2").unwrap();
    let (completion, snapshot) = snapshot_channel();
    central.scan(0, 0, completion).unwrap();
    settle(&central).await;
    log.clear();

    platform.power(AdapterState::PoweredOff);
    assert!(snapshot.await.unwrap().is_empty());
    settle(&central).await;

    assert_eq!(
        log.events(),
        vec![
            CentralEvent::PoweredOff,
            CentralEvent::ConnectionLost(id("P1")),
            CentralEvent::FailToConnect(id("P2")),
        ]
    );
    assert!(central.active_peripherals().await.unwrap().is_empty());
}

#[tokio::test]
async fn set_services_validates_before_replacing() {
    let (central, _platform, _log) = central();
    assert_eq!(central.services().await.unwrap().len(), 3);

    let malformed = ServiceConfig {
        service: "not-a-uuid".to_string(),
        read: Some("2A37".to_string()),
        ..ServiceConfig::default()
    };
    assert!(matches!(
        central.set_services(&[malformed]),
        Err(CentralError::MalformedUuid(_))
    ));
    let bare = ServiceConfig {
        service: "180D".to_string(),
        ..ServiceConfig::default()
    };
    assert!(matches!(
        central.set_services(&[bare]),
        Err(CentralError::InvalidService(_))
    ));
    assert_eq!(central.services().await.unwrap().len(), 3);

    let heart_rate = ServiceConfig {
        service: "180D".to_string(),
        notify: Some("2A37".to_string()),
        ..ServiceConfig::default()
    };
    central.set_services(&[heart_rate.clone()]).unwrap();
    let services = central.services().await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].service, "0000180d-0000-1000-8000-00805f9b34fb");

    let merged = central.include_defaults(&[heart_rate]).unwrap();
    assert_eq!(merged.len(), 4);
    assert_eq!(merged[0].service, services[0].service);
}

#[tokio::test]
async fn empty_registry_config_skips_defaults() {
    let config = CentralConfig {
        include_default_services: false,
        ..CentralConfig::default()
    };
    let (central, platform, log) = central_with(FakePlatform::new(), &config);
    platform.power(AdapterState::PoweredOn);
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    log.clear();

    central.connect("P1").unwrap();
    platform.post(PlatformEvent::Connected { handle: P1 });
    settle(&central).await;
    assert!(central.services().await.unwrap().is_empty());
    assert_eq!(log.events(), vec![CentralEvent::Connected(id("P1"))]);
}

#[tokio::test]
async fn shutdown_releases_links_and_closes_handle() {
    let (central, platform, _log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50), ("P2", 2, -60)]).await;
    connect_ready(&central, &platform, "P1", 1, 10, 11).await;
    central.connect("P2").unwrap();

    central.shutdown().await.unwrap();
    let calls = platform.calls();
    assert!(calls.contains(&DriverCall::Disconnect(P1)));
    assert!(calls.contains(&DriverCall::CancelConnect(P2)));

    assert_eq!(central.connect("P1"), Err(CentralError::Closed));
    assert_eq!(central.peripherals().await, Err(CentralError::Closed));
}

#[tokio::test]
async fn failed_platform_scan_completes_session_with_error() {
    let (central, platform, log) = powered_central().await;
    let (completion, snapshot) = snapshot_channel();
    central.scan(0, 0, completion).unwrap();
    platform.advertise("A", 1, -50);
    platform.post(PlatformEvent::ScanFailed {
        error: "adapter busy".to_string(),
    });

    assert_eq!(ids(&snapshot.await.unwrap()), vec!["A"]);
    settle(&central).await;
    assert_eq!(error_kinds(&log.events()), vec![ErrorKind::PlatformError]);
    assert_eq!(platform.calls().last(), Some(&DriverCall::StopScan));

    // A late failure report with no session open is dropped.
    platform.post(PlatformEvent::ScanFailed {
        error: "adapter busy".to_string(),
    });
    settle(&central).await;
    assert_eq!(log.events().len(), 1);
}

#[tokio::test]
async fn operations_on_unready_peripheral_report_not_connected() {
    let (central, platform, log) = powered_central().await;
    discover(&central, &platform, &[("P1", 1, -50)]).await;
    central.connect("P1").unwrap();
    // The link is up but discovery never answers.
    platform.post(PlatformEvent::Connected { handle: P1 });
    settle(&central).await;
    platform.clear_calls();

    central.read(Some("P1")).unwrap();
    central.write(None, &[1]).unwrap();
    central.enable_read_notifications("P1").unwrap();
    central.read_rssi(Some("P1")).unwrap();
    settle(&central).await;

    assert_eq!(
        error_kinds(&log.events()),
        vec![
            ErrorKind::NotConnected,
            ErrorKind::NotConnected,
            ErrorKind::NotConnected,
            ErrorKind::NotConnected
        ]
    );
    assert!(platform.calls().is_empty());
    assert!(!central.is_connected("P1").await.unwrap());
}

#[tokio::test]
async fn cleared_observer_receives_nothing() {
    let (central, platform, log) = central();
    central.clear_observer().unwrap();
    platform.power(AdapterState::PoweredOn);
    settle(&central).await;

    assert!(central.is_ready());
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn new_observer_replaces_previous_one() {
    let (central, platform, first) = central();
    platform.power(AdapterState::PoweredOn);
    settle(&central).await;

    let second = EventLog::default();
    central.set_observer(second.sink()).unwrap();
    platform.power(AdapterState::PoweredOff);
    settle(&central).await;

    assert_eq!(first.events(), vec![CentralEvent::PoweredOn]);
    assert_eq!(second.events(), vec![CentralEvent::PoweredOff]);
}

#[tokio::test]
async fn shared_central_is_created_once() {
    assert!(state::shared().is_none());
    let config = CentralConfig::default();
    let first = state::shared_or_init(FakePlatform::new, &config).unwrap();
    let second = state::shared_or_init(
        || -> FakePlatform { panic!("shared central built twice") },
        &config,
    )
    .unwrap();
    assert!(std::ptr::eq(first, second));
    assert!(std::ptr::eq(state::shared().unwrap(), first));
    assert_eq!(first.services().await.unwrap().len(), 3);

    // Independent centrals keep working next to the shared one.
    let (independent, platform, log) = powered_central().await;
    assert!(!std::ptr::eq(first, &independent));
    discover(&independent, &platform, &[("P1", 1, -50)]).await;
    assert!(!first.is_ready());
    assert!(log.events().is_empty());
}
