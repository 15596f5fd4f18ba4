#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use ble_central::core::bluetooth::{
    AdapterState, CharacteristicHandle, PlatformHandle, UUID_REDBEAR_RX_CHAR,
    UUID_REDBEAR_SERVICE, UUID_REDBEAR_TX_CHAR,
};
use ble_central::{
    BleCentral, CentralConfig, CentralEvent, PlatformDriver, PlatformEvent, PlatformEvents,
};
use uuid::Uuid;

/// A driver call as the fake platform saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Setup,
    StartScan(Option<Vec<Uuid>>),
    StopScan,
    Connect(PlatformHandle),
    CancelConnect(PlatformHandle),
    Disconnect(PlatformHandle),
    DiscoverServices(PlatformHandle, Vec<Uuid>),
    DiscoverCharacteristics(PlatformHandle, Uuid, Vec<Uuid>),
    ReadValue(PlatformHandle, CharacteristicHandle),
    WriteValue(PlatformHandle, CharacteristicHandle, Vec<u8>, bool),
    SetNotify(PlatformHandle, CharacteristicHandle, bool),
    ReadRssi(PlatformHandle),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<DriverCall>,
    events: Option<PlatformEvents>,
    max_write_len: Option<usize>,
}

/// Recording platform driver; tests play the platform by posting events through it.
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_write_len(self, len: usize) -> Self {
        self.state.lock().unwrap().max_write_len = Some(len);
        self
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn post(&self, event: PlatformEvent) {
        let events = self.state.lock().unwrap().events.clone();
        assert!(events.expect("driver not attached").send(event));
    }

    pub fn power(&self, state: AdapterState) {
        self.post(PlatformEvent::StateChanged(state));
    }

    pub fn advertise(&self, id: &str, handle: u64, rssi: i16) {
        self.post(PlatformEvent::Advertisement {
            handle: PlatformHandle(handle),
            id: id.into(),
            name: Some(format!("{} board", id)),
            rssi,
        });
    }

    /// Answers a connect the way a RedBearLab shield does: the link comes up, the
    /// service is found and both characteristics are discovered.
    pub fn complete_redbear_connection(&self, handle: u64, tx: u64, rx: u64) {
        let handle = PlatformHandle(handle);
        self.post(PlatformEvent::Connected { handle });
        self.post(PlatformEvent::ServicesDiscovered {
            handle,
            services: vec![UUID_REDBEAR_SERVICE],
            error: None,
        });
        self.post(PlatformEvent::CharacteristicsDiscovered {
            handle,
            service: UUID_REDBEAR_SERVICE,
            characteristics: vec![
                (UUID_REDBEAR_TX_CHAR, CharacteristicHandle(tx)),
                (UUID_REDBEAR_RX_CHAR, CharacteristicHandle(rx)),
            ],
            error: None,
        });
    }

    fn record(&self, call: DriverCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl PlatformDriver for FakePlatform {
    fn attach(&mut self, events: PlatformEvents) {
        self.state.lock().unwrap().events = Some(events);
    }

    fn setup(&mut self) {
        self.record(DriverCall::Setup);
    }

    fn start_scan(&mut self, services: Option<&[Uuid]>, _allow_duplicates: bool) {
        self.record(DriverCall::StartScan(services.map(<[Uuid]>::to_vec)));
    }

    fn stop_scan(&mut self) {
        self.record(DriverCall::StopScan);
    }

    fn connect(&mut self, peripheral: PlatformHandle) {
        self.record(DriverCall::Connect(peripheral));
    }

    fn cancel_connect(&mut self, peripheral: PlatformHandle) {
        self.record(DriverCall::CancelConnect(peripheral));
    }

    fn disconnect(&mut self, peripheral: PlatformHandle) {
        self.record(DriverCall::Disconnect(peripheral));
    }

    fn discover_services(&mut self, peripheral: PlatformHandle, services: &[Uuid]) {
        self.record(DriverCall::DiscoverServices(peripheral, services.to_vec()));
    }

    fn discover_characteristics(
        &mut self,
        peripheral: PlatformHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        self.record(DriverCall::DiscoverCharacteristics(
            peripheral,
            service,
            characteristics.to_vec(),
        ));
    }

    fn read_value(&mut self, peripheral: PlatformHandle, characteristic: CharacteristicHandle) {
        self.record(DriverCall::ReadValue(peripheral, characteristic));
    }

    fn write_value(
        &mut self,
        peripheral: PlatformHandle,
        characteristic: CharacteristicHandle,
        value: &[u8],
        without_response: bool,
    ) {
        self.record(DriverCall::WriteValue(
            peripheral,
            characteristic,
            value.to_vec(),
            without_response,
        ));
    }

    fn set_notify(
        &mut self,
        peripheral: PlatformHandle,
        characteristic: CharacteristicHandle,
        enabled: bool,
    ) {
        self.record(DriverCall::SetNotify(peripheral, characteristic, enabled));
    }

    fn read_rssi(&mut self, peripheral: PlatformHandle) {
        self.record(DriverCall::ReadRssi(peripheral));
    }

    fn maximum_write_len(
        &self,
        _peripheral: PlatformHandle,
        _characteristic: CharacteristicHandle,
    ) -> Option<usize> {
        self.state.lock().unwrap().max_write_len
    }
}

/// Collects every event the central emits.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<CentralEvent>>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<CentralEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// An observer that appends to this log.
    pub fn sink(&self) -> impl Fn(CentralEvent) + Send + 'static {
        let events = self.events.clone();
        move |event: CentralEvent| events.lock().unwrap().push(event)
    }
}

/// Central over a fresh fake platform with the default config and a recording observer.
pub fn central() -> (BleCentral, FakePlatform, EventLog) {
    central_with(FakePlatform::new(), &CentralConfig::default())
}

pub fn central_with(
    platform: FakePlatform,
    config: &CentralConfig,
) -> (BleCentral, FakePlatform, EventLog) {
    let central = BleCentral::new(platform.clone(), config).unwrap();
    let log = EventLog::default();
    central.set_observer(log.sink()).unwrap();
    (central, platform, log)
}

/// Central whose adapter already reported power-on, with the event log cleared.
pub async fn powered_central() -> (BleCentral, FakePlatform, EventLog) {
    let (central, platform, log) = central();
    platform.power(AdapterState::PoweredOn);
    settle(&central).await;
    log.clear();
    (central, platform, log)
}

/// Waits until the dispatch task handled everything posted so far.
pub async fn settle(central: &BleCentral) {
    central.peripherals().await.unwrap();
}
