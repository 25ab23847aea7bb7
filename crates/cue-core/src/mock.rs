//! Mock radio implementation for testing.
//!
//! This module provides a scripted radio and peripherals that can be used
//! for unit and integration testing without BLE hardware, plus recording
//! doubles for the publish and control-channel seams.
//!
//! # Features
//!
//! - **Failure injection**: hang connect or disconnect, fail reads, hide characteristics
//! - **Link latency**: the link comes up some time after the connect request
//! - **Scripted values**: queue successive characteristic reads
//! - **Call counters**: observe scan starts, connects, discoveries and writes

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use cue_types::uuids::{
    AUDIO_LEVEL, BATTERY_LEVEL, BATTERY_SERVICE, CUE_SERVICE, RSSI_LEVEL, THRESHOLD_LEVEL,
    service_token,
};
use cue_types::{Reply, ServiceData, Topic};

use crate::error::{Error, Result};
use crate::publish::{ClientAddress, ControlChannel, Publisher};
use crate::radio::{
    Characteristic, Discovery, LinkState, Radio, RadioEvent, RadioPeripheral, RadioState,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// --- Radio ---

/// A scripted radio adapter.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cue_core::mock::{MockPeripheral, MockRadio};
/// use cue_core::Radio;
///
/// #[tokio::main]
/// async fn main() {
///     let radio = MockRadio::new();
///     radio.start_scan().await.unwrap();
///     assert!(radio.is_scanning());
///
///     let sensor = Arc::new(MockPeripheral::new("00:a0:50:cf:66:d7"));
///     radio.discover(sensor.advertise("home-cue", b"BUTTON"));
/// }
/// ```
pub struct MockRadio {
    state: Mutex<RadioState>,
    sender: mpsc::UnboundedSender<RadioEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<RadioEvent>>>,
    scanning: AtomicBool,
    start_count: AtomicU32,
    stop_count: AtomicU32,
}

impl std::fmt::Debug for MockRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRadio")
            .field("state", &*lock(&self.state))
            .field("scanning", &self.is_scanning())
            .finish()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// Create a powered-on radio.
    pub fn new() -> Self {
        Self::with_state(RadioState::PoweredOn)
    }

    /// Create a radio that is still powered off.
    pub fn powered_off() -> Self {
        Self::with_state(RadioState::PoweredOff)
    }

    fn with_state(state: RadioState) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(state),
            sender,
            receiver: Mutex::new(Some(receiver)),
            scanning: AtomicBool::new(false),
            start_count: AtomicU32::new(0),
            stop_count: AtomicU32::new(0),
        }
    }

    /// Change the power state and emit the matching event.
    pub fn set_state(&self, state: RadioState) {
        *lock(&self.state) = state;
        if state != RadioState::PoweredOn {
            self.scanning.store(false, Ordering::SeqCst);
        }
        let _ = self.sender.send(RadioEvent::StateChanged(state));
    }

    /// Deliver an advertisement.
    pub fn discover(&self, discovery: Discovery) {
        let _ = self.sender.send(RadioEvent::Discovered(discovery));
    }

    /// Whether a hardware scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Number of successful scan starts.
    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of scan stops.
    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn state(&self) -> RadioState {
        *lock(&self.state)
    }

    async fn start_scan(&self) -> Result<()> {
        if *lock(&self.state) != RadioState::PoweredOn {
            return Err(Error::RadioNotReady);
        }
        self.scanning.store(true, Ordering::SeqCst);
        self.start_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scanning.store(false, Ordering::SeqCst);
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent>> {
        let receiver = lock(&self.receiver)
            .take()
            .ok_or_else(|| Error::InvalidData("event stream already taken".to_string()))?;
        Ok(futures::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

// --- Peripheral ---

#[derive(Debug)]
struct Slot {
    service: Uuid,
    value: Vec<u8>,
    queued: VecDeque<Vec<u8>>,
}

impl Slot {
    fn new(service: Uuid, value: Vec<u8>) -> Self {
        Self {
            service,
            value,
            queued: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Link {
    Down,
    UpAt(Instant),
}

/// A scripted home-cue peripheral.
///
/// Starts out exposing the audio level, threshold, link quality and battery
/// characteristics.
#[derive(Debug)]
pub struct MockPeripheral {
    address: String,
    link: Mutex<Link>,
    link_delay: Mutex<Duration>,
    read_delay: Mutex<Duration>,
    slots: Mutex<HashMap<Uuid, Slot>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    hang_connect: AtomicBool,
    reject_connect: AtomicBool,
    hang_disconnect: AtomicBool,
    fail_reads: AtomicBool,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
    discover_count: AtomicU32,
    read_count: AtomicU32,
}

impl MockPeripheral {
    /// Create a peripheral with the given hardware address.
    pub fn new(address: &str) -> Self {
        let mut slots = HashMap::new();
        slots.insert(AUDIO_LEVEL, Slot::new(CUE_SERVICE, vec![0]));
        slots.insert(THRESHOLD_LEVEL, Slot::new(CUE_SERVICE, vec![128]));
        slots.insert(RSSI_LEVEL, Slot::new(CUE_SERVICE, vec![0xC4]));
        slots.insert(BATTERY_LEVEL, Slot::new(BATTERY_SERVICE, vec![90]));

        Self {
            address: address.to_string(),
            link: Mutex::new(Link::Down),
            link_delay: Mutex::new(Duration::ZERO),
            read_delay: Mutex::new(Duration::ZERO),
            slots: Mutex::new(slots),
            writes: Mutex::new(Vec::new()),
            hang_connect: AtomicBool::new(false),
            reject_connect: AtomicBool::new(false),
            hang_disconnect: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            connect_count: AtomicU32::new(0),
            disconnect_count: AtomicU32::new(0),
            discover_count: AtomicU32::new(0),
            read_count: AtomicU32::new(0),
        }
    }

    /// Create a peripheral with a random address.
    pub fn random() -> Self {
        let bytes: [u8; 6] = rand::random();
        let address = bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        Self::new(&address)
    }

    /// Build an advertisement carrying `payload` as service data.
    pub fn advertise(self: &Arc<Self>, name: &str, payload: &[u8]) -> Discovery {
        self.discovery(
            name,
            vec![ServiceData::new(service_token(&BATTERY_SERVICE), payload.to_vec())],
        )
    }

    /// Build an advertisement in the first-generation format, where the
    /// trigger is the service UUID token and the payload is empty.
    pub fn advertise_legacy(self: &Arc<Self>, name: &str, token: &str) -> Discovery {
        self.discovery(name, vec![ServiceData::new(token, Vec::new())])
    }

    /// Build an advertisement with arbitrary service data.
    pub fn discovery(self: &Arc<Self>, name: &str, service_data: Vec<ServiceData>) -> Discovery {
        Discovery {
            local_name: Some(name.to_string()),
            service_data,
            rssi: Some(-60),
            address: self.address.clone(),
            peripheral: Arc::clone(self) as Arc<dyn RadioPeripheral>,
        }
    }

    // --- Test control methods ---

    /// Never complete connect requests.
    pub fn set_hang_connect(&self, hang: bool) {
        self.hang_connect.store(hang, Ordering::SeqCst);
    }

    /// Refuse connect requests right away.
    pub fn set_reject_connect(&self, reject: bool) {
        self.reject_connect.store(reject, Ordering::SeqCst);
    }

    /// Never complete disconnect requests.
    pub fn set_hang_disconnect(&self, hang: bool) {
        self.hang_disconnect.store(hang, Ordering::SeqCst);
    }

    /// Fail every characteristic read.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Time every characteristic read takes. The link is checked afterwards.
    pub fn set_read_delay(&self, delay: Duration) {
        *lock(&self.read_delay) = delay;
    }

    /// Delay between a connect request returning and the link coming up.
    pub fn set_link_delay(&self, delay: Duration) {
        *lock(&self.link_delay) = delay;
    }

    /// Set the value returned by reads of `uuid`.
    pub fn set_value(&self, uuid: Uuid, value: Vec<u8>) {
        lock(&self.slots)
            .entry(uuid)
            .or_insert_with(|| Slot::new(CUE_SERVICE, Vec::new()))
            .value = value;
    }

    /// Queue values returned by successive reads of `uuid` before falling
    /// back to its current value.
    pub fn queue_reads(&self, uuid: Uuid, values: impl IntoIterator<Item = Vec<u8>>) {
        lock(&self.slots)
            .entry(uuid)
            .or_insert_with(|| Slot::new(CUE_SERVICE, Vec::new()))
            .queued
            .extend(values);
    }

    /// Hide a characteristic from discovery.
    pub fn remove_characteristic(&self, uuid: Uuid) {
        lock(&self.slots).remove(&uuid);
    }

    /// Current value of a characteristic.
    pub fn value(&self, uuid: Uuid) -> Option<Vec<u8>> {
        lock(&self.slots).get(&uuid).map(|slot| slot.value.clone())
    }

    /// Every write performed, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.writes).clone()
    }

    /// Whether the link is currently up.
    pub fn is_connected(&self) -> bool {
        matches!(*lock(&self.link), Link::UpAt(at) if Instant::now() >= at)
    }

    /// Number of connect requests.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Number of disconnect requests.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    /// Number of characteristic discoveries.
    pub fn discover_count(&self) -> u32 {
        self.discover_count.load(Ordering::SeqCst)
    }

    /// Number of characteristic reads.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn handle(&self, uuid: Uuid) -> Result<Characteristic> {
        let slots = lock(&self.slots);
        slots
            .get(&uuid)
            .map(|slot| Characteristic {
                uuid,
                service_uuid: slot.service,
            })
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), slots.len()))
    }
}

#[async_trait]
impl RadioPeripheral for MockPeripheral {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn link_state(&self) -> LinkState {
        match *lock(&self.link) {
            Link::Down => LinkState::Disconnected,
            Link::UpAt(at) if Instant::now() >= at => LinkState::Connected,
            Link::UpAt(_) => LinkState::Connecting,
        }
    }

    async fn connect(&self) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if self.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.reject_connect.load(Ordering::SeqCst) {
            return Err(Error::InvalidData("Mock connect rejected".to_string()));
        }
        let delay = *lock(&self.link_delay);
        *lock(&self.link) = Link::UpAt(Instant::now() + delay);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        if self.hang_disconnect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        *lock(&self.link) = Link::Down;
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.discover_count.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.slots)
            .iter()
            .map(|(uuid, slot)| Characteristic {
                uuid: *uuid,
                service_uuid: slot.service,
            })
            .collect())
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let delay = *lock(&self.read_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.read_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::InvalidData("Mock read failure".to_string()));
        }
        let mut slots = lock(&self.slots);
        let available = slots.len();
        let slot = slots.get_mut(&characteristic.uuid).ok_or_else(|| {
            Error::characteristic_not_found(characteristic.uuid.to_string(), available)
        })?;
        Ok(slot.queued.pop_front().unwrap_or_else(|| slot.value.clone()))
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        {
            let mut slots = lock(&self.slots);
            let available = slots.len();
            let slot = slots.get_mut(&characteristic.uuid).ok_or_else(|| {
                Error::characteristic_not_found(characteristic.uuid.to_string(), available)
            })?;
            slot.value = data.to_vec();
        }
        lock(&self.writes).push((characteristic.uuid, data.to_vec()));
        Ok(())
    }
}

// --- Transports ---

/// A publisher that records every publish.
#[derive(Debug, Default)]
pub struct MockPublisher {
    published: Mutex<Vec<(Topic, Value)>>,
    should_fail: AtomicBool,
}

impl MockPublisher {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Everything published so far.
    pub fn published(&self) -> Vec<(Topic, Value)> {
        lock(&self.published).clone()
    }

    /// Payloads published to one topic.
    pub fn payloads(&self, topic: Topic) -> Vec<Value> {
        lock(&self.published)
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, topic: Topic, payload: Value) -> Result<()> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(Error::Publish("Mock publish failure".to_string()));
        }
        lock(&self.published).push((topic, payload));
        Ok(())
    }
}

/// A control channel that records every reply.
#[derive(Debug, Default)]
pub struct MockControlChannel {
    replies: Mutex<Vec<(ClientAddress, Reply)>>,
}

impl MockControlChannel {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every reply sent so far.
    pub fn replies(&self) -> Vec<(ClientAddress, Reply)> {
        lock(&self.replies).clone()
    }

    /// Replies sent to one client.
    pub fn replies_to(&self, client: &ClientAddress) -> Vec<Reply> {
        lock(&self.replies)
            .iter()
            .filter(|(to, _)| to == client)
            .map(|(_, reply)| reply.clone())
            .collect()
    }
}

#[async_trait]
impl ControlChannel for MockControlChannel {
    async fn reply(&self, to: &ClientAddress, reply: Reply) -> Result<()> {
        lock(&self.replies).push((to.clone(), reply));
        Ok(())
    }
}
