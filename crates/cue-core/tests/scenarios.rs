//! End-to-end scenarios for cue-core.
//!
//! Every test drives a full [`ModeController`] over the mock radio with
//! tokio's clock paused, so probe intervals and the pairing window elapse
//! instantly.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use cue_core::mock::{MockControlChannel, MockPeripheral, MockPublisher, MockRadio};
use cue_core::uuids::AUDIO_LEVEL;
use cue_core::{
    ClientAddress, Command, ConnectionState, ControlChannel, EngineConfig, EventDispatcher,
    KnownSensorRegistry, MemoryStore, Mode, ModeController, Publisher, Radio, Reply, SensorEvent,
    RegistryStore, SensorId, StrategyContext, StrategyKind, Topic,
};

const KNOWN: &str = "00:A0:50:CF:66:D7";
const STRANGER: &str = "00:A0:50:59:6A:A0";

struct Station {
    radio: Arc<MockRadio>,
    store: Arc<MemoryStore>,
    channel: Arc<MockControlChannel>,
    publisher: Arc<MockPublisher>,
    events: EventDispatcher,
    controller: Arc<ModeController>,
    cancel: CancellationToken,
}

impl Drop for Station {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn station() -> Station {
    let store = Arc::new(MemoryStore::with_ids([id(KNOWN)]));
    let events = EventDispatcher::default();
    let ctx = StrategyContext {
        config: EngineConfig::default(),
        registry: Arc::new(KnownSensorRegistry::open(Arc::clone(&store)).await.unwrap()),
        events: events.clone(),
    };
    let radio = Arc::new(MockRadio::new());
    let channel = Arc::new(MockControlChannel::new());
    let publisher = Arc::new(MockPublisher::new());
    let controller = ModeController::new(
        Arc::clone(&radio) as Arc<dyn Radio>,
        ctx,
        Arc::clone(&channel) as Arc<dyn ControlChannel>,
    );

    let cancel = CancellationToken::new();
    controller.spawn_relay(
        Arc::clone(&publisher) as Arc<dyn Publisher>,
        cancel.clone(),
    );
    {
        let controller = Arc::clone(&controller);
        let cancel = cancel.clone();
        tokio::spawn(async move { controller.run(cancel).await });
    }
    settle().await;

    Station {
        radio,
        store,
        channel,
        publisher,
        events,
        controller,
        cancel,
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    sleep(Duration::from_millis(200)).await;
}

fn id(address: &str) -> SensorId {
    address.parse().unwrap()
}

fn operator() -> ClientAddress {
    ClientAddress::new("192.168.1.20:51234")
}

#[tokio::test(start_paused = true)]
async fn test_scenario_pairing_new_sensor() {
    let s = station().await;
    let mut events = s.events.subscribe();
    s.controller.handle(&operator(), Command::PairingMode).await;

    let stranger = Arc::new(MockPeripheral::new(STRANGER));
    s.radio.discover(stranger.advertise("home-cue", b"BUTTON"));
    settle().await;

    // Registry gained the id, in memory and in the store.
    assert!(s.controller.registry().knows(&id(STRANGER)).await);
    assert!(s.store.load().await.unwrap().contains(&id(STRANGER)));

    // The new-sensor event carries that id.
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&SensorEvent::NewSensor { id: id(STRANGER) }));
    assert_eq!(
        s.publisher.payloads(Topic::NewSensor),
        vec![json!({ "id": "00a050596aa0" })]
    );

    // Scanning resumed in listening mode.
    assert_eq!(stranger.connect_count(), 1);
    assert!(!stranger.is_connected());
    assert!(s.controller.scanner().is_scanning().await);
    assert_eq!(
        s.controller.scanner().strategy_kind().await,
        StrategyKind::Listening
    );
    assert_eq!(s.controller.mode().await, Mode::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_known_sensor_audio() {
    let s = station().await;
    let known = Arc::new(MockPeripheral::new(KNOWN));
    s.radio.discover(known.advertise("home-cue", b"AUDIO"));
    settle().await;

    assert_eq!(known.connect_count(), 1);
    assert_eq!(known.disconnect_count(), 1);
    assert!(!known.is_connected());
    assert_eq!(
        s.publisher.payloads(Topic::Notification),
        vec![json!({ "id": "00a050cf66d7" })]
    );
    let heartbeats = s.publisher.payloads(Topic::Heartbeat);
    assert_eq!(heartbeats.len(), 1);
    assert_eq!(heartbeats[0]["signal_strength"], -60);
    assert!(s.controller.scanner().is_scanning().await);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_audio_reported_when_acknowledge_fails() {
    let s = station().await;
    let known = Arc::new(MockPeripheral::new(KNOWN));
    known.set_reject_connect(true);
    s.radio.discover(known.advertise("home-cue", b"AUDIO"));
    settle().await;

    assert_eq!(known.connect_count(), 1);
    assert!(!known.is_connected());
    assert_eq!(
        s.publisher.payloads(Topic::Notification),
        vec![json!({ "id": "00a050cf66d7" })]
    );
    assert_eq!(s.publisher.payloads(Topic::Heartbeat).len(), 1);
    assert!(s.controller.scanner().is_scanning().await);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_legacy_firmware_trigger() {
    let s = station().await;
    let known = Arc::new(MockPeripheral::new(KNOWN));
    s.radio.discover(known.advertise_legacy("home-cue", "4f49445541"));
    settle().await;

    assert_eq!(s.publisher.payloads(Topic::Notification).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_unknown_sensor_is_ignored_while_listening() {
    let s = station().await;
    let stranger = Arc::new(MockPeripheral::new(STRANGER));
    s.radio.discover(stranger.advertise("home-cue", b"BUTTON"));
    s.radio.discover(stranger.advertise("home-cue", b"AUDIO"));
    settle().await;

    assert_eq!(stranger.connect_count(), 0);
    assert!(s.publisher.published().is_empty());
    assert!(!s.controller.registry().knows(&id(STRANGER)).await);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_calibration_end_mid_sequence() {
    let s = station().await;
    s.controller
        .handle(
            &operator(),
            Command::CalibrationMode {
                sensor_id: id(KNOWN),
            },
        )
        .await;

    let known = Arc::new(MockPeripheral::new(KNOWN));
    known.queue_reads(AUDIO_LEVEL, [vec![0], vec![10], vec![20], vec![30]]);
    s.radio.discover(known.advertise("home-cue", b"BUTTON"));
    settle().await;
    assert!(known.is_connected());
    assert_eq!(
        s.channel.replies_to(&operator()),
        vec![Reply::CalibrationMode {
            sensor_id: id(KNOWN)
        }]
    );

    s.controller
        .handle(
            &operator(),
            Command::CalibrationProbe {
                probe_index: 1,
                probe_count: 3,
                address: None,
            },
        )
        .await;
    // One probe lands at 5s, the second would land at 10s.
    sleep(Duration::from_secs(7)).await;
    s.controller
        .handle(&operator(), Command::CalibrationEnd)
        .await;
    sleep(Duration::from_secs(30)).await;
    settle().await;

    let probes: Vec<_> = s
        .channel
        .replies_to(&operator())
        .into_iter()
        .filter(|r| matches!(r, Reply::CalibrationProbe { .. }))
        .collect();
    assert_eq!(
        probes,
        vec![Reply::CalibrationProbe {
            reading: 10,
            probe_index: 1,
            sensor_id: id(KNOWN),
        }]
    );
    assert!(!known.is_connected());
    assert!(known.writes().is_empty());
    assert!(s.publisher.payloads(Topic::Calibration).is_empty());
    assert_eq!(s.controller.mode().await, Mode::Idle);
    assert!(s.controller.scanner().is_scanning().await);
    assert_eq!(
        s.controller.scanner().strategy_kind().await,
        StrategyKind::Listening
    );
}

#[tokio::test(start_paused = true)]
async fn test_scenario_calibration_ignores_other_sensors() {
    let s = station().await;
    let other = "00:A0:50:11:22:33";
    s.controller
        .handle(
            &operator(),
            Command::SyncSensors {
                sensors: vec![id(KNOWN), id(other)],
            },
        )
        .await;
    s.controller
        .handle(
            &operator(),
            Command::CalibrationMode {
                sensor_id: id(KNOWN),
            },
        )
        .await;

    let bystander = Arc::new(MockPeripheral::new(other));
    s.radio.discover(bystander.advertise("home-cue", b"BUTTON"));
    settle().await;
    assert_eq!(bystander.connect_count(), 0);
    assert_eq!(s.controller.mode().await, Mode::Calibrating);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_pairing_window_expires() {
    let s = station().await;
    s.controller.handle(&operator(), Command::PairingMode).await;
    sleep(Duration::from_secs(31)).await;
    settle().await;

    assert_eq!(s.controller.mode().await, Mode::Idle);
    assert_eq!(
        s.controller.scanner().strategy_kind().await,
        StrategyKind::Listening
    );

    // A button press after the window no longer pairs.
    let stranger = Arc::new(MockPeripheral::new(STRANGER));
    s.radio.discover(stranger.advertise("home-cue", b"BUTTON"));
    settle().await;
    assert!(!s.controller.registry().knows(&id(STRANGER)).await);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_double_scan_starts_hardware_once() {
    let s = station().await;
    assert_eq!(s.radio.start_count(), 1);

    s.controller.handle(&operator(), Command::ListeningMode).await;
    s.controller.handle(&operator(), Command::PairingMode).await;
    s.controller.handle(&operator(), Command::ListeningMode).await;

    assert_eq!(s.radio.start_count(), 1);
    assert_eq!(s.radio.stop_count(), 0);
    assert!(s.radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_hung_connect_stops_the_worker() {
    let store = MemoryStore::with_ids([id(KNOWN)]);
    let ctx = StrategyContext {
        config: EngineConfig::default(),
        registry: Arc::new(KnownSensorRegistry::open(store).await.unwrap()),
        events: EventDispatcher::default(),
    };
    let radio = Arc::new(MockRadio::new());
    let controller = ModeController::new(
        Arc::clone(&radio) as Arc<dyn Radio>,
        ctx,
        Arc::new(MockControlChannel::new()),
    );
    let worker = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run(CancellationToken::new()).await })
    };
    settle().await;

    let known = Arc::new(MockPeripheral::new(KNOWN));
    known.set_hang_connect(true);
    radio.discover(known.advertise("home-cue", b"AUDIO"));

    let err = worker.await.unwrap().unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_calibration_end_while_connecting_keeps_running() {
    let store = MemoryStore::with_ids([id(KNOWN)]);
    let ctx = StrategyContext {
        config: EngineConfig::default(),
        registry: Arc::new(KnownSensorRegistry::open(store).await.unwrap()),
        events: EventDispatcher::default(),
    };
    let radio = Arc::new(MockRadio::new());
    let channel = Arc::new(MockControlChannel::new());
    let controller = ModeController::new(
        Arc::clone(&radio) as Arc<dyn Radio>,
        ctx,
        Arc::clone(&channel) as Arc<dyn ControlChannel>,
    );
    let cancel = CancellationToken::new();
    let worker = {
        let controller = Arc::clone(&controller);
        let cancel = cancel.clone();
        tokio::spawn(async move { controller.run(cancel).await })
    };
    settle().await;

    controller
        .handle(
            &operator(),
            Command::CalibrationMode {
                sensor_id: id(KNOWN),
            },
        )
        .await;
    let known = Arc::new(MockPeripheral::new(KNOWN));
    known.set_link_delay(Duration::from_secs(2));
    radio.discover(known.advertise("home-cue", b"BUTTON"));
    sleep(Duration::from_millis(500)).await;
    assert_eq!(known.connect_count(), 1);

    controller
        .handle(&operator(), Command::CalibrationEnd)
        .await;
    // Well past the connect watchdog.
    sleep(Duration::from_secs(15)).await;
    settle().await;

    assert!(!worker.is_finished());
    assert!(!known.is_connected());
    assert_eq!(controller.mode().await, Mode::Idle);
    assert_eq!(
        controller.scanner().strategy_kind().await,
        StrategyKind::Listening
    );
    assert!(controller.scanner().is_scanning().await);
    assert!(
        !channel
            .replies_to(&operator())
            .iter()
            .any(|r| matches!(r, Reply::Error { .. }))
    );

    cancel.cancel();
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scenario_touch_leaves_sensor_disconnected_after_failed_connect() {
    let known = Arc::new(MockPeripheral::new(KNOWN));
    known.set_link_delay(Duration::from_secs(60));
    let sensor = cue_core::Sensor::from_discovery(
        &known.advertise("home-cue", b"BUTTON"),
        &EngineConfig::default(),
    )
    .unwrap();

    assert!(sensor.touch().await.is_err());
    assert_eq!(sensor.state().await, ConnectionState::Disconnected);
}
