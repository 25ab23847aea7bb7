//! Mode controller.
//!
//! Maps control-channel commands onto strategy selection, the pairing
//! window and the calibration sequence, and relays domain events to the
//! upstream publisher.
//!
//! ```text
//!            PAIRING_MODE              new sensor / window expired
//!   Idle ───────────────────▶ Pairing ─────────────────────────────▶ Idle
//!    │   CALIBRATION_MODE                 probes done / CALIBRATION_END
//!    ├─────────────────────▶ Calibrating ──────────────────────────▶ Idle
//!    │   CONNECT                          DISCONNECT_SENSOR
//!    └─────────────────────▶ Connecting ───────────────────────────▶ Idle
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cue_types::{Command, Reply, SensorId};

use crate::calibration::{ProbePlan, run_probes};
use crate::error::{Error, Result};
use crate::events::SensorEvent;
use crate::publish::{ClientAddress, ControlChannel, Publisher, topic_payload};
use crate::radio::Radio;
use crate::registry::KnownSensorRegistry;
use crate::scanner::{DiscoveredCallback, PoweredOnHook, Scanner};
use crate::strategy::{
    CalibrationStrategy, ListeningStrategy, PairingStrategy, ScanStrategy, StrategyContext,
};

/// Operating mode of the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Listening for known sensors, or stopped.
    Idle,
    /// Pairing window open.
    Pairing,
    /// Waiting for, or holding, the sensor being calibrated.
    Calibrating,
    /// Diagnostic connection to any known sensor.
    Connecting,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => write!(f, "idle"),
            Mode::Pairing => write!(f, "pairing"),
            Mode::Calibrating => write!(f, "calibrating"),
            Mode::Connecting => write!(f, "connecting"),
        }
    }
}

#[derive(Debug)]
struct ControllerState {
    mode: Mode,
    /// Set by `STOP`; the power-on hook leaves the radio alone while set.
    halted: bool,
    pairing_timer: Option<CancellationToken>,
    calibration_client: Option<ClientAddress>,
    calibration_run: Option<CancellationToken>,
}

/// The externally facing state machine of the engine.
pub struct ModeController {
    ctx: StrategyContext,
    scanner: Arc<Scanner>,
    listening: Arc<ListeningStrategy>,
    pairing: Arc<PairingStrategy>,
    calibration: Arc<CalibrationStrategy>,
    replies: Arc<dyn ControlChannel>,
    state: Mutex<ControllerState>,
}

impl fmt::Debug for ModeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeController")
            .field("scanner", &self.scanner)
            .finish_non_exhaustive()
    }
}

impl ModeController {
    /// Create a controller driving `radio`.
    pub fn new(
        radio: Arc<dyn Radio>,
        ctx: StrategyContext,
        replies: Arc<dyn ControlChannel>,
    ) -> Arc<Self> {
        let listening = Arc::new(ListeningStrategy::new(ctx.clone()));
        let scanner = Arc::new(Scanner::new(
            radio,
            Arc::clone(&listening) as Arc<dyn ScanStrategy>,
        ));
        Arc::new(Self {
            pairing: Arc::new(PairingStrategy::new(ctx.clone())),
            calibration: Arc::new(CalibrationStrategy::new(ctx.clone())),
            ctx,
            scanner,
            listening,
            replies,
            state: Mutex::new(ControllerState {
                mode: Mode::Idle,
                halted: false,
                pairing_timer: None,
                calibration_client: None,
                calibration_run: None,
            }),
        })
    }

    /// The scan controller.
    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    /// The known-sensor registry.
    pub fn registry(&self) -> &Arc<KnownSensorRegistry> {
        &self.ctx.registry
    }

    /// Current mode.
    pub async fn mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    /// Run the radio worker until `cancel` fires.
    ///
    /// Scanning starts as soon as the radio reports power. Returns `Err` for
    /// a fatal radio fault.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let weak = Arc::downgrade(self);
        let hook: PoweredOnHook = Arc::new(move || {
            let weak = Weak::clone(&weak);
            async move {
                if let Some(controller) = weak.upgrade() {
                    controller.on_powered_on().await;
                }
            }
            .boxed()
        });
        self.scanner.powered_on(hook).await;
        self.scanner.run(cancel).await
    }

    /// Relay domain events to `publisher` until the event channel closes or
    /// `cancel` fires.
    ///
    /// The subscription is taken before this returns, so no event emitted
    /// afterwards is missed.
    pub fn spawn_relay(
        self: &Arc<Self>,
        publisher: Arc<dyn Publisher>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut events = self.ctx.events.subscribe();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = events.recv() => received,
                };
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event relay lagged, {} events dropped", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Some(controller) = weak.upgrade() {
                    controller.on_event(&event).await;
                }
                if let Some((topic, payload)) = topic_payload(&event) {
                    if let Err(e) = publisher.publish(topic, payload).await {
                        warn!(%topic, "Publish failed: {}", e);
                    }
                }
            }
            debug!("Event relay stopped");
        })
    }

    /// Apply one control-channel command sent by `from`.
    #[tracing::instrument(level = "info", skip(self, from, command), fields(client = %from, action = command.action()))]
    pub async fn handle(self: &Arc<Self>, from: &ClientAddress, command: Command) {
        match command {
            Command::PairingMode => self.start_pairing().await,
            Command::CalibrationMode { sensor_id } => self.start_calibration(from, sensor_id).await,
            Command::CalibrationProbe {
                probe_index,
                probe_count,
                address,
            } => {
                let target = address.map(ClientAddress::new).unwrap_or_else(|| from.clone());
                self.start_probes(target, probe_index, probe_count).await;
            }
            Command::CalibrationEnd => {
                info!("Calibration ended by client");
                self.listen().await;
            }
            Command::SyncSensors { sensors } => {
                if let Err(e) = self.ctx.registry.replace(sensors).await {
                    warn!("Failed to persist synchronized sensors: {}", e);
                }
            }
            Command::ListeningMode | Command::DisconnectSensor => self.listen().await,
            Command::ForgetSensors => {
                if let Err(e) = self.ctx.registry.forget_all().await {
                    warn!("Failed to persist forgotten sensors: {}", e);
                }
            }
            Command::Debug => {
                self.scanner.toggle_verbose();
            }
            Command::Stop => self.stop().await,
            Command::Connect => self.start_connecting().await,
        }
    }

    /// Leave the current mode and scan with the listening strategy.
    pub async fn listen(&self) {
        self.leave_mode().await;
        self.state.lock().await.halted = false;
        self.arm_listening().await;
    }

    async fn arm_listening(&self) {
        let strategy = Arc::clone(&self.listening) as Arc<dyn ScanStrategy>;
        self.arm(strategy, None).await;
    }

    async fn arm(&self, strategy: Arc<dyn ScanStrategy>, filter: Option<Vec<SensorId>>) {
        let kind = strategy.kind();
        match self
            .scanner
            .scan(strategy, Some(self.discovered_callback()), filter)
            .await
        {
            Ok(true) => debug!(strategy = %kind, "Scan armed"),
            Ok(false) => warn!(strategy = %kind, "Scan armed but radio is not powered"),
            Err(e) => warn!(strategy = %kind, "Failed to start scan: {}", e),
        }
    }

    fn discovered_callback(&self) -> DiscoveredCallback {
        let events = self.ctx.events.clone();
        Arc::new(move |event| events.send(event))
    }

    async fn stop(&self) {
        self.leave_mode().await;
        self.state.lock().await.halted = true;
        if let Err(e) = self.scanner.stop_scanning().await {
            warn!("Failed to stop scanning: {}", e);
        }
        info!("Stopped");
    }

    /// Cancel timers and runs of the current mode and release any held
    /// sensor. Leaves the controller `Idle`.
    async fn leave_mode(&self) {
        let (mode, timer, run) = {
            let mut state = self.state.lock().await;
            state.calibration_client = None;
            (
                std::mem::replace(&mut state.mode, Mode::Idle),
                state.pairing_timer.take(),
                state.calibration_run.take(),
            )
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
        if let Some(run) = run {
            run.cancel();
        }
        if matches!(mode, Mode::Calibrating | Mode::Connecting) {
            self.release_held_sensor().await;
        }
        if mode != Mode::Idle {
            info!(%mode, "Left mode");
        }
    }

    async fn release_held_sensor(&self) {
        match self.calibration.disconnect_sensor().await {
            Ok(Some(id)) => self.ctx.events.send(SensorEvent::Disconnected { id }),
            Ok(None) => {}
            Err(e) => warn!("Ignoring disconnect failure of held sensor: {}", e),
        }
    }

    async fn on_powered_on(&self) {
        let (mode, halted) = {
            let state = self.state.lock().await;
            (state.mode, state.halted)
        };
        if halted {
            info!("Radio powered on, station stopped");
            return;
        }
        info!(%mode, "Radio powered on");
        if mode == Mode::Idle {
            self.arm_listening().await;
        } else if let Err(e) = self.scanner.resume_scanning().await {
            warn!("Failed to resume scanning: {}", e);
        }
    }

    async fn on_event(&self, event: &SensorEvent) {
        match event {
            SensorEvent::NewSensor { id } => {
                let mut state = self.state.lock().await;
                if let Some(timer) = state.pairing_timer.take() {
                    timer.cancel();
                }
                if state.mode == Mode::Pairing {
                    state.mode = Mode::Idle;
                    info!(sensor = %id, "Pairing complete");
                }
            }
            SensorEvent::Connected { id } => {
                let (mode, client) = {
                    let state = self.state.lock().await;
                    (state.mode, state.calibration_client.clone())
                };
                match (mode, client) {
                    (Mode::Calibrating, Some(client)) => {
                        let reply = Reply::CalibrationMode {
                            sensor_id: id.clone(),
                        };
                        if let Err(e) = self.replies.reply(&client, reply).await {
                            warn!(%client, "Failed to announce calibration sensor: {}", e);
                        }
                    }
                    (Mode::Connecting, _) => info!(sensor = %id, "Diagnostic connection up"),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    async fn start_pairing(self: &Arc<Self>) {
        self.leave_mode().await;
        let timer = CancellationToken::new();
        {
            let mut state = self.state.lock().await;
            state.mode = Mode::Pairing;
            state.halted = false;
            state.pairing_timer = Some(timer.clone());
        }
        let window = self.ctx.config.pairing_window;
        info!(?window, "Pairing window open");
        let strategy = Arc::clone(&self.pairing) as Arc<dyn ScanStrategy>;
        self.arm(strategy, None).await;

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = sleep(window) => {
                    if let Some(controller) = weak.upgrade() {
                        controller.pairing_expired(&timer).await;
                    }
                }
            }
        });
    }

    async fn pairing_expired(&self, timer: &CancellationToken) {
        {
            let mut state = self.state.lock().await;
            if timer.is_cancelled() || state.mode != Mode::Pairing {
                return;
            }
            state.pairing_timer = None;
        }
        info!("Pairing window expired");
        self.listen().await;
    }

    async fn start_calibration(&self, from: &ClientAddress, sensor_id: SensorId) {
        if !self.ctx.registry.knows(&sensor_id).await {
            warn!(sensor = %sensor_id, "Calibration requested for unknown sensor");
            self.reply(from, Reply::error(format!("unknown sensor {sensor_id}")))
                .await;
            return;
        }
        self.leave_mode().await;
        {
            let mut state = self.state.lock().await;
            state.mode = Mode::Calibrating;
            state.halted = false;
            state.calibration_client = Some(from.clone());
        }
        info!(sensor = %sensor_id, "Waiting for calibration sensor");
        let strategy = Arc::clone(&self.calibration) as Arc<dyn ScanStrategy>;
        self.arm(strategy, Some(vec![sensor_id])).await;
    }

    async fn start_connecting(&self) {
        self.leave_mode().await;
        {
            let mut state = self.state.lock().await;
            state.mode = Mode::Connecting;
            state.halted = false;
        }
        let strategy = Arc::clone(&self.calibration) as Arc<dyn ScanStrategy>;
        self.arm(strategy, None).await;
    }

    async fn start_probes(self: &Arc<Self>, to: ClientAddress, first_index: u32, count: u32) {
        let Some(sensor) = self.calibration.connected_sensor().await else {
            warn!("Calibration probe without a connected sensor");
            self.reply(&to, Reply::error("no sensor connected")).await;
            return;
        };
        let cancel = CancellationToken::new();
        {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.calibration_run.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        let plan = ProbePlan::new(first_index, count, self.ctx.config.probe_interval);
        let weak = Arc::downgrade(self);
        let replies = Arc::clone(&self.replies);
        tokio::spawn(async move {
            let outcome = run_probes(&sensor, &plan, &cancel, &*replies, &to).await;
            let Some(controller) = weak.upgrade() else {
                return;
            };
            match outcome {
                Ok(outcome) => {
                    if let Some(threshold) = outcome.threshold {
                        controller.ctx.events.send(SensorEvent::CalibrationFinished {
                            id: sensor.id().clone(),
                            threshold,
                        });
                    }
                }
                // Whoever cancelled the run owns the teardown.
                Err(Error::Cancelled) => return,
                // A read in flight when the run was cancelled fails on teardown.
                Err(_) if cancel.is_cancelled() => return,
                Err(e) => {
                    warn!(sensor = %sensor.id(), "Calibration aborted: {}", e);
                    controller
                        .reply(&to, Reply::error(format!("calibration failed: {e}")))
                        .await;
                }
            }
            if cancel.is_cancelled() {
                return;
            }
            controller.listen().await;
        });
    }

    async fn reply(&self, to: &ClientAddress, reply: Reply) {
        if let Err(e) = self.replies.reply(to, reply).await {
            warn!(client = %to, "Failed to send reply: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cue_types::uuids::{AUDIO_LEVEL, THRESHOLD_LEVEL};

    use crate::config::EngineConfig;
    use crate::events::EventDispatcher;
    use crate::mock::{MockControlChannel, MockPeripheral, MockPublisher, MockRadio};
    use crate::registry::MemoryStore;
    use crate::strategy::StrategyKind;

    const KNOWN: &str = "00:A0:50:CF:66:D7";

    struct Harness {
        radio: Arc<MockRadio>,
        channel: Arc<MockControlChannel>,
        publisher: Arc<MockPublisher>,
        controller: Arc<ModeController>,
        cancel: CancellationToken,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn harness() -> Harness {
        let store = MemoryStore::with_ids([KNOWN.parse().unwrap()]);
        let ctx = StrategyContext {
            config: EngineConfig::default(),
            registry: Arc::new(KnownSensorRegistry::open(store).await.unwrap()),
            events: EventDispatcher::default(),
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
        Harness {
            radio,
            channel,
            publisher,
            controller,
            cancel,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        sleep(Duration::from_millis(100)).await;
    }

    fn client() -> ClientAddress {
        ClientAddress::new("10.0.0.7:40000")
    }

    #[tokio::test(start_paused = true)]
    async fn test_listening_starts_on_power() {
        let h = harness().await;
        assert!(h.controller.scanner().is_scanning().await);
        assert_eq!(
            h.controller.scanner().strategy_kind().await,
            StrategyKind::Listening
        );
        assert_eq!(h.controller.mode().await, Mode::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_window_expires() {
        let h = harness().await;
        h.controller.handle(&client(), Command::PairingMode).await;
        assert_eq!(h.controller.mode().await, Mode::Pairing);
        assert_eq!(
            h.controller.scanner().strategy_kind().await,
            StrategyKind::Pairing
        );

        sleep(Duration::from_secs(29)).await;
        assert_eq!(h.controller.mode().await, Mode::Pairing);

        sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(h.controller.mode().await, Mode::Idle);
        assert_eq!(
            h.controller.scanner().strategy_kind().await,
            StrategyKind::Listening
        );
        assert!(h.controller.scanner().is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_pairing_replaces_window() {
        let h = harness().await;
        h.controller.handle(&client(), Command::PairingMode).await;
        sleep(Duration::from_secs(20)).await;
        h.controller.handle(&client(), Command::PairingMode).await;

        // The first window would have closed here.
        sleep(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(h.controller.mode().await, Mode::Pairing);

        sleep(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(h.controller.mode().await, Mode::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_closes_window_and_publishes() {
        let h = harness().await;
        h.controller.handle(&client(), Command::PairingMode).await;

        let stranger = Arc::new(MockPeripheral::new("00:A0:50:59:6A:A0"));
        h.radio.discover(stranger.advertise("home-cue", b"BUTTON"));
        settle().await;

        assert_eq!(h.controller.mode().await, Mode::Idle);
        assert!(
            h.controller
                .registry()
                .knows(&"00a050596aa0".parse().unwrap())
                .await
        );
        let published = h.publisher.payloads(cue_types::Topic::NewSensor);
        assert_eq!(published, vec![serde_json::json!({ "id": "00a050596aa0" })]);
        assert_eq!(h.publisher.payloads(cue_types::Topic::Heartbeat).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_of_unknown_sensor_is_refused() {
        let h = harness().await;
        h.controller
            .handle(
                &client(),
                Command::CalibrationMode {
                    sensor_id: "00a050596aa0".parse().unwrap(),
                },
            )
            .await;
        assert_eq!(h.controller.mode().await, Mode::Idle);
        assert!(matches!(
            h.channel.replies_to(&client())[..],
            [Reply::Error { .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_run_writes_threshold() {
        let h = harness().await;
        let sensor_id: SensorId = KNOWN.parse().unwrap();
        h.controller
            .handle(
                &client(),
                Command::CalibrationMode {
                    sensor_id: sensor_id.clone(),
                },
            )
            .await;

        let peripheral = Arc::new(MockPeripheral::new(KNOWN));
        peripheral.queue_reads(AUDIO_LEVEL, [vec![0], vec![30], vec![40], vec![50]]);
        h.radio.discover(peripheral.advertise("home-cue", b"BUTTON"));
        settle().await;

        assert_eq!(
            h.channel.replies_to(&client()),
            vec![Reply::CalibrationMode {
                sensor_id: sensor_id.clone()
            }]
        );
        assert!(!h.controller.scanner().is_scanning().await);

        h.controller
            .handle(
                &client(),
                Command::CalibrationProbe {
                    probe_index: 1,
                    probe_count: 3,
                    address: None,
                },
            )
            .await;
        sleep(Duration::from_secs(16)).await;
        settle().await;

        let probes = h
            .channel
            .replies_to(&client())
            .into_iter()
            .filter(|r| matches!(r, Reply::CalibrationProbe { .. }))
            .count();
        assert_eq!(probes, 3);
        assert_eq!(peripheral.writes(), vec![(THRESHOLD_LEVEL, vec![40])]);
        assert!(!peripheral.is_connected());
        assert_eq!(h.controller.mode().await, Mode::Idle);
        assert_eq!(
            h.controller.scanner().strategy_kind().await,
            StrategyKind::Listening
        );
        assert!(h.controller.scanner().is_scanning().await);
        assert_eq!(
            h.publisher.payloads(cue_types::Topic::Calibration),
            vec![serde_json::json!({ "id": "00a050cf66d7", "threshold": 40 })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_end_during_read_sends_no_error() {
        let h = harness().await;
        let sensor_id: SensorId = KNOWN.parse().unwrap();
        h.controller
            .handle(&client(), Command::CalibrationMode { sensor_id })
            .await;

        let peripheral = Arc::new(MockPeripheral::new(KNOWN));
        h.radio.discover(peripheral.advertise("home-cue", b"BUTTON"));
        settle().await;
        peripheral.set_read_delay(Duration::from_secs(1));

        h.controller
            .handle(
                &client(),
                Command::CalibrationProbe {
                    probe_index: 1,
                    probe_count: 3,
                    address: None,
                },
            )
            .await;
        sleep(Duration::from_millis(300)).await;
        h.controller.handle(&client(), Command::CalibrationEnd).await;
        sleep(Duration::from_secs(2)).await;
        settle().await;

        assert!(!peripheral.is_connected());
        assert!(
            !h.channel
                .replies_to(&client())
                .iter()
                .any(|r| matches!(r, Reply::Error { .. })),
            "unexpected error reply: {:?}",
            h.channel.replies_to(&client())
        );
        assert_eq!(
            h.controller.scanner().strategy_kind().await,
            StrategyKind::Listening
        );
        assert!(h.controller.scanner().is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_without_sensor_replies_error() {
        let h = harness().await;
        h.controller
            .handle(
                &client(),
                Command::CalibrationProbe {
                    probe_index: 1,
                    probe_count: 3,
                    address: Some("10.0.0.9:1234".to_string()),
                },
            )
            .await;
        assert!(h.channel.replies_to(&client()).is_empty());
        assert!(matches!(
            h.channel.replies_to(&ClientAddress::new("10.0.0.9:1234"))[..],
            [Reply::Error { .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_scanning_across_power_cycles() {
        let h = harness().await;
        h.controller.handle(&client(), Command::Stop).await;
        assert!(!h.controller.scanner().is_scanning().await);

        h.radio.set_state(crate::radio::RadioState::PoweredOff);
        h.radio.set_state(crate::radio::RadioState::PoweredOn);
        settle().await;
        assert!(!h.controller.scanner().is_scanning().await);

        h.controller.handle(&client(), Command::ListeningMode).await;
        assert!(h.controller.scanner().is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_and_forget() {
        let h = harness().await;
        h.controller
            .handle(
                &client(),
                Command::SyncSensors {
                    sensors: vec!["aa0000000001".parse().unwrap(), "aa0000000002".parse().unwrap()],
                },
            )
            .await;
        assert_eq!(h.controller.registry().len().await, 2);
        assert!(!h.controller.registry().knows(&KNOWN.parse().unwrap()).await);

        h.controller.handle(&client(), Command::ForgetSensors).await;
        assert!(h.controller.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_toggles_verbose() {
        let h = harness().await;
        h.controller.handle(&client(), Command::Debug).await;
        assert!(h.controller.scanner().is_verbose());
        h.controller.handle(&client(), Command::Debug).await;
        assert!(!h.controller.scanner().is_verbose());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_disconnect_sensor() {
        let h = harness().await;
        h.controller.handle(&client(), Command::Connect).await;
        assert_eq!(h.controller.mode().await, Mode::Connecting);

        let peripheral = Arc::new(MockPeripheral::new(KNOWN));
        h.radio.discover(peripheral.advertise("home-cue", b"BUTTON"));
        settle().await;
        assert!(peripheral.is_connected());

        h.controller.handle(&client(), Command::DisconnectSensor).await;
        assert!(!peripheral.is_connected());
        assert_eq!(h.controller.mode().await, Mode::Idle);
        assert!(h.controller.scanner().is_scanning().await);
    }
}
