//! home-cue base station.
//!
//! Run with: `cargo run -p cue-station`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cue_core::{
    BtleRadio, ControlChannel, EventDispatcher, JsonFileStore, KnownSensorRegistry, ModeController,
    Publisher, StrategyContext, Topic,
};
use cue_station::announce::{
    LogPublisher, advertised_address, announce, initialize_payload, websocket_payload,
};
use cue_station::reboot::{FATAL_EXIT_CODE, escalate};
use cue_station::{Config, ControlHub, ControlState, ws};

/// home-cue base station: BLE sensors in, MQTT events out.
#[derive(Parser, Debug)]
#[command(name = "cue-station")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control channel bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Known-sensor registry file (overrides config).
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Do not connect to the MQTT broker; events are only logged.
    #[arg(long)]
    no_mqtt: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cue_station=info,cue_core=info")),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };
    config.apply_env();

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.control.bind = bind;
    }
    if let Some(path) = args.registry {
        config.registry.path = path;
    }
    if args.no_mqtt {
        config.mqtt.enabled = false;
    }
    config.validate()?;

    let station_id = config.station.station_id().unwrap_or_else(|| {
        let generated = uuid::Uuid::new_v4().simple().to_string();
        warn!("No device UUID configured, using {}", generated);
        generated
    });
    info!(station = %station_id, "Starting home-cue station");

    let cancel = CancellationToken::new();
    let publisher = make_publisher(&config, &station_id, cancel.clone())?;

    // Open the registry
    info!("Opening registry at {:?}", config.registry.path);
    let mut store = JsonFileStore::new(&config.registry.path);
    if let Some(hook) = &config.registry.persist_hook {
        store = store.persist_hook(hook.clone());
    }
    let registry = KnownSensorRegistry::open(store).await?;
    info!("{} known sensors", registry.len().await);

    let ctx = StrategyContext {
        config: config.ble.engine_config(),
        registry: Arc::new(registry),
        events: EventDispatcher::default(),
    };
    let radio = BtleRadio::first_adapter().await?;
    let hub = Arc::new(ControlHub::new());
    let controller = ModeController::new(
        Arc::new(radio),
        ctx,
        Arc::clone(&hub) as Arc<dyn ControlChannel>,
    );
    let relay = controller.spawn_relay(Arc::clone(&publisher), cancel.clone());

    announce(
        publisher.as_ref(),
        Topic::Initialize,
        initialize_payload(&station_id),
    )
    .await;

    // Start the control channel
    let listener =
        ws::bind_with_fallback(&config.control.bind, config.control.max_bind_attempts).await?;
    let local = listener.local_addr()?;
    info!("Control channel listening on {}", local);
    announce(
        publisher.as_ref(),
        Topic::UpdateWebsocket,
        websocket_payload(advertised_address(local).await),
    )
    .await;

    let app = ws::router(ControlState {
        hub,
        controller: Arc::clone(&controller),
    });
    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    });

    // Run the radio until it fails or we are asked to stop
    let outcome = tokio::select! {
        result = controller.run(cancel.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };
    cancel.cancel();
    server.abort();
    if let Err(e) = relay.await {
        warn!("Event relay ended abnormally: {}", e);
    }

    match outcome {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => {
            escalate(&config.reboot, &e).await;
            std::process::exit(FATAL_EXIT_CODE);
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(feature = "mqtt")]
fn make_publisher(
    config: &Config,
    station_id: &str,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<dyn Publisher>> {
    if !config.mqtt.enabled {
        info!("MQTT disabled, events are only logged");
        return Ok(Arc::new(LogPublisher));
    }
    let publisher = cue_station::mqtt::MqttPublisher::connect(&config.mqtt, station_id, cancel)?;
    Ok(Arc::new(publisher))
}

#[cfg(not(feature = "mqtt"))]
fn make_publisher(
    config: &Config,
    _station_id: &str,
    _cancel: CancellationToken,
) -> anyhow::Result<Arc<dyn Publisher>> {
    if config.mqtt.enabled {
        warn!("Built without MQTT support, events are only logged");
    }
    Ok(Arc::new(LogPublisher))
}
