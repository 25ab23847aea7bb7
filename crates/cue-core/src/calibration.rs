//! Calibration protocol.
//!
//! With a sensor held connected by the calibration strategy, the audio level
//! is sampled at a fixed interval. Every sample is forwarded to the client
//! that asked for it, and the mean of all samples is written back as the new
//! trigger threshold.
//!
//! Teardown (disconnect, scan resume) is the caller's job so that it happens
//! on every exit path, including cancellation.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cue_types::Reply;
use cue_types::uuids::{AUDIO_LEVEL, THRESHOLD_LEVEL};

use crate::error::{Error, Result};
use crate::publish::{ClientAddress, ControlChannel};
use crate::sensor::Sensor;

/// How many probes to take and how far apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePlan {
    /// Index reported for the first probe. Indices start at 1.
    pub first_index: u32,
    /// Number of probes.
    pub count: u32,
    /// Delay before each probe.
    pub interval: Duration,
}

impl ProbePlan {
    /// Create a plan.
    pub fn new(first_index: u32, count: u32, interval: Duration) -> Self {
        Self {
            first_index,
            count,
            interval,
        }
    }

    /// Indices reported to the client, strictly increasing from at least 1.
    pub fn indices(&self) -> impl Iterator<Item = u32> + use<> {
        let first = self.first_index.max(1);
        (0..self.count).map(move |offset| first.saturating_add(offset))
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibrationOutcome {
    /// Raw readings in probe order.
    pub readings: Vec<u8>,
    /// Threshold written to the sensor, `None` if no probe succeeded.
    pub threshold: Option<u8>,
}

/// Arithmetic mean of unsigned byte readings, rounded half up.
///
/// ```
/// use cue_core::calibration::mean_threshold;
///
/// assert_eq!(mean_threshold(&[10, 20, 31]), Some(20));
/// assert_eq!(mean_threshold(&[10, 11]), Some(11));
/// assert_eq!(mean_threshold(&[]), None);
/// ```
pub fn mean_threshold(readings: &[u8]) -> Option<u8> {
    if readings.is_empty() {
        return None;
    }
    let n = readings.len() as u64;
    let sum: u64 = readings.iter().map(|&r| u64::from(r)).sum();
    u8::try_from((sum + n / 2) / n).ok()
}

/// Errors after which further probes cannot succeed.
fn aborts_run(error: &Error) -> bool {
    matches!(
        error,
        Error::CharacteristicNotFound { .. } | Error::NotConnected
    )
}

async fn send(replies: &dyn ControlChannel, to: &ClientAddress, reply: Reply) {
    if let Err(e) = replies.reply(to, reply).await {
        warn!(client = %to, "Failed to send calibration reply: {}", e);
    }
}

/// Run the probe sequence against a connected sensor.
///
/// A failed probe is reported to the client as an `ERROR` reply and the run
/// goes on. A missing characteristic or a lost link aborts the run with the
/// underlying error. Cancelling `cancel` aborts with [`Error::Cancelled`] and
/// discards the readings taken so far.
#[tracing::instrument(level = "info", skip_all, fields(sensor = %sensor.id(), count = plan.count))]
pub async fn run_probes(
    sensor: &Sensor,
    plan: &ProbePlan,
    cancel: &CancellationToken,
    replies: &dyn ControlChannel,
    to: &ClientAddress,
) -> Result<CalibrationOutcome> {
    // The first read after connect returns a stale level.
    match sensor.read_characteristic(AUDIO_LEVEL).await {
        Ok(_) => debug!("Flushed audio level"),
        Err(e) if aborts_run(&e) => return Err(e),
        Err(e) => warn!("Flush read failed: {}", e),
    }

    let mut outcome = CalibrationOutcome::default();
    for probe_index in plan.indices() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(discarded = outcome.readings.len(), "Calibration cancelled");
                return Err(Error::Cancelled);
            }
            _ = sleep(plan.interval) => {}
        }

        match sensor.read_characteristic(AUDIO_LEVEL).await {
            Ok(bytes) => match bytes.first() {
                Some(&reading) => {
                    debug!(probe_index, reading, "Probe");
                    outcome.readings.push(reading);
                    let reply = Reply::CalibrationProbe {
                        reading,
                        probe_index,
                        sensor_id: sensor.id().clone(),
                    };
                    send(replies, to, reply).await;
                }
                None => {
                    warn!(probe_index, "Empty audio level");
                    let reply = Reply::error(format!("probe {probe_index}: empty reading"));
                    send(replies, to, reply).await;
                }
            },
            Err(e) if aborts_run(&e) => return Err(e),
            Err(e) => {
                warn!(probe_index, "Probe failed: {}", e);
                send(replies, to, Reply::error(format!("probe {probe_index}: {e}"))).await;
            }
        }
    }

    outcome.threshold = mean_threshold(&outcome.readings);
    match outcome.threshold {
        Some(threshold) => {
            sensor.write_value(threshold, THRESHOLD_LEVEL).await?;
            info!(threshold, samples = outcome.readings.len(), "Threshold written");
        }
        None => warn!("No usable probe, threshold unchanged"),
    }
    Ok(outcome)
}
