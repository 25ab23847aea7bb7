//! Escalation when the radio stack wedges.

use std::process::ExitStatus;

use tokio::process::Command;
use tracing::{error, info};

use crate::config::RebootConfig;

/// Exit code used when the station gives up on a wedged radio.
pub const FATAL_EXIT_CODE: i32 = 70;

/// Run the configured reboot command, if any.
///
/// Returns `None` when no command is configured.
pub async fn run_reboot(config: &RebootConfig) -> Option<std::io::Result<ExitStatus>> {
    let command = config.command.as_deref()?;
    info!("Running reboot command: {}", command);
    Some(Command::new("sh").arg("-c").arg(command).status().await)
}

/// Log a fatal engine error and run the reboot command.
///
/// The caller exits with [`FATAL_EXIT_CODE`] afterwards.
pub async fn escalate(config: &RebootConfig, cause: &cue_core::Error) {
    error!("Radio is unresponsive, giving up: {}", cause);
    match run_reboot(config).await {
        None => info!("No reboot command configured, leaving restart to the supervisor"),
        Some(Ok(status)) if status.success() => info!("Reboot command accepted"),
        Some(Ok(status)) => error!("Reboot command failed with {}", status),
        Some(Err(e)) => error!("Failed to run reboot command: {}", e),
    }
}
