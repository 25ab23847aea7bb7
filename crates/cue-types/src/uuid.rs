//! Bluetooth UUIDs exposed by home-cue sensors.
//!
//! The sensor firmware exposes one vendor service holding the audio level,
//! trigger threshold and link-quality characteristics, plus the standard
//! battery service.

use uuid::{Uuid, uuid};

// --- home-cue vendor service ---

/// Vendor service carrying the audio characteristics.
pub const CUE_SERVICE: Uuid = uuid!("c0e50000-7b1e-4f2a-9d6c-3a1f0c7e5b10");

/// Current audio level seen by the microphone (one unsigned byte).
pub const AUDIO_LEVEL: Uuid = uuid!("c0e50001-7b1e-4f2a-9d6c-3a1f0c7e5b10");

/// Audio trigger threshold (one unsigned byte, read/write).
pub const THRESHOLD_LEVEL: Uuid = uuid!("c0e50002-7b1e-4f2a-9d6c-3a1f0c7e5b10");

/// Link quality as measured by the sensor (one signed byte).
pub const RSSI_LEVEL: Uuid = uuid!("c0e50003-7b1e-4f2a-9d6c-3a1f0c7e5b10");

// --- Standard BLE ---

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Battery level characteristic (0-100).
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

/// Bluetooth base UUID suffix shared by all 16/32-bit assigned numbers.
pub const BLUETOOTH_BASE_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Render a UUID as the compact token used in advertisement service data.
///
/// UUIDs built on the Bluetooth base are shortened to their assigned number
/// (`"180f"`), anything else becomes 32 lowercase hex digits without dashes.
///
/// ```
/// use cue_types::uuid::{service_token, BATTERY_SERVICE};
///
/// assert_eq!(service_token(&BATTERY_SERVICE), "180f");
/// ```
pub fn service_token(uuid: &Uuid) -> String {
    let hyphenated = uuid.hyphenated().to_string();
    if let Some(prefix) = hyphenated.strip_suffix(BLUETOOTH_BASE_SUFFIX) {
        let short = prefix.trim_start_matches('0');
        if short.is_empty() {
            "0".to_string()
        } else {
            short.to_string()
        }
    } else {
        uuid.simple().to_string()
    }
}
