//! Core types for home-cue sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Advertised local name shared by every home-cue sensor.
pub const PRODUCT_NAME: &str = "home-cue";

/// Stable identifier of a sensor.
///
/// Identifiers are the sensor's public device address written as twelve
/// lowercase hex digits without separators (`00a050cf66d7`), which is how
/// the registry file and the cloud backend have always stored them.
/// Parsing accepts colon or dash separated and uppercase forms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct SensorId(String);

impl SensorId {
    /// Build an id from a hardware address such as `00:A0:50:CF:66:D7`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cue_types::SensorId;
    ///
    /// let id = SensorId::from_address("00:A0:50:CF:66:D7").unwrap();
    /// assert_eq!(id.as_str(), "00a050cf66d7");
    /// ```
    pub fn from_address(address: &str) -> Result<Self, ParseError> {
        address.parse()
    }

    /// The normalized identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SensorId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ParseError::InvalidSensorId(s.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for SensorId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SensorId> for String {
    fn from(id: SensorId) -> Self {
        id.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One service-data entry of an advertisement.
///
/// `uuid` is kept as the compact token the radio stack reported (see
/// [`crate::uuid::service_token`]); legacy firmware encodes its trigger in
/// this token rather than in `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceData {
    /// Service UUID token.
    pub uuid: String,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl ServiceData {
    /// Create a new service-data entry.
    pub fn new(uuid: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            uuid: uuid.into(),
            data: data.into(),
        }
    }

    /// The UUID token lowercased with dashes removed.
    pub fn normalized_token(&self) -> String {
        self.uuid
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }
}

/// What woke a sensor up and made it advertise.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new trigger kinds
/// in future firmware without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum Trigger {
    /// The microphone level crossed the sensor's threshold.
    Audio,
    /// The physical button was pressed.
    Button,
    /// No or unrecognized trigger information.
    Unknown,
}

impl Trigger {
    /// Service-data token sent by first-generation firmware for audio.
    pub const LEGACY_AUDIO_TOKEN: &'static str = "4f49445541";
    /// Service-data token sent by first-generation firmware for the button.
    pub const LEGACY_BUTTON_TOKEN: &'static str = "4e4f54545542";

    /// Decode the trigger from an advertisement's service data.
    ///
    /// Only the first entry is considered. The UUID token is tried first
    /// (legacy firmware), then the payload is read as UTF-8 text.
    ///
    /// # Examples
    ///
    /// ```
    /// use cue_types::{ServiceData, Trigger};
    ///
    /// let legacy = [ServiceData::new("4f49445541", Vec::new())];
    /// assert_eq!(Trigger::from_service_data(&legacy), Trigger::Audio);
    ///
    /// let current = [ServiceData::new("180f", b"BUTTON".to_vec())];
    /// assert_eq!(Trigger::from_service_data(&current), Trigger::Button);
    ///
    /// assert_eq!(Trigger::from_service_data(&[]), Trigger::Unknown);
    /// ```
    #[must_use]
    pub fn from_service_data(entries: &[ServiceData]) -> Self {
        let Some(first) = entries.first() else {
            return Trigger::Unknown;
        };

        Self::from_legacy_token(&first.normalized_token())
            .or_else(|| Self::from_payload(&first.data))
            .unwrap_or(Trigger::Unknown)
    }

    /// Interpret a service UUID token as a legacy trigger code.
    ///
    /// Legacy tokens are the trigger word in ASCII, byte-reversed, written
    /// as hex: `"4f49445541"` is `"OIDUA"`, i.e. `"AUDIO"`.
    #[must_use]
    pub fn from_legacy_token(token: &str) -> Option<Self> {
        if token.is_empty() || token.len() % 2 != 0 {
            return None;
        }

        let mut bytes = Vec::with_capacity(token.len() / 2);
        for pair in token.as_bytes().chunks(2) {
            let pair = core::str::from_utf8(pair).ok()?;
            bytes.push(u8::from_str_radix(pair, 16).ok()?);
        }
        bytes.reverse();

        let word = core::str::from_utf8(&bytes).ok()?;
        Self::from_word(word)
    }

    /// Interpret a service-data payload as UTF-8 trigger text.
    #[must_use]
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        let text = core::str::from_utf8(data).ok()?;
        Self::from_word(text.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
    }

    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "AUDIO" | "AUD" => Some(Trigger::Audio),
            "BUTTON" | "BTN" => Some(Trigger::Button),
            _ => None,
        }
    }

    /// Whether the trigger is one the base station acts on.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Trigger::Unknown)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Audio => write!(f, "AUDIO"),
            Trigger::Button => write!(f, "BUTTON"),
            Trigger::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Pub/sub topics the base station publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Topic {
    /// Station came online.
    Initialize,
    /// A sensor was paired.
    NewSensor,
    /// A sensor heard something.
    Notification,
    /// Where the local control channel can be reached.
    UpdateWebsocket,
    /// A known sensor checked in.
    Heartbeat,
    /// A calibration run wrote a new threshold.
    Calibration,
}

impl Topic {
    /// Topic name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Initialize => "initialize",
            Topic::NewSensor => "new-sensor",
            Topic::Notification => "notification",
            Topic::UpdateWebsocket => "update-websocket",
            Topic::Heartbeat => "heartbeat",
            Topic::Calibration => "calibration",
        }
    }
}

impl FromStr for Topic {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialize" => Ok(Topic::Initialize),
            "new-sensor" => Ok(Topic::NewSensor),
            "notification" => Ok(Topic::Notification),
            "update-websocket" => Ok(Topic::UpdateWebsocket),
            "heartbeat" => Ok(Topic::Heartbeat),
            "calibration" => Ok(Topic::Calibration),
            other => Err(ParseError::UnknownTopic(other.to_string())),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
