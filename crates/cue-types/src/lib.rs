//! Platform-agnostic types for home-cue sensors.
//!
//! This crate provides the shared vocabulary of the base station: sensor
//! identifiers, trigger decoding, characteristic UUIDs, pub/sub topics and
//! the control-channel messages. It has no radio or runtime dependency.
//!
//! # Example
//!
//! ```
//! use cue_types::{SensorId, ServiceData, Trigger};
//!
//! let id: SensorId = "00:a0:50:cf:66:d7".parse().unwrap();
//! assert_eq!(id.as_str(), "00a050cf66d7");
//!
//! let adv = [ServiceData::new("180f", b"AUDIO".to_vec())];
//! assert_eq!(Trigger::from_service_data(&adv), Trigger::Audio);
//! ```

#[cfg(feature = "serde")]
pub mod control;
pub mod error;
pub mod types;
pub mod uuid;

#[cfg(feature = "serde")]
pub use control::{Command, Reply};
pub use error::{ParseError, ParseResult};
pub use types::{PRODUCT_NAME, SensorId, ServiceData, Topic, Trigger};
pub use uuid as uuids;
