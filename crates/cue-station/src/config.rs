//! Station configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cue_core::EngineConfig;
use cue_types::PRODUCT_NAME;

/// Environment variable holding the device UUID assigned by the fleet manager.
pub const DEVICE_UUID_ENV: &str = "RESIN_DEVICE_UUID";

/// Environment variable holding the prefix prepended to the device UUID.
pub const DEVICE_UUID_PREFIX_ENV: &str = "DEVICE_UUID_PREFIX";

/// Placeholder in [`MqttConfig::topic_root`] replaced by the station id.
pub const STATION_PLACEHOLDER: &str = "{station}";

/// Station configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Station identity.
    pub station: StationConfig,
    /// Radio and engine timing.
    pub ble: BleConfig,
    /// Known-sensor registry storage.
    pub registry: RegistryConfig,
    /// Local control channel.
    pub control: ControlConfig,
    /// Upstream MQTT broker.
    pub mqtt: MqttConfig,
    /// Escalation on a wedged radio.
    pub reboot: RebootConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Apply the process environment on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(uuid) = lookup(DEVICE_UUID_ENV).filter(|v| !v.is_empty()) {
            self.station.device_uuid = uuid;
        }
        if let Some(prefix) = lookup(DEVICE_UUID_PREFIX_ENV) {
            self.station.device_uuid_prefix = prefix;
        }
    }

    /// Validate the configuration and return any errors.
    ///
    /// Every section is checked and all failures are reported together.
    ///
    /// # Example
    ///
    /// ```
    /// use cue_station::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.ble.validate());
        errors.extend(self.registry.validate());
        errors.extend(self.control.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.reboot.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Station identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Device UUID, usually provided through `RESIN_DEVICE_UUID`.
    pub device_uuid: String,
    /// Prefix prepended to the device UUID.
    pub device_uuid_prefix: String,
}

impl StationConfig {
    /// The station id announced upstream, or `None` without a device UUID.
    pub fn station_id(&self) -> Option<String> {
        if self.device_uuid.is_empty() {
            None
        } else {
            Some(format!("{}{}", self.device_uuid_prefix, self.device_uuid))
        }
    }
}

/// Radio and engine timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Advertised local name of home-cue sensors.
    pub product_name: String,
    /// Connect watchdog in seconds.
    pub connect_timeout_secs: u64,
    /// Disconnect watchdog in seconds.
    pub disconnect_timeout_secs: u64,
    /// Link-state sampling interval in milliseconds.
    pub link_poll_ms: u64,
    /// Delay before each calibration probe in seconds.
    pub probe_interval_secs: u64,
    /// Pairing window in seconds.
    pub pairing_window_secs: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            product_name: PRODUCT_NAME.to_string(),
            connect_timeout_secs: 10,
            disconnect_timeout_secs: 10,
            link_poll_ms: 50,
            probe_interval_secs: 5,
            pairing_window_secs: 30,
        }
    }
}

impl BleConfig {
    /// Engine configuration for these settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .product_name(self.product_name.clone())
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .disconnect_timeout(Duration::from_secs(self.disconnect_timeout_secs))
            .link_poll_interval(Duration::from_millis(self.link_poll_ms))
            .probe_interval(Duration::from_secs(self.probe_interval_secs))
            .pairing_window(Duration::from_secs(self.pairing_window_secs))
    }

    /// Validate BLE configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.product_name.is_empty() {
            errors.push(ValidationError {
                field: "ble.product_name".to_string(),
                message: "product name cannot be empty".to_string(),
            });
        }

        let durations = [
            ("ble.connect_timeout_secs", self.connect_timeout_secs),
            ("ble.disconnect_timeout_secs", self.disconnect_timeout_secs),
            ("ble.link_poll_ms", self.link_poll_ms),
            ("ble.pairing_window_secs", self.pairing_window_secs),
        ];
        for (field, value) in durations {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        if self.link_poll_ms >= self.connect_timeout_secs.saturating_mul(1000)
            && self.connect_timeout_secs > 0
        {
            errors.push(ValidationError {
                field: "ble.link_poll_ms".to_string(),
                message: format!(
                    "poll interval {}ms must be shorter than the connect timeout ({}s)",
                    self.link_poll_ms, self.connect_timeout_secs
                ),
            });
        }

        errors
    }
}

/// Known-sensor registry storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// JSON file holding the paired sensor ids.
    pub path: PathBuf,
    /// Shell command run after each successful save.
    pub persist_hook: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            persist_hook: None,
        }
    }
}

impl RegistryConfig {
    /// Validate registry configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "registry.path".to_string(),
                message: "registry path cannot be empty".to_string(),
            });
        }
        if self.persist_hook.as_deref().is_some_and(|c| c.trim().is_empty()) {
            errors.push(ValidationError {
                field: "registry.persist_hook".to_string(),
                message: "hook command cannot be blank; remove the key instead".to_string(),
            });
        }

        errors
    }
}

/// Local control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Bind address (e.g., "0.0.0.0:3050").
    pub bind: String,
    /// How many consecutive ports to try when the address is in use.
    pub max_bind_attempts: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3050".to_string(),
            max_bind_attempts: 10,
        }
    }
}

impl ControlConfig {
    /// Validate control channel configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "control.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
        } else {
            let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
            if parts.len() != 2 {
                errors.push(ValidationError {
                    field: "control.bind".to_string(),
                    message: format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                });
            } else {
                let port_str = parts[0];
                match port_str.parse::<u16>() {
                    Ok(0) => {
                        errors.push(ValidationError {
                            field: "control.bind".to_string(),
                            message: "port cannot be 0".to_string(),
                        });
                    }
                    Err(_) => {
                        errors.push(ValidationError {
                            field: "control.bind".to_string(),
                            message: format!(
                                "invalid port '{}': must be a number 1-65535",
                                port_str
                            ),
                        });
                    }
                    Ok(_) => {}
                }
            }
        }

        if self.max_bind_attempts == 0 {
            errors.push(ValidationError {
                field: "control.max_bind_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        errors
    }
}

/// Upstream MQTT broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Publish events to the broker.
    pub enabled: bool,
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`.
    pub broker: String,
    /// Client id; the station id when unset.
    pub client_id: Option<String>,
    /// Username for broker authentication.
    pub username: Option<String>,
    /// Password for broker authentication.
    pub password: Option<String>,
    /// Quality of service, 0-2.
    pub qos: u8,
    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
    /// Topic root; `{station}` is replaced by the station id.
    pub topic_root: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: "mqtt://localhost:1883".to_string(),
            client_id: None,
            username: None,
            password: None,
            qos: 1,
            keep_alive: 30,
            topic_root: format!("/devices/{}/events", STATION_PLACEHOLDER),
        }
    }
}

impl MqttConfig {
    /// Topic root with the station id filled in.
    pub fn topic_root_for(&self, station_id: &str) -> String {
        self.topic_root
            .replace(STATION_PLACEHOLDER, station_id)
            .trim_end_matches('/')
            .to_string()
    }

    /// Validate MQTT configuration.
    ///
    /// A disabled section is not checked.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        if !(self.broker.starts_with("mqtt://") || self.broker.starts_with("mqtts://")) {
            errors.push(ValidationError {
                field: "mqtt.broker".to_string(),
                message: format!(
                    "invalid broker '{}': must start with mqtt:// or mqtts://",
                    self.broker
                ),
            });
        }
        if self.qos > 2 {
            errors.push(ValidationError {
                field: "mqtt.qos".to_string(),
                message: format!("invalid QoS {}: must be 0, 1 or 2", self.qos),
            });
        }
        if self.keep_alive < 5 {
            errors.push(ValidationError {
                field: "mqtt.keep_alive".to_string(),
                message: "keep-alive must be at least 5 seconds".to_string(),
            });
        }
        if self.username.is_some() != self.password.is_some() {
            errors.push(ValidationError {
                field: "mqtt.username".to_string(),
                message: "username and password must be set together".to_string(),
            });
        }
        if self.topic_root.is_empty() {
            errors.push(ValidationError {
                field: "mqtt.topic_root".to_string(),
                message: "topic root cannot be empty".to_string(),
            });
        } else if self.topic_root.contains(['#', '+']) {
            errors.push(ValidationError {
                field: "mqtt.topic_root".to_string(),
                message: "topic root cannot contain MQTT wildcards".to_string(),
            });
        }

        errors
    }
}

/// Escalation on a wedged radio.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RebootConfig {
    /// Shell command that restarts the host. Without it the process just
    /// exits and leaves the restart to its supervisor.
    pub command: Option<String>,
}

impl RebootConfig {
    /// Validate reboot configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            errors.push(ValidationError {
                field: "reboot.command".to_string(),
                message: "reboot command cannot be blank; remove the key instead".to_string(),
            });
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `control.bind`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PRODUCT_NAME)
        .join("station.toml")
}

/// Default known-sensor registry path.
pub fn default_registry_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PRODUCT_NAME)
        .join("sensors.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.control.bind, "0.0.0.0:3050");
        assert_eq!(config.control.max_bind_attempts, 10);
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.mqtt.topic_root, "/devices/{station}/events");
        assert!(config.reboot.command.is_none());
        assert!(config.station.station_id().is_none());
    }

    #[test]
    fn test_engine_config_from_ble_section() {
        let ble = BleConfig {
            connect_timeout_secs: 15,
            link_poll_ms: 20,
            pairing_window_secs: 60,
            ..Default::default()
        };
        let engine = ble.engine_config();
        assert_eq!(engine.product_name, "home-cue");
        assert_eq!(engine.connect_timeout, Duration::from_secs(15));
        assert_eq!(engine.disconnect_timeout, Duration::from_secs(10));
        assert_eq!(engine.link_poll_interval, Duration::from_millis(20));
        assert_eq!(engine.probe_interval, Duration::from_secs(5));
        assert_eq!(engine.pairing_window, Duration::from_secs(60));
    }

    #[test]
    fn test_station_id() {
        let station = StationConfig {
            device_uuid: "4f1c2b".to_string(),
            device_uuid_prefix: "hc-".to_string(),
        };
        assert_eq!(station.station_id().as_deref(), Some("hc-4f1c2b"));

        let bare = StationConfig {
            device_uuid: "4f1c2b".to_string(),
            ..Default::default()
        };
        assert_eq!(bare.station_id().as_deref(), Some("4f1c2b"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (DEVICE_UUID_ENV, "a1b2c3"),
            (DEVICE_UUID_PREFIX_ENV, "dev-"),
        ]
        .into();
        let mut config = Config::default();
        config.station.device_uuid = "from-file".to_string();
        config.apply_env_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.station.device_uuid, "a1b2c3");
        assert_eq!(config.station.station_id().as_deref(), Some("dev-a1b2c3"));
    }

    #[test]
    fn test_empty_env_uuid_keeps_file_value() {
        let mut config = Config::default();
        config.station.device_uuid = "from-file".to_string();
        config.apply_env_with(|key| (key == DEVICE_UUID_ENV).then(String::new));
        assert_eq!(config.station.device_uuid, "from-file");
    }

    #[test]
    fn test_topic_root_for_station() {
        let mqtt = MqttConfig::default();
        assert_eq!(mqtt.topic_root_for("a1b2c3"), "/devices/a1b2c3/events");

        let trailing = MqttConfig {
            topic_root: "home/cue/".to_string(),
            ..Default::default()
        };
        assert_eq!(trailing.topic_root_for("a1b2c3"), "home/cue");
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("station.toml");

        let mut config = Config::default();
        config.station.device_uuid = "a1b2c3".to_string();
        config.control.bind = "127.0.0.1:4000".to_string();
        config.registry.path = PathBuf::from("/data/sensors.json");
        config.registry.persist_hook = Some("sync".to_string());
        config.mqtt.broker = "mqtts://broker.example.com".to_string();
        config.reboot.command = Some("reboot".to_string());

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(loaded.station.device_uuid, "a1b2c3");
        assert_eq!(loaded.control.bind, "127.0.0.1:4000");
        assert_eq!(loaded.registry.path, PathBuf::from("/data/sensors.json"));
        assert_eq!(loaded.registry.persist_hook.as_deref(), Some("sync"));
        assert_eq!(loaded.mqtt.broker, "mqtts://broker.example.com");
        assert_eq!(loaded.reboot.command.as_deref(), Some("reboot"));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/station.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_config_partial_toml() {
        let toml = r#"
            [ble]
            pairing_window_secs = 45

            [mqtt]
            broker = "mqtt://10.0.0.2"
            username = "station"
            password = "secret"

            [reboot]
            command = "systemctl reboot"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ble.pairing_window_secs, 45);
        assert_eq!(config.ble.connect_timeout_secs, 10);
        assert_eq!(config.mqtt.broker, "mqtt://10.0.0.2");
        assert!(config.mqtt.enabled);
        assert_eq!(config.control.bind, "0.0.0.0:3050");
        assert_eq!(config.reboot.command.as_deref(), Some("systemctl reboot"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("home-cue/station.toml"));
    }

    // ==========================================================================
    // Validation tests
    // ==========================================================================

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_control_bind_validation() {
        let valid = ControlConfig {
            bind: "[::1]:3050".to_string(),
            ..Default::default()
        };
        assert!(valid.validate().is_empty());

        let no_port = ControlConfig {
            bind: "0.0.0.0".to_string(),
            ..Default::default()
        };
        let errors = no_port.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("host:port"));

        let port_zero = ControlConfig {
            bind: "0.0.0.0:0".to_string(),
            ..Default::default()
        };
        let errors = port_zero.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("cannot be 0"));

        let no_attempts = ControlConfig {
            max_bind_attempts: 0,
            ..Default::default()
        };
        let errors = no_attempts.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "control.max_bind_attempts");
    }

    #[test]
    fn test_ble_validation() {
        let zero = BleConfig {
            connect_timeout_secs: 0,
            pairing_window_secs: 0,
            ..Default::default()
        };
        let fields: Vec<_> = zero.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"ble.connect_timeout_secs".to_string()));
        assert!(fields.contains(&"ble.pairing_window_secs".to_string()));

        let slow_poll = BleConfig {
            connect_timeout_secs: 1,
            link_poll_ms: 1000,
            ..Default::default()
        };
        let errors = slow_poll.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("shorter than the connect timeout"));
    }

    #[test]
    fn test_mqtt_validation() {
        let bad = MqttConfig {
            broker: "http://localhost".to_string(),
            qos: 3,
            keep_alive: 1,
            username: Some("station".to_string()),
            topic_root: "/devices/#".to_string(),
            ..Default::default()
        };
        let errors = bad.validate();
        assert_eq!(errors.len(), 5);

        let disabled = MqttConfig {
            enabled: false,
            ..bad
        };
        assert!(disabled.validate().is_empty());
    }

    #[test]
    fn test_blank_commands_rejected() {
        let mut config = Config::default();
        config.registry.persist_hook = Some("  ".to_string());
        config.reboot.command = Some(String::new());

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].field, "registry.persist_hook");
                assert_eq!(errors[1].field, "reboot.command");
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError {
                field: "control.bind".to_string(),
                message: "port cannot be 0".to_string(),
            },
            ValidationError {
                field: "mqtt.qos".to_string(),
                message: "invalid QoS 3: must be 0, 1 or 2".to_string(),
            },
        ]);
        let display = format!("{}", error);
        assert!(display.contains("Configuration validation failed"));
        assert!(display.contains("  - control.bind: port cannot be 0"));
        assert!(display.contains("  - mqtt.qos: invalid QoS 3"));
    }
}
