use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
/// Must run before any other thread is started.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: Called from a synchronous main before the tokio runtime (and its worker threads) is built
            unsafe { std::env::set_var(key, value) };
        }
    }
}

/// Split .env file content into key/value pairs, skipping blanks and comments.
fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            pairs.push((key, value));
        }
    }

    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub doors: Vec<DoorConfig>,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub use_tls: bool,
    pub root_ca_path: String,
    pub certificate_path: String,
    pub private_key_path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub command_topic: String,
    pub reconnect_delay_secs: u64,
}

/// One garage door: the reed switch input and the relay output (BCM numbering).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoorConfig {
    pub name: String,
    pub state_pin: u8,
    pub relay_pin: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub relay_pulse_ms: u64,
    pub publish_initial: bool,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn relay_pulse(&self) -> Duration {
        Duration::from_millis(self.relay_pulse_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 8883,
                client_id: "garagedoor".to_string(),
                use_tls: true,
                root_ca_path: "certs/root-CA.crt".to_string(),
                certificate_path: "certs/garagedoor.cert.pem".to_string(),
                private_key_path: "certs/garagedoor.private.key".to_string(),
                username: None,
                password: None,
                command_topic: "garage_door_cmd".to_string(),
                reconnect_delay_secs: 5,
            },
            doors: vec![
                DoorConfig {
                    name: "garage_door_1".to_string(),
                    state_pin: 17,
                    relay_pin: 23,
                },
                DoorConfig {
                    name: "garage_door_2".to_string(),
                    state_pin: 27,
                    relay_pin: 24,
                },
            ],
            monitor: MonitorConfig {
                poll_interval_secs: 20,
                relay_pulse_ms: 200,
                publish_initial: true,
            },
        }
    }
}

/// Parse a boolean environment value ("1", "true", "yes", "on" and their negatives).
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // MQTT configuration
        if let Some(host) = lookup("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Some(tls) = lookup("MQTT_USE_TLS")
            && let Some(t) = parse_bool(&tls)
        {
            config.mqtt.use_tls = t;
        }
        if let Some(path) = lookup("MQTT_ROOT_CA") {
            config.mqtt.root_ca_path = path;
        }
        if let Some(path) = lookup("MQTT_CERTIFICATE") {
            config.mqtt.certificate_path = path;
        }
        if let Some(path) = lookup("MQTT_PRIVATE_KEY") {
            config.mqtt.private_key_path = path;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Some(topic) = lookup("COMMAND_TOPIC") {
            config.mqtt.command_topic = topic;
        }
        if let Some(delay) = lookup("MQTT_RECONNECT_DELAY_SECS")
            && let Ok(d) = delay.parse()
        {
            config.mqtt.reconnect_delay_secs = d;
        }

        // Door pins
        for (index, door) in config.doors.iter_mut().enumerate() {
            let prefix = format!("GARAGE_DOOR_{}", index + 1);
            if let Some(pin) = lookup(format!("{prefix}_STATE_PIN").as_str())
                && let Ok(p) = pin.parse()
            {
                door.state_pin = p;
            }
            if let Some(pin) = lookup(format!("{prefix}_RELAY_PIN").as_str())
                && let Ok(p) = pin.parse()
            {
                door.relay_pin = p;
            }
        }

        // Monitor timing
        if let Some(interval) = lookup("POLL_INTERVAL_SECS")
            && let Ok(i) = interval.parse()
        {
            config.monitor.poll_interval_secs = i;
        }
        if let Some(pulse) = lookup("RELAY_PULSE_MS")
            && let Ok(p) = pulse.parse()
        {
            config.monitor.relay_pulse_ms = p;
        }
        if let Some(publish) = lookup("PUBLISH_INITIAL")
            && let Some(p) = parse_bool(&publish)
        {
            config.monitor.publish_initial = p;
        }

        config
    }

    /// Reject configurations that would drive the hardware incorrectly.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll interval must be at least one second".to_string(),
            ));
        }
        if self.monitor.relay_pulse_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "relay pulse must be longer than 0 ms".to_string(),
            ));
        }

        let mut pins = HashSet::new();
        let mut names = HashSet::new();
        for door in &self.doors {
            if !names.insert(door.name.as_str()) {
                return Err(BridgeError::InvalidConfig(format!(
                    "duplicate door name {}",
                    door.name
                )));
            }
            for pin in [door.state_pin, door.relay_pin] {
                if !pins.insert(pin) {
                    return Err(BridgeError::InvalidConfig(format!(
                        "GPIO {} is assigned more than once",
                        pin
                    )));
                }
            }
        }

        Ok(())
    }
}
