//! Startup configuration: fixed defaults matching the deployed bridge, each
//! overridable through an environment variable so a dev box, a test broker,
//! or a different serial adapter needs no rebuild.

use std::env;
use std::time::Duration;

pub(crate) struct Config {
    /// Serial device the microcontroller is attached to.
    pub serial_port: String,
    pub baud_rate: u32,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub client_id: String,

    /// Topic moisture readings are published to.
    pub telemetry_topic: String,
    /// Topic manual relay commands arrive on.
    pub command_topic: String,

    /// Raw ADC value above which the soil counts as dry; a strictly greater
    /// reading triggers a watering cycle (higher raw means drier soil).
    pub moisture_threshold: i64,
    /// How long the relay stays on per cycle.
    pub watering: Duration,
    /// Settling period after the relay turns off, before the controller
    /// returns to idle.
    pub settle: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            mqtt_host: "test.mosquitto.org".to_string(),
            mqtt_port: 1883,
            client_id: "soil-bridge".to_string(),
            telemetry_topic: "arduino/soil_moisture".to_string(),
            command_topic: "arduino/relay_control".to_string(),
            moisture_threshold: 450,
            watering: Duration::from_secs(5),
            settle: Duration::from_secs(20),
        }
    }
}

impl Config {
    pub(crate) fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("SERIAL_PORT") {
            cfg.serial_port = v;
        }
        if let Some(v) = parse_env("BAUD_RATE") {
            cfg.baud_rate = v;
        }
        if let Ok(v) = env::var("MQTT_HOST") {
            cfg.mqtt_host = v;
        }
        if let Some(v) = parse_env("MQTT_PORT") {
            cfg.mqtt_port = v;
        }
        if let Ok(v) = env::var("TELEMETRY_TOPIC") {
            cfg.telemetry_topic = v;
        }
        if let Ok(v) = env::var("COMMAND_TOPIC") {
            cfg.command_topic = v;
        }
        if let Some(v) = parse_env("MOISTURE_THRESHOLD") {
            cfg.moisture_threshold = v;
        }
        if let Some(secs) = parse_env("WATERING_SEC") {
            cfg.watering = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env("SETTLE_SEC") {
            cfg.settle = Duration::from_secs(secs);
        }

        cfg
    }
}

/// Read an env var and parse it, treating unset or unparseable as absent.
fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.mqtt_port, 1883);
        assert_eq!(cfg.telemetry_topic, "arduino/soil_moisture");
        assert_eq!(cfg.command_topic, "arduino/relay_control");
        assert_eq!(cfg.moisture_threshold, 450);
        assert_eq!(cfg.watering, Duration::from_secs(5));
        assert_eq!(cfg.settle, Duration::from_secs(20));
    }

    #[test]
    fn parse_env_unset_is_none() {
        assert_eq!(parse_env::<u16>("SOIL_BRIDGE_NO_SUCH_VAR"), None);
    }
}
