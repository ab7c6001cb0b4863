use crate::prelude::*;
use crate::pi30::TransportSettings;

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub mqtt: Mqtt,

    #[serde(default)]
    pub transport: Transport,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Mqtt {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(alias = "server")]
    pub host: String,

    // legacy JSON configs carry the port as a string
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(alias = "topic", default = "Config::default_mqtt_namespace")]
    pub namespace: String,

    #[serde(alias = "devicename", default = "Config::default_device_name")]
    pub device_name: String,

    #[serde(alias = "clientid", default = "Config::default_client_id")]
    pub client_id: String,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
} // }}}

// Transport {{{
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Transport {
    pub flush_attempt_ms: Option<u64>,
    pub flush_deadline_ms: Option<u64>,
    pub read_deadline_ms: Option<u64>,
    pub read_retry_ms: Option<u64>,
    pub read_buffer: Option<usize>,
    pub command_timeout_ms: Option<u64>,
}
impl Transport {
    pub fn settings(&self) -> TransportSettings {
        let defaults = TransportSettings::default();
        let ms = |v: Option<u64>, default: Duration| v.map(Duration::from_millis).unwrap_or(default);

        TransportSettings {
            flush_attempt: ms(self.flush_attempt_ms, defaults.flush_attempt),
            flush_deadline: ms(self.flush_deadline_ms, defaults.flush_deadline),
            read_deadline: ms(self.read_deadline_ms, defaults.read_deadline),
            read_retry: ms(self.read_retry_ms, defaults.read_retry),
            read_buffer: self.read_buffer.unwrap_or(defaults.read_buffer),
        }
    }

    /// Wall-clock bound the coordinator puts on each command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.unwrap_or(2000))
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::parse(&content)
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
            info!("    Device Name: {}", self.mqtt.device_name);
            info!("    Client ID: {}", self.mqtt.client_id);
        }

        let settings = self.transport.settings();
        info!("  Transport:");
        info!("    Flush: {}ms per read, {}ms total", settings.flush_attempt.as_millis(), settings.flush_deadline.as_millis());
        info!("    Read Deadline: {}ms", settings.read_deadline.as_millis());
        info!("    Read Retry: {}ms", settings.read_retry.as_millis());
        info!("    Read Buffer: {} bytes", settings.read_buffer);
        info!("    Command Timeout: {}ms", self.transport.command_timeout().as_millis());
        info!("  Log Level: {}", self.loglevel);
    }

    /// Parses and validates YAML (or JSON) config text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(anyhow!("config.rs:MQTT host cannot be empty"));
            }
            if self.mqtt.device_name.is_empty() {
                return Err(anyhow!("config.rs:MQTT device_name cannot be empty"));
            }
        }

        let t = &self.transport;
        for (name, value) in [
            ("flush_attempt_ms", t.flush_attempt_ms),
            ("flush_deadline_ms", t.flush_deadline_ms),
            ("read_deadline_ms", t.read_deadline_ms),
            ("read_retry_ms", t.read_retry_ms),
            ("command_timeout_ms", t.command_timeout_ms),
        ] {
            if value == Some(0) {
                bail!("transport.{} must be greater than 0", name);
            }
        }

        if let Some(size) = t.read_buffer {
            if !(8..=4096).contains(&size) {
                bail!("transport.read_buffer must be between 8 and 4096, got {}", size);
            }
        }

        Ok(())
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "inverter".to_string()
    }

    fn default_device_name() -> String {
        "axpert".to_string()
    }

    fn default_client_id() -> String {
        "axpert-bridge".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
