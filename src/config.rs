use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

fn load_dotenv_from(env_path: &Path) {
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(&key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
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

            pairs.push((key.to_string(), value.to_string()));
        }
    }

    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub occupancy: OccupancyConfig,
    pub mqtt: MqttConfig,
    pub topology_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyConfig {
    /// How long a tentative transition stays eligible for confirmation.
    pub debounce_window_secs: u64,
    pub working_hours: WorkingHours,
    /// Only evaluate bindings inside working hours.
    pub gate_on_working_hours: bool,
}

impl OccupancyConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_window_secs)
    }
}

/// Working day boundaries, in local hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start: u32,
    pub end: u32,
}

impl WorkingHours {
    /// True if `hour` falls in `[start, end)`.
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start && hour < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Endpoint values live under `<prefix>/<endpoint>`.
    pub topic_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            occupancy: OccupancyConfig {
                debounce_window_secs: 60,
                working_hours: WorkingHours { start: 7, end: 18 },
                gate_on_working_hours: false,
            },
            mqtt: MqttConfig {
                broker_host: "127.0.0.1".to_string(),
                broker_port: 1883,
                client_id: format!("occupancy-reconciler-{}", uuid::Uuid::new_v4().simple()),
                username: None,
                password: None,
                topic_prefix: "twin".to_string(),
            },
            topology_file: default_topology_path(),
        }
    }
}

/// `<config dir>/occupancy-reconciler/topology.json`
pub fn default_topology_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("occupancy-reconciler")
        .join("topology.json")
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults overridden by `lookup(key)`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = lookup("DEBOUNCE_WINDOW_SECS")
            && let Ok(s) = secs.parse()
        {
            config.occupancy.debounce_window_secs = s;
        }
        if let Some(start) = lookup("WORKING_HOURS_START")
            && let Ok(h) = start.parse()
        {
            config.occupancy.working_hours.start = h;
        }
        if let Some(end) = lookup("WORKING_HOURS_END")
            && let Ok(h) = end.parse()
        {
            config.occupancy.working_hours.end = h;
        }
        if let Some(gate) = lookup("WORKING_HOURS_GATE") {
            config.occupancy.gate_on_working_hours =
                matches!(gate.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(path) = lookup("TOPOLOGY_FILE") {
            config.topology_file = PathBuf::from(path);
        }

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
        if let Some(username) = lookup("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Some(prefix) = lookup("MQTT_TOPIC_PREFIX") {
            config.mqtt.topic_prefix = prefix.trim_end_matches('/').to_string();
        }

        config
    }
}
