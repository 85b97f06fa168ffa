use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub hub: HubConfig,
    #[serde(default)]
    pub push: PushConfig,
}

/// The energy monitor we ingest from: an HTTP API for the initial device
/// list and an MQTT topic carrying the realtime sample stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Device-list endpoint (e.g., "http://monitor.local/api/devices")
    pub api_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Re-dial after a stream close/error; initial connect failures never retry.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Topic the monitor publishes realtime updates on
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
}

/// The hub we push device snapshots to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Full event-endpoint URL (e.g., "http://192.168.1.20:39500/event")
    pub endpoint: String,
}

/// Push policy constants: a per-device significance threshold bounded by a
/// debounce floor and a maximum quiet interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_usage_threshold")]
    pub usage_threshold: f64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

fn default_usage_threshold() -> f64 {
    200.0
}
fn default_max_interval_secs() -> u64 {
    60
}
fn default_min_interval_secs() -> u64 {
    10
}
fn default_auto_reconnect() -> bool {
    true
}

impl Default for PushConfig {
    fn default() -> Self {
        PushConfig {
            usage_threshold: default_usage_threshold(),
            max_interval_secs: default_max_interval_secs(),
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards, if HUB_ENDPOINT env is set, override `hub.endpoint`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        // Optional: allow HUB_ENDPOINT env to override whatever YAML had
        if let Ok(endpoint) = std::env::var("HUB_ENDPOINT") {
            cfg.hub.endpoint = endpoint;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.monitor.api_url.is_empty() {
            return Err(AppError::Config(
                "monitor api_url cannot be empty".to_string(),
            ));
        }
        if self.monitor.mqtt.host.is_empty() {
            return Err(AppError::Config(
                "monitor mqtt host cannot be empty".to_string(),
            ));
        }
        if self.monitor.mqtt.port == 0 {
            return Err(AppError::Config(
                "monitor mqtt port cannot be 0".to_string(),
            ));
        }
        if self.monitor.mqtt.topic.is_empty() {
            return Err(AppError::Config(
                "monitor mqtt topic cannot be empty".to_string(),
            ));
        }
        if self.hub.endpoint.is_empty() {
            return Err(AppError::Config("hub endpoint cannot be empty".to_string()));
        }
        if self.push.min_interval_secs >= self.push.max_interval_secs {
            return Err(AppError::Config(format!(
                "min_interval_secs ({}) must be less than max_interval_secs ({})",
                self.push.min_interval_secs, self.push.max_interval_secs
            )));
        }
        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// Notes:
/// - A bare "$" not followed by "(" or "{" is kept as-is.
/// - "$$" becomes a literal "$" (escape).
fn expand_env_placeholders(input: &str) -> Result<String> {
    use anyhow::Context;

    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c == '$' {
            match it.peek().copied() {
                Some('$') => {
                    // Escape "$$" -> "$"
                    it.next();
                    out.push('$');
                }
                Some('(') => {
                    // $(VAR)
                    it.next(); // consume '('
                    let var = read_until(&mut it, ')')
                        .context("unterminated env placeholder: missing ')'")?;
                    let val = std::env::var(&var)
                        .with_context(|| format!("missing environment variable: {}", var))?;
                    out.push_str(&val);
                }
                Some('{') => {
                    // ${VAR}
                    it.next(); // consume '{'
                    let var = read_until(&mut it, '}')
                        .context("unterminated env placeholder: missing '}'")?;
                    let val = std::env::var(&var)
                        .with_context(|| format!("missing environment variable: {}", var))?;
                    out.push_str(&val);
                }
                _ => {
                    // Not a placeholder; keep the '$' as-is
                    out.push('$');
                }
            }
        } else {
            out.push(c);
        }
    }

    Ok(out)
}

/// Read characters until we hit `end`, returning the collected string.
/// Consumes the closing delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
