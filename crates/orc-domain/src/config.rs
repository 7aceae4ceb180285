use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the Subscription Bus does when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Block the publisher until the slow subscriber drains. Preserves
    /// ordering; the default.
    Blocking,
    /// Drop the slowest subscriber, sending SUBSCRIBER_OVERRUN then closing
    /// its queue.
    DropSlowest,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        BackpressurePolicy::Blocking
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_idle_turn_ms() -> u64 {
    30_000
}

fn default_watchdog_interval_ms() -> u64 {
    5_000
}

fn default_subscription_queue_capacity() -> usize {
    256
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

/// Orchestrator configuration, loaded from a TOML file with environment
/// overrides layered on top (`ORC_BIND_ADDR`, `ORC_STATE_DIR`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub idle_turn_ms: u64,
    pub watchdog_interval_ms: u64,
    pub subscription_queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: default_bind_addr(),
            idle_turn_ms: default_idle_turn_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            subscription_queue_capacity: default_subscription_queue_capacity(),
            backpressure: BackpressurePolicy::default(),
            state_dir: default_state_dir(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, super::error::Error> {
        toml::from_str(s).map_err(|e| super::error::Error::Config(e.to_string()))
    }

    /// Apply `ORC_*` environment overrides on top of a loaded file.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("ORC_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("ORC_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ORC_IDLE_TURN_MS") {
            if let Ok(n) = v.parse() {
                self.idle_turn_ms = n;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.idle_turn_ms, 30_000);
        assert_eq!(cfg.backpressure, BackpressurePolicy::Blocking);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str("bind_addr = \"0.0.0.0:9000\"").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.watchdog_interval_ms, 5_000);
    }

    #[test]
    fn env_override_wins() {
        std::env::set_var("ORC_IDLE_TURN_MS", "1234");
        let cfg = Config::default().apply_env();
        assert_eq!(cfg.idle_turn_ms, 1234);
        std::env::remove_var("ORC_IDLE_TURN_MS");
    }
}
