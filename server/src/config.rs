//! Runtime configuration
//!
//! Values come from an optional TOML file; command-line flags parsed in `main`
//! override the network and threading fields afterwards. Every field has a
//! default so an empty file (or no file) yields a runnable server.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the UDP socket binds to.
    pub bind: String,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    pub max_players: usize,
    pub worker_thread_count: usize,
    /// How long an idle worker waits on the queue before re-checking shutdown.
    pub dequeue_timeout_ms: u64,
    /// Soft limit on queued jobs; exceeding it only logs a warning.
    pub job_queue_capacity: usize,
    pub client_timeout_secs: u64,
    /// Protocol errors tolerated from one peer before it is disconnected.
    pub max_protocol_errors: u32,
    pub disabled_opcodes: Vec<u8>,
    pub world_seed: u64,
    pub weapons: WeaponConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeaponConfig {
    pub torpedo_cooldown_ms: u64,
    pub plasma_beam_cooldown_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            tick_rate: 30,
            max_players: 32,
            worker_thread_count: 4,
            dequeue_timeout_ms: 100,
            job_queue_capacity: 1024,
            client_timeout_secs: 5,
            max_protocol_errors: 16,
            disabled_opcodes: Vec::new(),
            world_seed: 0x5eed,
            weapons: WeaponConfig::default(),
        }
    }
}

impl Default for WeaponConfig {
    fn default() -> Self {
        Self {
            torpedo_cooldown_ms: 500,
            plasma_beam_cooldown_ms: 1500,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate must be within 1..=1000, got {}",
                self.tick_rate
            )));
        }
        if self.worker_thread_count == 0 {
            return Err(ConfigError::Invalid(
                "worker_thread_count must be at least 1".to_string(),
            ));
        }
        if self.dequeue_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "dequeue_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_players == 0 {
            return Err(ConfigError::Invalid(
                "max_players must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate))
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}
