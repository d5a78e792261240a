//! Orchestrator tuning loaded from `stateflow.toml`.
//!
//! Values missing from the file fall back to sensible defaults, so an empty
//! or absent file is valid configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Top-level configuration for the engine, scheduler, bus, and store TTL.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Delay in milliseconds before an automatic progression re-validates
    /// and fires.
    #[serde(default = "default_progression_delay_ms")]
    pub progression_delay_ms: u64,

    /// Idle seconds between keepalive markers on subscription streams.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Per-channel broadcast buffer; slow subscribers drop events beyond it.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Entity record time-to-live in the store, in seconds. Zero disables
    /// expiry.
    #[serde(default = "default_entity_ttl_secs")]
    pub entity_ttl_secs: u64,
}

fn default_progression_delay_ms() -> u64 {
    1_500
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_bus_capacity() -> usize {
    1_024
}

// 24 hours, matching the store's one-day retention of finished workflows.
fn default_entity_ttl_secs() -> u64 {
    86_400
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            progression_delay_ms: default_progression_delay_ms(),
            keepalive_secs: default_keepalive_secs(),
            bus_capacity: default_bus_capacity(),
            entity_ttl_secs: default_entity_ttl_secs(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from `stateflow.toml` in the current directory, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("stateflow.toml"))
    }

    /// Load from an explicit path, falling back to defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn progression_delay(&self) -> Duration {
        Duration::from_millis(self.progression_delay_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// `None` when expiry is disabled.
    pub fn entity_ttl(&self) -> Option<Duration> {
        (self.entity_ttl_secs > 0).then(|| Duration::from_secs(self.entity_ttl_secs))
    }
}
