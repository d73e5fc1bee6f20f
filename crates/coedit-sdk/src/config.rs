//! Hub configuration.

use coedit_db::{DEFAULT_HISTORY_DEPTH, DEFAULT_RECONNECT_WINDOW_MS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`crate::Hub`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Operations each author can undo per document.
    pub history_depth: usize,
    /// How long a disconnected participant's missed operations are kept
    /// (in milliseconds).
    pub reconnect_window_ms: i64,
    /// How often the expiry sweeper runs (in milliseconds).
    pub sweep_interval_ms: u64,
    /// Capacity of the outbound event channel.
    pub event_capacity: usize,
}

impl HubConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            reconnect_window_ms: DEFAULT_RECONNECT_WINDOW_MS,
            sweep_interval_ms: 60_000,
            event_capacity: 1024,
        }
    }
}

/// Builder for hub configuration.
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: HubConfig::default(),
        }
    }

    pub fn history_depth(mut self, depth: usize) -> Self {
        self.config.history_depth = depth;
        self
    }

    pub fn reconnect_window(mut self, ms: i64) -> Self {
        self.config.reconnect_window_ms = ms;
        self
    }

    pub fn sweep_interval(mut self, ms: u64) -> Self {
        self.config.sweep_interval_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> HubConfig {
        self.config
    }
}

impl Default for HubConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
