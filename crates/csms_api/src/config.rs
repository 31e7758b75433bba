use std::time::Duration;

use csms_engine::EngineConfig;
use serde::{Deserialize, Serialize};

/// Protocol settings, optionally loaded from a JSON file at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Heartbeat interval sent to stations in seconds
    pub heartbeat_interval: u32,
    /// Seconds to wait for a station to answer a server-initiated call
    pub call_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            heartbeat_interval: 300,
            call_timeout: 30,
        }
    }
}

impl ServerConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            heartbeat_interval: self.heartbeat_interval,
            call_timeout: Duration::from_secs(self.call_timeout),
        }
    }
}
