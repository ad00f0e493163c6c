//! Background context configuration.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Analysis script installed into enabled tabs.
    pub content_script: String,
    /// Total injection attempts before giving up, the first one included.
    pub injection_attempts: u32,
    pub injection_retry_delay_ms: u64,
    pub event_bus_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            content_script: "content-script/webhint.js".to_string(),
            injection_attempts: 3,
            injection_retry_delay_ms: 0,
            event_bus_capacity: 64,
        }
    }
}
