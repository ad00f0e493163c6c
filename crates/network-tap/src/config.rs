//! Configuration types for the network tap.

use hintbridge_core_types::ResourceType;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Resource types the upstream hooks are registered for.
    pub resource_types: Vec<ResourceType>,
    /// Skip `fetch::end` when this context captures no bodies and a panel is attached to the tab;
    /// the panel then supplies the fetch events itself.
    pub suppress_when_panel: bool,
    /// Open records older than this are evicted by the maintenance loop. Zero keeps them forever.
    pub request_ttl_ms: u64,
    pub maintenance_interval_ms: u64,
    /// Optional bound on a side-channel re-fetch.
    pub refetch_timeout_ms: Option<u64>,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            resource_types: vec![
                ResourceType::MainFrame,
                ResourceType::SubFrame,
                ResourceType::Stylesheet,
                ResourceType::Script,
                ResourceType::Image,
            ],
            suppress_when_panel: true,
            request_ttl_ms: 5 * 60 * 1000,
            maintenance_interval_ms: 30_000,
            refetch_timeout_ms: None,
        }
    }
}

impl TapConfig {
    pub fn tracks(&self, resource_type: ResourceType) -> bool {
        self.resource_types.contains(&resource_type)
    }
}
