use serde::{Deserialize, Serialize};

/// Window in which fetches finishing after the snapshot still reach the engine.
pub const DEFAULT_WAIT_FOR_MS: u64 = 1_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Upper bound on the wait for the DOM snapshot once the session is ready. Unset waits for as
    /// long as the background keeps the channel open.
    pub snapshot_timeout_ms: Option<u64>,
    /// How long the session keeps correlating fetch events after the snapshot was traversed,
    /// before it emits `scan::end` and reports results.
    pub wait_for_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout_ms: None,
            wait_for_ms: DEFAULT_WAIT_FOR_MS,
        }
    }
}
