//! Hintbridge background context.
//!
//! Owns everything keyed by tab in the network-observing context: which tabs are enabled, whether
//! their analysis context is ready to receive events, the optional inspection-panel connection, and
//! installation of the analysis script. [`Background`] routes incoming cross-context messages and
//! serves as the host of the network tap's request tracker.

pub mod background;
pub mod config;
pub mod inject;
pub mod lifecycle;
pub mod ports;
pub mod queue;

use async_trait::async_trait;
use hintbridge_core_types::{HintError, TabId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

pub use background::Background;
pub use config::BridgeConfig;
pub use inject::{ContentInjector, InjectionOutcome};
pub use lifecycle::{TabLifecycleManager, TabStatus};
pub use ports::{ChannelPort, PanelPort, PanelPortRegistry};
pub use queue::{ChannelTransport, TabMessageQueue, TabTransport};

/// Errors surfaced by the bridge.
#[derive(Clone, Debug, Error)]
pub enum BridgeError {
    /// A message could not be attributed to a tab.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("content script injection into tab {tab} failed after {attempts} attempts")]
    InjectionFailed { tab: TabId, attempts: u32 },
    #[error("channel closed")]
    ChannelClosed,
    #[error("browser error: {0}")]
    Browser(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BridgeError> for HintError {
    fn from(value: BridgeError) -> Self {
        HintError::new(value.to_string())
    }
}

/// Bus carrying [`BridgeEvent`]s to observers.
pub type BridgeEventBus = broadcast::Sender<BridgeEvent>;

/// Events emitted by the bridge to observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    TabEnabled { tab: TabId },
    TabDisabled { tab: TabId },
    TabReady { tab: TabId, flushed: usize },
    InjectionFailed { tab: TabId, attempts: u32 },
    ResultsForwarded { tab: TabId },
    PanelConnected { tab: TabId },
}

/// Document phase at which an injected script runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    DocumentStart,
    DocumentEnd,
    DocumentIdle,
}

/// Page and tab lifecycle operations of the host browser.
#[async_trait]
pub trait BrowserTabs: Send + Sync {
    async fn reload(&self, tab: TabId, bypass_cache: bool) -> Result<(), BridgeError>;
    async fn execute_script(&self, tab: TabId, file: &str, run_at: RunAt)
        -> Result<(), BridgeError>;
}
