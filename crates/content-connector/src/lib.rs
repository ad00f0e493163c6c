//! Hintbridge analysis context.
//!
//! Receives `fetch::start`/`fetch::end` and DOM snapshot messages from the background context,
//! holds fetch ends back until the snapshot can name the element behind each fetch, classifies
//! every response and feeds the result to an [`AnalysisEngine`].

pub mod config;
pub mod connector;
pub mod correlator;
pub mod element;
pub mod engine;
pub mod fetch_type;

use hintbridge_core_types::HintError;
use thiserror::Error;

pub use config::{ConnectorConfig, DEFAULT_WAIT_FOR_MS};
pub use connector::{ContentSession, SessionOutcome};
pub use correlator::{CorrelatedFetch, CorrelatorState, FetchCorrelator};
pub use element::element_by_url;
pub use engine::{AnalysisEngine, EngineEvent};
pub use fetch_type::{classify, Classification, FetchType};

#[derive(Clone, Debug, Error)]
pub enum ConnectorError {
    #[error("analysis engine failed: {0}")]
    Engine(String),
    #[error("channel closed")]
    ChannelClosed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no DOM snapshot within {0} ms")]
    SnapshotTimeout(u64),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConnectorError {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }
}

impl From<ConnectorError> for HintError {
    fn from(value: ConnectorError) -> Self {
        HintError::new(value.to_string())
    }
}
