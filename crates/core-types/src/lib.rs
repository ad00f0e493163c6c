//! Shared primitives for the hintbridge contexts.
//!
//! The background (network observer), content (analysis) and panel contexts never share memory;
//! everything they exchange is defined here and travels as [`Message`] values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod fetch;
pub mod message;
pub mod snapshot;

pub use fetch::{
    map_headers, FetchEnd, FetchStart, Headers, HttpHeader, Notification, NotificationKind,
    RequestInfo, ResourceType, ResponseBody, ResponseInfo,
};
pub use message::{
    CategoryResults, Envelope, ErrorData, HintResults, Message, MessageSender, Problem,
    ScanConfig, ScanResults,
};
pub use snapshot::{DomNode, DomSnapshot, ElementRef};

/// Shared error type for the hintbridge crates.
#[derive(Debug, Error, Clone)]
pub enum HintError {
    #[error("{message}")]
    Message { message: String },
}

impl HintError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Browser tab identifier, as handed out by the tabs API.
///
/// Requests that do not belong to a tab (service workers, extension pages) carry [`TabId::NONE`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl TabId {
    pub const NONE: TabId = TabId(-1);

    pub fn is_tab(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TabId {
    type Err = HintError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let id = raw
            .trim()
            .parse::<i64>()
            .map_err(|err| HintError::new(format!("invalid tab id {raw:?}: {err}")))?;
        if id < 0 {
            return Err(HintError::new(format!("{raw:?} does not name a tab")));
        }
        Ok(TabId(id))
    }
}

/// Opaque identifier of one logical network request, stable across redirects.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page load as seen by the analysis context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
