//! Hintbridge network tap.
//!
//! Turns the scattered network-lifecycle notifications of each request into one `fetch::start`
//! and at most one `fetch::end` event, capturing response bodies on the way when the platform
//! allows it.

pub mod capture;
pub mod config;
pub mod decode;
pub mod hooks;
pub mod refetch;
pub mod tracker;

use std::fmt::Display;

use hintbridge_core_types::{HintError, RequestId};
use thiserror::Error;

pub use capture::{BodyCapture, CapturedBody, ResponseFilter, ResponseFilterProvider};
pub use config::TapConfig;
pub use decode::Utf8StreamDecoder;
pub use hooks::{HookGate, NotificationHooks};
pub use refetch::{HttpRefetcher, SideChannelFetch, StaticBodies};
pub use tracker::{MaintenanceHandle, Recorded, RequestRecord, RequestTracker, TrackerHost};

/// Errors emitted by the tap surface.
#[derive(Clone, Debug, Error)]
pub enum TapError {
    #[error("body capture unavailable")]
    CaptureUnavailable,
    #[error("body capture for request {0} ended without a body")]
    CaptureDropped(RequestId),
    #[error("re-fetch of {url} failed: {reason}")]
    Refetch { url: String, reason: String },
    #[error("channel closed")]
    ChannelClosed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl TapError {
    pub fn refetch(url: &str, reason: impl Display) -> Self {
        TapError::Refetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<TapError> for HintError {
    fn from(value: TapError) -> Self {
        HintError::new(value.to_string())
    }
}
