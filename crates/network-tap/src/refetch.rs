//! Side-channel re-fetch of a response body.
//!
//! Used when the platform cannot stream the body to us. The request is issued again, so a server
//! that answers differently the second time yields a body the page never rendered.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::TapConfig;
use crate::TapError;

#[async_trait]
pub trait SideChannelFetch: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, TapError>;
}

/// Re-fetches over HTTP.
pub struct HttpRefetcher {
    client: reqwest::Client,
}

impl HttpRefetcher {
    pub fn new(config: &TapConfig) -> Result<Self, TapError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = config.refetch_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = builder
            .build()
            .map_err(|err| TapError::Internal(format!("http client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SideChannelFetch for HttpRefetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, TapError> {
        debug!(target: "network-tap", url, "side-channel re-fetch");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| TapError::refetch(url, err))?;
        response.text().await.map_err(|err| TapError::refetch(url, err))
    }
}

/// Serves bodies from a fixed table; replays and tests use it in place of the network.
#[derive(Clone, Debug, Default)]
pub struct StaticBodies {
    bodies: HashMap<String, String>,
}

impl StaticBodies {
    pub fn new(bodies: HashMap<String, String>) -> Self {
        Self { bodies }
    }

    pub fn with(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.bodies.insert(url.into(), body.into());
        self
    }
}

#[async_trait]
impl SideChannelFetch for StaticBodies {
    async fn fetch_text(&self, url: &str) -> Result<String, TapError> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| TapError::refetch(url, "no body recorded"))
    }
}
