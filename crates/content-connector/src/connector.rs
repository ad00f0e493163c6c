//! One page load in the analysis context.
//!
//! The session asks the background for its configuration, announces readiness, then consumes
//! delivered messages until the DOM snapshot has been traversed. Fetches keep being correlated for
//! [`ConnectorConfig::wait_for_ms`] after that, then results and `done` go back to the
//! background; a failure is reported as an `error` message instead.

use std::sync::Arc;
use std::time::Duration;

use hintbridge_core_types::{DomSnapshot, ErrorData, Message, ScanConfig, ScanResults, SessionId};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, trace, Instrument};

use crate::config::ConnectorConfig;
use crate::correlator::{CorrelatedFetch, FetchCorrelator};
use crate::engine::{AnalysisEngine, EngineEvent};
use crate::ConnectorError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub session: SessionId,
    pub resource: String,
    pub config: ScanConfig,
    pub results: ScanResults,
}

pub struct ContentSession {
    id: SessionId,
    resource: String,
    config: ConnectorConfig,
    engine: Arc<dyn AnalysisEngine>,
    outbox: mpsc::UnboundedSender<Message>,
    inbox: mpsc::UnboundedReceiver<Message>,
    correlator: FetchCorrelator,
}

impl ContentSession {
    /// `outbox` reaches the background context, `inbox` is this tab's delivery channel.
    pub fn new(
        resource: impl Into<String>,
        config: ConnectorConfig,
        engine: Arc<dyn AnalysisEngine>,
        outbox: mpsc::UnboundedSender<Message>,
        inbox: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        let resource = resource.into();
        Self {
            id: SessionId::new(),
            correlator: FetchCorrelator::new(resource.clone()),
            resource,
            config,
            engine,
            outbox,
            inbox,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn run(mut self) -> Result<SessionOutcome, ConnectorError> {
        let span = info_span!(
            target: "content-connector",
            "session",
            session = %self.id,
            resource = %self.resource
        );
        async move {
            match self.drive().await {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    error!(target: "content-connector", %err, "session failed");
                    let _ = self.post(Message::Error(ErrorData {
                        message: err.to_string(),
                        stack: String::new(),
                    }));
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<SessionOutcome, ConnectorError> {
        self.post(Message::RequestConfig)?;

        // Anything delivered ahead of the config is replayed once the session is ready.
        let mut early = Vec::new();
        let config = loop {
            match self.inbox.recv().await.ok_or(ConnectorError::ChannelClosed)? {
                Message::Enable(config) => break config,
                other => early.push(other),
            }
        };
        debug!(target: "content-connector", early = early.len(), "configuration received");

        self.engine
            .emit(EngineEvent::ScanStart {
                resource: self.resource.clone(),
            })
            .await?;
        self.post(Message::Ready)?;

        let deadline = self
            .config
            .snapshot_timeout_ms
            .map(|ms| (ms, Instant::now() + Duration::from_millis(ms)));
        let mut early = early.into_iter();
        loop {
            let message = match early.next() {
                Some(message) => message,
                None => self.next_message(deadline).await?,
            };
            if self.dispatch(message).await? {
                break;
            }
        }
        for message in early {
            self.dispatch_late(message).await?;
        }
        self.linger().await?;

        self.engine
            .emit(EngineEvent::ScanEnd {
                resource: self.resource.clone(),
            })
            .await?;
        let results = self.engine.results(&self.resource).await?;
        info!(
            target: "content-connector",
            categories = results.categories.len(),
            "scan finished"
        );
        self.post(Message::Results(results.clone()))?;
        self.post(Message::Done)?;

        Ok(SessionOutcome {
            session: self.id,
            resource: self.resource.clone(),
            config,
            results,
        })
    }

    async fn next_message(
        &mut self,
        deadline: Option<(u64, Instant)>,
    ) -> Result<Message, ConnectorError> {
        let received = match deadline {
            Some((ms, at)) => tokio::time::timeout_at(at, self.inbox.recv())
                .await
                .map_err(|_| ConnectorError::SnapshotTimeout(ms))?,
            None => self.inbox.recv().await,
        };
        received.ok_or(ConnectorError::ChannelClosed)
    }

    /// Handle one delivered message; `true` once the page has been traversed.
    async fn dispatch(&mut self, message: Message) -> Result<bool, ConnectorError> {
        match message {
            Message::FetchStart(start) => {
                self.engine.emit(EngineEvent::FetchStart(start)).await?;
            }
            Message::FetchEnd(event) => {
                if let Some(correlated) = self.correlator.on_fetch_end(*event) {
                    self.forward(correlated).await?;
                }
            }
            Message::Snapshot(snapshot) => {
                self.on_snapshot(snapshot).await?;
                return Ok(true);
            }
            other => {
                trace!(target: "content-connector", kind = other.kind(), "message ignored");
            }
        }
        Ok(false)
    }

    /// Keep correlating fetch events that finish after the traversal, until the wait window
    /// closes or the page goes away.
    async fn linger(&mut self) -> Result<(), ConnectorError> {
        let until = Instant::now() + Duration::from_millis(self.config.wait_for_ms);
        let mut late = 0usize;
        loop {
            let message = match tokio::time::timeout_at(until, self.inbox.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!(target: "content-connector", "delivery channel closed after traversal");
                    break;
                }
                Err(_) => break,
            };
            if self.dispatch_late(message).await? {
                late += 1;
            }
        }
        debug!(target: "content-connector", late, "wait after traversal finished");
        Ok(())
    }

    /// Fetch events after the traversal; anything else is ignored. `true` when one was handled.
    async fn dispatch_late(&mut self, message: Message) -> Result<bool, ConnectorError> {
        match message {
            message @ (Message::FetchStart(_) | Message::FetchEnd(_)) => {
                self.dispatch(message).await?;
                Ok(true)
            }
            other => {
                trace!(target: "content-connector", kind = other.kind(), "message after traversal ignored");
                Ok(false)
            }
        }
    }

    async fn on_snapshot(&mut self, snapshot: DomSnapshot) -> Result<(), ConnectorError> {
        for correlated in self.correlator.on_snapshot(snapshot) {
            self.forward(correlated).await?;
        }
        if let Some(snapshot) = self.correlator.snapshot() {
            debug!(target: "content-connector", nodes = snapshot.nodes.len(), "traversing snapshot");
            self.engine.traverse(snapshot, &self.resource).await?;
        }
        self.engine
            .emit(EngineEvent::CanEvaluateScript {
                resource: self.resource.clone(),
            })
            .await?;
        self.correlator.traversal_complete();
        Ok(())
    }

    async fn forward(&self, correlated: CorrelatedFetch) -> Result<(), ConnectorError> {
        trace!(
            target: "content-connector",
            url = %correlated.event.response.url,
            kind = correlated.fetch_type.as_str(),
            "fetch::end"
        );
        self.engine
            .emit(EngineEvent::FetchEnd {
                fetch_type: correlated.fetch_type,
                event: Box::new(correlated.event),
            })
            .await
    }

    fn post(&self, message: Message) -> Result<(), ConnectorError> {
        self.outbox
            .send(message)
            .map_err(|_| ConnectorError::ChannelClosed)
    }
}
