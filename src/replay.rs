//! In-process replay of one recorded page load.
//!
//! A scenario lists the network notifications a tab produced, the response bodies, and the DOM
//! snapshot the analysis context ended up with. The replay wires the background context (tracker,
//! lifecycle, queue, injector, panel ports), an analysis-context session driven by a
//! [`TranscriptEngine`], and optionally a panel, all talking over channels exactly as they would
//! across real context boundaries.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use content_connector::{ConnectorConfig, ConnectorError, ContentSession, SessionOutcome};
use extensions_bridge::{
    Background, BridgeError, BridgeEvent, BrowserTabs, ChannelPort, ChannelTransport, RunAt,
};
use hintbridge_core_types::{
    DomSnapshot, Envelope, Message, MessageSender, Notification, NotificationKind, RequestId,
    ScanConfig, ScanResults, TabId,
};
use network_tap::{
    BodyCapture, HookGate, NotificationHooks, RequestTracker, ResponseFilter,
    ResponseFilterProvider, StaticBodies, TapError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::HintbridgeConfig;
use crate::engine::{TranscriptEngine, TranscriptEntry};

/// Snapshot wait applied to replays when the configuration leaves it unbounded.
pub const DEFAULT_REPLAY_SNAPSHOT_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub tab: TabId,
    /// URL of the page being analysed.
    pub page: String,
    #[serde(default)]
    pub config: ScanConfig,
    #[serde(default)]
    pub panel: bool,
    #[serde(default = "default_stream_capture")]
    pub stream_capture: bool,
    /// Response bodies keyed by the URL the response finally came from.
    #[serde(default)]
    pub bodies: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

fn default_stream_capture() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// A network lifecycle notification, in the order the network layer raised it.
    Notify(NotifyStep),
    /// The analysis context finished building its DOM snapshot.
    Snapshot(DomSnapshot),
    /// A message the panel sends to the background.
    Panel(Message),
}

#[derive(Clone, Debug, Deserialize)]
pub struct NotifyStep {
    pub event: NotificationKind,
    #[serde(flatten)]
    pub notification: Notification,
}

impl Scenario {
    pub async fn from_path(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    /// Body of every request, looked up by the URL of its last notification.
    fn bodies_by_request(&self) -> HashMap<RequestId, String> {
        let mut last_url: HashMap<&RequestId, &str> = HashMap::new();
        for step in &self.steps {
            if let Step::Notify(notify) = step {
                last_url.insert(&notify.notification.request_id, &notify.notification.url);
            }
        }
        last_url
            .into_iter()
            .filter_map(|(request, url)| {
                self.bodies
                    .get(url)
                    .map(|body| (request.clone(), body.clone()))
            })
            .collect()
    }
}

/// Command-line overrides of the scenario's own settings.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplayOptions {
    pub panel: Option<bool>,
    pub stream_capture: Option<bool>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplayReport {
    pub tab: TabId,
    pub resource: String,
    pub stream_capture: bool,
    pub panel: bool,
    /// What the analysis engine saw, in order.
    pub transcript: Vec<TranscriptEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ScanResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Kinds of the messages the panel received.
    pub panel_messages: Vec<String>,
    pub bridge_events: Vec<BridgeEvent>,
    pub reloads: usize,
    pub injections: usize,
    pub hook_registrations: u64,
    pub hooks_registered: bool,
}

/// Streams each recorded body through a response filter, split mid-way so multi-byte
/// characters cross chunk boundaries. Requests without a recorded body stream nothing.
struct ReplayFilters {
    bodies: HashMap<RequestId, String>,
}

impl ResponseFilterProvider for ReplayFilters {
    fn filter_response_data(&self, request: &RequestId) -> Result<ResponseFilter, TapError> {
        let bytes = self
            .bodies
            .get(request)
            .map(String::as_bytes)
            .unwrap_or_default();
        let (head, tail) = bytes.split_at(bytes.len() / 2);

        let (data_tx, data) = mpsc::channel(2);
        for chunk in [head, tail] {
            data_tx
                .try_send(chunk.to_vec())
                .map_err(|err| TapError::Internal(format!("replay filter: {err}")))?;
        }
        // The page side is not modelled; the capture carries on once passthrough is closed.
        let (passthrough, _page) = mpsc::channel(2);
        Ok(ResponseFilter { data, passthrough })
    }
}

type Routed = (TabId, Message);
type SessionHandle = JoinHandle<Result<SessionOutcome, ConnectorError>>;

/// Browser whose script injection starts an analysis-context session.
struct ReplayBrowser {
    transport: Arc<ChannelTransport>,
    engine: Arc<TranscriptEngine>,
    connector: ConnectorConfig,
    resource: String,
    to_background: Mutex<Option<mpsc::UnboundedSender<Routed>>>,
    sessions: Mutex<Vec<SessionHandle>>,
    reloads: AtomicUsize,
}

impl ReplayBrowser {
    /// Refuse further injections and let the routing channel close once sessions end.
    fn close(&self) {
        self.to_background.lock().take();
    }

    fn take_sessions(&self) -> Vec<SessionHandle> {
        std::mem::take(&mut *self.sessions.lock())
    }
}

#[async_trait]
impl BrowserTabs for ReplayBrowser {
    async fn reload(&self, tab: TabId, bypass_cache: bool) -> Result<(), BridgeError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        debug!(target: "hintbridge", %tab, bypass_cache, "reload");
        Ok(())
    }

    async fn execute_script(&self, tab: TabId, file: &str, run_at: RunAt) -> Result<(), BridgeError> {
        let Some(to_background) = self.to_background.lock().clone() else {
            return Err(BridgeError::Browser("replay finished".to_string()));
        };
        debug!(target: "hintbridge", %tab, file, ?run_at, "analysis context injected");

        let inbox = self.transport.attach(tab);
        let (outbox, mut posted) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = posted.recv().await {
                if to_background.send((tab, message)).is_err() {
                    break;
                }
            }
        });

        let session = ContentSession::new(
            self.resource.clone(),
            self.connector.clone(),
            self.engine.clone(),
            outbox,
            inbox,
        );
        self.sessions.lock().push(tokio::spawn(session.run()));
        Ok(())
    }
}

/// Replay `scenario` and report what every context observed.
pub async fn replay(
    config: &HintbridgeConfig,
    scenario: Scenario,
    options: ReplayOptions,
) -> Result<ReplayReport> {
    let tab = scenario.tab;
    let span = info_span!(target: "hintbridge", "replay", %tab, page = %scenario.page);
    run_scenario(config, scenario, options).instrument(span).await
}

async fn run_scenario(
    config: &HintbridgeConfig,
    scenario: Scenario,
    options: ReplayOptions,
) -> Result<ReplayReport> {
    let tab = scenario.tab;
    let with_panel = options.panel.unwrap_or(scenario.panel);
    let stream_capture = options.stream_capture.unwrap_or(scenario.stream_capture);

    let mut connector = config.connector.clone();
    connector.snapshot_timeout_ms = connector
        .snapshot_timeout_ms
        .or(Some(DEFAULT_REPLAY_SNAPSHOT_TIMEOUT_MS));

    let hooks = Arc::new(HookGate::new());
    let transport = Arc::new(ChannelTransport::new());
    let engine = Arc::new(TranscriptEngine::new());
    let (to_background, mut from_contexts) = mpsc::unbounded_channel::<Routed>();
    let browser = Arc::new(ReplayBrowser {
        transport: Arc::clone(&transport),
        engine: Arc::clone(&engine),
        connector,
        resource: scenario.page.clone(),
        to_background: Mutex::new(Some(to_background)),
        sessions: Mutex::new(Vec::new()),
        reloads: AtomicUsize::new(0),
    });

    let capture = if stream_capture {
        BodyCapture::new(Arc::new(ReplayFilters {
            bodies: scenario.bodies_by_request(),
        }))
    } else {
        BodyCapture::unavailable()
    };
    let background = Arc::new(Background::new(
        &config.bridge,
        hooks.clone(),
        browser.clone(),
        transport.clone(),
        capture.is_available(),
    ));
    let mut events = background.subscribe();
    let refetch = StaticBodies::new(scenario.bodies.clone().into_iter().collect());
    let tracker = Arc::new(RequestTracker::new(
        config.tap.clone(),
        background.clone(),
        Arc::new(capture),
        Arc::new(refetch),
        hooks.clone(),
    ));
    let maintenance = tracker.spawn_maintenance();

    let mut panel = if with_panel {
        let (port, received) = ChannelPort::pair();
        background
            .connect_panel(&tab.to_string(), port)
            .context("Failed to connect panel")?;
        Some(received)
    } else {
        None
    };

    let router = {
        let background = Arc::clone(&background);
        tokio::spawn(async move {
            while let Some((tab, message)) = from_contexts.recv().await {
                let kind = message.kind();
                if let Err(err) = background
                    .handle(Envelope::new(message), MessageSender::tab(tab))
                    .await
                {
                    warn!(target: "hintbridge", %tab, kind, %err, "message from analysis context rejected");
                }
            }
        })
    };

    background
        .handle(
            Envelope::for_tab(tab, Message::Enable(scenario.config.clone())),
            MessageSender::extension(),
        )
        .await
        .context("Failed to enable tab")?;

    for step in scenario.steps {
        match step {
            Step::Notify(NotifyStep {
                event,
                notification,
            }) => {
                let request = notification.request_id.clone();
                let recorded = tracker.record(event, notification);
                debug!(target: "hintbridge", %request, %event, ?recorded, "notification");
                if event.is_terminal() {
                    tracker.settle().await;
                }
            }
            Step::Snapshot(snapshot) => {
                tracker.settle().await;
                background.settle().await;
                background
                    .queue()
                    .send(tab, Message::Snapshot(snapshot))
                    .context("Failed to deliver snapshot")?;
            }
            Step::Panel(message) => {
                background
                    .handle(Envelope::for_tab(tab, message), MessageSender::extension())
                    .await
                    .context("Panel message rejected")?;
            }
        }
    }

    tracker.settle().await;
    background.settle().await;
    browser.close();

    let sessions = browser.take_sessions();
    let injections = sessions.len();
    let mut outcome = Err("analysis context never started".to_string());
    for session in sessions {
        outcome = match session.await {
            Ok(Ok(done)) => Ok(done),
            Ok(Err(err)) => Err(err.to_string()),
            Err(err) => Err(format!("analysis context task failed: {err}")),
        };
    }
    router.await.context("Message router failed")?;
    transport.detach(tab);
    if let Err(err) = maintenance.shutdown().await {
        warn!(target: "hintbridge", %err, "maintenance loop ended abnormally");
    }

    let mut panel_messages = Vec::new();
    if let Some(received) = panel.as_mut() {
        while let Ok(message) = received.try_recv() {
            panel_messages.push(message.kind().to_string());
        }
    }
    let mut bridge_events = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => bridge_events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(target: "hintbridge", skipped, "bridge events dropped from the report");
            }
            Err(_) => break,
        }
    }

    let (results, error) = match outcome {
        Ok(done) => {
            info!(target: "hintbridge", session = %done.session, "replay finished");
            (Some(done.results), None)
        }
        Err(err) => {
            warn!(target: "hintbridge", %err, "replay finished without results");
            (None, Some(err))
        }
    };

    Ok(ReplayReport {
        tab,
        resource: scenario.page,
        stream_capture,
        panel: with_panel,
        transcript: engine.transcript(),
        results,
        error,
        panel_messages,
        bridge_events,
        reloads: browser.reloads.load(Ordering::SeqCst),
        injections,
        hook_registrations: hooks.registrations(),
        hooks_registered: hooks.is_registered(),
    })
}
