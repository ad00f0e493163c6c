//! Request lifecycle correlation.
//!
//! Every notification for a request id lands in one [`RequestRecord`]. The first notification emits
//! `fetch::start`; the terminal one closes the record and assembles `fetch::end` from the whole
//! sequence (request from the first headers seen, response from the last notification, redirect
//! hops in order).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hintbridge_core_types::{
    map_headers, FetchEnd, FetchStart, Message, Notification, NotificationKind, RequestId,
    RequestInfo, ResponseBody, ResponseInfo, TabId,
};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::capture::{BodyCapture, CapturedBody};
use crate::config::TapConfig;
use crate::hooks::{HookGate, NotificationHooks};
use crate::refetch::SideChannelFetch;
use crate::TapError;

/// What the tracker needs from the context that owns it.
pub trait TrackerHost: Send + Sync {
    /// Hand an analysis-bound event to the tab's delivery queue.
    fn emit(&self, tab: TabId, message: Message);
    fn is_enabled(&self, tab: TabId) -> bool;
    /// Whether an inspection panel is attached and can supply response content itself.
    fn has_panel(&self, tab: TabId) -> bool;
    fn request_injection(&self, tab: TabId);
}

/// Outcome of [`RequestTracker::record`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recorded {
    /// Hooks unregistered, resource type not tracked, or the request belongs to no tab.
    Ignored,
    Opened,
    Appended,
    /// Record closed; `fetch::end` assembly is in flight.
    Closed,
    /// Record closed without a `fetch::end`; the panel covers this request.
    Suppressed,
}

/// Ordered notifications of one open request.
#[derive(Clone, Debug)]
pub struct RequestRecord {
    tab: TabId,
    opened_at: Instant,
    parts: Vec<Notification>,
}

impl RequestRecord {
    fn open(first: Notification) -> Self {
        Self {
            tab: first.tab_id,
            opened_at: Instant::now(),
            parts: vec![first],
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn parts(&self) -> &[Notification] {
        &self.parts
    }

    fn first(&self) -> &Notification {
        &self.parts[0]
    }

    fn last(&self) -> &Notification {
        &self.parts[self.parts.len() - 1]
    }

    /// Redirect hops are never re-queried for request headers; the first set seen wins.
    pub fn request_info(&self) -> RequestInfo {
        let headers = self
            .parts
            .iter()
            .find_map(|part| part.request_headers.as_deref());
        RequestInfo {
            headers: map_headers(headers),
            url: self.first().url.clone(),
        }
    }

    pub fn hops(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter_map(|part| part.redirect_url.clone())
            .collect()
    }

    /// Response as described by the last notification; media type and charset are left to the
    /// analysis context.
    pub fn response_info(&self, content: String) -> ResponseInfo {
        let last = self.last();
        ResponseInfo {
            body: ResponseBody { content },
            charset: String::new(),
            headers: map_headers(last.response_headers.as_deref()),
            hops: self.hops(),
            media_type: String::new(),
            status_code: last.status_code,
            url: last.url.clone(),
        }
    }
}

pub struct RequestTracker {
    config: TapConfig,
    host: Arc<dyn TrackerHost>,
    capture: Arc<BodyCapture>,
    refetch: Arc<dyn SideChannelFetch>,
    hooks: Arc<HookGate>,
    records: DashMap<RequestId, RequestRecord>,
    assemblies: TaskTracker,
}

/// Handle returned by [`RequestTracker::spawn_maintenance`] for lifecycle control.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Gracefully stop the maintenance loop and await its completion.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl RequestTracker {
    pub fn new(
        config: TapConfig,
        host: Arc<dyn TrackerHost>,
        capture: Arc<BodyCapture>,
        refetch: Arc<dyn SideChannelFetch>,
        hooks: Arc<HookGate>,
    ) -> Self {
        Self {
            config,
            host,
            capture,
            refetch,
            hooks,
            records: DashMap::new(),
            assemblies: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    pub fn capture(&self) -> &Arc<BodyCapture> {
        &self.capture
    }

    pub fn is_tracking(&self, request: &RequestId) -> bool {
        self.records.contains_key(request)
    }

    pub fn open_requests(&self) -> usize {
        self.records.len()
    }

    /// Feed one lifecycle notification.
    pub fn record(&self, kind: NotificationKind, notification: Notification) -> Recorded {
        if !self.hooks.is_registered() {
            trace!(target: "network-tap", %kind, "hooks unregistered; notification dropped");
            return Recorded::Ignored;
        }
        if !self.config.tracks(notification.resource_type) || !notification.tab_id.is_tab() {
            return Recorded::Ignored;
        }

        let tab = notification.tab_id;
        let request = notification.request_id.clone();
        let resource_type = notification.resource_type;
        let url = notification.url.clone();

        let opened = match self.records.entry(request.clone()) {
            Entry::Occupied(mut record) => {
                record.get_mut().parts.push(notification);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(RequestRecord::open(notification));
                true
            }
        };

        if opened {
            debug!(target: "network-tap", %tab, %request, %url, "fetch::start");
            self.host
                .emit(tab, Message::FetchStart(FetchStart { resource: url }));
        }

        match kind {
            NotificationKind::BeforeRequest => self.capture.begin(&request),
            NotificationKind::ResponseStarted
                if resource_type.is_main_frame() && self.host.is_enabled(tab) =>
            {
                self.host.request_injection(tab);
            }
            NotificationKind::Completed => return self.close(tab, &request),
            _ => {}
        }

        if opened {
            Recorded::Opened
        } else {
            Recorded::Appended
        }
    }

    /// The panel only supplies fetch events where this context captures no bodies at all, so a
    /// request whose filter was refused still goes through the re-fetch path.
    fn close(&self, tab: TabId, request: &RequestId) -> Recorded {
        let Some((request, record)) = self.records.remove(request) else {
            return Recorded::Ignored;
        };
        let captured = self.capture.take(&request);

        if !self.capture.is_available()
            && self.config.suppress_when_panel
            && self.host.has_panel(tab)
        {
            debug!(target: "network-tap", %tab, %request, "fetch::end left to the panel");
            return Recorded::Suppressed;
        }

        let host = Arc::clone(&self.host);
        let refetch = Arc::clone(&self.refetch);
        self.assemblies.spawn(async move {
            match assemble(record, captured, refetch).await {
                Ok(event) => {
                    debug!(
                        target: "network-tap",
                        %tab,
                        %request,
                        url = %event.response.url,
                        hops = event.response.hops.len(),
                        "fetch::end"
                    );
                    host.emit(tab, Message::fetch_end(event));
                }
                Err(err) => {
                    warn!(target: "network-tap", %tab, %request, %err, "fetch::end dropped");
                }
            }
        });
        Recorded::Closed
    }

    /// Wait for every in-flight `fetch::end` assembly.
    pub async fn settle(&self) {
        self.assemblies.close();
        self.assemblies.wait().await;
        self.assemblies.reopen();
    }

    /// Drop records (and their captures) older than the configured TTL.
    pub fn evict_stale(&self) -> Vec<RequestId> {
        if self.config.request_ttl_ms == 0 {
            return Vec::new();
        }
        let ttl = Duration::from_millis(self.config.request_ttl_ms);
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.records.retain(|request, record| {
            let keep = now.saturating_duration_since(record.opened_at) < ttl;
            if !keep {
                evicted.push(request.clone());
            }
            keep
        });
        for request in &evicted {
            self.capture.evict(request);
            warn!(target: "network-tap", %request, "request never completed; evicted");
        }
        evicted
    }

    /// Spawn a background task that periodically calls [`evict_stale`](Self::evict_stale) based
    /// on [`TapConfig::maintenance_interval_ms`].
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let tracker = Arc::clone(self);
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let tick_interval = Duration::from_millis(self.config.maintenance_interval_ms.max(1));
        let task = tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        tracker.evict_stale();
                    }
                }
            }
        });
        MaintenanceHandle {
            cancel,
            task: Some(task),
        }
    }
}

async fn assemble(
    record: RequestRecord,
    captured: Option<CapturedBody>,
    refetch: Arc<dyn SideChannelFetch>,
) -> Result<FetchEnd, TapError> {
    let content = match captured {
        Some(body) => body.text().await?,
        None => refetch.fetch_text(&record.last().url).await?,
    };
    let request = record.request_info();
    let response = record.response_info(content);
    Ok(FetchEnd {
        element: None,
        request,
        resource: response.url.clone(),
        response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refetch::StaticBodies;
    use hintbridge_core_types::{HttpHeader, ResourceType};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        emitted: Mutex<Vec<(TabId, Message)>>,
        enabled: Mutex<HashSet<TabId>>,
        panels: Mutex<HashSet<TabId>>,
        injections: Mutex<Vec<TabId>>,
    }

    impl TrackerHost for RecordingHost {
        fn emit(&self, tab: TabId, message: Message) {
            self.emitted.lock().unwrap().push((tab, message));
        }

        fn is_enabled(&self, tab: TabId) -> bool {
            self.enabled.lock().unwrap().contains(&tab)
        }

        fn has_panel(&self, tab: TabId) -> bool {
            self.panels.lock().unwrap().contains(&tab)
        }

        fn request_injection(&self, tab: TabId) {
            self.injections.lock().unwrap().push(tab);
        }
    }

    fn tracker_with(host: Arc<RecordingHost>, config: TapConfig) -> RequestTracker {
        let hooks = Arc::new(HookGate::new());
        hooks.register();
        let bodies = StaticBodies::default()
            .with("https://a.test/", "<html></html>")
            .with("https://a.test/style.css", "body{}");
        RequestTracker::new(
            config,
            host,
            Arc::new(BodyCapture::unavailable()),
            Arc::new(bodies),
            hooks,
        )
    }

    fn note(id: &str, url: &str, kind: ResourceType) -> Notification {
        Notification::new(TabId(1), RequestId::new(id), url, kind)
    }

    #[tokio::test]
    async fn request_headers_come_from_first_notification_carrying_them() {
        let host = Arc::new(RecordingHost::default());
        let tracker = tracker_with(host.clone(), TapConfig::default());

        tracker.record(
            NotificationKind::BeforeRequest,
            note("r1", "https://a.test/style.css", ResourceType::Stylesheet),
        );
        tracker.record(
            NotificationKind::SendHeaders,
            note("r1", "https://a.test/style.css", ResourceType::Stylesheet)
                .with_request_headers(vec![HttpHeader::new("Accept", "text/css")]),
        );
        tracker.record(
            NotificationKind::SendHeaders,
            note("r1", "https://a.test/style.css", ResourceType::Stylesheet)
                .with_request_headers(vec![HttpHeader::new("Accept", "*/*")]),
        );
        let outcome = tracker.record(
            NotificationKind::Completed,
            note("r1", "https://a.test/style.css", ResourceType::Stylesheet)
                .with_status(200)
                .with_response_headers(vec![HttpHeader::new("Content-Type", "text/css")]),
        );
        assert_eq!(outcome, Recorded::Closed);
        tracker.settle().await;

        let emitted = host.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 2);
        let Message::FetchEnd(end) = &emitted[1].1 else {
            panic!("expected fetch end, got {:?}", emitted[1].1);
        };
        assert_eq!(end.request.headers["accept"], "text/css");
        assert_eq!(end.response.headers["content-type"], "text/css");
        assert_eq!(end.response.body.content, "body{}");
        assert!(end.response.hops.is_empty());
        assert!(end.element.is_none());
    }

    #[tokio::test]
    async fn untracked_resource_types_and_closed_hooks_are_ignored() {
        let host = Arc::new(RecordingHost::default());
        let tracker = tracker_with(host.clone(), TapConfig::default());
        let outcome = tracker.record(
            NotificationKind::BeforeRequest,
            note("x1", "https://a.test/api", ResourceType::Xmlhttprequest),
        );
        assert_eq!(outcome, Recorded::Ignored);

        tracker.hooks.unregister();
        let outcome = tracker.record(
            NotificationKind::BeforeRequest,
            note("r2", "https://a.test/", ResourceType::MainFrame),
        );
        assert_eq!(outcome, Recorded::Ignored);

        tracker.hooks.register();
        let outcome = tracker.record(
            NotificationKind::BeforeRequest,
            Notification::new(
                TabId::NONE,
                RequestId::new("sw"),
                "https://a.test/sw.js",
                ResourceType::Script,
            ),
        );
        assert_eq!(outcome, Recorded::Ignored);
        assert!(host.emitted.lock().unwrap().is_empty());
        assert_eq!(tracker.open_requests(), 0);
    }

    #[tokio::test]
    async fn main_frame_response_injects_only_into_enabled_tabs() {
        let host = Arc::new(RecordingHost::default());
        let tracker = tracker_with(host.clone(), TapConfig::default());

        tracker.record(
            NotificationKind::ResponseStarted,
            note("r1", "https://a.test/", ResourceType::MainFrame),
        );
        assert!(host.injections.lock().unwrap().is_empty());

        host.enabled.lock().unwrap().insert(TabId(1));
        tracker.record(
            NotificationKind::ResponseStarted,
            note("r1", "https://a.test/", ResourceType::MainFrame),
        );
        tracker.record(
            NotificationKind::ResponseStarted,
            note("r3", "https://a.test/style.css", ResourceType::Stylesheet),
        );
        assert_eq!(*host.injections.lock().unwrap(), vec![TabId(1)]);
    }

    #[tokio::test]
    async fn panel_suppression_follows_configuration() {
        let host = Arc::new(RecordingHost::default());
        host.panels.lock().unwrap().insert(TabId(1));

        let tracker = tracker_with(host.clone(), TapConfig::default());
        tracker.record(
            NotificationKind::BeforeRequest,
            note("r1", "https://a.test/", ResourceType::MainFrame),
        );
        let outcome = tracker.record(
            NotificationKind::Completed,
            note("r1", "https://a.test/", ResourceType::MainFrame),
        );
        assert_eq!(outcome, Recorded::Suppressed);
        assert!(!tracker.is_tracking(&RequestId::new("r1")));

        let config = TapConfig {
            suppress_when_panel: false,
            ..TapConfig::default()
        };
        let tracker = tracker_with(host.clone(), config);
        tracker.record(
            NotificationKind::BeforeRequest,
            note("r2", "https://a.test/", ResourceType::MainFrame),
        );
        let outcome = tracker.record(
            NotificationKind::Completed,
            note("r2", "https://a.test/", ResourceType::MainFrame),
        );
        assert_eq!(outcome, Recorded::Closed);
        tracker.settle().await;
        let ends = host
            .emitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| matches!(message, Message::FetchEnd(_)))
            .count();
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn failed_refetch_leaves_a_gap() {
        let host = Arc::new(RecordingHost::default());
        let tracker = tracker_with(host.clone(), TapConfig::default());
        tracker.record(
            NotificationKind::BeforeRequest,
            note("r9", "https://a.test/missing.js", ResourceType::Script),
        );
        tracker.record(
            NotificationKind::Completed,
            note("r9", "https://a.test/missing.js", ResourceType::Script),
        );
        tracker.settle().await;

        let emitted = host.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert!(matches!(emitted[0].1, Message::FetchStart(_)));
        assert!(!tracker.is_tracking(&RequestId::new("r9")));
    }

    #[tokio::test]
    async fn stale_records_are_evicted() {
        let host = Arc::new(RecordingHost::default());
        let config = TapConfig {
            request_ttl_ms: 20,
            ..TapConfig::default()
        };
        let tracker = tracker_with(host, config);
        tracker.record(
            NotificationKind::BeforeRequest,
            note("hung", "https://a.test/", ResourceType::MainFrame),
        );
        assert!(tracker.evict_stale().is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(tracker.evict_stale(), vec![RequestId::new("hung")]);
        assert_eq!(tracker.open_requests(), 0);
    }

    #[tokio::test]
    async fn maintenance_loop_evicts_in_background() {
        let host = Arc::new(RecordingHost::default());
        let config = TapConfig {
            request_ttl_ms: 10,
            maintenance_interval_ms: 5,
            ..TapConfig::default()
        };
        let tracker = Arc::new(tracker_with(host, config));
        let maint = tracker.spawn_maintenance();
        tracker.record(
            NotificationKind::BeforeRequest,
            note("hung", "https://a.test/", ResourceType::MainFrame),
        );

        tokio::time::timeout(Duration::from_millis(500), async {
            while tracker.open_requests() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("record evicted");

        maint.shutdown().await.expect("shutdown maintenance");
    }
}
