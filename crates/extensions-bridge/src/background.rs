//! Message routing for the network-observing context.

use std::sync::Arc;

use hintbridge_core_types::{Envelope, Message, MessageSender, TabId};
use network_tap::{NotificationHooks, TrackerHost};
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::config::BridgeConfig;
use crate::inject::ContentInjector;
use crate::lifecycle::{TabLifecycleManager, TabStatus};
use crate::ports::{PanelPort, PanelPortRegistry};
use crate::queue::{TabMessageQueue, TabTransport};
use crate::{BridgeError, BridgeEvent, BridgeEventBus, BrowserTabs};

pub struct Background {
    queue: Arc<TabMessageQueue>,
    lifecycle: Arc<TabLifecycleManager>,
    injector: Arc<ContentInjector>,
    ports: Arc<PanelPortRegistry>,
    events: BridgeEventBus,
    /// Whether response bodies are captured in this context. When they are not, the panel
    /// supplies fetch events itself and those are forwarded.
    capture_available: bool,
    injections: TaskTracker,
}

impl Background {
    pub fn new(
        config: &BridgeConfig,
        hooks: Arc<dyn NotificationHooks>,
        browser: Arc<dyn BrowserTabs>,
        transport: Arc<dyn TabTransport>,
        capture_available: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_bus_capacity.max(1));
        let queue = Arc::new(TabMessageQueue::new(transport));
        let lifecycle = Arc::new(TabLifecycleManager::new(
            hooks,
            Arc::clone(&browser),
            Arc::clone(&queue),
            events.clone(),
        ));
        let injector = Arc::new(ContentInjector::new(config, browser, events.clone()));
        let ports = Arc::new(PanelPortRegistry::new(events.clone()));
        Self {
            queue,
            lifecycle,
            injector,
            ports,
            events,
            capture_available,
            injections: TaskTracker::new(),
        }
    }

    pub fn queue(&self) -> &Arc<TabMessageQueue> {
        &self.queue
    }

    pub fn lifecycle(&self) -> &Arc<TabLifecycleManager> {
        &self.lifecycle
    }

    pub fn ports(&self) -> &Arc<PanelPortRegistry> {
        &self.ports
    }

    pub fn injector(&self) -> &Arc<ContentInjector> {
        &self.injector
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// A panel opened a port named after its tab.
    pub fn connect_panel(&self, name: &str, port: Arc<dyn PanelPort>) -> Result<TabId, BridgeError> {
        self.ports.register_named(name, port)
    }

    /// The toolbar action was clicked for `tab`.
    pub async fn action_clicked(&self, tab: TabId) -> TabStatus {
        self.lifecycle.toggle(tab).await
    }

    /// Route one message from a content script or a panel.
    ///
    /// A message whose tab cannot be resolved is rejected with
    /// [`BridgeError::ProtocolViolation`]; nothing else is done with it.
    pub async fn handle(&self, envelope: Envelope, sender: MessageSender) -> Result<(), BridgeError> {
        let Some(tab) = envelope.resolve_tab(&sender) else {
            return Err(BridgeError::ProtocolViolation(format!(
                "{} message received without a tab id",
                envelope.message.kind()
            )));
        };
        trace!(target: "extensions-bridge", %tab, kind = envelope.message.kind(), "message");

        match envelope.message {
            Message::Enable(config) => {
                self.lifecycle.enable(tab, config).await;
            }
            Message::RequestConfig => {
                let config = self.lifecycle.config(tab).unwrap_or_default();
                self.queue.transport().post(tab, Message::Enable(config))?;
            }
            Message::Ready => {
                let flushed = self.queue.mark_ready(tab);
                let _ = self.events.send(BridgeEvent::TabReady { tab, flushed });
            }
            message @ (Message::FetchStart(_) | Message::FetchEnd(_)) => {
                if self.capture_available {
                    trace!(target: "extensions-bridge", %tab, "panel fetch event ignored; capture active");
                } else {
                    self.queue.send(tab, message)?;
                }
            }
            Message::Results(results) => {
                self.lifecycle.disable(tab);
                if let Some(port) = self.ports.get(tab) {
                    port.post(Message::Results(results))?;
                    debug!(target: "extensions-bridge", %tab, "results forwarded to panel");
                    let _ = self.events.send(BridgeEvent::ResultsForwarded { tab });
                }
            }
            Message::Error(error) => {
                warn!(target: "extensions-bridge", %tab, message = %error.message, "analysis context reported an error");
            }
            other => {
                debug!(target: "extensions-bridge", %tab, kind = other.kind(), "message not handled here");
            }
        }
        Ok(())
    }

    /// Wait for spawned injections to finish.
    pub async fn settle(&self) {
        self.injections.close();
        self.injections.wait().await;
        self.injections.reopen();
    }
}

impl TrackerHost for Background {
    /// Tabs that are not being analysed have no session to consume events; they are dropped
    /// rather than queued.
    fn emit(&self, tab: TabId, message: Message) {
        let kind = message.kind();
        if !self.lifecycle.is_enabled(tab) {
            trace!(target: "extensions-bridge", %tab, kind, "tab not enabled; event dropped");
            return;
        }
        if let Err(err) = self.queue.send(tab, message) {
            warn!(target: "extensions-bridge", %tab, kind, %err, "event not delivered");
        }
    }

    fn is_enabled(&self, tab: TabId) -> bool {
        self.lifecycle.is_enabled(tab)
    }

    fn has_panel(&self, tab: TabId) -> bool {
        self.ports.contains(tab)
    }

    fn request_injection(&self, tab: TabId) {
        let injector = Arc::clone(&self.injector);
        self.injections.spawn(async move {
            injector.inject(tab).await;
        });
    }
}
