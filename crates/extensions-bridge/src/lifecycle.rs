//! Per-tab enable/disable state.
//!
//! A tab moves `Disabled -> EnabledNotReady -> EnabledReady`; readiness lives in the
//! [`TabMessageQueue`], the enabled phase and stored config live here. The upstream notification
//! hooks are registered exactly while at least one tab is enabled.

use std::sync::Arc;

use dashmap::DashMap;
use hintbridge_core_types::{ScanConfig, TabId};
use network_tap::NotificationHooks;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::queue::TabMessageQueue;
use crate::{BridgeEvent, BridgeEventBus, BrowserTabs};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TabPhase {
    Disabled,
    Enabled,
}

/// Observable state of one tab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Disabled,
    EnabledNotReady,
    EnabledReady,
}

#[derive(Clone, Debug)]
struct TabState {
    phase: TabPhase,
    config: Option<ScanConfig>,
}

pub struct TabLifecycleManager {
    hooks: Arc<dyn NotificationHooks>,
    browser: Arc<dyn BrowserTabs>,
    queue: Arc<TabMessageQueue>,
    events: BridgeEventBus,
    tabs: DashMap<TabId, TabState>,
    // Serializes "count enabled tabs, then (un)register hooks".
    transition: Mutex<()>,
}

impl TabLifecycleManager {
    pub fn new(
        hooks: Arc<dyn NotificationHooks>,
        browser: Arc<dyn BrowserTabs>,
        queue: Arc<TabMessageQueue>,
        events: BridgeEventBus,
    ) -> Self {
        Self {
            hooks,
            browser,
            queue,
            events,
            tabs: DashMap::new(),
            transition: Mutex::new(()),
        }
    }

    /// Start analysing `tab`: register hooks if idle, store `config`, and reload the tab bypassing
    /// the cache so the analysis context sees a fully instrumented load.
    ///
    /// A failed reload is logged; the tab stays enabled.
    pub async fn enable(&self, tab: TabId, config: ScanConfig) {
        {
            let _guard = self.transition.lock();
            if self.enabled_count() == 0 {
                self.hooks.register();
            }
            self.tabs.insert(
                tab,
                TabState {
                    phase: TabPhase::Enabled,
                    config: Some(config),
                },
            );
            self.queue.reset(tab);
        }
        info!(target: "extensions-bridge", %tab, "tab enabled");
        let _ = self.events.send(BridgeEvent::TabEnabled { tab });

        if let Err(err) = self.browser.reload(tab, true).await {
            warn!(target: "extensions-bridge", %tab, %err, "reload after enable failed");
        }
    }

    /// Stop analysing `tab`; unregister hooks when it was the last enabled tab.
    pub fn disable(&self, tab: TabId) {
        let was_enabled = {
            let _guard = self.transition.lock();
            let was_enabled = {
                let mut state = self.tabs.entry(tab).or_insert_with(|| TabState {
                    phase: TabPhase::Disabled,
                    config: None,
                });
                std::mem::replace(&mut state.phase, TabPhase::Disabled) == TabPhase::Enabled
            };
            self.queue.reset(tab);
            if self.enabled_count() == 0 {
                self.hooks.unregister();
            }
            was_enabled
        };
        if was_enabled {
            info!(target: "extensions-bridge", %tab, "tab disabled");
            let _ = self.events.send(BridgeEvent::TabDisabled { tab });
        } else {
            debug!(target: "extensions-bridge", %tab, "disable on a tab that was not enabled");
        }
    }

    /// Toolbar action: disable an enabled tab, otherwise enable it with its last config.
    pub async fn toggle(&self, tab: TabId) -> TabStatus {
        if self.is_enabled(tab) {
            self.disable(tab);
        } else {
            let config = self.config(tab).unwrap_or_default();
            self.enable(tab, config).await;
        }
        self.status(tab)
    }

    /// Config stored by the last `enable`; kept across disable.
    pub fn config(&self, tab: TabId) -> Option<ScanConfig> {
        self.tabs.get(&tab).and_then(|state| state.config.clone())
    }

    pub fn is_enabled(&self, tab: TabId) -> bool {
        self.tabs
            .get(&tab)
            .map(|state| state.phase == TabPhase::Enabled)
            .unwrap_or(false)
    }

    pub fn enabled_count(&self) -> usize {
        self.tabs
            .iter()
            .filter(|entry| entry.value().phase == TabPhase::Enabled)
            .count()
    }

    pub fn status(&self, tab: TabId) -> TabStatus {
        match (self.is_enabled(tab), self.queue.is_ready(tab)) {
            (false, _) => TabStatus::Disabled,
            (true, false) => TabStatus::EnabledNotReady,
            (true, true) => TabStatus::EnabledReady,
        }
    }
}
