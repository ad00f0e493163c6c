//! Installation of the analysis script into a tab.

use std::sync::Arc;
use std::time::Duration;

use hintbridge_core_types::TabId;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::BridgeConfig;
use crate::{BridgeEvent, BridgeEventBus, BrowserTabs, RunAt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct InjectionOutcome {
    pub attempts: u32,
    pub injected: bool,
}

pub struct ContentInjector {
    browser: Arc<dyn BrowserTabs>,
    script: String,
    attempts: u32,
    retry_delay: Duration,
    events: BridgeEventBus,
}

impl ContentInjector {
    pub fn new(config: &BridgeConfig, browser: Arc<dyn BrowserTabs>, events: BridgeEventBus) -> Self {
        Self {
            browser,
            script: config.content_script.clone(),
            attempts: config.injection_attempts.max(1),
            retry_delay: Duration::from_millis(config.injection_retry_delay_ms),
            events,
        }
    }

    /// Inject at document start, retrying transient failures up to the configured attempt count.
    ///
    /// Exhausting the attempts is reported once and not retried further; the tab then never
    /// becomes ready.
    pub async fn inject(&self, tab: TabId) -> InjectionOutcome {
        for attempt in 1..=self.attempts {
            match self
                .browser
                .execute_script(tab, &self.script, RunAt::DocumentStart)
                .await
            {
                Ok(()) => {
                    debug!(target: "extensions-bridge", %tab, attempt, "content script injected");
                    return InjectionOutcome {
                        attempts: attempt,
                        injected: true,
                    };
                }
                Err(err) if attempt < self.attempts => {
                    warn!(target: "extensions-bridge", %tab, attempt, %err, "injection failed; retrying");
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(err) => {
                    error!(
                        target: "extensions-bridge",
                        %tab,
                        attempts = self.attempts,
                        %err,
                        "injection failed after retrying"
                    );
                }
            }
        }
        let _ = self.events.send(BridgeEvent::InjectionFailed {
            tab,
            attempts: self.attempts,
        });
        InjectionOutcome {
            attempts: self.attempts,
            injected: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast;

    /// Fails the first `failures` calls.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl BrowserTabs for Flaky {
        async fn reload(&self, _tab: TabId, _bypass_cache: bool) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn execute_script(
            &self,
            _tab: TabId,
            file: &str,
            run_at: RunAt,
        ) -> Result<(), BridgeError> {
            assert_eq!(file, "content-script/webhint.js");
            assert_eq!(run_at, RunAt::DocumentStart);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(BridgeError::Browser("no result".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn two_failures_then_success_takes_three_attempts() {
        let browser = Flaky::new(2);
        let (events, mut rx) = broadcast::channel(4);
        let injector = ContentInjector::new(&BridgeConfig::default(), browser.clone(), events);

        let outcome = injector.inject(TabId(1)).await;
        assert_eq!(
            outcome,
            InjectionOutcome {
                attempts: 3,
                injected: true
            }
        );
        assert_eq!(browser.calls.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn persistent_failure_gives_up_after_three_attempts() {
        let browser = Flaky::new(u32::MAX);
        let (events, mut rx) = broadcast::channel(4);
        let injector = ContentInjector::new(&BridgeConfig::default(), browser.clone(), events);

        let outcome = injector.inject(TabId(2)).await;
        assert!(!outcome.injected);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(browser.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeEvent::InjectionFailed {
                tab: TabId(2),
                attempts: 3
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
