//! Process-wide switch for the upstream notification hooks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Registration surface for the network-lifecycle listeners.
pub trait NotificationHooks: Send + Sync {
    fn register(&self);
    fn unregister(&self);
    fn is_registered(&self) -> bool;
}

/// In-process hook registration read by the [`RequestTracker`](crate::RequestTracker).
///
/// While unregistered, notifications fed to the tracker are dropped, which is what removing the
/// platform listeners amounts to.
#[derive(Debug, Default)]
pub struct HookGate {
    registered: AtomicBool,
    registrations: AtomicU64,
}

impl HookGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the hooks went from unregistered to registered.
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::SeqCst)
    }
}

impl NotificationHooks for HookGate {
    fn register(&self) {
        if !self.registered.swap(true, Ordering::SeqCst) {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(target: "network-tap", "upstream hooks registered");
        }
    }

    fn unregister(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            tracing::debug!(target: "network-tap", "upstream hooks unregistered");
        }
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}
