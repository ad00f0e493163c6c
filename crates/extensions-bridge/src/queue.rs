//! Per-tab delivery into the analysis context.
//!
//! Events sent before a tab's analysis context reports ready are held in order and flushed on
//! [`TabMessageQueue::mark_ready`]; afterwards `send` delivers straight through.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use hintbridge_core_types::{Message, TabId};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::BridgeError;

/// Point-to-point delivery of one message to a tab's analysis context.
pub trait TabTransport: Send + Sync {
    fn post(&self, tab: TabId, message: Message) -> Result<(), BridgeError>;
}

/// Delivery state of one tab. A queue exists exactly while the tab is not ready.
#[derive(Debug)]
enum Delivery {
    Queued(VecDeque<Message>),
    Ready,
}

impl Delivery {
    fn queued() -> Self {
        Delivery::Queued(VecDeque::new())
    }
}

pub struct TabMessageQueue {
    transport: Arc<dyn TabTransport>,
    tabs: DashMap<TabId, Delivery>,
}

impl TabMessageQueue {
    pub fn new(transport: Arc<dyn TabTransport>) -> Self {
        Self {
            transport,
            tabs: DashMap::new(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn TabTransport> {
        &self.transport
    }

    /// Deliver now if the tab is ready, queue otherwise.
    ///
    /// Delivery happens under the tab's entry lock so a concurrent flush cannot overtake it.
    pub fn send(&self, tab: TabId, message: Message) -> Result<(), BridgeError> {
        let mut delivery = self.tabs.entry(tab).or_insert_with(Delivery::queued);
        match &mut *delivery {
            Delivery::Ready => {
                trace!(target: "extensions-bridge", %tab, kind = message.kind(), "deliver");
                self.transport.post(tab, message)
            }
            Delivery::Queued(pending) => {
                trace!(target: "extensions-bridge", %tab, kind = message.kind(), "queue");
                pending.push_back(message);
                Ok(())
            }
        }
    }

    /// Switch the tab to pass-through and flush what was queued, oldest first.
    ///
    /// Returns how many queued events were handed to the transport. Marking an already ready tab
    /// is a no-op.
    pub fn mark_ready(&self, tab: TabId) -> usize {
        let mut delivery = self.tabs.entry(tab).or_insert_with(Delivery::queued);
        let pending = match std::mem::replace(&mut *delivery, Delivery::Ready) {
            Delivery::Queued(pending) => pending,
            Delivery::Ready => return 0,
        };
        let total = pending.len();
        for message in pending {
            let kind = message.kind();
            if let Err(err) = self.transport.post(tab, message) {
                warn!(target: "extensions-bridge", %tab, kind, %err, "queued event not delivered");
            }
        }
        debug!(target: "extensions-bridge", %tab, flushed = total, "tab ready");
        total
    }

    /// Back to queuing with an empty queue. Returns the number of events discarded.
    pub fn reset(&self, tab: TabId) -> usize {
        match self.tabs.insert(tab, Delivery::queued()) {
            Some(Delivery::Queued(dropped)) if !dropped.is_empty() => {
                debug!(
                    target: "extensions-bridge",
                    %tab,
                    dropped = dropped.len(),
                    "stale queued events discarded"
                );
                dropped.len()
            }
            _ => 0,
        }
    }

    pub fn is_ready(&self, tab: TabId) -> bool {
        self.tabs
            .get(&tab)
            .map(|delivery| matches!(*delivery, Delivery::Ready))
            .unwrap_or(false)
    }

    pub fn pending(&self, tab: TabId) -> usize {
        self.tabs
            .get(&tab)
            .map(|delivery| match &*delivery {
                Delivery::Queued(pending) => pending.len(),
                Delivery::Ready => 0,
            })
            .unwrap_or(0)
    }
}

/// In-process transport with one unbounded channel per attached tab.
#[derive(Default)]
pub struct ChannelTransport {
    tabs: DashMap<TabId, mpsc::UnboundedSender<Message>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the analysis context of `tab`, replacing any previous one.
    pub fn attach(&self, tab: TabId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tabs.insert(tab, tx);
        rx
    }

    pub fn detach(&self, tab: TabId) -> bool {
        self.tabs.remove(&tab).is_some()
    }
}

impl TabTransport for ChannelTransport {
    fn post(&self, tab: TabId, message: Message) -> Result<(), BridgeError> {
        let sender = self.tabs.get(&tab).ok_or(BridgeError::ChannelClosed)?;
        sender.send(message).map_err(|_| BridgeError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hintbridge_core_types::FetchStart;

    fn start(resource: &str) -> Message {
        Message::FetchStart(FetchStart {
            resource: resource.to_string(),
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn queued_events_flush_in_order_then_pass_through() {
        let transport = Arc::new(ChannelTransport::new());
        let mut rx = transport.attach(TabId(5));
        let queue = TabMessageQueue::new(transport);

        queue.send(TabId(5), start("x")).unwrap();
        queue.send(TabId(5), start("x")).unwrap();
        assert_eq!(queue.pending(TabId(5)), 2);
        assert!(drain(&mut rx).is_empty());

        assert_eq!(queue.mark_ready(TabId(5)), 2);
        assert_eq!(drain(&mut rx), vec![start("x"), start("x")]);
        assert_eq!(queue.pending(TabId(5)), 0);

        queue.send(TabId(5), start("y")).unwrap();
        assert_eq!(drain(&mut rx), vec![start("y")]);
        assert_eq!(queue.mark_ready(TabId(5)), 0);
    }

    #[test]
    fn reset_discards_and_requeues() {
        let transport = Arc::new(ChannelTransport::new());
        let mut rx = transport.attach(TabId(1));
        let queue = TabMessageQueue::new(transport);

        queue.send(TabId(1), start("old")).unwrap();
        assert_eq!(queue.reset(TabId(1)), 1);
        queue.mark_ready(TabId(1));
        assert!(drain(&mut rx).is_empty());

        queue.reset(TabId(1));
        assert!(!queue.is_ready(TabId(1)));
        queue.send(TabId(1), start("new")).unwrap();
        assert_eq!(queue.pending(TabId(1)), 1);
    }

    #[test]
    fn tabs_are_independent() {
        let transport = Arc::new(ChannelTransport::new());
        let mut one = transport.attach(TabId(1));
        let mut two = transport.attach(TabId(2));
        let queue = TabMessageQueue::new(transport);

        queue.send(TabId(1), start("a")).unwrap();
        queue.send(TabId(2), start("b")).unwrap();
        queue.mark_ready(TabId(2));
        assert!(drain(&mut one).is_empty());
        assert_eq!(drain(&mut two), vec![start("b")]);
    }

    #[test]
    fn unattached_tab_reports_closed_channel() {
        let queue = TabMessageQueue::new(Arc::new(ChannelTransport::new()));
        queue.mark_ready(TabId(3));
        assert!(matches!(
            queue.send(TabId(3), Message::Done),
            Err(BridgeError::ChannelClosed)
        ));
    }
}
