//! Inspection-panel connections, one per tab.

use std::sync::Arc;

use dashmap::DashMap;
use hintbridge_core_types::{Message, TabId};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{BridgeError, BridgeEvent, BridgeEventBus};

/// Point-to-point connection to a panel.
pub trait PanelPort: Send + Sync {
    fn post(&self, message: Message) -> Result<(), BridgeError>;
}

/// In-process panel port.
pub struct ChannelPort {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelPort {
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl PanelPort for ChannelPort {
    fn post(&self, message: Message) -> Result<(), BridgeError> {
        self.tx.send(message).map_err(|_| BridgeError::ChannelClosed)
    }
}

pub struct PanelPortRegistry {
    ports: DashMap<TabId, Arc<dyn PanelPort>>,
    events: BridgeEventBus,
}

impl PanelPortRegistry {
    pub fn new(events: BridgeEventBus) -> Self {
        Self {
            ports: DashMap::new(),
            events,
        }
    }

    /// Associate `port` with `tab`, replacing an earlier panel.
    pub fn register(&self, tab: TabId, port: Arc<dyn PanelPort>) {
        if self.ports.insert(tab, port).is_some() {
            debug!(target: "extensions-bridge", %tab, "panel port replaced");
        }
        info!(target: "extensions-bridge", %tab, "panel connected");
        let _ = self.events.send(BridgeEvent::PanelConnected { tab });
    }

    /// Register a port named after its tab id, the way panels announce themselves.
    pub fn register_named(&self, name: &str, port: Arc<dyn PanelPort>) -> Result<TabId, BridgeError> {
        let tab = name.parse::<TabId>().map_err(|err| {
            BridgeError::ProtocolViolation(format!("panel port name {name:?}: {err}"))
        })?;
        self.register(tab, port);
        Ok(tab)
    }

    pub fn get(&self, tab: TabId) -> Option<Arc<dyn PanelPort>> {
        self.ports.get(&tab).map(|port| Arc::clone(port.value()))
    }

    pub fn contains(&self, tab: TabId) -> bool {
        self.ports.contains_key(&tab)
    }

    /// Forget the panel of `tab` once it disconnects.
    pub fn unregister(&self, tab: TabId) -> bool {
        let removed = self.ports.remove(&tab).is_some();
        if removed {
            debug!(target: "extensions-bridge", %tab, "panel disconnected");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[test]
    fn named_ports_resolve_to_tabs() {
        let (events, mut rx) = broadcast::channel(4);
        let registry = PanelPortRegistry::new(events);
        let (port, mut inbox) = ChannelPort::pair();

        let tab = registry.register_named("12", port).unwrap();
        assert_eq!(tab, TabId(12));
        assert!(registry.contains(TabId(12)));
        assert_eq!(rx.try_recv().unwrap(), BridgeEvent::PanelConnected { tab });

        registry.get(tab).unwrap().post(Message::Done).unwrap();
        assert_eq!(inbox.try_recv().unwrap(), Message::Done);

        assert!(registry.unregister(tab));
        assert!(registry.get(tab).is_none());
    }

    #[test]
    fn unparsable_port_name_is_a_protocol_violation() {
        let (events, _) = broadcast::channel(4);
        let registry = PanelPortRegistry::new(events);
        let (port, _inbox) = ChannelPort::pair();
        assert!(matches!(
            registry.register_named("devtools", port),
            Err(BridgeError::ProtocolViolation(_))
        ));
    }
}
