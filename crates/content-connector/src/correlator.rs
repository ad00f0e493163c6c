//! Snapshot-gated correlation of `fetch::end` events.
//!
//! Until the DOM snapshot arrives there is nothing to resolve elements against, so fetch ends are
//! held back in arrival order. The page's own document is the exception: it is processed at once
//! because the analysis engine builds its baseline structure from it.

use std::mem;

use hintbridge_core_types::{DomSnapshot, FetchEnd};
use serde::Serialize;
use tracing::{debug, trace};

use crate::element::find_node;
use crate::fetch_type::{apply, FetchType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelatorState {
    AwaitingSnapshot,
    Correlating,
    Done,
}

/// A fetch end ready for the analysis engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelatedFetch {
    pub fetch_type: FetchType,
    pub event: FetchEnd,
}

impl CorrelatedFetch {
    pub fn event_name(&self) -> String {
        self.fetch_type.event_name()
    }
}

enum Phase {
    AwaitingSnapshot { buffer: Vec<FetchEnd> },
    Correlating { snapshot: DomSnapshot },
    Done { snapshot: DomSnapshot },
}

pub struct FetchCorrelator {
    resource: String,
    phase: Phase,
}

impl FetchCorrelator {
    /// Correlator for one page load of `resource`.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            phase: Phase::AwaitingSnapshot { buffer: Vec::new() },
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn state(&self) -> CorrelatorState {
        match self.phase {
            Phase::AwaitingSnapshot { .. } => CorrelatorState::AwaitingSnapshot,
            Phase::Correlating { .. } => CorrelatorState::Correlating,
            Phase::Done { .. } => CorrelatorState::Done,
        }
    }

    pub fn buffered(&self) -> usize {
        match &self.phase {
            Phase::AwaitingSnapshot { buffer } => buffer.len(),
            _ => 0,
        }
    }

    pub fn snapshot(&self) -> Option<&DomSnapshot> {
        match &self.phase {
            Phase::AwaitingSnapshot { .. } => None,
            Phase::Correlating { snapshot } | Phase::Done { snapshot } => Some(snapshot),
        }
    }

    /// `None` when the event was buffered.
    pub fn on_fetch_end(&mut self, event: FetchEnd) -> Option<CorrelatedFetch> {
        if let Phase::AwaitingSnapshot { buffer } = &mut self.phase {
            if event.response.url != self.resource {
                trace!(target: "content-connector", url = %event.response.url, "fetch::end buffered");
                buffer.push(event);
                return None;
            }
        }
        Some(self.correlate(event))
    }

    /// Install the snapshot and release everything buffered, in arrival order.
    ///
    /// A second snapshot replaces the first without changing the state.
    pub fn on_snapshot(&mut self, snapshot: DomSnapshot) -> Vec<CorrelatedFetch> {
        let (buffer, phase) = match self.take_phase() {
            Phase::AwaitingSnapshot { buffer } => (buffer, Phase::Correlating { snapshot }),
            Phase::Correlating { .. } => (Vec::new(), Phase::Correlating { snapshot }),
            Phase::Done { .. } => (Vec::new(), Phase::Done { snapshot }),
        };
        self.phase = phase;
        debug!(target: "content-connector", drained = buffer.len(), "snapshot received");
        buffer
            .into_iter()
            .map(|event| self.correlate(event))
            .collect()
    }

    /// The engine finished walking the snapshot; later fetch ends pass straight through.
    ///
    /// Returns `false` and changes nothing unless the correlator was correlating.
    pub fn traversal_complete(&mut self) -> bool {
        let (phase, done) = match self.take_phase() {
            Phase::Correlating { snapshot } => (Phase::Done { snapshot }, true),
            other => (other, false),
        };
        self.phase = phase;
        done
    }

    fn take_phase(&mut self) -> Phase {
        mem::replace(&mut self.phase, Phase::AwaitingSnapshot { buffer: Vec::new() })
    }

    fn correlate(&self, mut event: FetchEnd) -> CorrelatedFetch {
        let node = self.snapshot().and_then(|snapshot| {
            find_node(snapshot, &event.response.url)
                .or_else(|| find_node(snapshot, &event.request.url))
        });
        event.element = node.map(|node| node.to_ref());
        let fetch_type = apply(&mut event, node);
        CorrelatedFetch { fetch_type, event }
    }
}
