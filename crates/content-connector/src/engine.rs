//! Boundary to the analysis engine.

use async_trait::async_trait;
use hintbridge_core_types::{DomSnapshot, FetchEnd, FetchStart, ScanResults};
use serde::Serialize;

use crate::fetch_type::FetchType;
use crate::ConnectorError;

/// Events the session raises on the engine, in the order a page load produces them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum EngineEvent {
    ScanStart {
        resource: String,
    },
    FetchStart(FetchStart),
    FetchEnd {
        #[serde(rename = "type")]
        fetch_type: FetchType,
        #[serde(flatten)]
        event: Box<FetchEnd>,
    },
    CanEvaluateScript {
        resource: String,
    },
    ScanEnd {
        resource: String,
    },
}

impl EngineEvent {
    pub fn name(&self) -> String {
        match self {
            EngineEvent::ScanStart { .. } => "scan::start".to_string(),
            EngineEvent::FetchStart(_) => "fetch::start".to_string(),
            EngineEvent::FetchEnd { fetch_type, .. } => fetch_type.event_name(),
            EngineEvent::CanEvaluateScript { .. } => "can-evaluate::script".to_string(),
            EngineEvent::ScanEnd { .. } => "scan::end".to_string(),
        }
    }
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn emit(&self, event: EngineEvent) -> Result<(), ConnectorError>;

    /// Walk the snapshot, raising per-element events inside the engine.
    async fn traverse(&self, snapshot: &DomSnapshot, resource: &str) -> Result<(), ConnectorError>;

    /// Results of the page load once `scan::end` has been emitted.
    async fn results(&self, resource: &str) -> Result<ScanResults, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use hintbridge_core_types::{RequestInfo, ResponseInfo};
    use std::collections::BTreeMap;

    #[test]
    fn fetch_end_serializes_with_name_and_flattened_event() {
        let event = EngineEvent::FetchEnd {
            fetch_type: FetchType::Javascript,
            event: Box::new(FetchEnd {
                element: None,
                request: RequestInfo {
                    headers: BTreeMap::new(),
                    url: "https://a.test/app.js".into(),
                },
                resource: "https://a.test/app.js".into(),
                response: ResponseInfo {
                    url: "https://a.test/app.js".into(),
                    status_code: Some(200),
                    ..ResponseInfo::default()
                },
            }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "fetchEnd");
        assert_eq!(json["type"], "javascript");
        assert_eq!(json["resource"], "https://a.test/app.js");
        assert_eq!(event.name(), "fetch::end::javascript");

        let start = serde_json::to_value(EngineEvent::ScanStart {
            resource: "https://a.test/".into(),
        })
        .unwrap();
        assert_eq!(start["name"], "scanStart");
    }
}
