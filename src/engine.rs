//! Analysis engine used by replays: records what the analysis context raises and derives a small
//! result set from it.

use async_trait::async_trait;
use content_connector::{AnalysisEngine, ConnectorError, EngineEvent};
use hintbridge_core_types::{CategoryResults, DomSnapshot, HintResults, Problem, ScanResults};
use parking_lot::Mutex;
use serde::Serialize;

/// One line of the analysis-context transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub event: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hops: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<usize>,
}

impl TranscriptEntry {
    fn new(event: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            resource: resource.into(),
            element: None,
            status: None,
            hops: Vec::new(),
            nodes: None,
        }
    }
}

#[derive(Default)]
pub struct TranscriptEngine {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl TranscriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }

    fn push(&self, entry: TranscriptEntry) {
        self.entries.lock().push(entry);
    }
}

#[async_trait]
impl AnalysisEngine for TranscriptEngine {
    async fn emit(&self, event: EngineEvent) -> Result<(), ConnectorError> {
        let name = event.name();
        let entry = match event {
            EngineEvent::ScanStart { resource }
            | EngineEvent::CanEvaluateScript { resource }
            | EngineEvent::ScanEnd { resource } => TranscriptEntry::new(name, resource),
            EngineEvent::FetchStart(start) => TranscriptEntry::new(name, start.resource),
            EngineEvent::FetchEnd { event, .. } => TranscriptEntry {
                element: event.element.as_ref().map(|element| element.node_id),
                status: event.response.status_code,
                hops: event.response.hops.clone(),
                ..TranscriptEntry::new(name, event.response.url.clone())
            },
        };
        self.push(entry);
        Ok(())
    }

    async fn traverse(&self, snapshot: &DomSnapshot, resource: &str) -> Result<(), ConnectorError> {
        self.push(TranscriptEntry {
            nodes: Some(snapshot.elements().count()),
            ..TranscriptEntry::new("traverse", resource)
        });
        Ok(())
    }

    async fn results(&self, resource: &str) -> Result<ScanResults, ConnectorError> {
        let entries = self.entries.lock();
        let failed: Vec<Problem> = entries
            .iter()
            .filter(|entry| entry.event.starts_with("fetch::end::"))
            .filter_map(|entry| {
                let status = entry.status?;
                (status >= 400).then(|| Problem {
                    message: format!("Response returned status {status}"),
                    resource: entry.resource.clone(),
                    severity: "error".to_string(),
                })
            })
            .collect();
        let unknown: Vec<Problem> = entries
            .iter()
            .filter(|entry| entry.event == "fetch::end::unknown")
            .map(|entry| Problem {
                message: "Response media type could not be determined".to_string(),
                resource: entry.resource.clone(),
                severity: "warning".to_string(),
            })
            .collect();

        let hints = vec![
            HintResults {
                help_url: "https://webhint.io/docs/user-guide/hints/hint-http-status/".to_string(),
                id: "http-status".to_string(),
                name: "HTTP status".to_string(),
                problems: failed,
            },
            HintResults {
                help_url: "https://webhint.io/docs/user-guide/hints/hint-content-type/".to_string(),
                id: "content-type".to_string(),
                name: "Content type".to_string(),
                problems: unknown,
            },
        ];
        let passed = hints.iter().filter(|hint| hint.problems.is_empty()).count() as u32;
        Ok(ScanResults {
            categories: vec![CategoryResults {
                hints,
                name: "network".to_string(),
                passed,
            }],
            url: resource.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hintbridge_core_types::{FetchEnd, FetchStart, ResponseInfo};

    #[tokio::test]
    async fn failed_fetches_become_problems() {
        let engine = TranscriptEngine::new();
        engine
            .emit(EngineEvent::FetchStart(FetchStart {
                resource: "https://a.test/".into(),
            }))
            .await
            .unwrap();
        engine
            .emit(EngineEvent::FetchEnd {
                fetch_type: content_connector::FetchType::Css,
                event: Box::new(FetchEnd {
                    element: None,
                    request: Default::default(),
                    resource: "https://a.test/gone.css".into(),
                    response: ResponseInfo {
                        status_code: Some(404),
                        url: "https://a.test/gone.css".into(),
                        ..ResponseInfo::default()
                    },
                }),
            })
            .await
            .unwrap();

        let results = engine.results("https://a.test/").await.unwrap();
        let network = &results.categories[0];
        assert_eq!(network.passed, 1);
        assert_eq!(network.hints[0].problems.len(), 1);
        assert_eq!(network.hints[0].problems[0].resource, "https://a.test/gone.css");

        let events: Vec<_> = engine.transcript().into_iter().map(|e| e.event).collect();
        assert_eq!(events, vec!["fetch::start", "fetch::end::css"]);
    }
}
