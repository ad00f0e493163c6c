//! Cross-context wire messages.

use serde::{Deserialize, Serialize};

use crate::fetch::{FetchEnd, FetchStart};
use crate::snapshot::DomSnapshot;
use crate::TabId;

/// Configuration blob supplied when a tab is enabled and handed to the analysis context on request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub disabled_categories: Vec<String>,
    pub browserslist: Option<String>,
    pub ignored_urls: Option<String>,
    pub severity_threshold: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub message: String,
    pub resource: String,
    pub severity: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintResults {
    pub help_url: String,
    pub id: String,
    pub name: String,
    pub problems: Vec<Problem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryResults {
    pub hints: Vec<HintResults>,
    pub name: String,
    pub passed: u32,
}

/// Terminal analysis payload for one page load.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResults {
    pub categories: Vec<CategoryResults>,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
    #[serde(default)]
    pub stack: String,
}

/// Everything that crosses a context boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Message {
    /// Panel → background: start analysing a tab. Background → content: the stored config.
    Enable(ScanConfig),
    RequestConfig,
    Ready,
    FetchStart(FetchStart),
    FetchEnd(Box<FetchEnd>),
    Snapshot(DomSnapshot),
    Results(ScanResults),
    Done,
    Error(ErrorData),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Enable(_) => "enable",
            Message::RequestConfig => "requestConfig",
            Message::Ready => "ready",
            Message::FetchStart(_) => "fetchStart",
            Message::FetchEnd(_) => "fetchEnd",
            Message::Snapshot(_) => "snapshot",
            Message::Results(_) => "results",
            Message::Done => "done",
            Message::Error(_) => "error",
        }
    }

    pub fn fetch_end(event: FetchEnd) -> Self {
        Message::FetchEnd(Box::new(event))
    }
}

/// Origin of an incoming message; content scripts carry their tab, panels do not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageSender {
    pub tab: Option<TabId>,
}

impl MessageSender {
    pub fn tab(tab: TabId) -> Self {
        Self { tab: Some(tab) }
    }

    pub fn extension() -> Self {
        Self { tab: None }
    }
}

/// Message plus the tab id a tab-less sender (the panel) attaches explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    pub message: Message,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            tab_id: None,
            message,
        }
    }

    pub fn for_tab(tab: TabId, message: Message) -> Self {
        Self {
            tab_id: Some(tab),
            message,
        }
    }

    /// The sender's tab wins over the explicit id.
    pub fn resolve_tab(&self, sender: &MessageSender) -> Option<TabId> {
        sender.tab.or(self.tab_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_use_camel_case_tags() {
        assert_eq!(
            serde_json::to_string(&Message::RequestConfig).unwrap(),
            "\"requestConfig\""
        );
        let start = Message::FetchStart(FetchStart {
            resource: "https://a.test/".into(),
        });
        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["fetchStart"]["resource"], "https://a.test/");
    }

    #[test]
    fn sender_tab_takes_precedence() {
        let envelope = Envelope::for_tab(TabId(9), Message::Ready);
        assert_eq!(
            envelope.resolve_tab(&MessageSender::tab(TabId(1))),
            Some(TabId(1))
        );
        assert_eq!(
            envelope.resolve_tab(&MessageSender::extension()),
            Some(TabId(9))
        );
        assert_eq!(
            Envelope::new(Message::Ready).resolve_tab(&MessageSender::extension()),
            None
        );
    }

    #[test]
    fn scan_config_defaults_missing_fields() {
        let config: ScanConfig = serde_json::from_str(r#"{"browserslist":"defaults"}"#).unwrap();
        assert!(config.disabled_categories.is_empty());
        assert_eq!(config.browserslist.as_deref(), Some("defaults"));
    }
}
