//! Network lifecycle notifications and the fetch events derived from them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snapshot::ElementRef;
use crate::{RequestId, TabId};

/// Header map with lowercased names.
pub type Headers = BTreeMap<String, String>;

/// Raw header entry as delivered by the network layer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// Collapse a raw header list into a [`Headers`] map.
///
/// Names are lowercased; repeated names are joined with `", "` in arrival order.
pub fn map_headers(raw: Option<&[HttpHeader]>) -> Headers {
    let mut headers = Headers::new();
    for header in raw.unwrap_or_default() {
        let name = header.name.to_ascii_lowercase();
        let value = header.value.clone().unwrap_or_default();
        headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    headers
}

/// Resource type ("frame type") attached to every notification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Xmlhttprequest,
    Other,
}

impl ResourceType {
    pub fn is_main_frame(self) -> bool {
        matches!(self, ResourceType::MainFrame)
    }
}

/// Typed network lifecycle notifications, in the order the network layer emits them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "onBeforeRequest")]
    BeforeRequest,
    #[serde(rename = "onBeforeSendHeaders")]
    BeforeSendHeaders,
    #[serde(rename = "onSendHeaders")]
    SendHeaders,
    #[serde(rename = "onHeadersReceived")]
    HeadersReceived,
    #[serde(rename = "onBeforeRedirect")]
    BeforeRedirect,
    #[serde(rename = "onAuthRequired")]
    AuthRequired,
    #[serde(rename = "onResponseStarted")]
    ResponseStarted,
    #[serde(rename = "onCompleted")]
    Completed,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 8] = [
        NotificationKind::BeforeRequest,
        NotificationKind::BeforeSendHeaders,
        NotificationKind::SendHeaders,
        NotificationKind::HeadersReceived,
        NotificationKind::BeforeRedirect,
        NotificationKind::AuthRequired,
        NotificationKind::ResponseStarted,
        NotificationKind::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::BeforeRequest => "onBeforeRequest",
            NotificationKind::BeforeSendHeaders => "onBeforeSendHeaders",
            NotificationKind::SendHeaders => "onSendHeaders",
            NotificationKind::HeadersReceived => "onHeadersReceived",
            NotificationKind::BeforeRedirect => "onBeforeRedirect",
            NotificationKind::AuthRequired => "onAuthRequired",
            NotificationKind::ResponseStarted => "onResponseStarted",
            NotificationKind::Completed => "onCompleted",
        }
    }

    /// The terminal notification closes the request record.
    pub fn is_terminal(self) -> bool {
        matches!(self, NotificationKind::Completed)
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details carried by a single lifecycle notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub tab_id: TabId,
    pub request_id: RequestId,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<HttpHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HttpHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

impl Notification {
    pub fn new(
        tab_id: TabId,
        request_id: RequestId,
        url: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            tab_id,
            request_id,
            url: url.into(),
            redirect_url: None,
            request_headers: None,
            response_headers: None,
            status_code: None,
            resource_type,
        }
    }

    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect_url = Some(target.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_request_headers(mut self, headers: Vec<HttpHeader>) -> Self {
        self.request_headers = Some(headers);
        self
    }

    pub fn with_response_headers(mut self, headers: Vec<HttpHeader>) -> Self {
        self.response_headers = Some(headers);
        self
    }
}

/// `fetch::start` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStart {
    pub resource: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub headers: Headers,
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    pub body: ResponseBody,
    pub charset: String,
    pub headers: Headers,
    /// Redirect targets in the order they were followed.
    pub hops: Vec<String>,
    pub media_type: String,
    pub status_code: Option<u16>,
    pub url: String,
}

/// `fetch::end` payload. `element` stays `None` until the analysis context resolves it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchEnd {
    pub element: Option<ElementRef>,
    pub request: RequestInfo,
    pub resource: String,
    pub response: ResponseInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_headers_lowercases_and_joins_duplicates() {
        let raw = vec![
            HttpHeader::new("Content-Type", "text/html"),
            HttpHeader::new("Set-Cookie", "a=1"),
            HttpHeader::new("set-cookie", "b=2"),
            HttpHeader {
                name: "X-Empty".into(),
                value: None,
            },
        ];
        let headers = map_headers(Some(&raw));
        assert_eq!(headers["content-type"], "text/html");
        assert_eq!(headers["set-cookie"], "a=1, b=2");
        assert_eq!(headers["x-empty"], "");
        assert!(map_headers(None).is_empty());
    }

    #[test]
    fn notification_uses_webrequest_field_names() {
        let raw = r#"{
            "tab_id": 3,
            "request_id": "r9",
            "url": "https://example.com/",
            "status_code": 301,
            "redirect_url": "https://example.com/home",
            "type": "main_frame"
        }"#;
        let parsed: Notification = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.tab_id, TabId(3));
        assert_eq!(parsed.resource_type, ResourceType::MainFrame);
        assert_eq!(
            parsed.redirect_url.as_deref(),
            Some("https://example.com/home")
        );
        let kind: NotificationKind = serde_json::from_str("\"onBeforeRedirect\"").unwrap();
        assert_eq!(kind, NotificationKind::BeforeRedirect);
        assert!(NotificationKind::Completed.is_terminal());
    }
}
