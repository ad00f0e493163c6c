//! Media type, charset and fetch type of a response.
//!
//! The media type comes from the `content-type` header when it is specific, otherwise from the
//! element that caused the fetch, the URL extension, and finally the content itself.

use hintbridge_core_types::{DomNode, FetchEnd};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the `fetch::end::<type>` event the analysis engine receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchType {
    Css,
    Font,
    Html,
    Image,
    Javascript,
    Json,
    Manifest,
    Txt,
    Xml,
    Unknown,
}

impl FetchType {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchType::Css => "css",
            FetchType::Font => "font",
            FetchType::Html => "html",
            FetchType::Image => "image",
            FetchType::Javascript => "javascript",
            FetchType::Json => "json",
            FetchType::Manifest => "manifest",
            FetchType::Txt => "txt",
            FetchType::Xml => "xml",
            FetchType::Unknown => "unknown",
        }
    }

    pub fn event_name(self) -> String {
        format!("fetch::end::{}", self.as_str())
    }

    pub fn from_media_type(media_type: &str) -> Self {
        let media_type = media_type.trim().to_ascii_lowercase();
        match media_type.as_str() {
            "" => FetchType::Unknown,
            "text/css" => FetchType::Css,
            "text/html" | "application/xhtml+xml" => FetchType::Html,
            "text/javascript"
            | "application/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "text/ecmascript" => FetchType::Javascript,
            "application/manifest+json" => FetchType::Manifest,
            "application/json" => FetchType::Json,
            "text/plain" => FetchType::Txt,
            "text/xml" | "application/xml" => FetchType::Xml,
            "application/font-woff"
            | "application/font-woff2"
            | "application/vnd.ms-fontobject"
            | "application/x-font-ttf"
            | "application/x-font-otf" => FetchType::Font,
            other if other.starts_with("image/") => FetchType::Image,
            other if other.starts_with("font/") => FetchType::Font,
            other if other.ends_with("+json") => FetchType::Json,
            other if other.ends_with("+xml") => FetchType::Xml,
            _ => FetchType::Unknown,
        }
    }
}

impl fmt::Display for FetchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub media_type: String,
    pub charset: String,
    pub fetch_type: FetchType,
}

/// Classify `event`; values already present on the response are kept.
pub fn classify(event: &FetchEnd, element: Option<&DomNode>) -> Classification {
    let response = &event.response;
    let header = response.headers.get("content-type").map(String::as_str);

    let media_type = if response.media_type.is_empty() {
        media_type_from_header(header)
            .or_else(|| element.and_then(|node| media_type_from_element(node, &response.url)))
            .or_else(|| media_type_from_url(&response.url))
            .or_else(|| sniff(&response.body.content))
            .unwrap_or_default()
    } else {
        response.media_type.clone()
    };

    let charset = if response.charset.is_empty() {
        charset_from_header(header)
            .or_else(|| {
                (FetchType::from_media_type(&media_type) == FetchType::Html)
                    .then(|| meta_charset(&response.body.content))
                    .flatten()
            })
            .or_else(|| is_textual(&media_type).then(|| "utf-8".to_string()))
            .unwrap_or_default()
    } else {
        response.charset.clone()
    };

    Classification {
        fetch_type: FetchType::from_media_type(&media_type),
        media_type,
        charset,
    }
}

/// Write the classification into the response and return the fetch type.
pub fn apply(event: &mut FetchEnd, element: Option<&DomNode>) -> FetchType {
    let Classification {
        media_type,
        charset,
        fetch_type,
    } = classify(event, element);
    event.response.media_type = media_type;
    event.response.charset = charset;
    fetch_type
}

fn media_type_from_header(header: Option<&str>) -> Option<String> {
    let essence = header?.split(';').next()?.trim().to_ascii_lowercase();
    // Servers label anything they do not know as octet-stream; that says nothing.
    if essence.is_empty() || essence == "application/octet-stream" {
        return None;
    }
    Some(essence)
}

fn media_type_from_element(node: &DomNode, url: &str) -> Option<String> {
    match node.tag().as_str() {
        "script" => Some("text/javascript".to_string()),
        "link" => {
            let rel = node.attribute("rel").unwrap_or_default().to_ascii_lowercase();
            let rel: Vec<&str> = rel.split_whitespace().collect();
            if rel.contains(&"stylesheet") {
                Some("text/css".to_string())
            } else if rel.contains(&"manifest") {
                Some("application/manifest+json".to_string())
            } else {
                None
            }
        }
        "img" | "picture" | "source" => {
            media_type_from_url(url).filter(|guess| guess.starts_with("image/"))
        }
        _ => None,
    }
}

fn media_type_from_url(url: &str) -> Option<String> {
    let path = url::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| {
            let no_fragment = url.split('#').next().unwrap_or(url);
            no_fragment.split('?').next().unwrap_or(no_fragment).to_string()
        });
    if path.ends_with(".webmanifest") {
        return Some("application/manifest+json".to_string());
    }
    let guess = mime_guess::from_path(&path).first()?;
    let essence = guess.essence_str();
    Some(match essence {
        "application/javascript" => "text/javascript".to_string(),
        other => other.to_string(),
    })
}

fn sniff(content: &str) -> Option<String> {
    let head = content.trim_start();
    if head.is_empty() {
        return None;
    }
    let lower: String = head.chars().take(64).collect::<String>().to_ascii_lowercase();
    if lower.starts_with("<!doctype html") || lower.starts_with("<html") {
        return Some("text/html".to_string());
    }
    if lower.starts_with("<?xml") {
        return Some(if head.contains("<svg") {
            "image/svg+xml".to_string()
        } else {
            "text/xml".to_string()
        });
    }
    if lower.starts_with("<svg") {
        return Some("image/svg+xml".to_string());
    }
    if (head.starts_with('{') || head.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(content).is_ok()
    {
        return Some("application/json".to_string());
    }
    None
}

fn charset_from_header(header: Option<&str>) -> Option<String> {
    header?
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

/// `<meta charset>` or the `charset=` of an `http-equiv` content type within the first KiB.
fn meta_charset(content: &str) -> Option<String> {
    let end = content
        .char_indices()
        .map(|(idx, _)| idx)
        .find(|idx| *idx >= 1024)
        .unwrap_or(content.len());
    let head = content[..end].to_ascii_lowercase();
    let mut rest = head.as_str();
    while let Some(start) = rest.find("<meta") {
        rest = &rest[start + 5..];
        let tag = &rest[..rest.find('>').unwrap_or(rest.len())];
        if let Some(pos) = tag.find("charset=") {
            let value: String = tag[pos + 8..]
                .trim_start_matches(['"', '\''])
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
                .collect();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn is_textual(media_type: &str) -> bool {
    media_type.starts_with("text/")
        || matches!(
            FetchType::from_media_type(media_type),
            FetchType::Javascript | FetchType::Json | FetchType::Manifest | FetchType::Xml
        )
        || media_type == "image/svg+xml"
}
