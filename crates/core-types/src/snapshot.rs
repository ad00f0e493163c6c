//! Serialized DOM snapshot exchanged with the analysis context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reference to the element that caused a fetch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRef {
    pub node_id: u32,
    pub node_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomNode {
    pub id: u32,
    #[serde(default)]
    pub parent: Option<u32>,
    pub node_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl DomNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Element nodes carry a tag name; text and comment nodes use `#`-prefixed names.
    pub fn is_element(&self) -> bool {
        !self.node_name.starts_with('#')
    }

    pub fn tag(&self) -> String {
        self.node_name.to_ascii_lowercase()
    }

    pub fn to_ref(&self) -> ElementRef {
        ElementRef {
            node_id: self.id,
            node_name: self.node_name.clone(),
        }
    }
}

/// DOM state of a page at one point in time, flattened in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomSnapshot {
    /// Document URL, used as the base for resolving relative references.
    pub url: String,
    pub nodes: Vec<DomNode>,
}

impl DomSnapshot {
    pub fn node(&self, id: u32) -> Option<&DomNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &DomNode> {
        self.nodes.iter().filter(|node| node.is_element())
    }

    /// `href` of the first `<base>` element, if the document declares one.
    pub fn base_href(&self) -> Option<&str> {
        self.elements()
            .find(|node| node.tag() == "base")
            .and_then(|node| node.attribute("href"))
    }
}
