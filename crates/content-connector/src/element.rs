//! Finding the element that caused a fetch.
//!
//! References are resolved against the document base (`<base href>` over the snapshot URL), so a
//! relative `src="app.js"` matches the absolute URL the network layer reports.

use hintbridge_core_types::{DomNode, DomSnapshot, ElementRef};
use url::Url;

const URL_ATTRIBUTES: [&str; 4] = ["src", "href", "data", "poster"];

/// First element, in document order, referencing `target`.
pub fn element_by_url(snapshot: &DomSnapshot, target: &str) -> Option<ElementRef> {
    find_node(snapshot, target).map(DomNode::to_ref)
}

pub(crate) fn find_node<'a>(snapshot: &'a DomSnapshot, target: &str) -> Option<&'a DomNode> {
    let base = document_base(snapshot);
    let target = normalize(None, target)?;
    snapshot
        .elements()
        .find(|node| references(node, base.as_ref()).any(|candidate| candidate == target))
}

fn document_base(snapshot: &DomSnapshot) -> Option<Url> {
    let page = Url::parse(&snapshot.url).ok();
    match snapshot.base_href() {
        Some(href) => normalize(page.as_ref(), href).or(page),
        None => page,
    }
}

fn normalize(base: Option<&Url>, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    url.set_fragment(None);
    Some(url)
}

/// Every URL an element points at.
fn references<'a>(node: &'a DomNode, base: Option<&'a Url>) -> impl Iterator<Item = Url> + 'a {
    let plain = URL_ATTRIBUTES
        .iter()
        .filter_map(move |name| node.attribute(name));
    let srcset = node
        .attribute("srcset")
        .into_iter()
        .flat_map(srcset_candidates);
    let meta = (node.tag() == "meta")
        .then(|| node.attribute("content"))
        .flatten();
    plain
        .chain(srcset)
        .chain(meta)
        .filter_map(move |raw| normalize(base, raw))
}

fn srcset_candidates(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
}
