// Tolerant parsing and removal of editor-specific markup.
//
// html5ever never fails: malformed input still yields a tree, and whatever the
// tree builder had to repair is reported back as parse messages.

use crate::tree::OutNode;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use std::collections::BTreeMap;

pub(crate) const WRAPPER_CLASS: &str = "wp-office-fixed";

pub(crate) struct ParsedDoc {
    pub dom: RcDom,
    /// Distinct parser messages with occurrence counts.
    pub errors: Vec<(String, usize)>,
}

pub(crate) fn parse(input: &str) -> ParsedDoc {
    let dom = parse_document(RcDom::default(), Default::default()).one(input);
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for e in dom.errors.borrow().iter() {
        *counts.entry(e.to_string()).or_insert(0) += 1;
    }
    ParsedDoc {
        dom,
        errors: counts.into_iter().collect(),
    }
}

pub(crate) fn node_children(h: &Handle) -> Vec<Handle> {
    h.children.borrow().clone()
}

pub(crate) fn elem_tag_lower(h: &Handle) -> Option<String> {
    match &h.data {
        NodeData::Element { name, .. } => Some(name.local.to_string().to_ascii_lowercase()),
        _ => None,
    }
}

pub(crate) fn attrs_vec(h: &Handle) -> Vec<(String, String)> {
    match &h.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|a| (a.name.local.to_string(), a.value.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn attr(h: &Handle, name: &str) -> Option<String> {
    match &h.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| a.name.local.to_string().eq_ignore_ascii_case(name))
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

pub(crate) fn find_elem(node: &Handle, name: &str) -> Option<Handle> {
    if let NodeData::Element { name: q, .. } = &node.data {
        if q.local.to_string().eq_ignore_ascii_case(name) {
            return Some(node.clone());
        }
    }
    for c in node.children.borrow().iter() {
        if let Some(x) = find_elem(c, name) {
            return Some(x);
        }
    }
    None
}

/// All elements named `name`, in document order.
pub(crate) fn find_all(node: &Handle, name: &str) -> Vec<Handle> {
    fn walk(node: &Handle, name: &str, out: &mut Vec<Handle>) {
        if let NodeData::Element { name: q, .. } = &node.data {
            if q.local.to_string().eq_ignore_ascii_case(name) {
                out.push(node.clone());
            }
        }
        for c in node.children.borrow().iter() {
            walk(c, name, out);
        }
    }
    let mut out = Vec::new();
    walk(node, name, &mut out);
    out
}

pub(crate) fn text_of(h: &Handle) -> String {
    let mut out = String::new();
    for c in h.children.borrow().iter() {
        match &c.data {
            NodeData::Text { contents } => out.push_str(&contents.borrow()),
            NodeData::Element { .. } => out.push_str(&text_of(c)),
            _ => {}
        }
    }
    out
}

fn is_blank_text(h: &Handle) -> bool {
    match &h.data {
        NodeData::Text { contents } => contents.borrow().trim().is_empty(),
        NodeData::Comment { .. } => true,
        _ => false,
    }
}

fn is_wrapper(h: &Handle) -> bool {
    if elem_tag_lower(h).as_deref() != Some("div") {
        return false;
    }
    attr(h, "class")
        .map(|c| c.split_whitespace().any(|x| x == WRAPPER_CLASS))
        .unwrap_or(false)
}

/// Content nodes of the document body. Output that was already wrapped by a
/// previous run is unwrapped so that it is not wrapped twice.
pub(crate) fn content_children(dom: &RcDom) -> Vec<Handle> {
    let children = match find_elem(&dom.document, "body") {
        Some(body) => node_children(&body),
        None => node_children(&dom.document),
    };
    let significant: Vec<&Handle> = children.iter().filter(|c| !is_blank_text(c)).collect();
    if significant.len() == 1 && is_wrapper(significant[0]) {
        return node_children(significant[0]);
    }
    children
}

fn is_drop_content_tag(lower: &str) -> bool {
    matches!(
        lower,
        "script"
            | "noscript"
            | "xml"
            | "meta"
            | "title"
            | "link"
            | "base"
            | "style"
            | "template"
            | "frameset"
            | "frame"
            | "iframe"
            | "object"
            | "embed"
            | "applet"
    )
}

fn is_unwrap_tag(lower: &str) -> bool {
    matches!(lower, "html" | "head" | "body")
}

/// Namespace prefixes whose elements carry editor-only payload (VML shapes,
/// Word/Excel XML islands, OMML math). Other prefixed elements such as
/// `o:p` or `st1:*` smart tags are unwrapped and keep their text.
fn is_vendor_payload_prefix(prefix: &str) -> bool {
    matches!(prefix, "v" | "w" | "x" | "m")
}

fn keep_attr(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !(lower.contains(':') || lower == "xmlns" || lower.starts_with("on"))
}

pub(crate) fn strip_vendor(children: &[Handle]) -> Vec<OutNode> {
    let mut out = Vec::new();
    for c in children {
        out.extend(strip_node(c));
    }
    out
}

fn strip_node(node: &Handle) -> Vec<OutNode> {
    match &node.data {
        NodeData::Text { contents } => vec![OutNode::Text(contents.borrow().to_string())],
        // Conditional comments, downlevel-revealed markers and plain comments alike.
        NodeData::Comment { .. } => Vec::new(),
        NodeData::Document => strip_vendor(&node_children(node)),
        NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => Vec::new(),
        NodeData::Element { .. } => {
            let tag = elem_tag_lower(node).unwrap_or_default();

            if let Some((prefix, _)) = tag.split_once(':') {
                if is_vendor_payload_prefix(prefix) {
                    return Vec::new();
                }
                return strip_vendor(&node_children(node));
            }

            if is_drop_content_tag(&tag) {
                return Vec::new();
            }
            if is_unwrap_tag(&tag) {
                return strip_vendor(&node_children(node));
            }

            let attrs = attrs_vec(node)
                .into_iter()
                .filter(|(k, _)| keep_attr(k))
                .collect();
            vec![OutNode::Element {
                tag,
                attrs,
                children: strip_vendor(&node_children(node)),
            }]
        }
    }
}
