// Owned output tree and its HTML serializer.

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum OutNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<OutNode>,
    },
    Text(String),
}

impl OutNode {
    pub(crate) fn element(tag: &str, attrs: Vec<(String, String)>, children: Vec<OutNode>) -> Self {
        OutNode::Element {
            tag: tag.to_string(),
            attrs,
            children,
        }
    }

    pub(crate) fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// True if the subtree holds an element that renders without text.
    pub(crate) fn has_embedded(&self) -> bool {
        match self {
            OutNode::Text(_) => false,
            OutNode::Element { tag, children, .. } => {
                matches!(tag.as_str(), "img" | "br" | "hr" | "input" | "svg" | "math")
                    || children.iter().any(|c| c.has_embedded())
            }
        }
    }
}

fn collect_text(n: &OutNode, out: &mut String) {
    match n {
        OutNode::Text(t) => out.push_str(t),
        OutNode::Element { children, .. } => {
            for c in children {
                collect_text(c, out);
            }
        }
    }
}

pub(crate) fn get_attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Set, replace, or (with `None`) remove an attribute, keeping its position.
pub(crate) fn set_attr(attrs: &mut Vec<(String, String)>, name: &str, value: Option<String>) {
    let pos = attrs.iter().position(|(k, _)| k.eq_ignore_ascii_case(name));
    match (pos, value) {
        (Some(i), Some(v)) => attrs[i].1 = v,
        (Some(i), None) => {
            attrs.remove(i);
        }
        (None, Some(v)) => attrs.push((name.to_string(), v)),
        (None, None) => {}
    }
}

fn esc_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn esc_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta"
            | "source" | "track" | "wbr"
    )
}

fn is_raw_text(tag: &str) -> bool {
    matches!(tag, "style" | "script")
}

fn serialize_node(out: &mut String, n: &OutNode, raw: bool) {
    match n {
        OutNode::Text(t) => {
            if raw {
                out.push_str(&t.replace("</", "<\\/"));
            } else {
                out.push_str(&esc_text(t));
            }
        }
        OutNode::Element {
            tag,
            attrs,
            children,
        } => {
            out.push('<');
            out.push_str(tag);
            for (k, v) in attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&esc_attr(v));
                out.push('"');
            }
            if is_void(tag) {
                out.push_str("/>");
                return;
            }
            out.push('>');
            let raw_children = is_raw_text(tag);
            for c in children {
                serialize_node(out, c, raw_children);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

pub(crate) fn serialize_nodes(nodes: &[OutNode]) -> String {
    let mut out = String::new();
    for n in nodes {
        serialize_node(&mut out, n, false);
    }
    out
}
