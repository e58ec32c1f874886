// HTML normalizer: turns raw Office/HTML exports into a single self-contained
// fragment that WordPress will accept as page content.
//
// The pass never fails on document problems. Malformed markup is repaired by
// the parser and missing resources leave placeholders; both are reported as
// `Diagnostic`s on the result.

use crate::assets::{classify, companion_dirs, data_uri, is_file_path, AssetResolver, Reference};
use crate::css::{
    append_declaration, clean_inline_style, clean_stylesheet, expand_imports, has_property,
    is_spacerun, referenced_classes, rewrite_urls, strip_comments, Flatten, UrlTarget, MISSING_URL,
};
use crate::encoding::decode_html;
use crate::sanitize::{
    attr, content_children, elem_tag_lower, find_all, find_elem, node_children, parse,
    strip_vendor, text_of, WRAPPER_CLASS,
};
use crate::tree::{get_attr, serialize_nodes, set_attr, OutNode};
use encoding_rs::{Encoding, UTF_8};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, RcDom};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAX_IMPORT_DEPTH: usize = 4;

lazy_static! {
    static ref WORKSHEET_SOURCE: Regex =
        Regex::new(r#"(?i)<x:WorksheetSource\s+HRef\s*=\s*"([^"]+)""#).unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// `line-height` given to p, li, div, span and headings that set none.
    pub default_line_height: Option<String>,
    pub pt_to_px: bool,
    pub map_font_families: bool,
    pub clamp_hairline_borders: bool,
    pub max_width_px: u32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            default_line_height: Some("1".to_string()),
            pt_to_px: false,
            map_font_families: true,
            clamp_hairline_borders: true,
            max_width_px: 900,
        }
    }
}

impl NormalizeOptions {
    fn flatten(&self) -> Flatten {
        Flatten {
            hairlines: self.clamp_hairline_borders,
            fonts: self.map_font_families,
            pt_to_px: self.pt_to_px,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Stylesheet,
    CssUrl,
    Frame,
    Link,
    Media,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Image => "image",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::CssUrl => "css url",
            ResourceKind::Frame => "worksheet frame",
            ResourceKind::Link => "link",
            ResourceKind::Media => "media",
        };
        f.write_str(s)
    }
}

/// A recovered problem. Never fatal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// The parser had to repair the markup.
    Parse { message: String, occurrences: usize },
    /// A referenced local resource could not be inlined; a placeholder was left.
    MissingResource {
        kind: ResourceKind,
        reference: String,
        reason: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Parse {
                message,
                occurrences,
            } => write!(f, "parse: {message} (x{occurrences})"),
            Diagnostic::MissingResource {
                kind,
                reference,
                reason,
            } => write!(f, "missing {kind} {reference}: {reason}"),
        }
    }
}

/// Self-contained HTML fragment, immutable once produced.
#[derive(Clone, Debug)]
pub struct CleanedHtml {
    html: String,
    encoding: &'static Encoding,
    has_content: bool,
    diagnostics: Vec<Diagnostic>,
}

impl CleanedHtml {
    pub fn as_str(&self) -> &str {
        &self.html
    }

    pub fn into_string(self) -> String {
        self.html
    }

    /// Encoding the source was decoded from. Output is always UTF-8.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// False when the document had no visible text or embedded media.
    pub fn has_content(&self) -> bool {
        self.has_content
    }
}

impl fmt::Display for CleanedHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.html)
    }
}

pub fn normalize(raw: &str, base_dir: Option<&Path>) -> CleanedHtml {
    normalize_with(raw, base_dir, &NormalizeOptions::default())
}

pub fn normalize_with(raw: &str, base_dir: Option<&Path>, opts: &NormalizeOptions) -> CleanedHtml {
    run(raw, UTF_8, AssetResolver::new(base_dir), &[], opts)
}

/// Decode undeclared or legacy-encoded bytes first, then normalize.
pub fn normalize_bytes(bytes: &[u8], base_dir: Option<&Path>, opts: &NormalizeOptions) -> CleanedHtml {
    let decoded = decode_html(bytes);
    if decoded.lossy {
        warn!(encoding = decoded.encoding.name(), "input had malformed byte sequences");
    }
    run(&decoded.text, decoded.encoding, AssetResolver::new(base_dir), &[], opts)
}

/// Normalize an exported file, using its companion asset folder and
/// following an Excel workbook frameset to its first worksheet.
pub fn normalize_file(path: &Path, opts: &NormalizeOptions) -> io::Result<CleanedHtml> {
    let bytes = fs::read(path)?;
    let mut roots = companion_dirs(path);
    let base = path.parent();
    let mut decoded = decode_html(&bytes);
    let mut base_dir = base.map(Path::to_path_buf);
    let mut frame_missing = None;

    if let Some(reference) = frame_target(&decoded.text) {
        let resolver = AssetResolver::new(base).with_roots(roots.clone());
        let sheet = match classify(&reference) {
            Reference::Local(rel) => resolver.resolve(&rel),
            _ => None,
        };
        match sheet {
            Some(sheet) => {
                info!(sheet = %sheet.display(), "following workbook frameset");
                decoded = decode_html(&fs::read(&sheet)?);
                if let Some(dir) = sheet.parent() {
                    if !roots.iter().any(|r| r == dir) {
                        roots.push(dir.to_path_buf());
                    }
                    base_dir = Some(dir.to_path_buf());
                }
            }
            None => {
                warn!(%reference, "worksheet referenced by frameset not found");
                frame_missing = Some(Diagnostic::MissingResource {
                    kind: ResourceKind::Frame,
                    reference,
                    reason: "not found".to_string(),
                });
            }
        }
    }

    if roots.is_empty() {
        debug!(path = %path.display(), "no companion asset folder");
    }
    let bundle = companion_css(&roots);
    let resolver = AssetResolver::new(base_dir.as_deref()).with_roots(roots);
    let mut cleaned = run(&decoded.text, decoded.encoding, resolver, &bundle, opts);
    if let Some(d) = frame_missing {
        cleaned.diagnostics.insert(0, d);
    }
    Ok(cleaned)
}

fn frame_target(text: &str) -> Option<String> {
    if let Some(caps) = WORKSHEET_SOURCE.captures(text) {
        return Some(caps[1].to_string());
    }
    let parsed = parse(text);
    find_elem(&parsed.dom.document, "frameset")?;
    find_all(&parsed.dom.document, "frame")
        .iter()
        .filter_map(|f| attr(f, "src"))
        .find(|src| !src.to_ascii_lowercase().contains("tabstrip"))
}

fn companion_css(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for root in roots {
        let Ok(entries) = fs::read_dir(root) else {
            continue;
        };
        let mut sheets: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case("css"))
                        .unwrap_or(false)
            })
            .collect();
        sheets.sort();
        out.extend(sheets);
    }
    out
}

fn run(
    text: &str,
    encoding: &'static Encoding,
    resolver: AssetResolver,
    bundle: &[PathBuf],
    opts: &NormalizeOptions,
) -> CleanedHtml {
    let parsed = parse(text);
    let mut n = Normalizer {
        opts,
        flatten: opts.flatten(),
        resolver,
        classes: HashSet::new(),
        loaded: HashSet::new(),
        uri_cache: HashMap::new(),
        diagnostics: parsed
            .errors
            .iter()
            .map(|(message, occurrences)| Diagnostic::Parse {
                message: message.clone(),
                occurrences: *occurrences,
            })
            .collect(),
    };

    let sheets = n.collect_styles(&parsed.dom, bundle);
    for css in &sheets {
        n.classes.extend(referenced_classes(css));
    }

    let content = strip_vendor(&content_children(&parsed.dom));
    let content = n.fix_children(content, Ctx::default());
    let has_content = content
        .iter()
        .any(|c| c.has_embedded() || !c.text_content().trim().is_empty());

    let mut children: Vec<OutNode> = sheets
        .into_iter()
        .map(|css| OutNode::element("style", Vec::new(), vec![OutNode::Text(css)]))
        .collect();
    children.extend(content);
    let wrapper = OutNode::element(
        "div",
        vec![
            ("class".to_string(), WRAPPER_CLASS.to_string()),
            ("style".to_string(), wrapper_style(opts.max_width_px)),
        ],
        children,
    );

    let html = serialize_nodes(&[wrapper]);
    info!(
        bytes = html.len(),
        diagnostics = n.diagnostics.len(),
        encoding = encoding.name(),
        "normalized document"
    );
    CleanedHtml {
        html,
        encoding,
        has_content,
        diagnostics: n.diagnostics,
    }
}

fn wrapper_style(max_width_px: u32) -> String {
    format!(
        "margin:0 !important;padding:0;width:min(100%, {max_width_px}px);background:transparent;overflow:visible;"
    )
}

enum Asset {
    Leave,
    Inline(String),
    Missing,
}

#[derive(Clone, Copy, Default)]
struct Ctx {
    /// Inside p or li.
    flow: bool,
    /// Inside pre, code or textarea.
    pre: bool,
}

impl Ctx {
    fn collapses(self) -> bool {
        self.flow && !self.pre
    }
}

struct Normalizer<'a> {
    opts: &'a NormalizeOptions,
    flatten: Flatten,
    resolver: AssetResolver,
    /// Class names used by retained CSS, lowercased.
    classes: HashSet<String>,
    /// Stylesheets already inlined, so a linked companion file is not bundled twice.
    loaded: HashSet<PathBuf>,
    uri_cache: HashMap<PathBuf, String>,
    diagnostics: Vec<Diagnostic>,
}

impl Normalizer<'_> {
    fn missing(&mut self, kind: ResourceKind, reference: &str, reason: &str) {
        warn!(%kind, %reference, %reason, "resource not inlined");
        self.diagnostics.push(Diagnostic::MissingResource {
            kind,
            reference: reference.to_string(),
            reason: reason.to_string(),
        });
    }

    fn asset(&mut self, reference: &str, dir: Option<&Path>, kind: ResourceKind) -> Asset {
        let rel = match classify(reference) {
            Reference::Inline | Reference::External => return Asset::Leave,
            Reference::Local(rel) => rel,
        };
        let Some(path) = self.resolver.resolve_from(&rel, dir) else {
            self.missing(kind, reference, "not found");
            return Asset::Missing;
        };
        if let Some(uri) = self.uri_cache.get(&path) {
            return Asset::Inline(uri.clone());
        }
        match data_uri(&path) {
            Ok(uri) => {
                debug!(path = %path.display(), bytes = uri.len(), "inlined");
                self.uri_cache.insert(path, uri.clone());
                Asset::Inline(uri)
            }
            Err(e) => {
                self.missing(kind, reference, &e.to_string());
                Asset::Missing
            }
        }
    }

    fn css_urls(&mut self, css: &str, dir: Option<&Path>) -> String {
        rewrite_urls(css, |target| match self.asset(target, dir, ResourceKind::CssUrl) {
            Asset::Leave => UrlTarget::Keep,
            Asset::Inline(uri) => UrlTarget::Replace(uri),
            Asset::Missing => UrlTarget::Replace(MISSING_URL.to_string()),
        })
    }

    /// Comments out, imports expanded, `url(...)` inlined relative to `dir`.
    fn inline_css(&mut self, css: &str, dir: Option<&Path>, depth: usize) -> String {
        let css = strip_comments(css);
        let css = expand_imports(&css, |target| self.import(target, dir, depth));
        self.css_urls(&css, dir)
    }

    fn import(&mut self, target: &str, dir: Option<&Path>, depth: usize) -> Option<String> {
        if depth >= MAX_IMPORT_DEPTH {
            self.missing(ResourceKind::Stylesheet, target, "@import nested too deeply");
            return None;
        }
        let Reference::Local(rel) = classify(target) else {
            return None;
        };
        let Some(path) = self.resolver.resolve_from(&rel, dir) else {
            self.missing(ResourceKind::Stylesheet, target, "not found");
            return None;
        };
        self.load_stylesheet(&path, depth + 1)
    }

    fn load_stylesheet(&mut self, path: &Path, depth: usize) -> Option<String> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !self.loaded.insert(key) {
            return Some(String::new());
        }
        match fs::read(path) {
            Ok(bytes) => {
                let text = crate::encoding::decode_text(&bytes);
                Some(self.inline_css(&text, path.parent(), depth))
            }
            Err(e) => {
                self.missing(ResourceKind::Stylesheet, &path.display().to_string(), &e.to_string());
                None
            }
        }
    }

    fn link_stylesheet(&mut self, href: &str) -> Option<String> {
        match classify(href) {
            Reference::Inline => None,
            Reference::External => {
                self.missing(ResourceKind::Stylesheet, href, "remote stylesheet not inlined");
                None
            }
            Reference::Local(rel) => match self.resolver.resolve(&rel) {
                Some(path) => self.load_stylesheet(&path, 0),
                None => {
                    self.missing(ResourceKind::Stylesheet, href, "not found");
                    None
                }
            },
        }
    }

    /// Companion stylesheets first, then `<style>` and `<link>` in document order.
    fn collect_styles(&mut self, dom: &RcDom, bundle: &[PathBuf]) -> Vec<String> {
        let mut raw = Vec::new();
        for path in bundle {
            raw.extend(self.load_stylesheet(path, 0));
        }
        let mut sources = Vec::new();
        style_sources(&dom.document, &mut sources);
        for node in &sources {
            match elem_tag_lower(node).as_deref() {
                Some("style") => {
                    let base = self.resolver.base_dir().map(Path::to_path_buf);
                    raw.push(self.inline_css(&text_of(node), base.as_deref(), 0));
                }
                Some("link") => {
                    let is_sheet = attr(node, "rel")
                        .map(|r| r.split_whitespace().any(|t| t.eq_ignore_ascii_case("stylesheet")))
                        .unwrap_or(false);
                    if let (true, Some(href)) = (is_sheet, attr(node, "href")) {
                        raw.extend(self.link_stylesheet(&href));
                    }
                }
                _ => {}
            }
        }

        let mut out: Vec<String> = Vec::new();
        for css in raw {
            let cleaned = clean_stylesheet(&css, self.flatten);
            if !cleaned.is_empty() && !out.contains(&cleaned) {
                out.push(cleaned);
            }
        }
        out
    }

    fn fix_children(&mut self, nodes: Vec<OutNode>, ctx: Ctx) -> Vec<OutNode> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                OutNode::Text(t) => {
                    let t = if ctx.collapses() { collapse_ws(&t) } else { t };
                    out.push(OutNode::Text(t));
                }
                OutNode::Element {
                    tag,
                    attrs,
                    children,
                } => {
                    if tag == "span" && get_attr(&attrs, "style").map(is_spacerun).unwrap_or(false) {
                        let text: String = children.iter().map(OutNode::text_content).collect();
                        let text = spacerun_text(&text);
                        if !text.is_empty() {
                            out.push(OutNode::Text(text));
                        }
                        continue;
                    }

                    let inner = Ctx {
                        flow: ctx.flow || matches!(tag.as_str(), "p" | "li"),
                        pre: ctx.pre || matches!(tag.as_str(), "pre" | "code" | "textarea"),
                    };
                    let attrs = self.fix_attrs(&tag, attrs);
                    let children = self.fix_children(children, inner);

                    if tag == "span" && ctx.collapses() && is_blank(&children) {
                        let text: String = children.iter().map(OutNode::text_content).collect();
                        if !text.is_empty() {
                            out.push(OutNode::Text(text));
                        }
                        continue;
                    }
                    out.push(OutNode::Element {
                        tag,
                        attrs,
                        children,
                    });
                }
            }
        }
        if ctx.collapses() {
            merge_text(out)
        } else {
            out
        }
    }

    fn fix_attrs(&mut self, tag: &str, mut attrs: Vec<(String, String)>) -> Vec<(String, String)> {
        if let Some(class) = get_attr(&attrs, "class").map(str::to_string) {
            let kept: Vec<&str> = class
                .split_whitespace()
                .filter(|c| {
                    !c.to_ascii_lowercase().starts_with("mso")
                        || self.classes.contains(&c.to_ascii_lowercase())
                })
                .collect();
            set_attr(&mut attrs, "class", (!kept.is_empty()).then(|| kept.join(" ")));
        }

        let mut style = match get_attr(&attrs, "style").map(str::to_string) {
            Some(s) => {
                let s = clean_inline_style(&s, self.flatten);
                self.css_urls(&s, None)
            }
            None => String::new(),
        };
        if let Some(lh) = &self.opts.default_line_height {
            if takes_line_height(tag) && !has_property(&style, "line-height") {
                style = append_declaration(&style, &format!("line-height:{lh}"));
            }
        }
        set_attr(&mut attrs, "style", (!style.is_empty()).then_some(style));

        match tag {
            "img" => self.fix_img(&mut attrs),
            "a" | "area" => self.fix_link(&mut attrs),
            "video" | "audio" | "source" | "track" => self.fix_media(&mut attrs),
            _ => {}
        }
        if matches!(tag, "img" | "source") {
            drop_local_srcset(&mut attrs);
        }
        if let Some(bg) = get_attr(&attrs, "background").map(str::to_string) {
            match self.asset(&bg, None, ResourceKind::Image) {
                Asset::Leave => {}
                Asset::Inline(uri) => set_attr(&mut attrs, "background", Some(uri)),
                Asset::Missing => set_attr(&mut attrs, "background", None),
            }
        }
        attrs
    }

    fn fix_img(&mut self, attrs: &mut Vec<(String, String)>) {
        if let Some(src) = get_attr(attrs, "src").map(str::to_string) {
            match self.asset(&src, None, ResourceKind::Image) {
                Asset::Leave => {}
                Asset::Inline(uri) => set_attr(attrs, "src", Some(uri)),
                Asset::Missing => {
                    set_attr(attrs, "src", Some(MISSING_URL.to_string()));
                    if get_attr(attrs, "alt").is_none() {
                        set_attr(attrs, "alt", file_name(&src));
                    }
                }
            }
        }
    }

    /// Links to files on the author's machine cannot work on the site; the
    /// link text stays, the target goes.
    fn fix_link(&mut self, attrs: &mut Vec<(String, String)>) {
        let Some(href) = get_attr(attrs, "href").map(str::to_string) else {
            return;
        };
        let Reference::Local(rel) = classify(&href) else {
            return;
        };
        if is_file_path(&href, &rel) || self.resolver.resolve(&rel).is_some() {
            set_attr(attrs, "href", None);
            self.missing(ResourceKind::Link, &href, "link to a local file removed");
        }
    }

    /// Audio and video are too large to inline; local sources are removed.
    /// A local poster frame is inlined like an image.
    fn fix_media(&mut self, attrs: &mut Vec<(String, String)>) {
        if let Some(src) = get_attr(attrs, "src").map(str::to_string) {
            if matches!(classify(&src), Reference::Local(_)) {
                set_attr(attrs, "src", None);
                self.missing(ResourceKind::Media, &src, "local media not inlined");
            }
        }
        if let Some(poster) = get_attr(attrs, "poster").map(str::to_string) {
            match self.asset(&poster, None, ResourceKind::Image) {
                Asset::Leave => {}
                Asset::Inline(uri) => set_attr(attrs, "poster", Some(uri)),
                Asset::Missing => set_attr(attrs, "poster", None),
            }
        }
    }
}

/// Candidates in srcset cannot all be inlined; src alone is enough.
fn drop_local_srcset(attrs: &mut Vec<(String, String)>) {
    let local = get_attr(attrs, "srcset")
        .map(|s| {
            s.split(',')
                .filter_map(|c| c.split_whitespace().next())
                .any(|u| matches!(classify(u), Reference::Local(_)))
        })
        .unwrap_or(false);
    if local {
        set_attr(attrs, "srcset", None);
    }
}

fn style_sources(node: &Handle, out: &mut Vec<Handle>) {
    match elem_tag_lower(node).as_deref() {
        Some("style") | Some("link") => {
            out.push(node.clone());
            return;
        }
        Some("noscript") | Some("template") => return,
        Some(t) if t.contains(':') => return,
        _ => {}
    }
    for c in node_children(node) {
        style_sources(&c, out);
    }
}

fn takes_line_height(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "li" | "div" | "span" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
    )
}

fn file_name(reference: &str) -> Option<String> {
    let rel = match classify(reference) {
        Reference::Local(rel) => rel,
        _ => reference.to_string(),
    };
    Path::new(&rel)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn is_blank(children: &[OutNode]) -> bool {
    children
        .iter()
        .all(|c| !c.has_embedded() && c.text_content().trim().is_empty())
}

/// Collapse whitespace runs to one space. A run made only of whitespace that
/// includes a no-break space is kept as a single no-break space, so Word's
/// empty paragraphs keep their height.
fn collapse_ws(t: &str) -> String {
    if !t.is_empty() && t.chars().all(char::is_whitespace) && t.contains('\u{a0}') {
        return "\u{a0}".to_string();
    }
    let mut out = String::with_capacity(t.len());
    let mut prev_space = false;
    for ch in t.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out
}

fn spacerun_text(t: &str) -> String {
    if t.chars().all(char::is_whitespace) {
        return if t.is_empty() { String::new() } else { " ".to_string() };
    }
    collapse_ws(t)
}

fn merge_text(nodes: Vec<OutNode>) -> Vec<OutNode> {
    let mut out: Vec<OutNode> = Vec::with_capacity(nodes.len());
    for n in nodes {
        if let (Some(OutNode::Text(prev)), OutNode::Text(t)) = (out.last_mut(), &n) {
            prev.push_str(t);
            continue;
        }
        out.push(n);
    }
    out.into_iter()
        .filter_map(|n| match n {
            OutNode::Text(t) => {
                let t = collapse_ws(&t);
                (!t.is_empty()).then_some(OutNode::Text(t))
            }
            other => Some(other),
        })
        .collect()
}
