// Stylesheet and style-attribute rewriting.
//
// All rewrites leave `url(...)` payloads alone, since an inlined base64 image
// can contain sequences like `3pt+` or `mso-` that must survive byte for byte.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashSet;

lazy_static! {
    static ref URL_FN: Regex = Regex::new(r"(?i)url\(\s*([^)]*?)\s*\)").unwrap();
    static ref IMPORT: Regex = Regex::new(
        r#"(?i)@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;"#
    )
    .unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref VENDOR_DECL: Regex =
        Regex::new(r"(?i)(?:mso|-ms)-[a-z0-9-]+\s*:[^;}]*;?\s*").unwrap();
    static ref EMPTY_RULE: Regex = Regex::new(r"[^{};]*\{\s*\}").unwrap();
    static ref HAIRLINE: Regex =
        Regex::new(r"(?i)\b(border(?:-[a-z]+)*)\s*:\s*0?\.5pt\b").unwrap();
    static ref POINTS: Regex = Regex::new(r"(?i)(-?\d*\.?\d+)\s*pt\b").unwrap();
    static ref FONT_FAMILY: Regex = Regex::new(r"(?i)(font-family\s*:\s*)([^;}]+)").unwrap();
    static ref CLASS_SELECTOR: Regex = Regex::new(r"\.(-?[_a-zA-Z][_a-zA-Z0-9-]*)").unwrap();
}

pub(crate) const MISSING_URL: &str = "data:,";

const PT_TO_PX: f64 = 1.3333;

const FONT_MAP: &[(&str, &str)] = &[
    ("calibri", "Calibri, 'Segoe UI', Arial, Helvetica, sans-serif"),
    ("cambria", "Cambria, 'Times New Roman', Times, serif"),
    ("times new roman", "'Times New Roman', Times, serif"),
    ("arial", "Arial, Helvetica, sans-serif"),
];

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Flatten {
    pub hairlines: bool,
    pub fonts: bool,
    pub pt_to_px: bool,
}

/// Apply `f` to every stretch of `css` that is not inside `url(...)`.
fn map_outside_urls(css: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    for m in URL_FN.find_iter(css) {
        out.push_str(&f(&css[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&f(&css[last..]));
    out
}

/// What a `url(...)` target should become.
pub(crate) enum UrlTarget {
    Keep,
    Replace(String),
}

fn is_non_local(target: &str) -> bool {
    let low = target.to_ascii_lowercase();
    low.is_empty()
        || low.starts_with("data:")
        || low.starts_with("http:")
        || low.starts_with("https:")
        || low.starts_with("//")
        || low.starts_with('#')
}

pub(crate) fn rewrite_urls(css: &str, mut resolve: impl FnMut(&str) -> UrlTarget) -> String {
    URL_FN
        .replace_all(css, |caps: &Captures| {
            let raw = caps[1].trim_matches(|c| c == '"' || c == '\'').trim();
            if is_non_local(raw) {
                return caps[0].to_string();
            }
            match resolve(raw) {
                UrlTarget::Keep => caps[0].to_string(),
                UrlTarget::Replace(uri) => format!("url({uri})"),
            }
        })
        .into_owned()
}

/// Replace `@import` rules with the imported text. `load` returns the already
/// processed stylesheet, or `None` when the target is unavailable.
pub(crate) fn expand_imports(css: &str, mut load: impl FnMut(&str) -> Option<String>) -> String {
    IMPORT
        .replace_all(css, |caps: &Captures| {
            let target = &caps[1];
            if is_non_local(target) {
                return caps[0].to_string();
            }
            load(target).unwrap_or_default()
        })
        .into_owned()
}

pub(crate) fn strip_comments(css: &str) -> String {
    let css = BLOCK_COMMENT.replace_all(css, "");
    // Word wraps its <style> body in <!-- --> for ancient browsers.
    css.replace("<!--", "").replace("-->", "")
}

fn remove_empty_rules(css: &str) -> String {
    let mut cur = css.to_string();
    // Emptying an inner rule can empty its @media parent.
    for _ in 0..4 {
        let next = EMPTY_RULE.replace_all(&cur, "").into_owned();
        if next == cur {
            break;
        }
        cur = next;
    }
    cur
}

fn format_px(pt: f64) -> String {
    let px = (pt * PT_TO_PX * 100.0).round() / 100.0;
    let s = format!("{px:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    format!("{s}px")
}

fn flatten_segment(seg: &str, flatten: Flatten) -> String {
    let mut s = seg.to_string();
    if flatten.hairlines {
        s = HAIRLINE.replace_all(&s, "${1}:1px").into_owned();
    }
    if flatten.fonts {
        s = FONT_FAMILY
            .replace_all(&s, |caps: &Captures| {
                let value = caps[2].trim();
                let norm = value
                    .trim_matches(|c| c == '"' || c == '\'')
                    .to_ascii_lowercase();
                for (key, stack) in FONT_MAP {
                    if norm.contains(key) {
                        return format!("{}{}", &caps[1], stack);
                    }
                }
                caps[0].to_string()
            })
            .into_owned();
    }
    if flatten.pt_to_px {
        s = POINTS
            .replace_all(&s, |caps: &Captures| match caps[1].parse::<f64>() {
                Ok(pt) => format_px(pt),
                Err(_) => caps[0].to_string(),
            })
            .into_owned();
    }
    s
}

/// Clean a stylesheet body: vendor declarations, empty rules, presentation
/// flattening. `url(...)` targets must already be rewritten.
pub(crate) fn clean_stylesheet(css: &str, flatten: Flatten) -> String {
    let css = strip_comments(css);
    let css = map_outside_urls(&css, |seg| VENDOR_DECL.replace_all(seg, "").into_owned());
    let css = remove_empty_rules(&css);
    let css = map_outside_urls(&css, |seg| flatten_segment(seg, flatten));
    css.trim().to_string()
}

/// Split a declaration list on `;`, ignoring separators inside quotes or
/// parentheses (data URIs contain `;base64,`).
pub(crate) fn split_declarations(style: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in style.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ';') if depth == 0 => {
                out.push(&style[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&style[start..]);
    out.into_iter()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect()
}

fn property_name(decl: &str) -> String {
    decl.split(':').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn is_vendor_property(name: &str) -> bool {
    name.starts_with("mso-") || name.starts_with("-ms-")
}

/// Clean a `style` attribute value. Returns an empty string when nothing is left.
pub(crate) fn clean_inline_style(style: &str, flatten: Flatten) -> String {
    let kept: Vec<&str> = split_declarations(style)
        .into_iter()
        .filter(|d| d.contains(':') && !is_vendor_property(&property_name(d)))
        .collect();
    let joined = kept.join(";");
    map_outside_urls(&joined, |seg| flatten_segment(seg, flatten))
}

pub(crate) fn has_property(style: &str, name: &str) -> bool {
    split_declarations(style)
        .iter()
        .any(|d| property_name(d) == name)
}

pub(crate) fn append_declaration(style: &str, decl: &str) -> String {
    if style.trim().is_empty() {
        decl.to_string()
    } else {
        format!("{};{}", style.trim().trim_end_matches(';'), decl)
    }
}

pub(crate) fn is_spacerun(style: &str) -> bool {
    split_declarations(style).iter().any(|d| {
        let compact: String = d.chars().filter(|c| !c.is_whitespace()).collect();
        compact.eq_ignore_ascii_case("mso-spacerun:yes")
    })
}

/// Lowercased class names mentioned in selectors.
pub(crate) fn referenced_classes(css: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let css = URL_FN.replace_all(css, "");
    for caps in CLASS_SELECTOR.captures_iter(&css) {
        out.insert(caps[1].to_ascii_lowercase());
    }
    out
}
