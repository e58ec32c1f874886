// Local resource lookup and data: URI construction.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Folder suffixes Word, Excel and LibreOffice use for companion assets.
const COMPANION_SUFFIXES: &[&str] = &[
    "_files",
    ".files",
    "-files",
    ".html_files",
    "-Dateien",
    "_Dateien",
    ".fld",
];

const NAME_SEARCH_DEPTH: usize = 3;

/// How a reference found in markup or CSS should be treated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Reference {
    /// Already inline (`data:`) or empty.
    Inline,
    /// Network URL, anchor or mail link: left untouched.
    External,
    /// Relative or `file:` path, cleaned and percent-decoded.
    Local(String),
}

pub(crate) fn classify(reference: &str) -> Reference {
    let r = reference.trim();
    let low = r.to_ascii_lowercase();
    if r.is_empty() || low.starts_with("data:") {
        return Reference::Inline;
    }
    if low.starts_with("http:")
        || low.starts_with("https:")
        || low.starts_with("//")
        || low.starts_with("mailto:")
        || low.starts_with("cid:")
        || low.starts_with('#')
    {
        return Reference::External;
    }

    let mut p = r;
    if low.starts_with("file:") {
        p = &r[5..];
        p = p.trim_start_matches('/');
        // file:///C:/x keeps its drive letter, file:///tmp/x becomes /tmp/x
        let is_drive = p.len() > 1 && p.as_bytes()[1] == b':';
        if !is_drive {
            return Reference::Local(format!("/{}", percent_decode(strip_suffix(p))));
        }
    }
    let cleaned = percent_decode(strip_suffix(p)).replace('\\', "/");
    let mut cleaned = cleaned.as_str();
    while let Some(rest) = cleaned.strip_prefix("./") {
        cleaned = rest;
    }
    Reference::Local(cleaned.to_string())
}

/// True for references that can only mean a file on the author's machine:
/// `file:` URLs, drive-letter or UNC paths, and paths into a companion folder.
pub(crate) fn is_file_path(reference: &str, rel: &str) -> bool {
    if reference.trim().to_ascii_lowercase().starts_with("file:") {
        return true;
    }
    let bytes = rel.as_bytes();
    if bytes.len() > 1 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }
    if rel.starts_with("//") {
        return true;
    }
    let first = rel.split('/').next().unwrap_or("").to_ascii_lowercase();
    COMPANION_SUFFIXES
        .iter()
        .any(|suffix| first.len() > suffix.len() && first.ends_with(&suffix.to_ascii_lowercase()))
}

fn strip_suffix(p: &str) -> &str {
    let end = p.find(['?', '#']).unwrap_or(p.len());
    &p[..end]
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Companion asset folders next to an exported HTML file, most likely first.
pub fn companion_dirs(html_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = html_path.parent() else {
        return Vec::new();
    };
    let Some(stem) = html_path.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    COMPANION_SUFFIXES
        .iter()
        .map(|suffix| parent.join(format!("{stem}{suffix}")))
        .filter(|p| p.is_dir())
        .collect()
}

#[derive(Clone, Debug, Default)]
pub(crate) struct AssetResolver {
    roots: Vec<PathBuf>,
    base_dir: Option<PathBuf>,
}

impl AssetResolver {
    pub(crate) fn new(base_dir: Option<&Path>) -> Self {
        Self {
            roots: Vec::new(),
            base_dir: base_dir.map(Path::to_path_buf),
        }
    }

    pub(crate) fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        for r in roots {
            if !self.roots.contains(&r) {
                self.roots.push(r);
            }
        }
        self
    }

    pub(crate) fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Resolve a cleaned local path: asset roots, then the base directory,
    /// then by file name anywhere under the asset roots.
    pub(crate) fn resolve(&self, rel: &str) -> Option<PathBuf> {
        self.resolve_from(rel, None)
    }

    /// Like `resolve`, but tries `dir` first (stylesheets resolve their own
    /// `url(...)` references relative to themselves).
    pub(crate) fn resolve_from(&self, rel: &str, dir: Option<&Path>) -> Option<PathBuf> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return rel_path.is_file().then(|| rel_path.to_path_buf());
        }
        let mut dirs: Vec<&Path> = Vec::new();
        dirs.extend(dir);
        dirs.extend(self.roots.iter().map(PathBuf::as_path));
        dirs.extend(self.base_dir.as_deref());
        for d in &dirs {
            let candidate = d.join(rel_path);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        let name = rel_path.file_name()?;
        for d in &dirs {
            let by_name = d.join(name);
            if by_name.is_file() {
                return Some(by_name);
            }
        }
        for root in &self.roots {
            if let Some(hit) = find_by_name(root, name, NAME_SEARCH_DEPTH) {
                return Some(hit);
            }
        }
        None
    }
}

fn find_by_name(dir: &Path, name: &std::ffi::OsStr, depth: usize) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    for p in &entries {
        if p.is_file() && p.file_name() == Some(name) {
            return Some(p.clone());
        }
    }
    if depth == 0 {
        return None;
    }
    for p in entries.iter().filter(|p| p.is_dir()) {
        if let Some(hit) = find_by_name(p, name, depth - 1) {
            return Some(hit);
        }
    }
    None
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" | "apng" => "image/png",
        "jpg" | "jpeg" | "jfif" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        "emf" => "image/emf",
        "wmf" => "image/wmf",
        "css" => "text/css",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => return None,
    };
    Some(mime)
}

pub(crate) fn mime_for(path: &Path, bytes: &[u8]) -> &'static str {
    if let Some(m) = mime_from_extension(path) {
        return m;
    }
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream")
}

pub(crate) fn data_uri(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let mime = mime_for(path, &bytes);
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(&bytes)))
}
