// Character encoding detection for exported HTML.
//
// Office exports are frequently windows-1252 (Excel in particular), sometimes
// with a `<meta charset>` and sometimes without. Everything is decoded to a
// Rust `String`, so the cleaned output is always UTF-8.
//
// Detection priority:
// 1. BOM
// 2. `<meta charset=...>` / `http-equiv="Content-Type"` label in the first 1024 bytes
// 3. UTF-8 validation
// 4. chardetng statistical guess

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use lazy_static::lazy_static;
use regex::bytes::Regex;

const PRESCAN_LEN: usize = 1024;

lazy_static! {
    static ref META_CHARSET: Regex =
        Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([A-Za-z0-9_:.\-]+)"#).unwrap();
}

/// Where the encoding decision came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodingSource {
    Bom,
    Declared,
    Utf8,
    Detected,
}

#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
    /// Malformed sequences were replaced with U+FFFD.
    pub lossy: bool,
}

pub fn decode_html(bytes: &[u8]) -> Decoded {
    let (encoding, source) = detect(bytes);
    let (text, used, lossy) = encoding.decode(bytes);
    Decoded {
        text: text.into_owned(),
        encoding: used,
        source,
        lossy,
    }
}

/// Decode a stylesheet or other companion text file. CSS has no meta
/// declaration, so only BOM, UTF-8 validity and the statistical guess apply.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((enc, _)) = Encoding::for_bom(bytes) {
        return enc.decode(bytes).0.into_owned();
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    guess(bytes).decode(bytes).0.into_owned()
}

fn detect(bytes: &[u8]) -> (&'static Encoding, EncodingSource) {
    if let Some((enc, _)) = Encoding::for_bom(bytes) {
        return (enc, EncodingSource::Bom);
    }

    let is_utf8 = std::str::from_utf8(bytes).is_ok();

    if let Some(declared) = declared_encoding(bytes) {
        // A document that parsed this far as ASCII cannot really be UTF-16.
        let declared = if declared == UTF_16LE || declared == UTF_16BE {
            UTF_8
        } else {
            declared
        };
        if declared != UTF_8 || is_utf8 {
            return (declared, EncodingSource::Declared);
        }
        tracing::debug!("document declares utf-8 but is not valid utf-8; guessing");
        return (guess(bytes), EncodingSource::Detected);
    }

    if is_utf8 {
        return (UTF_8, EncodingSource::Utf8);
    }

    (guess(bytes), EncodingSource::Detected)
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(PRESCAN_LEN)];
    let caps = META_CHARSET.captures(head)?;
    Encoding::for_label(caps.get(1)?.as_bytes())
}

fn guess(bytes: &[u8]) -> &'static Encoding {
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;

    #[test]
    fn plain_utf8() {
        let d = decode_html("<p>Blåbær</p>".as_bytes());
        assert_eq!(d.encoding, UTF_8);
        assert_eq!(d.source, EncodingSource::Utf8);
        assert_eq!(d.text, "<p>Blåbær</p>");
    }

    #[test]
    fn bom_wins_and_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("<p>ø</p>".as_bytes());
        let d = decode_html(&bytes);
        assert_eq!(d.source, EncodingSource::Bom);
        assert_eq!(d.text, "<p>ø</p>");
    }

    #[test]
    fn declared_windows_1252() {
        let mut bytes = b"<html><head><meta http-equiv=Content-Type content=\"text/html; charset=windows-1252\"></head><body><p>Bl".to_vec();
        bytes.push(0xE5);
        bytes.extend_from_slice(b"b");
        bytes.push(0xE6);
        bytes.extend_from_slice(b"r</p></body></html>");
        let d = decode_html(&bytes);
        assert_eq!(d.encoding, WINDOWS_1252);
        assert_eq!(d.source, EncodingSource::Declared);
        assert!(d.text.contains("Blåbær"));
        assert!(!d.lossy);
    }

    #[test]
    fn undeclared_legacy_is_guessed() {
        let mut bytes = b"<p>Det var en gang en ".to_vec();
        bytes.extend_from_slice(&[0x6B, 0x6E, 0x61, 0x62, 0x62, 0x65, 0x20, 0x70, 0xE5]);
        bytes.extend_from_slice(b" sm");
        bytes.push(0xF8);
        bytes.extend_from_slice(b"rbr");
        bytes.push(0xF8);
        bytes.extend_from_slice(b"d</p>");
        let d = decode_html(&bytes);
        assert_eq!(d.source, EncodingSource::Detected);
        assert_ne!(d.encoding, UTF_8);
        assert!(d.text.starts_with("<p>Det var en gang"));
    }

    #[test]
    fn declared_utf16_on_ascii_document_is_utf8() {
        let d = decode_html(b"<meta charset=\"utf-16\"><p>hi</p>");
        assert_eq!(d.encoding, UTF_8);
    }

    #[test]
    fn css_text_decodes() {
        assert_eq!(decode_text(b"p { color: red }"), "p { color: red }");
    }
}
