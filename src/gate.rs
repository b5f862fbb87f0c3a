//! Capability gate: reject unsupported formats before they reach a worker.
//!
//! ## Why sniff bytes instead of trusting the extension?
//!
//! Clients rename files. A `.pdf` that is really a ZIP would otherwise occupy
//! a worker slot only to fail deep inside the engine. Magic bytes decide
//! first; the extension is consulted only for text formats that have no
//! signature (Markdown, AsciiDoc, CSV, HTML).
//!
//! The check is synchronous and cheap: at most a scan of the upload for ZIP
//! member names and a regex over the first few kilobytes.

use crate::error::ServiceError;
use crate::source::DocumentSource;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::debug;

/// Document formats the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFormat {
    Docx,
    Pptx,
    Html,
    Image,
    Pdf,
    Asciidoc,
    Md,
    Csv,
}

impl InputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            InputFormat::Docx => "docx",
            InputFormat::Pptx => "pptx",
            InputFormat::Html => "html",
            InputFormat::Image => "image",
            InputFormat::Pdf => "pdf",
            InputFormat::Asciidoc => "asciidoc",
            InputFormat::Md => "md",
            InputFormat::Csv => "csv",
        }
    }

    /// Map a bare file extension (no dot, any case) to a text format.
    ///
    /// Binary formats are never decided by extension.
    fn from_text_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "adoc" | "asciidoc" | "asc" => Some(InputFormat::Asciidoc),
            "html" | "htm" | "xhtml" => Some(InputFormat::Html),
            "md" => Some(InputFormat::Md),
            "csv" => Some(InputFormat::Csv),
            _ => None,
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-admission check shared by the direct and queued paths.
pub trait CapabilityGate: Send + Sync {
    /// Admit or reject one source. Rejection is always a caller error.
    fn admit(&self, source: &DocumentSource) -> Result<(), ServiceError>;

    /// Admit every source or reject the whole request on the first failure.
    fn admit_all(&self, sources: &[DocumentSource]) -> Result<(), ServiceError> {
        sources.iter().try_for_each(|s| self.admit(s))
    }
}

/// The default gate: byte sniffing plus extension fallback.
///
/// URL sources are admitted unchecked; their bytes are only seen by the
/// engine, which reports failures per document.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatGate;

impl CapabilityGate for FormatGate {
    fn admit(&self, source: &DocumentSource) -> Result<(), ServiceError> {
        match source {
            DocumentSource::Url(_) => Ok(()),
            DocumentSource::File { filename, bytes } => match guess_format(bytes, filename) {
                Some(format) => {
                    debug!(%filename, %format, "format admitted");
                    Ok(())
                }
                None => Err(ServiceError::UnsupportedFormat {
                    filename: filename.clone(),
                }),
            },
        }
    }
}

/// What the leading bytes say about a buffer.
enum Sniffed {
    Supported(InputFormat),
    /// A recognised signature for a format the engine cannot read.
    Unsupported,
    /// No signature; fall back to extension and content heuristics.
    Unknown,
}

/// Guess the format of an upload, or `None` if it is unsupported.
pub fn guess_format(bytes: &[u8], filename: &str) -> Option<InputFormat> {
    if extension(filename).is_some_and(|e| e.eq_ignore_ascii_case("csv")) {
        return Some(InputFormat::Csv);
    }

    match sniff_magic(bytes) {
        Sniffed::Supported(format) => Some(format),
        Sniffed::Unsupported => None,
        Sniffed::Unknown => extension(filename)
            .and_then(InputFormat::from_text_extension)
            .or_else(|| detect_html(bytes)),
    }
}

fn extension(filename: &str) -> Option<&str> {
    if filename.starts_with('.') {
        return None;
    }
    filename.rsplit_once('.').map(|(_, ext)| ext)
}

fn sniff_magic(bytes: &[u8]) -> Sniffed {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = b"\xFF\xD8\xFF";
    const ZIP: &[u8] = b"PK\x03\x04";

    if bytes.starts_with(b"%PDF") {
        return Sniffed::Supported(InputFormat::Pdf);
    }
    if bytes.starts_with(PNG)
        || bytes.starts_with(JPEG)
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || bytes.starts_with(b"II*\0")
        || bytes.starts_with(b"MM\0*")
        || bytes.starts_with(b"BM")
    {
        return Sniffed::Supported(InputFormat::Image);
    }
    if bytes.starts_with(ZIP) {
        // OOXML containers are ZIPs; the member names tell them apart.
        return if contains(bytes, b"word/") {
            Sniffed::Supported(InputFormat::Docx)
        } else if contains(bytes, b"ppt/") {
            Sniffed::Supported(InputFormat::Pptx)
        } else {
            Sniffed::Unsupported
        };
    }
    if bytes.starts_with(b"\x1F\x8B")
        || bytes.starts_with(b"\x7FELF")
        || bytes.starts_with(b"7z\xBC\xAF\x27\x1C")
        || bytes.starts_with(b"Rar!")
    {
        return Sniffed::Unsupported;
    }
    Sniffed::Unknown
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

const HTML_SNIFF_LEN: usize = 8 * 1024;

static RE_XML_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_HTML_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:<!doctype\s+html|<html|<head|<body)").unwrap());

/// Recognise HTML/XHTML by content when neither signature nor extension
/// helped.
fn detect_html(bytes: &[u8]) -> Option<InputFormat> {
    let ascii: String = bytes
        .iter()
        .take(HTML_SNIFF_LEN)
        .filter(|b| b.is_ascii())
        .map(|&b| (b as char).to_ascii_lowercase())
        .collect();
    let stripped = RE_XML_COMMENT.replace_all(&ascii, "");
    let content = stripped.trim_start();

    if content.starts_with("<?xml") {
        let head: String = content.chars().take(1000).collect();
        if head.contains("xhtml") {
            return Some(InputFormat::Html);
        }
    }

    RE_HTML_START.is_match(content).then_some(InputFormat::Html)
}
