//! Document sources: an uploaded buffer or a URL.
//!
//! ## Why `Bytes`?
//!
//! A source is cloned into the queue, into the worker, and into the engine
//! request. `Bytes` makes each of those clones a reference-count bump rather
//! than a copy of a multi-megabyte upload.

use crate::error::{DocumentError, ServiceError};
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Fallback name for URL downloads whose path has no usable file name.
const DEFAULT_DOWNLOAD_NAME: &str = "downloaded_document";

/// Encodings tried, in order, on CSV documents.
const CSV_ENCODINGS: [&str; 4] = ["utf-8", "latin1", "cp1252", "iso-8859-1"];

/// Exactly one document to convert.
#[derive(Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// An in-memory upload.
    File { filename: String, bytes: Bytes },
    /// An HTTP/HTTPS URL the engine side downloads.
    Url(String),
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::File { filename, bytes } => f
                .debug_struct("File")
                .field("filename", filename)
                .field("len", &bytes.len())
                .finish(),
            DocumentSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

impl DocumentSource {
    pub fn file(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        DocumentSource::File {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Validate and wrap a URL.
    pub fn url(url: impl Into<String>) -> Result<Self, ServiceError> {
        let url = url.into();
        if !is_url(&url) || reqwest::Url::parse(&url).is_err() {
            return Err(ServiceError::InvalidUrl { url });
        }
        Ok(DocumentSource::Url(url))
    }

    /// Build a source from optional request parts.
    ///
    /// Exactly one of `file` and `url` must be present.
    pub fn from_parts(file: Option<(String, Bytes)>, url: Option<String>) -> Result<Self, ServiceError> {
        match (file, url) {
            (Some((filename, bytes)), None) => Ok(Self::file(filename, bytes)),
            (None, Some(url)) => Self::url(url),
            (Some(_), Some(_)) => Err(ServiceError::AmbiguousInput {
                what: "a document or a url",
            }),
            (None, None) => Err(ServiceError::MissingInput {
                what: "document or url",
            }),
        }
    }

    /// Name reported back in results: the upload's filename, or the last
    /// path segment of the URL.
    pub fn display_name(&self) -> String {
        match self {
            DocumentSource::File { filename, .. } => filename.clone(),
            DocumentSource::Url(url) => filename_from_url(url),
        }
    }

}

/// Check if the input string looks like an HTTP/HTTPS URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Extract a reasonable filename from the URL path.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    DEFAULT_DOWNLOAD_NAME.to_string()
}

/// `true` if the filename has a `.csv` extension (any case).
pub fn is_csv(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("csv"))
}

/// Re-encode a CSV document to UTF-8.
///
/// Spreadsheet exports are often Latin-1 or Windows-1252. Each encoding in
/// [`CSV_ENCODINGS`] is tried in turn; UTF-8 input is returned untouched.
pub fn reencode_csv(filename: &str, bytes: Bytes) -> Result<Bytes, DocumentError> {
    for label in CSV_ENCODINGS {
        let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
            continue;
        };
        let decoded = match encoding.decode_without_bom_handling_and_without_replacement(&bytes) {
            None => continue,
            Some(Cow::Borrowed(_)) => None,
            Some(Cow::Owned(text)) => Some(text),
        };
        return Ok(match decoded {
            None => bytes,
            Some(text) => {
                if encoding != UTF_8 {
                    debug!(%filename, encoding = encoding.name(), "re-encoded CSV to UTF-8");
                }
                Bytes::from(text)
            }
        });
    }
    Err(DocumentError::UndecodableCsv {
        filename: filename.to_string(),
    })
}

/// Download a URL source into memory.
///
/// Failures are per-document: a dead link fails that document only.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
) -> Result<(String, Bytes), DocumentError> {
    info!("Downloading document from: {}", url);

    let response = client
        .get(url)
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                DocumentError::DownloadTimeout {
                    url: url.to_string(),
                    secs: timeout_secs,
                }
            } else {
                DocumentError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

    if !response.status().is_success() {
        return Err(DocumentError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            DocumentError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DocumentError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    debug!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok((filename_from_url(url), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn csv_extension_any_case() {
        assert!(is_csv("data.csv"));
        assert!(is_csv("DATA.CSV"));
        assert!(!is_csv("data.csv.pdf"));
        assert!(!is_csv("csv"));
    }

    #[test]
    fn utf8_csv_is_untouched() {
        let bytes = Bytes::from("name,city\nJosé,München\n");
        let out = reencode_csv("people.csv", bytes.clone()).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn latin1_csv_becomes_utf8() {
        let latin1 = Bytes::from_static(b"name,city\nJos\xe9,M\xfcnchen\n");
        let out = reencode_csv("people.csv", latin1).unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "name,city\nJosé,München\n");
    }

    #[test]
    fn cp1252_specific_bytes_are_mapped() {
        let cp1252 = Bytes::from_static(b"item,price\nticket,\x8010\n");
        let out = reencode_csv("prices.csv", cp1252).unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "item,price\nticket,€10\n");
    }

    #[test]
    fn undecodable_csv_message_lists_encodings() {
        let e = DocumentError::UndecodableCsv {
            filename: "x.csv".into(),
        };
        assert_eq!(
            e.to_string(),
            "Could not decode CSV file. Supported encodings: utf-8, latin1, cp1252, iso-8859-1"
        );
    }

    #[test]
    fn from_parts_requires_exactly_one() {
        let file = Some(("a.pdf".to_string(), Bytes::from_static(b"%PDF-1.7")));
        let url = Some("https://example.com/a.pdf".to_string());

        assert!(matches!(
            DocumentSource::from_parts(file.clone(), None),
            Ok(DocumentSource::File { .. })
        ));
        assert!(matches!(
            DocumentSource::from_parts(None, url.clone()),
            Ok(DocumentSource::Url(_))
        ));
        assert!(matches!(
            DocumentSource::from_parts(file, url),
            Err(ServiceError::AmbiguousInput { .. })
        ));
        assert!(matches!(
            DocumentSource::from_parts(None, None),
            Err(ServiceError::MissingInput { .. })
        ));
    }

    #[test]
    fn url_must_be_http() {
        assert!(DocumentSource::url("ftp://example.com/a.pdf").is_err());
        assert!(DocumentSource::url("https://").is_err());
        assert!(DocumentSource::url("https://example.com/a.pdf").is_ok());
    }

    #[test]
    fn display_name_from_url_path() {
        let s = DocumentSource::Url("https://arxiv.org/pdf/paper.pdf?x=1".into());
        assert_eq!(s.display_name(), "paper.pdf");
        let s = DocumentSource::Url("https://arxiv.org/abs/1706".into());
        assert_eq!(s.display_name(), DEFAULT_DOWNLOAD_NAME);
        assert_eq!(DocumentSource::file("x.docx", Vec::<u8>::new()).display_name(), "x.docx");
    }

    #[test]
    fn debug_hides_payload() {
        let s = DocumentSource::file("big.pdf", vec![0u8; 4096]);
        let dbg = format!("{s:?}");
        assert!(dbg.contains("big.pdf"));
        assert!(dbg.contains("4096"));
    }
}
