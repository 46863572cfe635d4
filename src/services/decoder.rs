//! Document decoding boundary. Format internals (PDF, DOCX, OCR) live
//! behind the `DocumentDecoder` trait; the core only consumes the
//! `source -> text` map a decoder emits. Multi-part formats use
//! `filename_page_N` source tags.

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Maps raw file bytes to `{source -> extracted text}`.
pub trait DocumentDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], filename: &str) -> Result<IndexMap<String, String>>;
}

/// Built-in decoder for plain-text formats. Everything else (PDF, DOCX,
/// images) is an external collaborator plugged in behind the trait.
pub struct PlainTextDecoder;

const TEXT_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

impl DocumentDecoder for PlainTextDecoder {
    fn decode(&self, bytes: &[u8], filename: &str) -> Result<IndexMap<String, String>> {
        let extension = filename
            .rsplit('.')
            .next()
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(Error::Unsupported(extension));
        }

        let text = String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::NoContent(format!("{filename} is not valid UTF-8")))?;

        if text.trim().is_empty() {
            return Err(Error::NoContent(format!(
                "no text could be extracted from {filename}"
            )));
        }

        let mut map = IndexMap::new();
        map.insert(filename.to_string(), text);
        Ok(map)
    }
}

/// The base filename of a page-suffixed source tag
/// (`report.pdf_page_3` -> `report.pdf`).
pub fn source_base(source: &str) -> &str {
    source.split("_page_").next().unwrap_or(source)
}
