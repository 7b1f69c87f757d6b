//! Document text extraction, dispatched by file extension.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::debug;

/// One format-specific extractor.
pub trait TextExtractor: Send + Sync {
    fn extensions(&self) -> &[&'static str];

    /// Extract plain text from raw file bytes.
    fn extract(&self, bytes: &[u8]) -> Result<String, String>;
}

/// Extension-keyed extractor table.
pub struct ParserRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self { extractors: Vec::new() }
    }

    /// Registry with the built-in txt/md, PDF, and DOCX extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(PlainTextExtractor));
        registry.register(Box::new(PdfExtractor));
        registry.register(Box::new(DocxExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn TextExtractor>) {
        self.extractors.push(extractor);
    }

    /// Extract text for a file with the given extension (no leading dot).
    pub fn extract(&self, extension: &str, bytes: &[u8]) -> Result<String, String> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.extensions().contains(&ext.as_str()))
            .ok_or_else(|| format!("unsupported file extension '{ext}'"))?;

        let text = extractor.extract(bytes)?;
        debug!(extension = %ext, chars = text.len(), "extracted document text");
        Ok(text)
    }
}

/// UTF-8 text formats.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["txt", "md", "csv", "json"]
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, String> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// PDF text via lopdf's content-stream extraction.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["pdf"]
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, String> {
        let document = lopdf::Document::load_mem(bytes)
            .map_err(|e| format!("failed to read PDF: {e}"))?;
        let pages: Vec<u32> = document.get_pages().keys().copied().collect();
        if pages.is_empty() {
            return Err("PDF has no pages".into());
        }
        document
            .extract_text(&pages)
            .map_err(|e| format!("failed to extract PDF text: {e}"))
    }
}

/// DOCX text: `word/document.xml` inside the zip, paragraph-aware.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["docx"]
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| format!("failed to open DOCX: {e}"))?;
        let mut file = archive
            .by_name("word/document.xml")
            .map_err(|e| format!("DOCX has no document.xml: {e}"))?;
        let mut xml = String::new();
        file.read_to_string(&mut xml)
            .map_err(|e| format!("failed to read document.xml: {e}"))?;

        let mut reader = Reader::from_str(&xml);
        let mut text = String::new();
        loop {
            match reader.read_event() {
                Ok(Event::Text(t)) => {
                    text.push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
                Ok(Event::End(end)) if end.name().as_ref() == b"w:p" => {
                    text.push('\n');
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(format!("malformed document.xml: {e}")),
                _ => {}
            }
        }
        Ok(text)
    }
}
