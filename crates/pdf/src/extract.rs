use std::sync::Arc;

use hayro_interpret::hayro_syntax::Pdf;
use hayro_interpret::util::PageExt;
use hayro_interpret::{Context, InterpreterSettings, interpret_page};
use kurbo::Rect;

use crate::device::GlyphCollector;
use crate::layout::{LayoutParams, layout_text};

/// Prefix of the text a failed extraction renders to when used as document content.
pub const FAILURE_MARKER_PREFIX: &str = "[Error reading document: ";

const PDF_MAGIC: &[u8] = b"%PDF-";
// Some producers emit junk before the header; readers accept it within the first KiB.
const PDF_HEADER_WINDOW: usize = 1024;
const UTF8_BOM: char = '\u{feff}';

/// Outcome of turning raw document bytes into plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Failed { reason: String },
}

impl Extraction {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Failed { .. } => None,
        }
    }

    /// Text handed to the model: the extracted content, or a readable failure marker.
    pub fn into_context_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Failed { reason } => format!("{FAILURE_MARKER_PREFIX}{reason}]"),
        }
    }
}

pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Extraction;
}

/// Extracts page text from PDF documents, pages joined by a blank line.
#[derive(Clone, Default)]
pub struct PdfExtractor {
    settings: InterpreterSettings,
    layout: LayoutParams,
}

impl PdfExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    fn page_texts(&self, pdf: &Pdf) -> Vec<String> {
        pdf.pages()
            .iter()
            .map(|page| {
                let (w, h) = page.render_dimensions();
                let bbox = Rect::new(0.0, 0.0, w as f64, h as f64);

                let mut ctx = Context::new(
                    page.initial_transform(true),
                    bbox,
                    page.xref(),
                    self.settings.clone(),
                );
                let mut collector = GlyphCollector::default();
                interpret_page(page, &mut ctx, &mut collector);

                layout_text(collector.glyphs(), self.layout)
            })
            .collect()
    }
}

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Extraction {
        let pdf = match Pdf::new(Arc::new(bytes.to_vec())) {
            Ok(pdf) => pdf,
            Err(error) => {
                tracing::warn!(byte_count = bytes.len(), error = ?error, "failed to parse pdf");
                return Extraction::failed(format!("{error:?}"));
            }
        };

        let pages = self.page_texts(&pdf);
        tracing::debug!(page_count = pages.len(), "extracted pdf text");
        Extraction::Text(join_pages(&pages))
    }
}

/// Passes UTF-8 text through, trimmed and without a byte-order mark.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Extraction {
        match std::str::from_utf8(bytes) {
            Ok(text) => Extraction::Text(text.trim_start_matches(UTF8_BOM).trim().to_string()),
            Err(error) => Extraction::failed(format!("document is not valid UTF-8: {error}")),
        }
    }
}

/// Routes bytes to the PDF or plain-text extractor by sniffing the content.
#[derive(Clone, Default)]
pub struct DetectingExtractor {
    pdf: PdfExtractor,
    plain: PlainTextExtractor,
}

impl DetectingExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentExtractor for DetectingExtractor {
    fn extract(&self, bytes: &[u8]) -> Extraction {
        if bytes.is_empty() {
            return Extraction::failed("document is empty");
        }

        if has_pdf_header(bytes) {
            return self.pdf.extract(bytes);
        }

        if std::str::from_utf8(bytes).is_ok() {
            return self.plain.extract(bytes);
        }

        tracing::debug!(byte_count = bytes.len(), "rejecting document of unknown format");
        Extraction::failed("unsupported document format")
    }
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    window
        .windows(PDF_MAGIC.len())
        .any(|candidate| candidate == PDF_MAGIC)
}

fn join_pages(pages: &[String]) -> String {
    pages.join("\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_joined_by_blank_line_and_trimmed() {
        let pages = vec![
            "  \nfirst page".to_string(),
            "second page".to_string(),
            "third\n ".to_string(),
        ];
        assert_eq!(join_pages(&pages), "first page\n\nsecond page\n\nthird");
    }

    #[test]
    fn plain_text_passes_through_trimmed() {
        let extraction = DetectingExtractor::new().extract("\u{feff}  notes\nline two \n".as_bytes());
        assert_eq!(extraction, Extraction::Text("notes\nline two".to_string()));
    }

    #[test]
    fn binary_input_is_unsupported() {
        let extraction = DetectingExtractor::new().extract(&[0xff, 0xfe, 0x00, 0x81, 0x9c]);
        assert_eq!(extraction, Extraction::failed("unsupported document format"));
    }

    #[test]
    fn empty_input_fails() {
        let extraction = DetectingExtractor::new().extract(&[]);
        assert!(extraction.is_failed());
        assert!(extraction.text().is_none());
    }

    #[test]
    fn corrupt_pdf_yields_no_text() {
        let extraction = DetectingExtractor::new().extract(b"%PDF-1.7\nthis is not a pdf body");
        match extraction {
            Extraction::Failed { reason } => assert!(!reason.is_empty()),
            Extraction::Text(text) => assert!(text.is_empty()),
        }
    }

    #[test]
    fn pdf_header_is_found_after_leading_junk() {
        let mut bytes = vec![b' '; 100];
        bytes.extend_from_slice(b"%PDF-1.4");
        assert!(has_pdf_header(&bytes));

        let mut late = vec![b' '; PDF_HEADER_WINDOW];
        late.extend_from_slice(b"%PDF-1.4");
        assert!(!has_pdf_header(&late));
    }

    #[test]
    fn failure_renders_as_marker_text() {
        let text = Extraction::failed("bad xref").into_context_text();
        assert_eq!(text, "[Error reading document: bad xref]");
        assert!(text.starts_with(FAILURE_MARKER_PREFIX));
    }
}
