//! Document text extraction for conversation grounding.
//!
//! PDFs are interpreted with `hayro-interpret`; a [`GlyphCollector`] device records
//! each drawn glyph and [`layout_text`] turns the records back into lines of text.
//! Plain UTF-8 files pass through unchanged apart from trimming.
//!
//! Unicode mapping of PDF glyphs is best-effort: unmapped glyphs produce no text
//! but still take part in spacing decisions. Text comes out in drawing order, so
//! multi-column pages are not reordered.

#![deny(unsafe_code)]

mod device;
pub mod extract;
mod layout;

pub use device::{GlyphCollector, GlyphRecord};
pub use extract::{
    DetectingExtractor, DocumentExtractor, Extraction, FAILURE_MARKER_PREFIX, PdfExtractor,
    PlainTextExtractor,
};
pub use layout::{LayoutParams, layout_text};
