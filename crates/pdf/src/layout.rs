use kurbo::Rect;

use crate::device::GlyphRecord;

/// Thresholds for rebuilding words and lines from glyph bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    /// Share of the shorter glyph's height two glyphs must overlap vertically
    /// to sit on the same line.
    pub line_overlap: f64,
    /// Horizontal gap, in glyph heights, above which a space is inserted.
    pub word_gap: f64,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            line_overlap: 0.5,
            word_gap: 0.25,
        }
    }
}

/// Rebuilds page text from glyphs in drawing order.
///
/// PDFs rarely draw explicit spaces or newlines, so both are inferred from
/// geometry: a wide gap on the same line becomes a space and a glyph that no
/// longer overlaps the previous one vertically starts a new line.
pub fn layout_text(glyphs: &[GlyphRecord], params: LayoutParams) -> String {
    let mut writer = TextWriter::default();

    for glyph in glyphs {
        if let (Some(previous), Some(current)) = (writer.previous, glyph.bounds) {
            if !shares_line(previous, current, params.line_overlap) {
                writer.break_line();
            } else if word_gap(previous, current) > params.word_gap {
                writer.separate_word();
            }
        }

        if let Some(ch) = glyph.ch {
            writer.write(ch);
        }
        if glyph.bounds.is_some() {
            writer.previous = glyph.bounds;
        }
    }

    writer.text
}

#[derive(Default)]
struct TextWriter {
    text: String,
    previous: Option<Rect>,
}

impl TextWriter {
    fn ends_with_whitespace(&self) -> bool {
        self.text.chars().next_back().is_some_and(char::is_whitespace)
    }

    fn break_line(&mut self) {
        let kept = self.text.trim_end_matches(' ').len();
        self.text.truncate(kept);
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    fn separate_word(&mut self) {
        if !self.text.is_empty() && !self.ends_with_whitespace() {
            self.text.push(' ');
        }
    }

    fn write(&mut self, ch: char) {
        if ch == '\n' && self.text.ends_with('\n') {
            return;
        }
        self.text.push(ch);
    }
}

fn shares_line(a: Rect, b: Rect, min_overlap: f64) -> bool {
    let shorter = a.height().min(b.height());
    let overlap = a.y1.min(b.y1) - a.y0.max(b.y0);
    shorter > 0.0 && overlap > 0.0 && overlap / shorter >= min_overlap
}

// Gap between glyphs measured in average glyph heights; kerning makes it negative.
fn word_gap(previous: Rect, current: Rect) -> f64 {
    let height = (previous.height() + current.height()) / 2.0;
    if height <= 0.0 {
        return 0.0;
    }
    (current.x0 - previous.x1) / height
}

#[cfg(test)]
mod tests {
    use super::*;

    // A 10-unit tall glyph starting at `x` on the line whose baseline box starts at `y`.
    fn glyph(ch: char, x: f64, width: f64, y: f64) -> GlyphRecord {
        GlyphRecord::new(Some(ch), Some(Rect::new(x, y, x + width, y + 10.0)))
    }

    fn text(glyphs: &[GlyphRecord]) -> String {
        layout_text(glyphs, LayoutParams::default())
    }

    #[test]
    fn wide_gap_becomes_a_space() {
        assert_eq!(text(&[glyph('o', 0.0, 5.0, 0.0), glyph('k', 9.0, 5.0, 0.0)]), "o k");
    }

    #[test]
    fn tight_gap_and_kerning_stay_joined() {
        let glyphs = [
            glyph('o', 0.0, 5.0, 0.0),
            glyph('k', 5.5, 5.0, 0.0),
            glyph('!', 10.0, 2.0, 0.0),
        ];
        assert_eq!(text(&glyphs), "ok!");
    }

    #[test]
    fn vertical_jump_starts_a_new_line() {
        let glyphs = [
            glyph('a', 0.0, 5.0, 100.0),
            glyph(' ', 5.0, 3.0, 100.0),
            glyph('b', 0.0, 5.0, 80.0),
            glyph('c', 6.0, 5.0, 80.0),
        ];
        assert_eq!(text(&glyphs), "a\nbc");
    }

    #[test]
    fn explicit_spaces_are_not_doubled() {
        let glyphs = [
            glyph('a', 0.0, 5.0, 0.0),
            glyph(' ', 5.0, 1.0, 0.0),
            glyph('b', 12.0, 5.0, 0.0),
        ];
        assert_eq!(text(&glyphs), "a b");
    }

    #[test]
    fn unmapped_glyphs_still_drive_spacing() {
        let glyphs = [
            glyph('x', 0.0, 5.0, 0.0),
            GlyphRecord::new(None, Some(Rect::new(5.5, 0.0, 10.0, 10.0))),
            glyph('y', 20.0, 5.0, 0.0),
        ];
        assert_eq!(text(&glyphs), "x y");
    }

    #[test]
    fn glyphs_without_bounds_are_appended_as_is() {
        let glyphs = [
            glyph('a', 0.0, 5.0, 0.0),
            GlyphRecord::new(Some('b'), None),
            glyph('c', 5.5, 5.0, 0.0),
        ];
        assert_eq!(text(&glyphs), "abc");
    }
}
