use hayro_interpret::font::Glyph;
use hayro_interpret::{
    BlendMode, ClipPath, Device, GlyphDrawMode, Image, Paint, PathDrawMode, SoftMask,
};
use kurbo::{Affine, BezPath, Rect, Shape};

/// One glyph drawn by the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRecord {
    pub ch: Option<char>,
    /// Page-space bounds; unknown for Type3 glyphs.
    pub bounds: Option<Rect>,
}

impl GlyphRecord {
    pub fn new(ch: Option<char>, bounds: Option<Rect>) -> Self {
        Self { ch, bounds }
    }
}

/// Interpreter device that keeps glyphs and ignores all painting.
#[derive(Debug, Default)]
pub struct GlyphCollector {
    glyphs: Vec<GlyphRecord>,
}

impl GlyphCollector {
    pub fn glyphs(&self) -> &[GlyphRecord] {
        &self.glyphs
    }
}

impl<'a> Device<'a> for GlyphCollector {
    fn draw_glyph(
        &mut self,
        glyph: &Glyph<'a>,
        transform: Affine,
        glyph_transform: Affine,
        _: &Paint<'a>,
        _: &GlyphDrawMode,
    ) {
        let bounds = match glyph {
            Glyph::Outline(outline) => {
                Some((transform * (glyph_transform * outline.outline())).bounding_box())
            }
            Glyph::Type3(_) => None,
        };
        self.glyphs.push(GlyphRecord::new(glyph.as_unicode(), bounds));
    }

    fn draw_path(&mut self, _: &BezPath, _: Affine, _: &Paint<'a>, _: &PathDrawMode) {}

    fn draw_image(&mut self, _: Image<'a, '_>, _: Affine) {}

    fn push_clip_path(&mut self, _: &ClipPath) {}

    fn pop_clip_path(&mut self) {}

    fn push_transparency_group(&mut self, _: f32, _: Option<SoftMask<'a>>, _: BlendMode) {}

    fn pop_transparency_group(&mut self) {}

    fn set_soft_mask(&mut self, _: Option<SoftMask<'a>>) {}

    fn set_blend_mode(&mut self, _: BlendMode) {}
}
