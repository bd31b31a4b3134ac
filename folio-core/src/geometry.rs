//! Document-space to surface-space mapping for search highlights.
//!
//! Glyph positions come from text extraction with a bottom-left origin; the
//! surface has a top-left origin. Horizontal extents are estimated from the
//! font size rather than true glyph metrics, which is good enough for a
//! translucent highlight but not for text selection.

use crate::document::GlyphRun;

/// Estimated advance of one character as a fraction of the font size.
pub const CHAR_WIDTH_FACTOR: f32 = 0.6;

/// Highlight rectangle in surface pixels at the scale it was computed for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightRect {
    pub page_number: usize,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl HighlightRect {
    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            page_number: self.page_number,
            left: self.left * factor,
            top: self.top * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

/// Maps every case-insensitive occurrence of `query` inside `glyph_runs` to a
/// surface rectangle.
///
/// `page_viewport_height` is the unscaled page height used to flip the y axis.
pub fn map_matches(
    glyph_runs: &[GlyphRun],
    query: &str,
    page_viewport_height: f32,
    scale: f32,
) -> Vec<HighlightRect> {
    if query.trim().is_empty() {
        return Vec::new();
    }

    let needle = query.to_lowercase();
    let query_len = query.chars().count() as f32;
    let mut rects = Vec::new();

    for run in glyph_runs {
        let char_width = run.font_size * CHAR_WIDTH_FACTOR;
        let top = (page_viewport_height - run.origin_y - run.font_size) * scale;
        for offset in occurrence_offsets(&run.text, &needle) {
            let offset_x = offset as f32 * char_width;
            rects.push(HighlightRect {
                page_number: run.page_number,
                left: (run.origin_x + offset_x) * scale,
                top,
                width: query_len * char_width * scale,
                height: run.font_size * scale,
            });
        }
    }

    rects
}

/// Character offsets of every occurrence of `needle` (already lowercased) in
/// `haystack`, compared case-insensitively. Overlapping hits are reported.
///
/// Offsets index the characters of `haystack` itself, even where lowercasing
/// expands one character into several.
pub fn occurrence_offsets(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }

    // Byte `i` of `lowered` came from character `source[i]` of `haystack`.
    let mut lowered = String::with_capacity(haystack.len());
    let mut source = Vec::with_capacity(haystack.len());
    for (index, ch) in haystack.chars().enumerate() {
        for lower in ch.to_lowercase() {
            lowered.push(lower);
            source.extend(std::iter::repeat(index).take(lower.len_utf8()));
        }
    }

    let mut offsets: Vec<usize> = Vec::new();
    let mut from = 0;
    while let Some(found) = lowered[from..].find(needle) {
        let at = from + found;
        let offset = source[at];
        if offsets.last() != Some(&offset) {
            offsets.push(offset);
        }
        let step = lowered[at..].chars().next().map(char::len_utf8).unwrap_or(1);
        from = at + step;
    }
    offsets
}
