//! Search highlights for the displayed frame, kept with the page, scale and
//! device pixel ratio they were mapped under.

use crate::document::GlyphRun;
use crate::geometry::{map_matches, HighlightRect};

#[derive(Debug, Clone, Copy, PartialEq)]
struct OverlayKey {
    page: usize,
    scale: f32,
    device_pixel_ratio: f32,
}

/// Transparent RGBA layer matching the surface backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl OverlayLayer {
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn is_clear(&self) -> bool {
        self.pixels.chunks_exact(4).all(|px| px[3] == 0)
    }

    fn fill(&mut self, rect: &HighlightRect, rgba: [u8; 4]) {
        let edge = |value: f32, limit: u32| (value.round().max(0.0) as u32).min(limit);
        let x0 = edge(rect.left, self.width);
        let y0 = edge(rect.top, self.height);
        let x1 = edge(rect.right(), self.width);
        let y1 = edge(rect.bottom(), self.height);
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let stride = self.width as usize * 4;
        for y in y0..y1 {
            let row = y as usize * stride;
            for x in x0..x1 {
                let idx = row + x as usize * 4;
                self.pixels[idx..idx + 4].copy_from_slice(&rgba);
            }
        }
    }
}

/// Search highlights for the page currently on the surface.
///
/// Rectangles are in css pixels and only meaningful for the page, scale and
/// device pixel ratio they were computed under.
#[derive(Debug, Clone)]
pub struct HighlightOverlay {
    key: Option<OverlayKey>,
    rects: Vec<HighlightRect>,
    color: [u8; 3],
    alpha: f32,
}

impl HighlightOverlay {
    pub fn new(color: [u8; 3], alpha: f32) -> Self {
        Self {
            key: None,
            rects: Vec::new(),
            color,
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    pub fn refresh(
        &mut self,
        page: usize,
        glyph_runs: &[GlyphRun],
        query: &str,
        page_height: f32,
        scale: f32,
        device_pixel_ratio: f32,
    ) {
        self.rects = map_matches(glyph_runs, query, page_height, scale)
            .into_iter()
            .filter(|rect| rect.page_number == page)
            .collect();
        self.key = Some(OverlayKey {
            page,
            scale,
            device_pixel_ratio,
        });
    }

    pub fn clear(&mut self) {
        self.key = None;
        self.rects.clear();
    }

    pub fn is_valid_for(&self, page: usize, scale: f32, device_pixel_ratio: f32) -> bool {
        self.key
            == Some(OverlayKey {
                page,
                scale,
                device_pixel_ratio,
            })
    }

    pub fn rects(&self) -> &[HighlightRect] {
        &self.rects
    }

    /// Rasterizes the rectangles at device resolution into a layer of the
    /// given backing size.
    pub fn layer(&self, width: u32, height: u32) -> OverlayLayer {
        let mut layer = OverlayLayer::transparent(width, height);
        let Some(key) = self.key else {
            return layer;
        };
        let alpha = (self.alpha * 255.0).round() as u8;
        let rgba = [self.color[0], self.color[1], self.color[2], alpha];
        for rect in &self.rects {
            layer.fill(&rect.scaled(key.device_pixel_ratio), rgba);
        }
        layer
    }
}
