//! Turns the viewer surface into the image actually sent to the terminal:
//! highlights blended in, then cropped to the visible cell area.

use folio_core::{OverlayLayer, RasterImage};
use rayon::prelude::*;
use tracing::debug;

use crate::DrawParams;

/// Terminal size as reported by the tty. Pixel sizes are zero on terminals
/// that do not report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalArea {
    pub columns: u32,
    pub rows: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl TerminalArea {
    fn cell_size(&self) -> Option<(f32, f32)> {
        if self.columns == 0 || self.rows == 0 || self.pixel_width == 0 || self.pixel_height == 0
        {
            return None;
        }
        Some((
            self.pixel_width as f32 / self.columns as f32,
            self.pixel_height as f32 / self.rows as f32,
        ))
    }
}

/// Where and how large the page image is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub crop_x: u32,
    pub crop_y: u32,
    pub crop_width: u32,
    pub crop_height: u32,
    pub start_col: u32,
    pub start_row: u32,
    pub params: DrawParams,
}

/// Blends `layer` over a copy of `base`. A layer whose size differs from the
/// base belongs to another frame and is skipped.
pub fn composite(base: &RasterImage, layer: Option<&OverlayLayer>) -> RasterImage {
    let mut out = base.clone();
    let Some(layer) = layer else {
        return out;
    };
    if layer.width != base.width || layer.height != base.height {
        debug!(
            base = ?(base.width, base.height),
            layer = ?(layer.width, layer.height),
            "overlay size mismatch, skipping highlights"
        );
        return out;
    }
    out.pixels
        .par_chunks_exact_mut(4)
        .zip(layer.pixels.par_chunks_exact(4))
        .for_each(|(dst, src)| blend_pixel(dst, src));
    out
}

/// Source-over blend of one RGBA pixel onto an opaque one.
pub fn blend_pixel(pixel: &mut [u8], source: &[u8]) {
    let alpha = source[3] as f32 / 255.0;
    if alpha <= 0.0 {
        return;
    }
    let inv = 1.0 - alpha;
    for channel in 0..3 {
        pixel[channel] = ((pixel[channel] as f32 * inv) + (source[channel] as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

pub fn crop(image: &RasterImage, origin_x: u32, origin_y: u32, width: u32, height: u32) -> RasterImage {
    if image.is_empty() {
        return RasterImage::default();
    }

    let width = width.min(image.width).max(1);
    let height = height.min(image.height).max(1);
    let origin_x = origin_x.min(image.width - width);
    let origin_y = origin_y.min(image.height - height);

    let stride = image.width as usize * 4;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height {
        let start = (origin_y + row) as usize * stride + origin_x as usize * 4;
        pixels.extend_from_slice(&image.pixels[start..start + width as usize * 4]);
    }

    RasterImage {
        width,
        height,
        pixels,
    }
}

/// Lays out an image of `width × height` pixels in the area above the status
/// line. Pages that fit are shown at native size and centred; larger pages
/// are cropped to the top of the page, centred horizontally. Without pixel
/// metrics the whole image is scaled into the available cells.
pub fn place(width: u32, height: u32, area: TerminalArea) -> Placement {
    let columns = area.columns.max(1);
    let rows = area.rows.saturating_sub(1).max(1);

    let Some((cell_width, cell_height)) = area.cell_size().filter(|_| width > 0 && height > 0)
    else {
        let (draw_cols, draw_rows) = fit_by_ratio(width, height, columns, rows);
        return Placement {
            crop_x: 0,
            crop_y: 0,
            crop_width: width,
            crop_height: height,
            start_col: (columns - draw_cols) / 2,
            start_row: (rows - draw_rows) / 2,
            params: DrawParams::clamped(draw_cols, draw_rows),
        };
    };

    let visible_width = ((columns as f32 * cell_width).floor() as u32).max(1);
    let visible_height = ((rows as f32 * cell_height).floor() as u32).max(1);
    let crop_width = width.min(visible_width);
    let crop_height = height.min(visible_height);

    let draw_cols = ((crop_width as f32 / cell_width).ceil() as u32).clamp(1, columns);
    let draw_rows = ((crop_height as f32 / cell_height).ceil() as u32).clamp(1, rows);

    Placement {
        crop_x: (width - crop_width) / 2,
        crop_y: 0,
        crop_width,
        crop_height,
        start_col: (columns - draw_cols) / 2,
        start_row: (rows - draw_rows) / 2,
        params: DrawParams::clamped(draw_cols, draw_rows),
    }
}

fn fit_by_ratio(width: u32, height: u32, columns: u32, rows: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (columns, rows);
    }
    // Terminal cells are roughly twice as tall as they are wide.
    let ratio = width as f32 / height as f32 * 0.5;
    let mut cols = columns as f32;
    let mut draw_rows = (cols / ratio).round().max(1.0);
    if draw_rows > rows as f32 {
        draw_rows = rows as f32;
        cols = (draw_rows * ratio).round().max(1.0);
    }
    (
        (cols as u32).clamp(1, columns),
        (draw_rows as u32).clamp(1, rows),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> RasterImage {
        RasterImage {
            width,
            height,
            pixels: vec![value; width as usize * height as usize * 4],
        }
    }

    #[test]
    fn composite_blends_only_painted_pixels() {
        let base = solid(2, 1, 200);
        let mut layer = OverlayLayer::transparent(2, 1);
        layer.pixels[..4].copy_from_slice(&[0, 0, 0, 255]);

        let out = composite(&base, Some(&layer));
        assert_eq!(&out.pixels[..3], &[0, 0, 0]);
        assert_eq!(&out.pixels[4..7], &[200, 200, 200]);
    }

    #[test]
    fn composite_skips_layers_from_other_frames() {
        let base = solid(2, 2, 10);
        let layer = OverlayLayer {
            width: 4,
            height: 4,
            pixels: vec![255; 64],
        };
        assert_eq!(composite(&base, Some(&layer)), base);
    }

    #[test]
    fn blend_is_weighted_by_source_alpha() {
        let mut pixel = [0, 0, 0, 255];
        blend_pixel(&mut pixel, &[255, 255, 255, 51]);
        assert_eq!(pixel[..3], [51, 51, 51]);
    }

    #[test]
    fn crop_clamps_origin_into_image() {
        let mut image = solid(4, 4, 0);
        let last = image.pixels.len() - 4;
        image.pixels[last] = 9;

        let cropped = crop(&image, 10, 10, 2, 2);
        assert_eq!((cropped.width, cropped.height), (2, 2));
        assert_eq!(cropped.pixels[12], 9);
    }

    #[test]
    fn small_pages_are_centred_at_native_size() {
        let area = TerminalArea {
            columns: 100,
            rows: 41,
            pixel_width: 1000,
            pixel_height: 820,
        };
        let placement = place(500, 400, area);
        assert_eq!(placement.crop_width, 500);
        assert_eq!(placement.crop_height, 400);
        assert_eq!(placement.params, DrawParams::clamped(50, 20));
        assert_eq!(placement.start_col, 25);
        assert_eq!(placement.start_row, 10);
    }

    #[test]
    fn large_pages_are_cropped_to_visible_area() {
        let area = TerminalArea {
            columns: 100,
            rows: 41,
            pixel_width: 1000,
            pixel_height: 820,
        };
        let placement = place(1600, 2000, area);
        assert_eq!(placement.crop_width, 1000);
        assert_eq!(placement.crop_height, 800);
        assert_eq!(placement.crop_x, 300);
        assert_eq!(placement.crop_y, 0);
        assert_eq!(placement.params, DrawParams::clamped(100, 40));
    }

    #[test]
    fn missing_pixel_metrics_fall_back_to_aspect_fit() {
        let area = TerminalArea {
            columns: 80,
            rows: 25,
            pixel_width: 0,
            pixel_height: 0,
        };
        let placement = place(612, 792, area);
        assert_eq!(placement.crop_width, 612);
        assert!(placement.params.rows <= 24);
        assert!(placement.params.columns <= 80);
    }
}
