use std::convert::TryFrom;
use std::mem;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use folio_core::{
    DocumentInfo, DocumentLocation, DocumentMetadata, DocumentOpener, DocumentSource, GlyphRun,
    PageGeometry, RasterImage,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

/// Opens documents through a shared Pdfium binding.
pub struct PdfiumOpener {
    pdfium: Arc<Pdfium>,
}

impl PdfiumOpener {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentOpener for PdfiumOpener {
    #[instrument(skip(self))]
    async fn open(&self, location: &DocumentLocation) -> Result<Arc<dyn DocumentSource>> {
        let document = match location {
            DocumentLocation::Path(path) => {
                let absolute = path
                    .canonicalize()
                    .with_context(|| format!("failed to resolve path for {:?}", path))?;
                load_from_file(&self.pdfium, &absolute)?
            }
            DocumentLocation::Memory { bytes, .. } => self
                .pdfium
                .load_pdf_from_byte_vec(bytes.to_vec(), None)
                .context("failed to parse in-memory document")?,
        };
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. The
        // returned PdfiumDocument keeps its own Arc to those bindings and
        // declares `document` before `_pdfium`, so the document is dropped first.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let info = build_document_info(&document, location);
        debug!(pages = info.page_count, "pdfium document loaded");
        Ok(Arc::new(PdfiumDocument {
            document: Mutex::new(document),
            cache: Mutex::new(None),
            info,
            _pdfium: Arc::clone(&self.pdfium),
        }))
    }
}

fn load_from_file<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>> {
    pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))
}

struct PdfiumDocument {
    document: Mutex<PdfDocument<'static>>,
    cache: Mutex<Option<RasterCacheEntry>>,
    info: DocumentInfo,
    _pdfium: Arc<Pdfium>,
}

struct RasterCacheEntry {
    page: usize,
    output_scale: f32,
    image: RasterImage,
}

impl PdfiumDocument {
    fn with_page<R, F>(&self, page: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let index = page_index(page)?;
        let document = self.document.lock();
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page))?;
        f(&page)
    }
}

#[async_trait]
impl DocumentSource for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    async fn page_geometry(&self, page: usize) -> Result<PageGeometry> {
        self.with_page(page, |pdf_page| {
            Ok(PageGeometry {
                page_number: page,
                natural_width: pdf_page.width().value,
                natural_height: pdf_page.height().value,
            })
        })
    }

    async fn extract_text(&self, page: usize) -> Result<Vec<GlyphRun>> {
        self.with_page(page, |pdf_page| {
            let text = pdf_page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page))?;
            let runs = text
                .segments()
                .iter()
                .filter_map(|segment| {
                    let bounds = segment.bounds();
                    glyph_run(
                        segment.text(),
                        bounds.left().value,
                        bounds.bottom().value,
                        bounds.top().value,
                        page,
                    )
                })
                .collect();
            Ok(runs)
        })
    }

    #[instrument(skip(self))]
    async fn rasterize(&self, page: usize, output_scale: f32) -> Result<RasterImage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page == page && (entry.output_scale - output_scale).abs() < f32::EPSILON {
                    return Ok(entry.image.clone());
                }
            }
        }

        let image = self.with_page(page, |pdf_page| {
            let config = PdfRenderConfig::new().scale_page_by_factor(output_scale.max(0.01));
            let bitmap = pdf_page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", page))?;
            let rgba = bitmap.as_image().to_rgba8();
            let (width, height) = rgba.dimensions();
            Ok(RasterImage {
                width,
                height,
                pixels: rgba.into_raw(),
            })
        })?;

        *self.cache.lock() = Some(RasterCacheEntry {
            page,
            output_scale,
            image: image.clone(),
        });
        Ok(image)
    }
}

/// Converts a 1-based page number into Pdfium's 0-based index.
fn page_index(page: usize) -> Result<PdfPageIndex> {
    page.checked_sub(1)
        .and_then(|index| PdfPageIndex::try_from(index).ok())
        .ok_or_else(|| anyhow!("page {} is out of supported range", page))
}

/// Builds a run from a segment's bounds. The run's height stands in for the
/// font size; empty or degenerate segments are dropped.
fn glyph_run(text: String, left: f32, bottom: f32, top: f32, page: usize) -> Option<GlyphRun> {
    let font_size = top - bottom;
    if text.trim().is_empty() || font_size.is_nan() || font_size <= 0.0 {
        return None;
    }
    Some(GlyphRun {
        text,
        origin_x: left,
        origin_y: bottom,
        font_size,
        page_number: page,
    })
}

fn build_document_info(document: &PdfDocument<'_>, location: &DocumentLocation) -> DocumentInfo {
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|t| t.value().split(',').map(|s| s.trim().to_owned()).collect())
        .unwrap_or_else(Vec::new);

    DocumentInfo {
        id: location.id(),
        label: location.label(),
        page_count,
        metadata: DocumentMetadata {
            title,
            author,
            keywords,
        },
    }
}

fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("FOLIO_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(
                    "failed to load Pdfium from build-provided path {}: {}",
                    path, err
                );
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_numbers_are_one_based() {
        assert_eq!(page_index(1).unwrap(), 0);
        assert_eq!(page_index(12).unwrap(), 11);
        assert!(page_index(0).is_err());
        assert!(page_index(usize::MAX).is_err());
    }

    #[test]
    fn segment_bounds_map_to_baseline_origin() {
        let run = glyph_run("Tokyo".to_string(), 72.0, 700.0, 712.0, 3).unwrap();
        assert_eq!(run.origin_x, 72.0);
        assert_eq!(run.origin_y, 700.0);
        assert_eq!(run.font_size, 12.0);
        assert_eq!(run.page_number, 3);
    }

    #[test]
    fn blank_or_flat_segments_are_dropped() {
        assert!(glyph_run("   ".to_string(), 0.0, 0.0, 10.0, 1).is_none());
        assert!(glyph_run("x".to_string(), 0.0, 10.0, 10.0, 1).is_none());
    }
}
