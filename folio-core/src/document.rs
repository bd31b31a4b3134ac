use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::ViewerError;

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c2a6e-5d41-5b8e-9a07-c1d2e3f4a5b6").expect("valid namespace UUID")
});

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

pub fn document_id_for_bytes(bytes: &[u8]) -> DocumentId {
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, bytes)
}

/// Where a document comes from. Remote URLs are not fetched here; the host is
/// expected to hand over the bytes instead.
#[derive(Clone, PartialEq, Eq)]
pub enum DocumentLocation {
    Path(PathBuf),
    Memory { label: String, bytes: Bytes },
}

impl DocumentLocation {
    /// Parses user input as either a `file://` URL or a filesystem path.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ViewerError::load(input, anyhow!("empty document location")));
        }

        if let Ok(url) = Url::parse(trimmed) {
            match url.scheme() {
                "file" => {
                    let path = url.to_file_path().map_err(|_| {
                        ViewerError::load(trimmed, anyhow!("file URL has no local path"))
                    })?;
                    return Ok(Self::Path(path));
                }
                // Single-letter schemes are Windows drive prefixes such as `C:\`.
                scheme if scheme.len() > 1 => {
                    return Err(ViewerError::load(
                        trimmed,
                        anyhow!("unsupported URL scheme `{scheme}`"),
                    ));
                }
                _ => {}
            }
        }

        Ok(Self::Path(PathBuf::from(trimmed)))
    }

    pub fn from_bytes(label: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::Memory {
            label: label.into(),
            bytes: bytes.into(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Self::Memory { label, .. } => label.clone(),
        }
    }

    pub fn id(&self) -> DocumentId {
        match self {
            Self::Path(path) => document_id_for_path(path),
            Self::Memory { bytes, .. } => document_id_for_bytes(bytes),
        }
    }

    /// The original source the "download" action hands to the host.
    pub fn download_target(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Memory { .. } => None,
        }
    }
}

impl fmt::Debug for DocumentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Memory { label, bytes } => f
                .debug_struct("Memory")
                .field("label", label)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

impl fmt::Display for DocumentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Memory { label, .. } => write!(f, "{label} (in memory)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub label: String,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

/// Page size in document units (points). Pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub page_number: usize,
    pub natural_width: f32,
    pub natural_height: f32,
}

/// A run of extracted text sharing one baseline origin and font size.
///
/// `origin_x`/`origin_y` are in document space: origin bottom-left, y up.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRun {
    pub text: String,
    pub origin_x: f32,
    pub origin_y: f32,
    pub font_size: f32,
    pub page_number: usize,
}

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterImage {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize * 4],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copies `source` into the top-left corner, clipping whatever does not fit.
    pub fn blit(&mut self, source: &RasterImage) {
        let rows = self.height.min(source.height) as usize;
        let cols = self.width.min(source.width) as usize;
        if rows == 0 || cols == 0 || source.pixels.len() < source.width as usize * 4 * rows {
            return;
        }
        let dst_stride = self.width as usize * 4;
        let src_stride = source.width as usize * 4;
        for row in 0..rows {
            let dst = row * dst_stride;
            let src = row * src_stride;
            self.pixels[dst..dst + cols * 4].copy_from_slice(&source.pixels[src..src + cols * 4]);
        }
    }
}

/// Monotonic counter bumped whenever the live document handle is replaced.
#[derive(Debug, Clone, Default)]
pub struct DocumentGeneration(Arc<AtomicU64>);

impl DocumentGeneration {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// An opened document as seen through the decoding library.
#[async_trait::async_trait]
pub trait DocumentSource: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    fn page_count(&self) -> usize {
        self.info().page_count
    }

    async fn page_geometry(&self, page: usize) -> Result<PageGeometry>;

    async fn extract_text(&self, page: usize) -> Result<Vec<GlyphRun>>;

    /// Rasterizes `page` at `output_scale` device pixels per document unit.
    async fn rasterize(&self, page: usize, output_scale: f32) -> Result<RasterImage>;
}

#[async_trait::async_trait]
pub trait DocumentOpener: Send + Sync {
    async fn open(&self, location: &DocumentLocation) -> Result<Arc<dyn DocumentSource>>;
}
