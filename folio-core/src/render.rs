//! Rasterization into the single shared drawable surface.
//!
//! Every request is tagged with a token from a monotonically increasing
//! counter. A completed request is applied only while its token is still the
//! latest issued one; anything older is reported as superseded and the surface
//! keeps whatever frame it already shows.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::document::{DocumentSource, PageGeometry, RasterImage};
use crate::error::{Result, ViewerError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTicket {
    pub token: u64,
    pub page: usize,
    pub scale: f32,
}

/// Describes what the surface currently holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub token: u64,
    pub page: usize,
    pub scale: f32,
    pub device_pixel_ratio: f32,
    pub geometry: PageGeometry,
    /// Display size, `natural × scale`.
    pub css_width: u32,
    pub css_height: u32,
}

impl Frame {
    pub fn output_scale(&self) -> f32 {
        self.device_pixel_ratio * self.scale
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Applied(Frame),
    Superseded { token: u64, page: usize },
}

#[derive(Debug, Clone, Default)]
pub struct Surface {
    frame: Option<Frame>,
    backing: RasterImage,
}

impl Surface {
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Backing store at device resolution.
    pub fn image(&self) -> &RasterImage {
        &self.backing
    }

    pub fn is_blank(&self) -> bool {
        self.frame.is_none()
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.backing.width != width || self.backing.height != height {
            self.backing = RasterImage::blank(width, height);
        } else {
            self.backing.pixels.fill(255);
        }
    }
}

pub fn scaled_dimensions(geometry: &PageGeometry, factor: f32) -> (u32, u32) {
    let width = (geometry.natural_width * factor).round().max(1.0);
    let height = (geometry.natural_height * factor).round().max(1.0);
    (width as u32, height as u32)
}

pub struct RenderPipeline {
    device_pixel_ratio: f32,
    latest: AtomicU64,
    surface: Mutex<Surface>,
}

impl RenderPipeline {
    pub fn new(device_pixel_ratio: f32) -> Self {
        Self {
            device_pixel_ratio: sanitize_ratio(device_pixel_ratio),
            latest: AtomicU64::new(0),
            surface: Mutex::new(Surface::default()),
        }
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    pub fn latest_token(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Marks every in-flight request stale and blanks the surface. Used when
    /// the document handle is replaced.
    pub fn invalidate(&self) -> u64 {
        let token = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        *self.surface.lock() = Surface::default();
        token
    }

    /// Issues a token immediately and returns the future that performs the
    /// render. A later call supersedes this one even if this future has not
    /// been polled yet.
    pub fn render<'a>(
        &'a self,
        document: &'a dyn DocumentSource,
        page: usize,
        scale: f32,
    ) -> impl Future<Output = Result<RenderOutcome>> + Send + 'a {
        let ticket = self.issue(page, scale);
        async move { self.execute(document, ticket).await }
    }

    pub fn snapshot(&self) -> Surface {
        self.surface.lock().clone()
    }

    pub fn with_surface<R>(&self, f: impl FnOnce(&Surface) -> R) -> R {
        f(&self.surface.lock())
    }

    fn issue(&self, page: usize, scale: f32) -> RenderTicket {
        let token = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        RenderTicket { token, page, scale }
    }

    fn is_stale(&self, ticket: &RenderTicket) -> bool {
        self.latest.load(Ordering::SeqCst) != ticket.token
    }

    #[instrument(skip(self, document), fields(token = ticket.token, page = ticket.page, scale = ticket.scale))]
    async fn execute(
        &self,
        document: &dyn DocumentSource,
        ticket: RenderTicket,
    ) -> Result<RenderOutcome> {
        let page_count = document.page_count();
        if ticket.page == 0 || ticket.page > page_count {
            return Err(ViewerError::InvalidPage {
                page: ticket.page,
                page_count,
            });
        }
        if !(ticket.scale.is_finite() && ticket.scale > 0.0) {
            return Err(ViewerError::InvalidScale(ticket.scale));
        }

        match self.draw(document, &ticket).await {
            Ok(outcome) => Ok(outcome),
            Err(_) if self.is_stale(&ticket) => Ok(self.superseded(&ticket)),
            Err(err) => Err(err),
        }
    }

    async fn draw(
        &self,
        document: &dyn DocumentSource,
        ticket: &RenderTicket,
    ) -> Result<RenderOutcome> {
        let page = ticket.page;
        let geometry = document
            .page_geometry(page)
            .await
            .map_err(|source| ViewerError::Render { page, source })?;

        if self.is_stale(ticket) {
            return Ok(self.superseded(ticket));
        }

        let output_scale = self.device_pixel_ratio * ticket.scale;
        let raster = document
            .rasterize(page, output_scale)
            .await
            .map_err(|source| ViewerError::Render { page, source })?;

        let (backing_width, backing_height) = scaled_dimensions(&geometry, output_scale);
        let (css_width, css_height) = scaled_dimensions(&geometry, ticket.scale);
        let frame = Frame {
            token: ticket.token,
            page,
            scale: ticket.scale,
            device_pixel_ratio: self.device_pixel_ratio,
            geometry,
            css_width,
            css_height,
        };

        let mut surface = self.surface.lock();
        // Checked under the lock so a newer frame can never be overwritten.
        if self.is_stale(ticket) {
            return Ok(self.superseded(ticket));
        }
        surface.resize(backing_width, backing_height);
        surface.backing.blit(&raster);
        surface.frame = Some(frame.clone());
        Ok(RenderOutcome::Applied(frame))
    }

    fn superseded(&self, ticket: &RenderTicket) -> RenderOutcome {
        debug!(
            token = ticket.token,
            latest = self.latest_token(),
            page = ticket.page,
            "discarding stale render"
        );
        RenderOutcome::Superseded {
            token: ticket.token,
            page: ticket.page,
        }
    }
}

fn sanitize_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() && ratio > 0.0 {
        ratio
    } else {
        1.0
    }
}
