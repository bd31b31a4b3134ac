//! Document viewing engine: paging, zoom and fit, full-text search with
//! on-page highlights, and rendering into a single drawable surface.
//!
//! Backends plug in through [`DocumentOpener`] and [`DocumentSource`]; hosts
//! drive a [`Viewer`] and draw its [`Surface`] plus [`OverlayLayer`].

pub mod config;
pub mod document;
pub mod error;
pub mod geometry;
pub mod input;
pub mod overlay;
pub mod render;
pub mod search;
pub mod store;
pub mod viewer;
pub mod viewport;

pub use config::ViewerConfig;
pub use document::{
    document_id_for_bytes, document_id_for_path, DocumentGeneration, DocumentId, DocumentInfo,
    DocumentLocation, DocumentMetadata, DocumentOpener, DocumentSource, GlyphRun, PageGeometry,
    RasterImage,
};
pub use error::{Result, ViewerError};
pub use geometry::{map_matches, HighlightRect, CHAR_WIDTH_FACTOR};
pub use overlay::{HighlightOverlay, OverlayLayer};
pub use render::{Frame, RenderOutcome, RenderPipeline, Surface};
pub use search::{SearchIndexer, SearchMatch, SearchOutcome};
pub use store::{FileStateStore, MemoryStateStore, PersistedViewState, StateStore};
pub use viewer::{Viewer, ViewerStatus};
pub use viewport::{
    Action, ContainerBudget, FitMode, RenderRequest, ViewState, ViewportController,
    DEFAULT_ZOOM_PERCENT, MIN_ZOOM_PERCENT, ZOOM_STEP,
};
