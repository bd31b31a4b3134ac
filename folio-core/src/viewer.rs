use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::ViewerConfig;
use crate::document::{DocumentGeneration, DocumentLocation, DocumentOpener, DocumentSource};
use crate::error::{Result, ViewerError};
use crate::input::{parse_page_entry, parse_zoom_entry};
use crate::overlay::{HighlightOverlay, OverlayLayer};
use crate::render::{RenderOutcome, RenderPipeline, Surface};
use crate::search::{SearchIndexer, SearchOutcome};
use crate::store::{PersistedViewState, StateStore};
use crate::viewport::{Action, ContainerBudget, FitMode, ViewState, ViewportController};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerStatus {
    Empty,
    Loading,
    Ready,
    /// The document could not be opened; [`Viewer::retry`] tries again.
    Failed { message: String },
}

/// One viewer instance: a single live document, its view state, the drawable
/// surface and the highlight layer over it.
pub struct Viewer {
    opener: Arc<dyn DocumentOpener>,
    config: ViewerConfig,
    store: Option<Arc<dyn StateStore>>,
    location: Option<DocumentLocation>,
    document: Option<Arc<dyn DocumentSource>>,
    generation: DocumentGeneration,
    status: ViewerStatus,
    controller: Option<ViewportController>,
    pipeline: RenderPipeline,
    overlay: HighlightOverlay,
    indexer: SearchIndexer,
    page_error: Option<String>,
}

impl Viewer {
    pub fn new(opener: Arc<dyn DocumentOpener>, config: ViewerConfig) -> Self {
        let config = config.normalized();
        let generation = DocumentGeneration::default();
        Self {
            opener,
            store: None,
            location: None,
            document: None,
            status: ViewerStatus::Empty,
            controller: None,
            pipeline: RenderPipeline::new(config.device_pixel_ratio),
            overlay: HighlightOverlay::new(config.highlight_color, config.highlight_alpha),
            indexer: SearchIndexer::new(generation.clone()),
            generation,
            page_error: None,
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn status(&self) -> &ViewerStatus {
        &self.status
    }

    pub fn location(&self) -> Option<&DocumentLocation> {
        self.location.as_ref()
    }

    pub fn document(&self) -> Option<&Arc<dyn DocumentSource>> {
        self.document.as_ref()
    }

    pub fn state(&self) -> Option<&ViewState> {
        self.controller.as_ref().map(ViewportController::state)
    }

    pub fn controller(&self) -> Option<&ViewportController> {
        self.controller.as_ref()
    }

    pub fn page_count(&self) -> usize {
        self.document
            .as_ref()
            .map(|doc| doc.page_count())
            .unwrap_or(0)
    }

    /// Inline message for a page that failed to rasterize.
    pub fn page_error(&self) -> Option<&str> {
        self.page_error.as_deref()
    }

    pub fn surface(&self) -> Surface {
        self.pipeline.snapshot()
    }

    pub fn overlay(&self) -> &HighlightOverlay {
        &self.overlay
    }

    /// Highlight layer for the frame on the surface, or `None` when there is
    /// nothing to highlight or the highlights belong to another scale/page.
    pub fn overlay_layer(&self) -> Option<OverlayLayer> {
        if self.overlay.rects().is_empty() {
            return None;
        }
        self.pipeline.with_surface(|surface| {
            let frame = surface.frame()?;
            if !self
                .overlay
                .is_valid_for(frame.page, frame.scale, frame.device_pixel_ratio)
            {
                return None;
            }
            let image = surface.image();
            Some(self.overlay.layer(image.width, image.height))
        })
    }

    /// Opens `location`, replacing any current document.
    #[instrument(skip_all, fields(location = %location))]
    pub async fn open(&mut self, location: DocumentLocation) -> Result<()> {
        if let Err(err) = self.persist() {
            warn!(error = ?err, "failed to persist view state before switching documents");
        }

        self.generation.advance();
        self.pipeline.invalidate();
        self.overlay.clear();
        self.document = None;
        self.controller = None;
        self.page_error = None;
        self.status = ViewerStatus::Loading;
        self.location = Some(location.clone());

        let document = match self.opener.open(&location).await {
            Ok(document) => document,
            Err(source) => {
                let message = format!("{source:#}");
                let err = ViewerError::load(location.to_string(), source);
                warn!(error = ?err, "document failed to load");
                self.status = ViewerStatus::Failed { message };
                return Err(err);
            }
        };

        let page_count = document.page_count();
        let mut controller = ViewportController::new(page_count, self.config.container());
        if page_count > 0 {
            match document.page_geometry(1).await {
                Ok(geometry) => controller.record_geometry(geometry),
                Err(err) => warn!(error = ?err, "first page geometry unavailable"),
            }
        }

        if self.config.restore_state {
            if let Some(store) = &self.store {
                match store.load(document.info().id) {
                    Ok(Some(persisted)) => controller.restore(&persisted),
                    Ok(None) => {}
                    Err(err) => warn!(error = ?err, "ignoring unreadable view state"),
                }
            }
        }

        info!(pages = page_count, "document opened");
        self.controller = Some(controller);
        self.document = Some(document);
        self.status = ViewerStatus::Ready;
        Ok(())
    }

    /// Re-opens the last location after a failed load.
    pub async fn retry(&mut self) -> Result<()> {
        let location = self.location.clone().ok_or(ViewerError::NoDocument)?;
        self.open(location).await
    }

    /// Updates the area fit strategies size against and re-applies an active
    /// fit mode.
    pub fn set_container(&mut self, container: ContainerBudget) {
        self.config.container_width = container.width;
        self.config.container_height = container.height;
        let Some(controller) = self.controller.as_mut() else {
            return;
        };
        controller.set_container(container);
        match controller.state().fit_mode() {
            FitMode::Page => controller.fit_to_page(),
            FitMode::Width => controller.fit_to_width(),
            FitMode::None => {}
        }
    }

    pub fn apply(&mut self, action: Action) -> Result<()> {
        self.controller_mut()?.apply(action);
        Ok(())
    }

    /// Commits the page-jump field. Invalid entries are ignored; the returned
    /// text is what the field should show afterwards.
    pub fn commit_page_field(&mut self, text: &str) -> Result<String> {
        let controller = self.controller_mut()?;
        if let Some(page) = parse_page_entry(text, controller.page_count()) {
            controller.set_page(page as i64);
        }
        Ok(controller.state().current_page().to_string())
    }

    pub fn commit_zoom_field(&mut self, text: &str) -> Result<String> {
        let controller = self.controller_mut()?;
        controller.set_zoom_direct(parse_zoom_entry(text) as i64);
        Ok(controller.state().zoom_percent().to_string())
    }

    /// Runs the search, then installs its results unless a newer search or a
    /// document change overtook it. Returns the number of matching pages.
    /// A blank query clears the active search.
    #[instrument(skip(self))]
    pub async fn search(&mut self, query: &str) -> Result<usize> {
        let document = self.document.clone().ok_or(ViewerError::NoDocument)?;
        if query.trim().is_empty() {
            self.controller_mut()?.clear_search();
            return Ok(0);
        }
        let generation = self.generation.current();
        let ticket = self.controller_mut()?.begin_search(query);

        let outcome = self
            .indexer
            .search(document.as_ref(), generation, &ticket.query)
            .await;

        match outcome {
            SearchOutcome::Completed(matches) => {
                let total = matches.len();
                if self.generation.current() == generation {
                    if let Some(controller) = self.controller.as_mut() {
                        controller.complete_search(ticket.token, matches);
                    }
                }
                Ok(total)
            }
            SearchOutcome::Abandoned => Ok(0),
        }
    }

    /// Performs the render owed for the mutations since the last refresh, and
    /// recomputes highlights for the new frame.
    pub async fn refresh(&mut self) -> Result<Option<RenderOutcome>> {
        let Some(document) = self.document.clone() else {
            return Ok(None);
        };
        let Some(request) = self.controller.as_mut().and_then(|c| c.take_render_request())
        else {
            return Ok(None);
        };

        let outcome = match self
            .pipeline
            .render(document.as_ref(), request.page, request.scale)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = ?err, page = request.page, "render failed");
                self.page_error = Some(err.to_string());
                return Err(err);
            }
        };

        if let RenderOutcome::Applied(frame) = &outcome {
            self.page_error = None;
            if let Some(controller) = self.controller.as_mut() {
                controller.record_geometry(frame.geometry);
            }

            let term = self
                .state()
                .map(|state| state.search_term().to_string())
                .unwrap_or_default();
            if term.is_empty() {
                self.overlay.clear();
            } else {
                match document.extract_text(frame.page).await {
                    Ok(runs) => self.overlay.refresh(
                        frame.page,
                        &runs,
                        &term,
                        frame.geometry.natural_height,
                        frame.scale,
                        frame.device_pixel_ratio,
                    ),
                    Err(source) => {
                        let err = ViewerError::SearchPage {
                            page: frame.page,
                            source,
                        };
                        warn!(error = ?err, "highlights unavailable for page");
                        self.overlay.clear();
                    }
                }
            }
        } else {
            debug!("render superseded");
        }

        Ok(Some(outcome))
    }

    /// `"current/total"` for the results counter; `0/total` with nothing active.
    pub fn results_counter(&self) -> String {
        match self.state() {
            Some(state) => {
                let total = state.search_matches().len();
                let current = state.active_match_index().map(|i| i + 1).unwrap_or(0);
                format!("{current}/{total}")
            }
            None => "0/0".to_string(),
        }
    }

    pub fn download_target(&self) -> Option<&DocumentLocation> {
        self.location.as_ref()
    }

    pub fn persisted_state(&self) -> Option<PersistedViewState> {
        self.controller.as_ref().map(ViewportController::persisted)
    }

    pub fn persist(&self) -> Result<()> {
        let (Some(store), Some(document), Some(state)) =
            (&self.store, &self.document, self.persisted_state())
        else {
            return Ok(());
        };
        store
            .save(document.info().id, &state)
            .map_err(ViewerError::State)
    }

    fn controller_mut(&mut self) -> Result<&mut ViewportController> {
        self.controller.as_mut().ok_or(ViewerError::NoDocument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use parking_lot::Mutex;

    use crate::search::tests::TextDocument;
    use crate::store::MemoryStateStore;

    /// Hands out prepared documents by label; unknown labels fail to open.
    #[derive(Default)]
    struct FixtureOpener {
        documents: Mutex<HashMap<String, Arc<TextDocument>>>,
        attempts: AtomicUsize,
        fail_first: usize,
    }

    impl FixtureOpener {
        fn with(label: &str, document: TextDocument) -> Self {
            let opener = Self::default();
            opener
                .documents
                .lock()
                .insert(label.to_string(), Arc::new(document));
            opener
        }
    }

    #[async_trait::async_trait]
    impl DocumentOpener for FixtureOpener {
        async fn open(
            &self,
            location: &DocumentLocation,
        ) -> anyhow::Result<Arc<dyn DocumentSource>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(anyhow!("connection reset"));
            }
            let document: Arc<dyn DocumentSource> = self
                .documents
                .lock()
                .get(&location.label())
                .cloned()
                .ok_or_else(|| anyhow!("no such document"))?;
            Ok(document)
        }
    }

    fn tokyo() -> TextDocument {
        TextDocument::new(6)
            .with_text(1, "Osaka")
            .with_text(2, "tokyo tower")
            .with_text(4, "Kyoto")
            .with_text(5, "Old TOKYO")
    }

    fn location(label: &str) -> DocumentLocation {
        DocumentLocation::from_bytes(label, Vec::<u8>::new())
    }

    async fn ready_viewer() -> Viewer {
        viewer_for("tokyo.pdf", tokyo()).await
    }

    async fn viewer_for(label: &str, document: TextDocument) -> Viewer {
        let opener = Arc::new(FixtureOpener::with(label, document));
        let mut viewer = Viewer::new(opener, ViewerConfig::default());
        viewer.open(location(label)).await.unwrap();
        viewer
    }

    #[tokio::test]
    async fn open_draws_first_page_on_refresh() {
        let mut viewer = ready_viewer().await;
        assert_eq!(viewer.status(), &ViewerStatus::Ready);
        assert_eq!(viewer.page_count(), 6);

        let outcome = viewer.refresh().await.unwrap();
        assert!(matches!(outcome, Some(RenderOutcome::Applied(_))));
        assert_eq!(viewer.surface().frame().unwrap().page, 1);
        assert!(viewer.refresh().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_navigates_to_first_hit() {
        let mut viewer = ready_viewer().await;
        let hits = viewer.search("tokyo").await.unwrap();
        assert_eq!(hits, 2);

        let state = viewer.state().unwrap();
        let pages: Vec<_> = state.search_matches().iter().map(|m| m.page_number).collect();
        assert_eq!(pages, vec![2, 5]);
        assert_eq!(state.active_match_index(), Some(0));
        assert_eq!(state.current_page(), 2);
        assert_eq!(viewer.results_counter(), "1/2");
    }

    #[tokio::test]
    async fn repeated_search_is_idempotent() {
        let mut viewer = ready_viewer().await;
        viewer.search("tokyo").await.unwrap();
        let first = viewer.state().unwrap().search_matches().to_vec();
        viewer.search("tokyo").await.unwrap();
        assert_eq!(viewer.state().unwrap().search_matches(), first.as_slice());
    }

    #[tokio::test]
    async fn highlights_follow_the_rendered_frame() {
        let mut viewer = ready_viewer().await;
        viewer.search("tokyo").await.unwrap();
        viewer.refresh().await.unwrap();

        assert_eq!(viewer.overlay().rects().len(), 1);
        assert!(viewer.overlay_layer().is_some());

        viewer.apply(Action::ZoomIn).unwrap();
        // Scale changed but not yet rendered: old highlights must not be shown.
        assert!(viewer.overlay().is_valid_for(2, 1.0, 1.0));
        viewer.refresh().await.unwrap();
        assert!(viewer.overlay().is_valid_for(2, 1.25, 1.0));
        assert!(viewer.overlay_layer().is_some());
    }

    #[tokio::test]
    async fn clearing_search_drops_highlights() {
        let mut viewer = ready_viewer().await;
        viewer.search("tokyo").await.unwrap();
        viewer.refresh().await.unwrap();
        viewer.apply(Action::ClearSearch).unwrap();
        viewer.refresh().await.unwrap();

        assert!(viewer.overlay().rects().is_empty());
        assert!(viewer.overlay_layer().is_none());
        assert_eq!(viewer.results_counter(), "0/0");
    }

    #[tokio::test]
    async fn blank_query_clears_the_active_search() {
        let mut viewer = ready_viewer().await;
        viewer.search("tokyo").await.unwrap();
        viewer.refresh().await.unwrap();
        assert!(viewer.overlay_layer().is_some());

        assert_eq!(viewer.search("   ").await.unwrap(), 0);
        viewer.refresh().await.unwrap();

        let state = viewer.state().unwrap();
        assert_eq!(state.search_term(), "");
        assert!(state.search_matches().is_empty());
        assert!(viewer.overlay().rects().is_empty());
        assert!(viewer.overlay_layer().is_none());
        assert_eq!(viewer.results_counter(), "0/0");
    }

    #[tokio::test]
    async fn blank_query_never_highlights_spaces() {
        let mut viewer =
            viewer_for("station.pdf", TextDocument::new(1).with_text(1, "Tokyo station and more"))
                .await;
        viewer.refresh().await.unwrap();

        assert_eq!(viewer.search(" ").await.unwrap(), 0);
        viewer.refresh().await.unwrap();

        assert_eq!(viewer.state().unwrap().search_term(), "");
        assert!(viewer.overlay().rects().is_empty());
        assert!(viewer.overlay_layer().is_none());
    }

    #[tokio::test]
    async fn broken_page_shows_inline_error_and_keeps_last_frame() {
        let mut viewer = viewer_for("broken.pdf", TextDocument::new(3).unrenderable_on(2)).await;
        viewer.refresh().await.unwrap();
        assert_eq!(viewer.surface().frame().unwrap().page, 1);

        viewer.apply(Action::SetPage { page: 2 }).unwrap();
        let err = viewer.refresh().await.unwrap_err();
        assert!(matches!(err, ViewerError::Render { page: 2, .. }));
        assert!(!err.is_fatal());
        assert!(viewer.page_error().is_some());
        assert_eq!(viewer.status(), &ViewerStatus::Ready);
        assert_eq!(viewer.surface().frame().unwrap().page, 1);

        // Controls stay usable while the page is broken.
        viewer.apply(Action::ZoomIn).unwrap();
        assert_eq!(viewer.state().unwrap().zoom_percent(), 125);
        viewer.apply(Action::SetPage { page: 3 }).unwrap();

        let outcome = viewer.refresh().await.unwrap();
        assert!(matches!(outcome, Some(RenderOutcome::Applied(_))));
        assert!(viewer.page_error().is_none());
        assert_eq!(viewer.surface().frame().unwrap().page, 3);
    }

    #[tokio::test]
    async fn highlight_extraction_failure_clears_overlay_only() {
        let document = TextDocument::new(3)
            .with_text(2, "tokyo tower")
            .with_text(3, "tokyo bay")
            .failing_on(3);
        let mut viewer = viewer_for("partial.pdf", document).await;
        assert_eq!(viewer.search("tokyo").await.unwrap(), 1);
        viewer.refresh().await.unwrap();
        assert!(viewer.overlay_layer().is_some());

        viewer.apply(Action::SetPage { page: 3 }).unwrap();
        let outcome = viewer.refresh().await.unwrap();

        assert!(matches!(outcome, Some(RenderOutcome::Applied(_))));
        assert_eq!(viewer.surface().frame().unwrap().page, 3);
        assert!(viewer.overlay().rects().is_empty());
        assert!(viewer.overlay_layer().is_none());
        assert!(viewer.page_error().is_none());
        assert_eq!(viewer.results_counter(), "1/1");
    }

    #[tokio::test]
    async fn resizing_the_container_refits() {
        let mut viewer = ready_viewer().await;
        viewer.apply(Action::FitToWidth).unwrap();
        viewer.set_container(ContainerBudget {
            width: 612.0,
            height: 400.0,
        });
        assert_eq!(viewer.state().unwrap().zoom_percent(), 100);
        assert_eq!(viewer.state().unwrap().fit_mode(), FitMode::Width);

        viewer.apply(Action::SetZoom { percent: 250 }).unwrap();
        viewer.set_container(ContainerBudget::default());
        assert_eq!(viewer.state().unwrap().zoom_percent(), 250);
    }

    #[tokio::test]
    async fn load_failure_offers_retry() {
        let mut opener = FixtureOpener::with("tokyo.pdf", tokyo());
        opener.fail_first = 1;
        let mut viewer = Viewer::new(Arc::new(opener), ViewerConfig::default());

        let err = viewer.open(location("tokyo.pdf")).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(viewer.status(), ViewerStatus::Failed { .. }));
        assert!(viewer.state().is_none());

        viewer.retry().await.unwrap();
        assert_eq!(viewer.status(), &ViewerStatus::Ready);
    }

    #[tokio::test]
    async fn page_field_ignores_invalid_entries() {
        let mut viewer = ready_viewer().await;
        assert_eq!(viewer.commit_page_field("4").unwrap(), "4");
        assert_eq!(viewer.commit_page_field("40").unwrap(), "4");
        assert_eq!(viewer.commit_page_field("four").unwrap(), "4");
        assert_eq!(viewer.commit_zoom_field("abc").unwrap(), "100");
        assert_eq!(viewer.commit_zoom_field("3").unwrap(), "10");
    }

    #[tokio::test]
    async fn actions_without_document_report_no_document() {
        let opener = Arc::new(FixtureOpener::default());
        let mut viewer = Viewer::new(opener, ViewerConfig::default());
        assert!(matches!(
            viewer.apply(Action::ZoomIn),
            Err(ViewerError::NoDocument)
        ));
        assert!(viewer.refresh().await.unwrap().is_none());
        assert_eq!(viewer.results_counter(), "0/0");
    }

    #[tokio::test]
    async fn view_state_is_restored_on_reopen() {
        let opener = Arc::new(FixtureOpener::with("tokyo.pdf", tokyo()));
        let store = Arc::new(MemoryStateStore::new());
        let mut viewer =
            Viewer::new(opener.clone(), ViewerConfig::default()).with_store(store.clone());
        viewer.open(location("tokyo.pdf")).await.unwrap();
        viewer.apply(Action::SetPage { page: 4 }).unwrap();
        viewer.apply(Action::FitToWidth).unwrap();
        viewer.persist().unwrap();

        let mut reopened = Viewer::new(opener, ViewerConfig::default()).with_store(store);
        reopened.open(location("tokyo.pdf")).await.unwrap();
        let state = reopened.state().unwrap();
        assert_eq!(state.current_page(), 4);
        assert_eq!(state.fit_mode(), FitMode::Width);
        assert!(state.search_term().is_empty());
    }
}
