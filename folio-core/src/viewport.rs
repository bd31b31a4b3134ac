//! Navigation, zoom, fit and search state, mutated only through
//! [`ViewportController`].
//!
//! Mutations that change what the surface must show (page, zoom, search term)
//! mark a render as pending. Any number of mutations between two calls to
//! [`ViewportController::take_render_request`] collapse into one request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::PageGeometry;
use crate::search::SearchMatch;
use crate::store::PersistedViewState;

pub const ZOOM_STEP: u32 = 25;
pub const MIN_ZOOM_PERCENT: u32 = 10;
pub const DEFAULT_ZOOM_PERCENT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    Page,
    Width,
    #[default]
    None,
}

impl FitMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Page => "fit page",
            Self::Width => "fit width",
            Self::None => "manual",
        }
    }
}

/// Area, in css pixels, that the fit strategies size the page against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerBudget {
    pub width: f32,
    pub height: f32,
}

impl Default for ContainerBudget {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    current_page: usize,
    zoom_percent: u32,
    fit_mode: FitMode,
    search_term: String,
    search_matches: Vec<SearchMatch>,
    active_match_index: Option<usize>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            current_page: 1,
            zoom_percent: DEFAULT_ZOOM_PERCENT,
            fit_mode: FitMode::None,
            search_term: String::new(),
            search_matches: Vec::new(),
            active_match_index: None,
        }
    }
}

impl ViewState {
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn zoom_percent(&self) -> u32 {
        self.zoom_percent
    }

    pub fn scale(&self) -> f32 {
        self.zoom_percent as f32 / 100.0
    }

    pub fn fit_mode(&self) -> FitMode {
        self.fit_mode
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn search_matches(&self) -> &[SearchMatch] {
        &self.search_matches
    }

    pub fn active_match_index(&self) -> Option<usize> {
        self.active_match_index
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page: usize,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTicket {
    pub token: u64,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetPage { page: i64 },
    NextPage { count: usize },
    PrevPage { count: usize },
    ZoomIn,
    ZoomOut,
    SetZoom { percent: i64 },
    FitToPage,
    FitToWidth,
    ToggleFitMode,
    NextMatch,
    PrevMatch,
    ClearSearch,
}

pub struct ViewportController {
    state: ViewState,
    page_count: usize,
    container: ContainerBudget,
    geometry: HashMap<usize, PageGeometry>,
    render_pending: bool,
    search_token: u64,
}

impl ViewportController {
    pub fn new(page_count: usize, container: ContainerBudget) -> Self {
        Self {
            state: ViewState::default(),
            page_count,
            container,
            geometry: HashMap::new(),
            // The first frame has to be drawn.
            render_pending: true,
            search_token: 0,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn container(&self) -> ContainerBudget {
        self.container
    }

    pub fn set_container(&mut self, container: ContainerBudget) {
        self.container = container;
    }

    pub fn record_geometry(&mut self, geometry: PageGeometry) {
        self.geometry.insert(geometry.page_number, geometry);
    }

    pub fn render_pending(&self) -> bool {
        self.render_pending
    }

    /// Returns the single render owed for every mutation since the last call.
    pub fn take_render_request(&mut self) -> Option<RenderRequest> {
        if !std::mem::take(&mut self.render_pending) {
            return None;
        }
        if self.page_count == 0 {
            return None;
        }
        Some(RenderRequest {
            page: self.state.current_page,
            scale: self.state.scale(),
        })
    }

    pub fn apply(&mut self, action: Action) {
        match action {
            Action::SetPage { page } => self.set_page(page),
            Action::NextPage { count } => {
                self.set_page(self.state.current_page as i64 + count.max(1) as i64)
            }
            Action::PrevPage { count } => {
                self.set_page(self.state.current_page as i64 - count.max(1) as i64)
            }
            Action::ZoomIn => self.zoom_in(),
            Action::ZoomOut => self.zoom_out(),
            Action::SetZoom { percent } => self.set_zoom_direct(percent),
            Action::FitToPage => self.fit_to_page(),
            Action::FitToWidth => self.fit_to_width(),
            Action::ToggleFitMode => self.toggle_fit_mode(),
            Action::NextMatch => self.next_match(),
            Action::PrevMatch => self.prev_match(),
            Action::ClearSearch => self.clear_search(),
        }
    }

    /// Moves to `page`, clamped into `1..=N`.
    pub fn set_page(&mut self, page: i64) {
        let last = self.page_count.max(1) as i64;
        let next = page.clamp(1, last) as usize;
        if next != self.state.current_page {
            self.state.current_page = next;
            self.render_pending = true;
        }
    }

    pub fn zoom_in(&mut self) {
        let next = self.state.zoom_percent.saturating_add(ZOOM_STEP);
        self.set_zoom(next, FitMode::None);
    }

    pub fn zoom_out(&mut self) {
        let next = self.state.zoom_percent.saturating_sub(ZOOM_STEP);
        self.set_zoom(next, FitMode::None);
    }

    /// Floors at [`MIN_ZOOM_PERCENT`]; there is no upper bound.
    pub fn set_zoom_direct(&mut self, percent: i64) {
        let percent = percent.clamp(MIN_ZOOM_PERCENT as i64, u32::MAX as i64) as u32;
        self.set_zoom(percent, FitMode::None);
    }

    pub fn fit_to_page(&mut self) {
        let Some(geometry) = self.fit_geometry() else {
            warn!("no page geometry known yet, cannot fit to page");
            return;
        };
        let scale = (self.container.width / geometry.natural_width)
            .min(self.container.height / geometry.natural_height);
        self.set_zoom(percent_for_scale(scale), FitMode::Page);
    }

    pub fn fit_to_width(&mut self) {
        let Some(geometry) = self.fit_geometry() else {
            warn!("no page geometry known yet, cannot fit to width");
            return;
        };
        let scale = self.container.width / geometry.natural_width;
        self.set_zoom(percent_for_scale(scale), FitMode::Width);
    }

    /// Alternates between the two fit strategies; manual zoom goes to `Page`.
    pub fn toggle_fit_mode(&mut self) {
        if self.state.fit_mode != FitMode::Page {
            self.fit_to_page();
        } else {
            self.fit_to_width();
        }
    }

    /// Records `query` as the active term and returns the ticket its results
    /// must present to [`Self::complete_search`]. Only the newest ticket is honoured.
    pub fn begin_search(&mut self, query: &str) -> SearchTicket {
        self.search_token += 1;
        if self.state.search_term != query {
            self.state.search_term = query.to_string();
            self.render_pending = true;
        }
        SearchTicket {
            token: self.search_token,
            query: query.to_string(),
        }
    }

    /// Installs search results, selects the first hit and navigates to it.
    /// Returns `false` when `token` belongs to an outdated search.
    pub fn complete_search(&mut self, token: u64, matches: Vec<SearchMatch>) -> bool {
        if token != self.search_token {
            debug!(token, latest = self.search_token, "dropping stale search results");
            return false;
        }
        self.state.search_matches = matches;
        self.state.active_match_index = if self.state.search_matches.is_empty() {
            None
        } else {
            Some(0)
        };
        if let Some(first) = self.state.search_matches.first() {
            let page = first.page_number as i64;
            self.set_page(page);
        }
        true
    }

    pub fn clear_search(&mut self) {
        self.search_token += 1;
        if !self.state.search_term.is_empty() {
            self.state.search_term.clear();
            self.render_pending = true;
        }
        self.state.search_matches.clear();
        self.state.active_match_index = None;
    }

    pub fn next_match(&mut self) {
        let total = self.state.search_matches.len();
        if total == 0 {
            return;
        }
        let next = match self.state.active_match_index {
            Some(index) => (index + 1) % total,
            None => 0,
        };
        self.activate_match(next);
    }

    pub fn prev_match(&mut self) {
        let total = self.state.search_matches.len();
        if total == 0 {
            return;
        }
        let prev = match self.state.active_match_index {
            Some(0) | None => total - 1,
            Some(index) => index - 1,
        };
        self.activate_match(prev);
    }

    /// Applies a persisted view through the normal clamping paths.
    pub fn restore(&mut self, persisted: &PersistedViewState) {
        self.set_page(persisted.current_page as i64);
        match persisted.fit_mode {
            FitMode::Page => self.fit_to_page(),
            FitMode::Width => self.fit_to_width(),
            FitMode::None => self.set_zoom_direct(persisted.zoom_percent as i64),
        }
        // A fit needs geometry; fall back to the stored zoom when it is missing.
        if self.state.fit_mode != persisted.fit_mode {
            self.set_zoom_direct(persisted.zoom_percent as i64);
        }
    }

    pub fn persisted(&self) -> PersistedViewState {
        PersistedViewState {
            current_page: self.state.current_page,
            zoom_percent: self.state.zoom_percent,
            fit_mode: self.state.fit_mode,
        }
    }

    fn activate_match(&mut self, index: usize) {
        self.state.active_match_index = Some(index);
        let page = self.state.search_matches[index].page_number as i64;
        self.set_page(page);
    }

    fn set_zoom(&mut self, percent: u32, fit_mode: FitMode) {
        let percent = percent.max(MIN_ZOOM_PERCENT);
        self.state.fit_mode = fit_mode;
        if percent != self.state.zoom_percent {
            self.state.zoom_percent = percent;
            self.render_pending = true;
        }
    }

    fn fit_geometry(&self) -> Option<PageGeometry> {
        self.geometry
            .get(&self.state.current_page)
            .or_else(|| self.geometry.get(&1))
            .or_else(|| self.geometry.values().next())
            .copied()
            .filter(|g| g.natural_width > 0.0 && g.natural_height > 0.0)
    }
}

fn percent_for_scale(scale: f32) -> u32 {
    let percent = (scale * 100.0).round();
    if !percent.is_finite() || percent < MIN_ZOOM_PERCENT as f32 {
        MIN_ZOOM_PERCENT
    } else if percent > u32::MAX as f32 {
        u32::MAX
    } else {
        percent as u32
    }
}
