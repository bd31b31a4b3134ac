//! Page-by-page full-text search over a document.

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::document::{DocumentGeneration, DocumentSource, GlyphRun};
use crate::error::ViewerError;

pub const SNIPPET_CHARS: usize = 100;
pub const SNIPPET_ELLIPSIS: &str = "...";

/// One entry per page that contains the query at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub page_number: usize,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Completed(Vec<SearchMatch>),
    /// The document handle was replaced while scanning; partial results dropped.
    Abandoned,
}

impl SearchOutcome {
    pub fn into_matches(self) -> Option<Vec<SearchMatch>> {
        match self {
            Self::Completed(matches) => Some(matches),
            Self::Abandoned => None,
        }
    }
}

/// Joins the runs of a page with single spaces, the text the query is tested against.
pub fn page_text(runs: &[GlyphRun]) -> String {
    runs.iter()
        .map(|run| run.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let mut head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        head.push_str(SNIPPET_ELLIPSIS);
    }
    head
}

pub struct SearchIndexer {
    generation: DocumentGeneration,
}

impl SearchIndexer {
    pub fn new(generation: DocumentGeneration) -> Self {
        Self { generation }
    }

    /// Scans pages 1..=N in order. Pages whose text cannot be extracted are
    /// logged and skipped. If the document generation moves away from
    /// `generation` during the scan the whole search is abandoned.
    #[instrument(skip(self, document), fields(pages = document.page_count()))]
    pub async fn search(
        &self,
        document: &dyn DocumentSource,
        generation: u64,
        query: &str,
    ) -> SearchOutcome {
        if query.trim().is_empty() {
            return SearchOutcome::Completed(Vec::new());
        }

        let needle = query.to_lowercase();
        let mut matches = Vec::new();

        for page in 1..=document.page_count() {
            if self.generation.current() != generation {
                debug!(page, "document replaced, abandoning search");
                return SearchOutcome::Abandoned;
            }

            let runs = match document.extract_text(page).await {
                Ok(runs) => runs,
                Err(source) => {
                    let err = ViewerError::SearchPage { page, source };
                    warn!(error = ?err, page, "skipping page in search");
                    continue;
                }
            };

            let text = page_text(&runs);
            if text.to_lowercase().contains(&needle) {
                matches.push(SearchMatch {
                    page_number: page,
                    snippet: snippet(&text),
                });
            }
        }

        if self.generation.current() != generation {
            debug!("document replaced after final page, abandoning search");
            return SearchOutcome::Abandoned;
        }

        debug!(hits = matches.len(), "search finished");
        SearchOutcome::Completed(matches)
    }
}
