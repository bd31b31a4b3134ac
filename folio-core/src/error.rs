use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the viewer engine.
///
/// Only [`ViewerError::Load`] is fatal to a viewing session; every other
/// variant is recovered locally by the component that raised it.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("failed to open document {location}")]
    Load {
        location: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot display page {page}")]
    Render {
        page: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("text extraction failed on page {page}")]
    SearchPage {
        page: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("page {page} is outside 1..={page_count}")]
    InvalidPage { page: usize, page_count: usize },

    #[error("render scale must be positive, got {0}")]
    InvalidScale(f32),

    #[error("no document is loaded")]
    NoDocument,

    #[error("invalid configuration in {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("view state store failure")]
    State(#[source] anyhow::Error),
}

impl ViewerError {
    pub fn load(location: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Load {
            location: location.into(),
            source: source.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Load { .. })
    }
}

pub type Result<T> = std::result::Result<T, ViewerError>;
