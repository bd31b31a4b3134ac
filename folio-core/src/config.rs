use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, ViewerError};
use crate::viewport::ContainerBudget;

/// Viewer settings read from `config.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    pub device_pixel_ratio: f32,
    pub container_width: f32,
    pub container_height: f32,
    pub highlight_color: [u8; 3],
    pub highlight_alpha: f32,
    /// Reopen documents at the page and zoom they were closed with.
    pub restore_state: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let container = ContainerBudget::default();
        Self {
            device_pixel_ratio: 1.0,
            container_width: container.width,
            container_height: container.height,
            highlight_color: [255, 220, 0],
            highlight_alpha: 0.35,
            restore_state: true,
        }
    }
}

impl ViewerConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|err| ViewerError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|err| ViewerError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Ok(config.normalized())
    }

    /// Replaces unusable numeric values with their defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0) {
            warn!(value = self.device_pixel_ratio, "ignoring device_pixel_ratio");
            self.device_pixel_ratio = defaults.device_pixel_ratio;
        }
        if !(self.container_width.is_finite() && self.container_width > 0.0) {
            warn!(value = self.container_width, "ignoring container_width");
            self.container_width = defaults.container_width;
        }
        if !(self.container_height.is_finite() && self.container_height > 0.0) {
            warn!(value = self.container_height, "ignoring container_height");
            self.container_height = defaults.container_height;
        }
        if !self.highlight_alpha.is_finite() {
            self.highlight_alpha = defaults.highlight_alpha;
        }
        self.highlight_alpha = self.highlight_alpha.clamp(0.0, 1.0);
        self
    }

    pub fn container(&self) -> ContainerBudget {
        ContainerBudget {
            width: self.container_width,
            height: self.container_height,
        }
    }
}
