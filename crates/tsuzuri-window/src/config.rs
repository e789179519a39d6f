//! Pipeline configuration.
//!
//! Loaded from RON; every field has a default so a config file only names
//! what it changes:
//!
//! ```ron
//! (
//!     max_window: 300,
//!     land_timeout_ms: Some(2000),
//!     overlap_landings: true,
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::render::Style;
use crate::window::{MAX_WINDOW, WindowLoader, initial_page_size};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on window size.
    pub max_window: usize,
    /// Average item height used to size the first page.
    pub avg_item_height: f64,
    /// Smallest first page regardless of viewport.
    pub min_initial_count: usize,
    /// Delay between a submit and the tick that picks it up.
    pub tick_debounce_ms: u64,
    /// How often the land-safety predicate is polled.
    pub land_poll_interval_ms: u64,
    /// Give up waiting for land safety after this long. `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub land_timeout_ms: Option<u64>,
    /// Let a new landing start before the previous one completes.
    pub overlap_landings: bool,
    /// Capacity of the in-memory entry cache.
    pub cache_capacity: usize,
    /// Window for `did_load_older_recently` / `did_load_newer_recently`.
    pub recent_load_threshold_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_window: MAX_WINDOW,
            avg_item_height: 35.0,
            min_initial_count: 10,
            tick_debounce_ms: 1,
            land_poll_interval_ms: 1,
            land_timeout_ms: None,
            overlap_landings: false,
            cache_capacity: 1024,
            recent_load_threshold_ms: 2_000,
        }
    }
}

impl PipelineConfig {
    /// Parse from RON text and validate.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_ron_str(&text)
    }

    /// Serialize to pretty RON.
    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Invalid(format!("serialize: {e}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_window == 0 {
            return Err(ConfigError::Invalid("max_window must be positive".into()));
        }
        if self.max_window > MAX_WINDOW {
            return Err(ConfigError::Invalid(format!(
                "max_window {} exceeds the engine limit of {MAX_WINDOW}",
                self.max_window
            )));
        }
        if self.min_initial_count == 0 {
            return Err(ConfigError::Invalid("min_initial_count must be positive".into()));
        }
        if !(self.avg_item_height.is_finite() && self.avg_item_height > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "avg_item_height must be positive, got {}",
                self.avg_item_height
            )));
        }
        if self.land_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("land_poll_interval_ms must be positive".into()));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn with_max_window(mut self, max_window: usize) -> Self {
        self.max_window = max_window;
        self
    }

    pub fn with_overlap_landings(mut self, overlap: bool) -> Self {
        self.overlap_landings = overlap;
        self
    }

    pub fn with_land_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.land_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn tick_debounce(&self) -> Duration {
        Duration::from_millis(self.tick_debounce_ms)
    }

    pub fn land_poll_interval(&self) -> Duration {
        Duration::from_millis(self.land_poll_interval_ms.max(1))
    }

    pub fn land_timeout(&self) -> Option<Duration> {
        self.land_timeout_ms.map(Duration::from_millis)
    }

    pub fn recent_load_threshold(&self) -> Duration {
        Duration::from_millis(self.recent_load_threshold_ms)
    }

    /// First-page size for a viewport.
    pub fn initial_page_size(&self, style: &Style) -> usize {
        initial_page_size(
            style.viewport_width,
            style.viewport_height,
            self.avg_item_height,
            self.min_initial_count,
        )
        .min(self.max_window)
    }

    /// A loader sized for `style`.
    pub fn loader(&self, style: &Style) -> WindowLoader {
        WindowLoader::new(self.max_window, self.initial_page_size(style))
    }
}
