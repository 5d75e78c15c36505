//! Pipeline configuration
//!
//! ```ignore
//! use spectra_core::config::{default_config_path, load_config, PipelineConfig};
//!
//! let config: PipelineConfig = load_config(&default_config_path(CONFIG_FILENAME));
//! let pipeline = SpectrogramPipeline::new(config.validate())?;
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sync::SyncTiming;
use crate::types::{CanvasScale, SpectrogramOptions, DEFAULT_RING_SEGMENTS, DEFAULT_SEGMENT_SIZE};

/// Default config file name
pub const CONFIG_FILENAME: &str = "config.yaml";

const MIN_SEGMENT_SIZE: usize = 256;
const MAX_SEGMENT_SIZE: usize = 1 << 20;
const MIN_RING_SEGMENTS: usize = 2;
const MAX_RING_SEGMENTS: usize = 64;
const MAX_POLL_INTERVAL_MS: u64 = 100;
const MIN_SYNC_TIMEOUT_MS: u64 = 100;

/// Settings for one [`crate::SpectrogramPipeline`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per ring segment
    pub segment_size: usize,
    /// Segments in the sample ring
    pub ring_segments: usize,
    /// How often async waits re-check the control region
    pub poll_interval_ms: u64,
    /// How long an async wait may take before failing
    pub sync_timeout_ms: u64,
    /// Scale used by `resize_canvas`
    pub default_scale: CanvasScale,
    /// Options used when the caller has none of its own (CLI)
    pub default_options: SpectrogramOptions,
    pub http_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            ring_segments: DEFAULT_RING_SEGMENTS,
            poll_interval_ms: 1,
            sync_timeout_ms: 30_000,
            default_scale: CanvasScale::Stretch,
            default_options: SpectrogramOptions::default(),
            http_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Clamp every field into its usable range
    pub fn validate(mut self) -> Self {
        let before = self.clone();

        self.segment_size = self.segment_size.clamp(MIN_SEGMENT_SIZE, MAX_SEGMENT_SIZE);
        self.ring_segments = self.ring_segments.clamp(MIN_RING_SEGMENTS, MAX_RING_SEGMENTS);
        self.poll_interval_ms = self.poll_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS);
        self.sync_timeout_ms = self.sync_timeout_ms.max(MIN_SYNC_TIMEOUT_MS);
        self.http_timeout_secs = self.http_timeout_secs.max(1);

        let options = &mut self.default_options;
        options.window_size = options.window_size.max(2);
        if options.window_overlap >= options.window_size {
            options.window_overlap = options.window_size - 1;
        }

        if self != before {
            log::warn!("Config values out of range were clamped");
        }
        self
    }

    pub fn timing(&self) -> SyncTiming {
        SyncTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.sync_timeout_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.segment_size, 41_100);
        assert_eq!(config.ring_segments, 4);
        assert_eq!(config.timing(), SyncTiming::default());
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = PipelineConfig {
            segment_size: 1,
            ring_segments: 1000,
            poll_interval_ms: 0,
            sync_timeout_ms: 5,
            ..Default::default()
        };
        config.default_options.window_size = 256;
        config.default_options.window_overlap = 300;

        let config = config.validate();
        assert_eq!(config.segment_size, MIN_SEGMENT_SIZE);
        assert_eq!(config.ring_segments, MAX_RING_SEGMENTS);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.sync_timeout_ms, MIN_SYNC_TIMEOUT_MS);
        assert_eq!(config.default_options.window_overlap, 255);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: PipelineConfig = serde_yaml::from_str("ring_segments: 6\ndefault_scale: natural\n").unwrap();
        assert_eq!(config.ring_segments, 6);
        assert_eq!(config.default_scale, CanvasScale::Natural);
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
    }
}
