//! Engine settings, loadable from JSON.

use crate::annotation::PaintMode;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Every tunable of the engine. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Quiet period of the coalescing subscriptions.
    pub quiet_period_ms: u64,
    /// Particles with an angular deviation below this are "good".
    pub good_bad_max_angle_deg: f64,
    /// World-space radius painted around every trail point.
    pub paint_radius: f64,
    pub paint_mode: PaintMode,
    pub landmark_size: f64,
    pub glyph_size: f64,
    /// Fraction of the volume extent added on each side of a crop.
    pub crop_padding: f64,
    /// Iso-value used when extracting surfaces from segmentations.
    pub contour_value: f64,
    pub background: [f64; 3],
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1000,
            good_bad_max_angle_deg: 45.0,
            paint_radius: 5.0,
            paint_mode: PaintMode::Exclude,
            landmark_size: 2.0,
            glyph_size: 1.5,
            crop_padding: 0.01,
            contour_value: 0.001,
            background: [0.115, 0.115, 0.115],
        }
    }
}

impl ViewerConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    #[inline]
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}
