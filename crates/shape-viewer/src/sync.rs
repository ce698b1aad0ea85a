//! Delta-based camera synchronization.
//!
//! Each viewport's camera is recorded when the grid is built. Moving one
//! camera produces a delta from its own baseline, and that delta is added to
//! every other viewport's baseline, so viewports that were framed differently
//! stay framed differently while moving together.

use crate::camera::CameraState;
use crate::error::{Result, ViewerError};
use crate::viewport::{Viewport, ViewportRegistry};
use glam::DVec3;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraDelta {
    pub position: DVec3,
    pub view_up: DVec3,
}

#[derive(Debug, Default)]
pub struct CameraSyncEngine {
    baselines: BTreeMap<String, CameraState>,
}

impl CameraSyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every registered camera as its viewport's baseline.
    pub fn capture_baseline(&mut self, registry: &ViewportRegistry) {
        self.baselines = registry
            .iter()
            .map(|v| (v.label().to_string(), v.renderer().active_camera().state()))
            .collect();
    }

    pub fn baseline(&self, label: &str) -> Option<&CameraState> {
        self.baselines.get(label)
    }

    /// Live camera minus baseline; `None` without a baseline.
    pub fn delta(&self, viewport: &Viewport) -> Option<CameraDelta> {
        let base = self.baselines.get(viewport.label())?;
        let live = viewport.renderer().active_camera().state();
        Some(CameraDelta {
            position: live.position - base.position,
            view_up: live.view_up - base.view_up,
        })
    }

    /// Sets the camera to baseline plus `delta` and resets clipping. Returns
    /// `false` when the viewport has no baseline.
    pub fn apply(&self, viewport: &mut Viewport, delta: &CameraDelta) -> bool {
        let Some(base) = self.baselines.get(viewport.label()).copied() else {
            return false;
        };
        let renderer = viewport.renderer_mut();
        let camera = renderer.active_camera_mut();
        camera.position = base.position + delta.position;
        camera.view_up = base.view_up + delta.view_up;
        renderer.reset_camera_clipping_range();
        true
    }

    /// Propagates the delta of `source` to every other viewport. Returns how
    /// many viewports were updated.
    pub fn sync_all(&self, registry: &mut ViewportRegistry, source: &str) -> Result<usize> {
        let viewport = registry
            .get(source)
            .ok_or_else(|| ViewerError::UnknownViewport(source.to_string()))?;
        let Some(delta) = self.delta(viewport) else {
            return Ok(0);
        };

        let mut updated = 0;
        for viewport in registry.iter_mut().filter(|v| v.label() != source) {
            if self.apply(viewport, &delta) {
                updated += 1;
            }
        }
        debug!("Synced {} camera(s) from {}", updated, source);
        Ok(updated)
    }

    pub fn clear(&mut self) {
        self.baselines.clear();
    }
}
