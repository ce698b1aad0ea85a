//! The rendering backend seen by the engine.
//!
//! Actors are plain data; a backend owns them, keeps a camera and knows how to
//! fit the camera to what it draws and how to pick a point under the cursor.

pub mod headless;

pub use self::headless::HeadlessRenderer;

use crate::camera::Camera;
use crate::geometry::{Bounds, SharedMesh, Volume};
use crate::slice::Axis;
use glam::DVec3;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

/// Maps a scalar in `[0, 1]` (or `range`) to a color.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupTable {
    /// 1 maps to `included`, 0 to `excluded`.
    Constraint { included: DVec3, excluded: DVec3 },
    /// Blue at `range[0]` through green to red at `range[1]`.
    Rainbow { range: [f64; 2] },
}

impl LookupTable {
    pub fn map(&self, value: f64) -> DVec3 {
        match self {
            LookupTable::Constraint { included, excluded } => {
                let t = value.clamp(0.0, 1.0);
                excluded.lerp(*included, t)
            }
            LookupTable::Rainbow { range } => {
                let span = range[1] - range[0];
                let t = if span.abs() > f64::EPSILON {
                    ((value - range[0]) / span).clamp(0.0, 1.0)
                } else {
                    0.5
                };
                hue_to_rgb((1.0 - t) * 2.0 / 3.0)
            }
        }
    }
}

/// Fully saturated color for hue `h` in `[0, 1)`.
fn hue_to_rgb(h: f64) -> DVec3 {
    let h6 = (h.rem_euclid(1.0)) * 6.0;
    let x = 1.0 - (h6 % 2.0 - 1.0).abs();
    match h6 as u32 {
        0 => DVec3::new(1.0, x, 0.0),
        1 => DVec3::new(x, 1.0, 0.0),
        2 => DVec3::new(0.0, 1.0, x),
        3 => DVec3::new(0.0, x, 1.0),
        4 => DVec3::new(x, 0.0, 1.0),
        _ => DVec3::new(1.0, 0.0, x),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorMapping {
    /// The actor's solid color.
    Solid,
    /// A named point array of the surface through a lookup table.
    PointArray { name: String, lookup: LookupTable },
}

/// Spheres at points, one color per point.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphSet {
    pub centers: Vec<DVec3>,
    pub colors: Vec<[u8; 3]>,
    pub scale: f64,
    /// Per-point visibility; slice filtering writes it.
    pub visible: Vec<bool>,
}

impl GlyphSet {
    pub fn new(centers: Vec<DVec3>, colors: Vec<[u8; 3]>, scale: f64) -> Self {
        let visible = vec![true; centers.len()];
        Self {
            centers,
            colors,
            scale,
            visible,
        }
    }

    pub fn visible_count(&self) -> usize {
        self.visible.iter().filter(|&&v| v).count()
    }
}

/// One axis-aligned slice through an image volume.
#[derive(Debug, Clone)]
pub struct SliceGeometry {
    pub volume: Rc<Volume>,
    pub axis: Axis,
    pub index: i64,
    pub window: f64,
    pub level: f64,
    /// Sub-extent actually drawn (the crop).
    pub display_extent: [[i64; 2]; 3],
}

impl SliceGeometry {
    pub fn bounds(&self) -> Bounds {
        let mut extent = self.display_extent;
        let a = self.axis.index();
        extent[a] = [self.index, self.index];
        self.volume.extent_bounds(extent)
    }
}

/// Arrows: an origin, a direction and a scalar for the lookup table each.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSet {
    pub origins: Vec<DVec3>,
    pub directions: Vec<DVec3>,
    pub values: Vec<f64>,
    pub scale: f64,
}

#[derive(Debug, Clone)]
pub enum ActorGeometry {
    Surface(SharedMesh),
    Glyphs(GlyphSet),
    ImageSlice(SliceGeometry),
    Vectors(VectorSet),
    /// Line segments, e.g. a surface cut by the slice plane.
    Segments(Vec<[DVec3; 2]>),
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub geometry: ActorGeometry,
    pub color: DVec3,
    pub opacity: f64,
    pub color_mapping: ColorMapping,
    pub pickable: bool,
    pub visible: bool,
    /// Layer the actor was built from.
    pub layer: Option<String>,
}

impl Actor {
    fn with_geometry(geometry: ActorGeometry, pickable: bool) -> Self {
        Self {
            geometry,
            color: DVec3::ONE,
            opacity: 1.0,
            color_mapping: ColorMapping::Solid,
            pickable,
            visible: true,
            layer: None,
        }
    }

    pub fn surface(mesh: SharedMesh) -> Self {
        Self::with_geometry(ActorGeometry::Surface(mesh), true)
    }

    pub fn glyphs(glyphs: GlyphSet) -> Self {
        Self::with_geometry(ActorGeometry::Glyphs(glyphs), false)
    }

    pub fn image_slice(slice: SliceGeometry) -> Self {
        Self::with_geometry(ActorGeometry::ImageSlice(slice), false)
    }

    pub fn vectors(vectors: VectorSet) -> Self {
        Self::with_geometry(ActorGeometry::Vectors(vectors), false)
    }

    pub fn segments(segments: Vec<[DVec3; 2]>) -> Self {
        Self::with_geometry(ActorGeometry::Segments(segments), false)
    }

    pub fn in_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn mesh(&self) -> Option<&SharedMesh> {
        match &self.geometry {
            ActorGeometry::Surface(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Domain field of the input surface, if any.
    pub fn domain(&self) -> Option<String> {
        self.mesh().and_then(|m| m.borrow().domain.clone())
    }

    pub fn bounds(&self) -> Bounds {
        match &self.geometry {
            ActorGeometry::Surface(mesh) => mesh.borrow().bounds(),
            ActorGeometry::Glyphs(glyphs) => {
                Bounds::from_points(&glyphs.centers).padded(glyphs.scale * 0.5)
            }
            ActorGeometry::ImageSlice(slice) => slice.bounds(),
            ActorGeometry::Vectors(vectors) => Bounds::from_points(&vectors.origins),
            ActorGeometry::Segments(segments) => Bounds::from_points(segments.iter().flatten()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickResult {
    pub actor: ActorId,
    pub position: DVec3,
    /// Closest vertex of the hit triangle.
    pub point_id: Option<usize>,
}

/// Operations the engine needs from a scene-graph renderer.
///
/// Screen positions are normalized to the renderer's own viewport, `(0, 0)`
/// bottom-left and `(1, 1)` top-right.
pub trait Renderer {
    fn add_actor(&mut self, actor: Actor) -> ActorId;
    fn remove_actor(&mut self, id: ActorId) -> Option<Actor>;
    fn actors(&self) -> Vec<ActorId>;
    fn actor(&self, id: ActorId) -> Option<&Actor>;
    fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor>;

    fn active_camera(&self) -> &Camera;
    fn active_camera_mut(&mut self) -> &mut Camera;
    fn set_active_camera(&mut self, camera: Camera);

    /// Nearest pickable surface under `(x, y)`. An empty `pick_list` allows
    /// every pickable actor.
    fn pick(&self, x: f64, y: f64, pick_list: &[ActorId]) -> Option<PickResult>;

    fn render(&mut self);

    fn viewport(&self) -> [f64; 4];
    fn set_viewport(&mut self, rect: [f64; 4]);
    fn set_background(&mut self, rgb: DVec3);

    /// Bounds of every visible actor.
    fn bounds(&self) -> Bounds {
        self.actors()
            .into_iter()
            .filter_map(|id| self.actor(id))
            .filter(|a| a.visible)
            .fold(Bounds::EMPTY, |acc, a| acc.union(&a.bounds()))
    }

    fn reset_camera(&mut self) {
        let bounds = self.bounds();
        self.active_camera_mut().reset_to_bounds(&bounds);
    }

    fn reset_camera_clipping_range(&mut self) {
        let bounds = self.bounds();
        self.active_camera_mut().reset_clipping_range(&bounds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_lookup_maps_binary_values() {
        let lut = LookupTable::Constraint {
            included: DVec3::ONE,
            excluded: DVec3::splat(0.5),
        };
        assert_eq!(lut.map(1.0), DVec3::ONE);
        assert_eq!(lut.map(0.0), DVec3::splat(0.5));
    }

    #[test]
    fn rainbow_runs_blue_to_red() {
        let lut = LookupTable::Rainbow { range: [0.0, 1.0] };
        assert_eq!(lut.map(0.0), DVec3::new(0.0, 0.0, 1.0));
        assert_eq!(lut.map(1.0), DVec3::new(1.0, 0.0, 0.0));
        assert!((lut.map(0.5) - DVec3::new(0.0, 1.0, 0.0)).length() < 1e-9);
    }
}
