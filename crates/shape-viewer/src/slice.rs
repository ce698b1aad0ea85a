//! Image slice state shared by every viewport that shows a volume.
//!
//! The controller owns the active axis, window/level and the crop and
//! intersect toggles. Each viewport with an image keeps its own slice indices
//! and index ranges, since volumes of different subjects need not share an
//! extent. Cut filters intersect the viewport's surfaces with the current
//! slice plane and are only recomputed when marked stale.

use crate::backend::{Actor, ActorGeometry, ActorId, Renderer, SliceGeometry};
use crate::error::ViewerError;
use crate::geometry::{Bounds, SharedMesh, Volume};
use crate::viewport::ViewportRegistry;
use glam::DVec3;
use log::debug;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Axis {
    X,
    Y,
    #[default]
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn unit(self) -> DVec3 {
        match self {
            Axis::X => DVec3::X,
            Axis::Y => DVec3::Y,
            Axis::Z => DVec3::Z,
        }
    }

    /// View-up used when looking straight down this axis.
    pub fn view_up(self) -> DVec3 {
        match self {
            Axis::X | Axis::Z => DVec3::Y,
            Axis::Y => DVec3::NEG_Z,
        }
    }

    /// Slicing mode letter of the image mapper.
    pub fn slicing_mode(self) -> char {
        match self {
            Axis::X => 'I',
            Axis::Y => 'J',
            Axis::Z => 'K',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(s)
    }
}

/// Accepts `X`/`Y`/`Z` and the anatomical aliases `L`/`P`/`S`.
impl FromStr for Axis {
    type Err = ViewerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "X" | "L" => Ok(Axis::X),
            "Y" | "P" => Ok(Axis::Y),
            "Z" | "S" => Ok(Axis::Z),
            _ => Err(ViewerError::InvalidAxis(s.to_string())),
        }
    }
}

/// Cuts a surface with a plane into line segments.
#[derive(Debug)]
pub struct CutFilter {
    mesh: SharedMesh,
    origin: DVec3,
    normal: DVec3,
    output_actor: ActorId,
    stale: bool,
    output: Vec<[DVec3; 2]>,
}

impl CutFilter {
    fn new(mesh: SharedMesh, output_actor: ActorId) -> Self {
        Self {
            mesh,
            origin: DVec3::ZERO,
            normal: DVec3::Z,
            output_actor,
            stale: true,
            output: Vec::new(),
        }
    }

    pub fn set_plane(&mut self, origin: DVec3, normal: DVec3) {
        self.origin = origin;
        self.normal = normal;
        self.stale = true;
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    #[inline]
    pub fn output_actor(&self) -> ActorId {
        self.output_actor
    }

    /// Recomputes the segments if stale; returns the current output.
    pub fn update(&mut self) -> &[[DVec3; 2]] {
        if self.stale {
            self.output = cut_segments(&self.mesh.borrow(), self.origin, self.normal);
            self.stale = false;
        }
        &self.output
    }
}

fn cut_segments(mesh: &crate::geometry::Mesh, origin: DVec3, normal: DVec3) -> Vec<[DVec3; 2]> {
    let mut segments = Vec::new();
    for ti in 0..mesh.triangles.len() {
        let Some(tri) = mesh.triangle(ti) else {
            continue;
        };
        let d = tri.map(|p| normal.dot(p - origin));
        let mut hits = Vec::with_capacity(2);
        for (a, b) in [(0, 1), (1, 2), (2, 0)] {
            if (d[a] > 0.0) != (d[b] > 0.0) {
                let t = d[a] / (d[a] - d[b]);
                hits.push(tri[a].lerp(tri[b], t));
            }
        }
        if let [p, q] = hits[..] {
            segments.push([p, q]);
        }
    }
    segments
}

/// Slice state of one viewport's image.
#[derive(Debug)]
pub struct ViewportSlice {
    label: String,
    slice_actor: ActorId,
    volume: Rc<Volume>,
    full_ranges: [[i64; 2]; 3],
    ranges: [[i64; 2]; 3],
    indices: [i64; 3],
    cut_filters: Vec<CutFilter>,
}

impl ViewportSlice {
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn slice_actor(&self) -> ActorId {
        self.slice_actor
    }

    /// Valid, possibly cropped, index range per axis.
    #[inline]
    pub fn ranges(&self) -> [[i64; 2]; 3] {
        self.ranges
    }

    #[inline]
    pub fn full_ranges(&self) -> [[i64; 2]; 3] {
        self.full_ranges
    }

    #[inline]
    pub fn index(&self, axis: Axis) -> i64 {
        self.indices[axis.index()]
    }

    pub fn cut_filters(&self) -> &[CutFilter] {
        &self.cut_filters
    }

    /// World bounds of the current slice along `axis`.
    pub fn slice_bounds(&self, axis: Axis) -> Bounds {
        let mut extent = self.ranges;
        let i = self.indices[axis.index()];
        extent[axis.index()] = [i, i];
        self.volume.extent_bounds(extent)
    }

    fn clamp_indices(&mut self) {
        for (index, [lo, hi]) in self.indices.iter_mut().zip(self.ranges) {
            *index = (*index).clamp(lo, hi);
        }
    }
}

/// Crop of one axis: the surface's share of the volume, padded, as indices.
fn crop_range(full: [i64; 2], volume: [f64; 2], surface: [f64; 2], padding: f64) -> [i64; 2] {
    let length = volume[1] - volume[0];
    if length <= 0.0 || surface[0] > surface[1] {
        return full;
    }
    let lo = ((surface[0] - volume[0]) / length - padding).clamp(0.0, 1.0);
    let hi = ((surface[1] - volume[0]) / length + padding).clamp(0.0, 1.0);
    let span = (full[1] - full[0]) as f64;
    [
        full[0] + (lo * span).round() as i64,
        full[0] + (hi * span).round() as i64,
    ]
}

#[derive(Debug)]
pub struct ImageSliceController {
    axis: Axis,
    window: f64,
    level: f64,
    window_range: (f64, f64),
    level_range: (f64, f64),
    crop: bool,
    intersect: bool,
    padding: f64,
    slices: Vec<ViewportSlice>,
}

impl ImageSliceController {
    pub fn new(crop_padding: f64) -> Self {
        Self {
            axis: Axis::default(),
            window: 0.0,
            level: 0.0,
            window_range: (0.0, 0.0),
            level_range: (0.0, 0.0),
            crop: false,
            intersect: false,
            padding: crop_padding,
            slices: Vec::new(),
        }
    }

    #[inline]
    pub fn axis(&self) -> Axis {
        self.axis
    }

    #[inline]
    pub fn window(&self) -> f64 {
        self.window
    }

    #[inline]
    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn window_range(&self) -> (f64, f64) {
        self.window_range
    }

    pub fn level_range(&self) -> (f64, f64) {
        self.level_range
    }

    #[inline]
    pub fn crop_mode(&self) -> bool {
        self.crop
    }

    #[inline]
    pub fn intersect_mode(&self) -> bool {
        self.intersect
    }

    pub fn slices(&self) -> &[ViewportSlice] {
        &self.slices
    }

    pub fn slice(&self, label: &str) -> Option<&ViewportSlice> {
        self.slices.iter().find(|s| s.label == label)
    }

    /// Whether any viewport shows an image.
    #[inline]
    pub fn has_images(&self) -> bool {
        !self.slices.is_empty()
    }

    /// Adds a slice actor for `volume` to `renderer`. Window and level are
    /// reinitialized from the volume's scalar range.
    pub fn add_image(&mut self, label: &str, renderer: &mut dyn Renderer, volume: Rc<Volume>) -> ActorId {
        let (min, max) = volume.scalar_range();
        let span = max - min;
        self.level_range = (min, max);
        self.window_range = (min, max);
        self.level = min + span / 3.0;
        self.window = min + span / 2.0;

        let extent = volume.extent();
        let indices = extent.map(|[lo, _]| lo);
        let geometry = SliceGeometry {
            volume: volume.clone(),
            axis: self.axis,
            index: indices[self.axis.index()],
            window: self.window,
            level: self.level,
            display_extent: extent,
        };
        let slice_actor = renderer.add_actor(Actor::image_slice(geometry).in_layer(crate::compose::IMAGE_LAYER));

        self.slices.retain(|s| s.label != label);
        self.slices.push(ViewportSlice {
            label: label.to_string(),
            slice_actor,
            volume,
            full_ranges: extent,
            ranges: extent,
            indices,
            cut_filters: Vec::new(),
        });
        slice_actor
    }

    /// Writes the current state into every slice actor.
    fn sync_actors(&self, registry: &mut ViewportRegistry) {
        for slice in &self.slices {
            let Some(viewport) = registry.get_mut(&slice.label) else {
                continue;
            };
            let Some(actor) = viewport.renderer_mut().actor_mut(slice.slice_actor) else {
                continue;
            };
            if let ActorGeometry::ImageSlice(geometry) = &mut actor.geometry {
                geometry.axis = self.axis;
                geometry.index = slice.indices[self.axis.index()];
                geometry.window = self.window;
                geometry.level = self.level;
                geometry.display_extent = slice.ranges;
            }
        }
    }

    /// Looks straight down `axis` at every slice's center.
    pub fn set_axis(&mut self, registry: &mut ViewportRegistry, axis: Axis) {
        self.axis = axis;
        self.sync_actors(registry);

        for slice in &self.slices {
            let Some(viewport) = registry.get_mut(&slice.label) else {
                continue;
            };
            let center = slice.slice_bounds(axis).center();
            let renderer = viewport.renderer_mut();
            let camera = renderer.active_camera_mut();
            let distance = camera.distance();
            camera.position = center + axis.unit() * distance;
            camera.focal_point = center;
            camera.view_up = axis.view_up();
            renderer.reset_camera_clipping_range();
        }

        self.refresh_cut_planes(registry);
        self.update_particle_visibility(registry);
        debug!("Slice axis set to {}", axis);
    }

    /// Moves every viewport to `index` along `axis`, clamped into its range.
    pub fn set_slice_index(&mut self, registry: &mut ViewportRegistry, axis: Axis, index: i64) {
        let a = axis.index();
        for slice in &mut self.slices {
            let [lo, hi] = slice.ranges[a];
            slice.indices[a] = index.clamp(lo, hi);
        }
        self.sync_actors(registry);
        if axis == self.axis {
            self.refresh_cut_planes(registry);
            self.update_particle_visibility(registry);
        }
    }

    pub fn set_window(&mut self, registry: &mut ViewportRegistry, window: f64) {
        self.window = window;
        self.sync_actors(registry);
    }

    pub fn set_level(&mut self, registry: &mut ViewportRegistry, level: f64) {
        self.level = level;
        self.sync_actors(registry);
    }

    /// Crops every image to the bounds of its viewport's surfaces, or restores
    /// the full extent.
    pub fn set_crop_mode(&mut self, registry: &mut ViewportRegistry, crop: bool) {
        self.crop = crop;
        for slice in &mut self.slices {
            if !crop {
                slice.ranges = slice.full_ranges;
                continue;
            }
            let Some(viewport) = registry.get(&slice.label) else {
                continue;
            };
            let surface = surface_bounds(viewport.renderer());
            if surface.is_empty() {
                continue;
            }
            let volume = slice.volume.extent_bounds(slice.full_ranges);
            for a in 0..3 {
                slice.ranges[a] = crop_range(
                    slice.full_ranges[a],
                    [volume.min[a], volume.max[a]],
                    [surface.min[a], surface.max[a]],
                    self.padding,
                );
            }
            slice.clamp_indices();
            debug!("Cropped {} to {:?}", slice.label, slice.ranges);
        }
        self.sync_actors(registry);
        self.refresh_cut_planes(registry);
        self.update_particle_visibility(registry);
    }

    pub fn set_intersect_mode(&mut self, registry: &mut ViewportRegistry, intersect: bool) {
        self.intersect = intersect;
        self.reset_intersections(registry);
        self.update_particle_visibility(registry);
    }

    /// Drops every cut filter and, in intersect mode, builds one per visible
    /// surface of each image viewport.
    pub fn reset_intersections(&mut self, registry: &mut ViewportRegistry) {
        for slice in &mut self.slices {
            let Some(viewport) = registry.get_mut(&slice.label) else {
                slice.cut_filters.clear();
                continue;
            };
            let renderer = viewport.renderer_mut();
            for filter in slice.cut_filters.drain(..) {
                renderer.remove_actor(filter.output_actor);
            }
            if !self.intersect {
                continue;
            }

            let meshes: Vec<SharedMesh> = renderer
                .actors()
                .into_iter()
                .filter_map(|id| renderer.actor(id))
                .filter(|actor| actor.visible)
                .filter_map(|actor| actor.mesh().cloned())
                .collect();
            for mesh in meshes {
                let actor = renderer.add_actor(Actor::segments(Vec::new()));
                slice.cut_filters.push(CutFilter::new(mesh, actor));
            }
        }
        self.refresh_cut_planes(registry);
    }

    /// Moves every cut plane to its slice and marks it stale.
    fn refresh_cut_planes(&mut self, registry: &mut ViewportRegistry) {
        let axis = self.axis;
        for slice in &mut self.slices {
            let origin = slice.slice_bounds(axis).center();
            for filter in &mut slice.cut_filters {
                filter.set_plane(origin, axis.unit());
            }
        }
        self.update_cut_outputs(registry);
    }

    /// Recomputes stale cut filters into their segment actors. Returns how
    /// many filters were recomputed.
    pub fn update_cut_outputs(&mut self, registry: &mut ViewportRegistry) -> usize {
        let mut updated = 0;
        for slice in &mut self.slices {
            let Some(viewport) = registry.get_mut(&slice.label) else {
                continue;
            };
            for filter in &mut slice.cut_filters {
                if !filter.is_stale() {
                    continue;
                }
                let segments = filter.update().to_vec();
                if let Some(actor) = viewport.renderer_mut().actor_mut(filter.output_actor) {
                    actor.geometry = ActorGeometry::Segments(segments);
                }
                updated += 1;
            }
        }
        updated
    }

    /// In crop or intersect mode, shows only the glyphs inside the current
    /// slab along the active axis; otherwise shows all of them.
    pub fn update_particle_visibility(&self, registry: &mut ViewportRegistry) {
        let filtering = self.crop || self.intersect;
        let a = self.axis.index();
        for slice in &self.slices {
            let Some(viewport) = registry.get_mut(&slice.label) else {
                continue;
            };
            let [lo, hi] = slice.full_ranges[a];
            let volume = slice.volume.extent_bounds(slice.full_ranges);
            let count = (hi - lo).max(1) as f64;
            let thickness = (volume.max[a] - volume.min[a]) / count;
            let lower = slice.slice_bounds(self.axis).min[a];

            let renderer = viewport.renderer_mut();
            for id in renderer.actors() {
                let Some(actor) = renderer.actor_mut(id) else {
                    continue;
                };
                let ActorGeometry::Glyphs(glyphs) = &mut actor.geometry else {
                    continue;
                };
                for (visible, center) in glyphs.visible.iter_mut().zip(&glyphs.centers) {
                    *visible = !filtering || (center[a] >= lower && center[a] < lower + thickness);
                }
            }
        }
    }

    /// Forgets every viewport; keeps axis, window and level.
    pub fn reset(&mut self) {
        self.slices.clear();
    }
}

/// Bounds of the visible surfaces of a renderer.
fn surface_bounds(renderer: &dyn Renderer) -> Bounds {
    renderer
        .actors()
        .into_iter()
        .filter_map(|id| renderer.actor(id))
        .filter(|actor| actor.visible && actor.mesh().is_some())
        .fold(Bounds::EMPTY, |acc, actor| acc.union(&actor.bounds()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GlyphSet, HeadlessRenderer};
    use crate::geometry::Mesh;

    fn volume() -> Rc<Volume> {
        let n = 11 * 11 * 11;
        let scalars = (0..n).map(|i| (i % 90) as f64).collect();
        Rc::new(Volume::new([11, 11, 11], DVec3::ZERO, DVec3::ONE, scalars).unwrap())
    }

    /// A quad spanning `[lo, hi]` on x and z with y fixed at 5.
    fn surface(lo: f64, hi: f64) -> Actor {
        Actor::surface(
            Mesh::new(
                vec![
                    DVec3::new(lo, 5.0, lo),
                    DVec3::new(hi, 5.0, lo),
                    DVec3::new(hi, 5.0, hi),
                    DVec3::new(lo, 5.0, hi),
                ],
                vec![[0, 1, 2], [0, 2, 3]],
            )
            .with_domain("0")
            .into_shared(),
        )
    }

    fn setup(extra: Vec<Actor>) -> (ImageSliceController, ViewportRegistry) {
        let mut controller = ImageSliceController::new(0.01);
        let mut renderer = HeadlessRenderer::new();
        for actor in extra {
            renderer.add_actor(actor);
        }
        controller.add_image("a", &mut renderer, volume());
        renderer.reset_camera();

        let mut registry = ViewportRegistry::new();
        registry.register("a", Box::new(renderer), [0.0, 0.0, 1.0, 1.0]);
        (controller, registry)
    }

    #[test]
    fn axis_parses_anatomical_aliases() {
        assert_eq!("l".parse::<Axis>().unwrap(), Axis::X);
        assert_eq!("P".parse::<Axis>().unwrap(), Axis::Y);
        assert_eq!("S".parse::<Axis>().unwrap(), Axis::Z);
        assert_eq!("z".parse::<Axis>().unwrap(), Axis::Z);
        assert!(matches!("Q".parse::<Axis>(), Err(ViewerError::InvalidAxis(_))));
    }

    #[test]
    fn window_and_level_start_from_the_scalar_range() {
        let (controller, _) = setup(Vec::new());
        assert_eq!(controller.level_range(), (0.0, 89.0));
        assert!((controller.level() - 89.0 / 3.0).abs() < 1e-12);
        assert!((controller.window() - 44.5).abs() < 1e-12);
        assert_eq!(controller.axis(), Axis::Z);
    }

    #[test]
    fn crop_clamps_the_current_index_into_the_cropped_range() {
        let (mut controller, mut registry) = setup(vec![surface(2.1, 7.9)]);
        controller.set_slice_index(&mut registry, Axis::Z, 9);
        assert_eq!(controller.slice("a").unwrap().index(Axis::Z), 9);

        controller.set_crop_mode(&mut registry, true);
        let slice = controller.slice("a").unwrap();
        assert_eq!(slice.ranges()[2], [2, 8]);
        assert_eq!(slice.index(Axis::Z), 8);

        let viewport = registry.get("a").unwrap();
        let actor = viewport.renderer().actor(slice.slice_actor()).unwrap();
        let ActorGeometry::ImageSlice(geometry) = &actor.geometry else {
            panic!("slice actor lost its geometry");
        };
        assert_eq!(geometry.index, 8);
        assert_eq!(geometry.display_extent[2], [2, 8]);

        controller.set_crop_mode(&mut registry, false);
        assert_eq!(controller.slice("a").unwrap().ranges()[2], [0, 10]);
        assert_eq!(controller.slice("a").unwrap().index(Axis::Z), 8);
    }

    #[test]
    fn slice_index_is_clamped_to_the_extent() {
        let (mut controller, mut registry) = setup(Vec::new());
        controller.set_slice_index(&mut registry, Axis::X, -4);
        controller.set_slice_index(&mut registry, Axis::Y, 40);
        let slice = controller.slice("a").unwrap();
        assert_eq!(slice.index(Axis::X), 0);
        assert_eq!(slice.index(Axis::Y), 10);
    }

    #[test]
    fn axis_change_looks_down_the_axis() {
        let (mut controller, mut registry) = setup(Vec::new());
        controller.set_slice_index(&mut registry, Axis::Y, 4);
        controller.set_axis(&mut registry, Axis::Y);

        let camera = registry.get("a").unwrap().renderer().active_camera().clone();
        assert!((camera.direction_of_projection() - DVec3::NEG_Y).length() < 1e-9);
        assert_eq!(camera.view_up, DVec3::NEG_Z);
        assert_eq!(camera.focal_point, DVec3::new(5.0, 4.0, 5.0));
        assert!(camera.position.y > camera.focal_point.y);
    }

    #[test]
    fn intersect_mode_cuts_surfaces_with_the_slice_plane() {
        let (mut controller, mut registry) = setup(vec![surface(0.0, 10.0)]);
        controller.set_slice_index(&mut registry, Axis::Z, 3);
        controller.set_intersect_mode(&mut registry, true);

        let slice = controller.slice("a").unwrap();
        assert_eq!(slice.cut_filters().len(), 1);
        assert!(!slice.cut_filters()[0].is_stale());

        let out = slice.cut_filters()[0].output_actor();
        let viewport = registry.get("a").unwrap();
        let ActorGeometry::Segments(segments) = &viewport.renderer().actor(out).unwrap().geometry else {
            panic!("cut output is not a segment set");
        };
        assert!(!segments.is_empty());
        for [p, q] in segments {
            assert!((p.z - 3.0).abs() < 1e-9 && (q.z - 3.0).abs() < 1e-9);
        }

        controller.set_intersect_mode(&mut registry, false);
        assert!(controller.slice("a").unwrap().cut_filters().is_empty());
        assert!(registry.get("a").unwrap().renderer().actor(out).is_none());
    }

    #[test]
    fn particles_outside_the_slab_are_hidden_while_filtering() {
        let glyphs = GlyphSet::new(
            vec![DVec3::new(1.0, 1.0, 3.2), DVec3::new(1.0, 1.0, 4.0), DVec3::new(1.0, 1.0, 2.9)],
            vec![[255, 0, 0]; 3],
            1.0,
        );
        let (mut controller, mut registry) = setup(vec![Actor::glyphs(glyphs), surface(0.0, 10.0)]);
        controller.set_slice_index(&mut registry, Axis::Z, 3);
        controller.set_intersect_mode(&mut registry, true);

        let viewport = registry.get("a").unwrap();
        let renderer = viewport.renderer();
        let visible: Vec<bool> = renderer
            .actors()
            .into_iter()
            .filter_map(|id| match &renderer.actor(id)?.geometry {
                ActorGeometry::Glyphs(g) => Some(g.visible.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(visible, vec![true, false, false]);
    }
}
