//! Grid composition and the imperative entry points of the engine.
//!
//! [`SceneComposer`] owns every registry: the viewports, camera baselines,
//! widgets, slice state and the derived-geometry cache. The surrounding
//! application writes annotation state into the [`ViewerStore`] observables
//! and calls [`SceneComposer::tick`] from its event loop; changes settle
//! through coalescing subscriptions before widgets are re-synchronized.

use crate::annotation::{
    delete_and_renumber, recount_constraints, recount_landmarks, AnnotationKey, AnnotationStore,
    AnnotationTarget, AnnotationWidgetManager, Commit, ConstraintInfo, LandmarkInfo, Placement,
    WidgetHandle, WidgetKind, WidgetSettings, COLOR_ARRAY,
};
use crate::backend::{Actor, ActorGeometry, ColorMapping, GlyphSet, LookupTable, Renderer, VectorSet};
use crate::cache::{GeometryCache, GeometryKey};
use crate::camera::{Camera, OrbitController, PointerEvent};
use crate::config::ViewerConfig;
use crate::error::{Result, ViewerError};
use crate::geometry::{extract_isosurface, Mesh, ShapeSource, SharedMesh, Volume};
use crate::reactive::{Clock, CoalescingSubscription, Observable, SystemClock};
use crate::slice::{Axis, ImageSliceController};
use crate::spatial::SpatialIndex;
use crate::sync::CameraSyncEngine;
use crate::viewport::ViewportRegistry;
use glam::DVec3;
use log::{debug, info, warn};
use shapeio::{ConstraintData, ConstraintKind, ConstraintRecord, INCLUDED};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

pub const ORIGINAL_LAYER: &str = "Original";
pub const GROOMED_LAYER: &str = "Groomed";
pub const RECONSTRUCTED_LAYER: &str = "Reconstructed";
pub const PARTICLES_LAYER: &str = "Particles";
pub const LANDMARKS_LAYER: &str = "Landmarks";
pub const CONSTRAINTS_LAYER: &str = "Constraints";
pub const IMAGE_LAYER: &str = "Original - Image";

/// Point array carrying the difference-from-mean color values.
pub const DIFFERENCE_ARRAY: &str = "difference";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSpec {
    pub name: &'static str,
    /// Surface color; layers without one do not share opacity.
    pub rgb: Option<[f64; 3]>,
}

pub const LAYERS: [LayerSpec; 7] = [
    LayerSpec { name: ORIGINAL_LAYER, rgb: Some([1.0, 1.0, 1.0]) },
    LayerSpec { name: GROOMED_LAYER, rgb: Some([0.0, 1.0, 0.0]) },
    LayerSpec { name: RECONSTRUCTED_LAYER, rgb: Some([1.0, 0.0, 0.0]) },
    LayerSpec { name: PARTICLES_LAYER, rgb: None },
    LayerSpec { name: LANDMARKS_LAYER, rgb: None },
    LayerSpec { name: CONSTRAINTS_LAYER, rgb: None },
    LayerSpec { name: IMAGE_LAYER, rgb: None },
];

pub fn layer_color(name: &str) -> Option<DVec3> {
    LAYERS
        .iter()
        .find(|l| l.name == name)
        .and_then(|l| l.rgb)
        .map(DVec3::from_array)
}

/// Qualitative palette for particles and imported landmarks.
pub const PALETTE: [[u8; 3]; 12] = [
    [166, 206, 227],
    [31, 120, 180],
    [178, 223, 138],
    [51, 160, 44],
    [251, 154, 153],
    [227, 26, 28],
    [253, 191, 111],
    [255, 127, 0],
    [202, 178, 214],
    [106, 61, 154],
    [255, 255, 153],
    [177, 89, 40],
];

/// Good then bad particle colors.
pub const GOOD_BAD_COLORS: [[u8; 3]; 2] = [[0, 255, 0], [255, 0, 0]];

/// Gray drawn for excluded points.
const EXCLUDED_GRAY: f64 = 0.5;
const ARROW_SCALE: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct ShapeLayer {
    pub layer: String,
    pub source: ShapeSource,
}

impl ShapeLayer {
    pub fn new(layer: impl Into<String>, source: ShapeSource) -> Self {
        Self {
            layer: layer.into(),
            source,
        }
    }
}

/// Everything loaded for one anatomical domain of a subject.
#[derive(Debug, Clone, Default)]
pub struct DomainShapes {
    /// Domain tag, e.g. `"0"`.
    pub name: String,
    pub shapes: Vec<ShapeLayer>,
    pub particles: Option<Vec<DVec3>>,
    /// Per-particle angular deviation in degrees.
    pub good_bad_angles: Option<Vec<f64>>,
    /// Mean-shape counterparts of `particles`.
    pub mean_particles: Option<Vec<DVec3>>,
}

impl DomainShapes {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_shape(mut self, layer: impl Into<String>, source: ShapeSource) -> Self {
        self.shapes.push(ShapeLayer::new(layer, source));
        self
    }

    pub fn with_particles(mut self, particles: Vec<DVec3>) -> Self {
        self.particles = Some(particles);
        self
    }
}

/// One subject: becomes one viewport.
#[derive(Debug, Clone)]
pub struct ShapeGroup {
    pub label: String,
    pub domains: Vec<DomainShapes>,
}

impl ShapeGroup {
    pub fn new(label: impl Into<String>, domains: Vec<DomainShapes>) -> Self {
        Self {
            label: label.into(),
            domains,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub columns: usize,
}

impl GridLayout {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            rows: rows.max(1),
            columns: columns.max(1),
        }
    }

    /// Smallest near-square grid holding `count` cells.
    pub fn for_count(count: usize) -> Self {
        let columns = (count.max(1) as f64).sqrt().ceil() as usize;
        let rows = (count.max(1) + columns - 1) / columns;
        Self::new(rows, columns)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.rows * self.columns
    }

    /// Normalized `[xmin, ymin, xmax, ymax]` of cell `index`, filled row by
    /// row from the top left.
    pub fn cell(&self, index: usize) -> [f64; 4] {
        let (nx, ny) = (self.columns as f64, self.rows as f64);
        let x = (index % self.columns) as f64;
        let y = (index / self.columns) as f64;
        [x / nx, 1.0 - (y + 1.0) / ny, (x + 1.0) / nx, 1.0 - y / ny]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayOptions {
    pub layers_shown: BTreeSet<String>,
    /// Comparison mode: surfaces are drawn opaque.
    pub analysis_mode: bool,
    /// With `analysis_mode`, color primary surfaces by displacement from the mean.
    pub difference_from_mean: bool,
    /// Color particles by their angular deviation.
    pub good_bad: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            layers_shown: BTreeSet::from([ORIGINAL_LAYER.to_string()]),
            analysis_mode: false,
            difference_from_mean: false,
            good_bad: false,
        }
    }
}

impl DisplayOptions {
    pub fn shows(&self, layer: &str) -> bool {
        self.layers_shown.contains(layer)
    }

    fn opacity(&self) -> f64 {
        if self.analysis_mode {
            return 1.0;
        }
        let colored = self
            .layers_shown
            .iter()
            .filter(|l| layer_color(l).is_some())
            .count()
            .max(1);
        1.0 / colored as f64
    }
}

/// Annotation state shared with the surrounding application.
#[derive(Debug, Default)]
pub struct ViewerStore {
    pub landmark_info: Observable<Vec<LandmarkInfo>>,
    pub landmarks: Observable<AnnotationStore<DVec3>>,
    pub landmark_size: Observable<f64>,
    pub constraint_info: Observable<Vec<ConstraintInfo>>,
    pub shown_constraints: Observable<BTreeSet<usize>>,
    pub constraints: Observable<AnnotationStore<ConstraintData>>,
}

struct Subscriptions {
    landmark_info: CoalescingSubscription,
    landmarks: CoalescingSubscription,
    landmark_size: CoalescingSubscription,
    constraint_info: CoalescingSubscription,
    shown_constraints: CoalescingSubscription,
    constraints: CoalescingSubscription,
}

impl Subscriptions {
    fn watching(store: &ViewerStore, config: &ViewerConfig) -> Self {
        let quiet = config.quiet_period();
        Self {
            landmark_info: CoalescingSubscription::watching(&store.landmark_info, quiet),
            landmarks: CoalescingSubscription::watching(&store.landmarks, quiet),
            landmark_size: CoalescingSubscription::watching(&store.landmark_size, quiet),
            constraint_info: CoalescingSubscription::watching(&store.constraint_info, quiet),
            shown_constraints: CoalescingSubscription::watching(&store.shown_constraints, quiet),
            constraints: CoalescingSubscription::watching(&store.constraints, quiet),
        }
    }
}

/// Creates an empty renderer for each new viewport.
pub type RendererFactory = Box<dyn Fn() -> Box<dyn Renderer>>;

/// A shape resolved into something a renderer can draw.
enum Resolved {
    Surface(SharedMesh),
    Image(Rc<Volume>),
}

struct ResolvedDomain<'a> {
    shapes: &'a DomainShapes,
    layers: Vec<(&'a str, Resolved)>,
}

/// Definitions whose layer is hidden get no widgets.
fn visible_info<'a, T>(options: &DisplayOptions, layer: &str, info: &'a [T]) -> &'a [T] {
    if options.shows(layer) {
        info
    } else {
        &[]
    }
}

/// Signed length of `mean - current`; negative when the components of the
/// displacement sum below zero.
fn signed_displacements(current: &[DVec3], mean: &[DVec3]) -> Vec<f64> {
    current
        .iter()
        .zip(mean)
        .map(|(c, m)| {
            let d = *m - *c;
            let length = d.length();
            if d.x + d.y + d.z < 0.0 {
                -length
            } else {
                length
            }
        })
        .collect()
}

#[inline]
fn difference_value(d: f64) -> f64 {
    (d / 10.0 + 0.5).clamp(0.0, 1.0)
}

/// Writes the difference array: each vertex takes the displacement of its
/// nearest particle.
fn apply_difference(mesh: &mut Mesh, particles: &[DVec3], displacements: &[f64]) {
    let index = SpatialIndex::new(particles.to_vec());
    let values = mesh
        .points
        .iter()
        .map(|p| {
            index
                .nearest(*p, 1, None)
                .first()
                .and_then(|n| displacements.get(n.index))
                .map_or(0.5, |&d| difference_value(d))
        })
        .collect();
    mesh.set_point_array(DIFFERENCE_ARRAY, values);
    mesh.modified();
}

/// One arrow per moved particle along the surface normal nearest to it,
/// pointing in for negative displacement and out for positive.
fn displacement_arrows(mesh: &Mesh, particles: &[DVec3], displacements: &[f64]) -> VectorSet {
    let normals = mesh.vertex_normals();
    let index = SpatialIndex::new(mesh.points.clone());
    let mut arrows = VectorSet {
        origins: Vec::new(),
        directions: Vec::new(),
        values: Vec::new(),
        scale: ARROW_SCALE,
    };
    for (x, &d) in particles.iter().zip(displacements) {
        if d == 0.0 {
            continue;
        }
        let Some(u) = index.nearest(*x, 1, None).first().map(|n| normals[n.index]) else {
            continue;
        };
        let (origin, direction) = if d < 0.0 { (*x + u * 3.0, -u) } else { (*x + u, u) };
        arrows.origins.push(origin);
        arrows.directions.push(direction);
        arrows.values.push(difference_value(d));
    }
    arrows
}

pub struct SceneComposer {
    config: ViewerConfig,
    clock: Rc<dyn Clock>,
    factory: RendererFactory,
    registry: ViewportRegistry,
    cameras: CameraSyncEngine,
    widgets: AnnotationWidgetManager,
    slices: ImageSliceController,
    surfaces: GeometryCache<SharedMesh>,
    store: ViewerStore,
    subs: Subscriptions,
    options: DisplayOptions,
    glyph_size: f64,
    placement: Option<WidgetHandle>,
    orbit: OrbitController,
}

impl SceneComposer {
    pub fn new(config: ViewerConfig, factory: RendererFactory) -> Self {
        Self::with_clock(config, factory, Rc::new(SystemClock))
    }

    pub fn with_clock(config: ViewerConfig, factory: RendererFactory, clock: Rc<dyn Clock>) -> Self {
        let store = ViewerStore {
            landmark_size: Observable::new(config.landmark_size),
            ..Default::default()
        };
        let subs = Subscriptions::watching(&store, &config);
        Self {
            widgets: AnnotationWidgetManager::new(WidgetSettings::from(&config)),
            slices: ImageSliceController::new(config.crop_padding),
            glyph_size: config.glyph_size,
            clock,
            factory,
            registry: ViewportRegistry::new(),
            cameras: CameraSyncEngine::new(),
            surfaces: GeometryCache::new(),
            store,
            subs,
            options: DisplayOptions::default(),
            placement: None,
            orbit: OrbitController::new(),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    #[inline]
    pub fn registry(&self) -> &ViewportRegistry {
        &self.registry
    }

    #[inline]
    pub fn store(&self) -> &ViewerStore {
        &self.store
    }

    /// Writes made here reach the widgets through [`tick`](Self::tick).
    #[inline]
    pub fn store_mut(&mut self) -> &mut ViewerStore {
        &mut self.store
    }

    #[inline]
    pub fn options(&self) -> &DisplayOptions {
        &self.options
    }

    /// Takes effect on the next [`rebuild_grid`](Self::rebuild_grid).
    #[inline]
    pub fn options_mut(&mut self) -> &mut DisplayOptions {
        &mut self.options
    }

    #[inline]
    pub fn slices(&self) -> &ImageSliceController {
        &self.slices
    }

    #[inline]
    pub fn widgets(&self) -> &AnnotationWidgetManager {
        &self.widgets
    }

    #[inline]
    pub fn cameras(&self) -> &CameraSyncEngine {
        &self.cameras
    }

    /// The in-progress placement, if any.
    #[inline]
    pub fn placement(&self) -> Option<&WidgetHandle> {
        self.placement.as_ref()
    }

    /// Resolves the shown layers of every group; segmentations go through the
    /// surface cache.
    fn resolve<'a>(&mut self, groups: &'a [ShapeGroup]) -> Result<Vec<Vec<ResolvedDomain<'a>>>> {
        let contour = self.config.contour_value;
        let mut resolved = Vec::with_capacity(groups.len());
        for group in groups {
            let mut domains = Vec::with_capacity(group.domains.len());
            for (d, shapes) in group.domains.iter().enumerate() {
                let mut layers = Vec::new();
                for shape in shapes.shapes.iter().filter(|s| self.options.shows(&s.layer)) {
                    let item = match &shape.source {
                        ShapeSource::Surface(mesh) => {
                            if mesh.borrow().domain.is_none() {
                                mesh.borrow_mut().domain = Some(shapes.name.clone());
                            }
                            Resolved::Surface(mesh.clone())
                        }
                        ShapeSource::Segmentation(volume) => {
                            let key = GeometryKey::new(group.label.clone(), shape.layer.clone(), d);
                            let mesh = self.surfaces.get_or_try_insert_with(key, || {
                                extract_isosurface(volume, contour)
                                    .map(|m| m.with_domain(shapes.name.clone()).into_shared())
                            })?;
                            Resolved::Surface(mesh)
                        }
                        ShapeSource::Image(volume) => Resolved::Image(volume.clone()),
                    };
                    layers.push((shape.layer.as_str(), item));
                }
                domains.push(ResolvedDomain { shapes, layers });
            }
            resolved.push(domains);
        }
        Ok(resolved)
    }

    /// Tears down the grid and builds one viewport per group. Derived
    /// geometry is resolved first; if that fails the previous grid stays.
    /// The camera motion applied to the old grid carries over.
    pub fn rebuild_grid(&mut self, groups: &[ShapeGroup], layout: GridLayout) -> Result<()> {
        let resolved = self.resolve(groups)?;
        if groups.len() > layout.capacity() {
            warn!(
                "{} group(s) do not fit a {}x{} grid",
                groups.len() - layout.capacity(),
                layout.rows,
                layout.columns
            );
        }

        self.registry.disable_picking();
        self.slices.reset();
        let delta = self.registry.first().and_then(|v| self.cameras.delta(v));
        self.widgets.cancel_placement(&mut self.registry);
        self.placement = None;
        self.registry.clear();
        self.cameras.clear();

        let background = DVec3::from_array(self.config.background);
        for (i, (group, domains)) in groups.iter().zip(resolved).enumerate().take(layout.capacity()) {
            let mut renderer = (self.factory)();
            renderer.set_viewport(layout.cell(i));
            renderer.set_background(background);
            self.populate(&group.label, renderer.as_mut(), domains);
            renderer.set_active_camera(Camera::default());
            renderer.reset_camera();
            self.registry.register(group.label.clone(), renderer, layout.cell(i));
        }

        self.cameras.capture_baseline(&self.registry);
        self.widgets.attach_viewports(
            &mut self.registry,
            (
                visible_info(&self.options, LANDMARKS_LAYER, self.store.landmark_info.get()),
                self.store.landmarks.get(),
            ),
            (
                visible_info(&self.options, CONSTRAINTS_LAYER, self.store.constraint_info.get()),
                self.store.constraints.get(),
            ),
            self.store.shown_constraints.get(),
        );

        if let Some(delta) = delta {
            for viewport in self.registry.iter_mut() {
                self.cameras.apply(viewport, &delta);
            }
        }

        if self.slices.intersect_mode() {
            self.slices.reset_intersections(&mut self.registry);
        }
        if self.slices.crop_mode() {
            self.slices.set_crop_mode(&mut self.registry, true);
        }
        self.slices.update_particle_visibility(&mut self.registry);

        self.registry.enable_picking();
        self.registry.render_all();
        info!(
            "Built {} viewport(s) in a {}x{} grid",
            self.registry.len(),
            layout.rows,
            layout.columns
        );
        Ok(())
    }

    fn populate(&mut self, label: &str, renderer: &mut dyn Renderer, domains: Vec<ResolvedDomain<'_>>) {
        let opacity = self.options.opacity();
        let difference = self.options.analysis_mode && self.options.difference_from_mean;
        let constraints = self.options.shows(CONSTRAINTS_LAYER) && !difference;

        for domain in domains {
            let mut primary = true;
            for (layer, item) in domain.layers {
                let mesh = match item {
                    Resolved::Image(volume) => {
                        self.slices.add_image(label, renderer, volume);
                        continue;
                    }
                    Resolved::Surface(mesh) => mesh,
                };
                let mut actor = Actor::surface(mesh.clone()).in_layer(layer);
                actor.color = layer_color(layer).unwrap_or(DVec3::ONE);
                actor.opacity = opacity;

                if primary {
                    primary = false;
                    if difference {
                        actor.opacity = 1.0;
                        self.add_difference(renderer, &mut actor, &mesh, domain.shapes, layer);
                    } else if constraints {
                        let n = mesh.borrow().points.len();
                        mesh.borrow_mut()
                            .set_point_array(COLOR_ARRAY, vec![f64::from(INCLUDED); n]);
                        actor.color_mapping = ColorMapping::PointArray {
                            name: COLOR_ARRAY.to_string(),
                            lookup: LookupTable::Constraint {
                                included: actor.color,
                                excluded: DVec3::splat(EXCLUDED_GRAY),
                            },
                        };
                    }
                }
                renderer.add_actor(actor);
            }

            if self.options.shows(PARTICLES_LAYER) {
                if let Some(particles) = &domain.shapes.particles {
                    let colors = self.particle_colors(domain.shapes);
                    let glyphs = GlyphSet::new(particles.clone(), colors, self.glyph_size);
                    renderer.add_actor(Actor::glyphs(glyphs).in_layer(PARTICLES_LAYER));
                }
            }
            debug!("Populated {} domain {}", label, domain.shapes.name);
        }
    }

    fn add_difference(
        &self,
        renderer: &mut dyn Renderer,
        actor: &mut Actor,
        mesh: &SharedMesh,
        shapes: &DomainShapes,
        layer: &str,
    ) {
        let (Some(particles), Some(mean)) = (&shapes.particles, &shapes.mean_particles) else {
            debug!("No mean shape for domain {}", shapes.name);
            return;
        };
        if particles.len() != mean.len() {
            warn!(
                "Domain {} has {} particle(s) but a mean of {}",
                shapes.name,
                particles.len(),
                mean.len()
            );
            return;
        }
        let displacements = signed_displacements(particles, mean);
        apply_difference(&mut mesh.borrow_mut(), particles, &displacements);
        actor.color_mapping = ColorMapping::PointArray {
            name: DIFFERENCE_ARRAY.to_string(),
            lookup: LookupTable::Rainbow { range: [0.0, 1.0] },
        };
        let arrows = displacement_arrows(&mesh.borrow(), particles, &displacements);
        renderer.add_actor(Actor::vectors(arrows).in_layer(layer));
    }

    fn particle_colors(&self, shapes: &DomainShapes) -> Vec<[u8; 3]> {
        let count = shapes.particles.as_ref().map_or(0, Vec::len);
        match &shapes.good_bad_angles {
            Some(angles) if self.options.good_bad && angles.len() == count => {
                let threshold = self.config.good_bad_max_angle_deg;
                angles
                    .iter()
                    .map(|&a| GOOD_BAD_COLORS[usize::from(a >= threshold)])
                    .collect()
            }
            _ => (0..count).map(|i| PALETTE[i % PALETTE.len()]).collect(),
        }
    }

    /// Starts placing landmark or constraint `id` of `domain` on `subject`.
    /// Planes are committed at once and return `None`.
    pub fn begin_placement(
        &mut self,
        target: AnnotationTarget,
        subject: &str,
        domain: &str,
        id: usize,
    ) -> Result<Option<WidgetHandle>> {
        match target {
            AnnotationTarget::Landmark => {
                let landmark = self
                    .store
                    .landmark_info
                    .get()
                    .iter()
                    .find(|l| l.id == id && l.domain == domain)
                    .cloned()
                    .ok_or(ViewerError::UnknownLandmark(id))?;
                let handle = self.widgets.begin_landmark(&mut self.registry, subject, &landmark)?;
                self.placement = Some(handle.clone());
                Ok(Some(handle))
            }
            AnnotationTarget::Constraint => {
                let constraint = self
                    .store
                    .constraint_info
                    .get()
                    .iter()
                    .find(|c| c.id == id && c.domain == domain)
                    .cloned()
                    .ok_or(ViewerError::UnknownConstraint(id))?;
                match self.widgets.begin_constraint(&mut self.registry, subject, &constraint)? {
                    Placement::Interactive(handle) => {
                        self.placement = Some(handle.clone());
                        Ok(Some(handle))
                    }
                    Placement::Committed(commit) => {
                        self.placement = None;
                        self.apply_commit(commit);
                        self.registry.render_all();
                        Ok(None)
                    }
                }
            }
        }
    }

    pub fn cancel_placement(&mut self) {
        self.widgets.cancel_placement(&mut self.registry);
        self.placement = None;
        self.registry.render_all();
    }

    /// Moves the active seed, or extends the active paint stroke, to the
    /// surface under `(x, y)` in `label`'s viewport.
    pub fn pick_at(&mut self, label: &str, x: f64, y: f64) -> Option<DVec3> {
        let handle = self.placement.clone()?;
        if handle.key().subject != label {
            return None;
        }
        let position = match handle.kind() {
            WidgetKind::Seed => self.widgets.pick_seed(&self.registry, &handle, x, y),
            WidgetKind::Paint => self.widgets.paint_at(&self.registry, &handle, x, y),
            WidgetKind::Plane => None,
        }?;
        self.registry.render_all();
        Some(position)
    }

    /// Drags an existing plane and commits it. Any placement in progress is
    /// cancelled first.
    pub fn move_plane(&mut self, key: &AnnotationKey, origin: DVec3, normal: DVec3) -> bool {
        self.cancel_placement();
        let Some(handle) = self.widgets.grab_plane(&mut self.registry, key) else {
            return false;
        };
        self.widgets.drag_plane(&handle, origin, normal);
        self.end_interaction(&handle)
    }

    /// Reads the widget back into the store. Returns whether anything was
    /// written; stale handles are ignored.
    pub fn end_interaction(&mut self, handle: &WidgetHandle) -> bool {
        let commit = self.widgets.end_interaction(
            &mut self.registry,
            handle,
            self.store.landmarks.get(),
            self.store.constraints.get(),
        );
        if handle.kind() == WidgetKind::Seed && self.placement.as_ref() == Some(handle) {
            self.placement = None;
        }
        let Some(commit) = commit else {
            return false;
        };
        self.apply_commit(commit);
        self.registry.render_all();
        true
    }

    fn apply_commit(&mut self, commit: Commit) {
        match commit {
            Commit::Landmark { key, position } => {
                debug!("Landmark {} placed at {}", key, position);
                self.store.landmarks.update(|s| s.insert(key, position));
                let placements = self.store.landmarks.get();
                self.store.landmark_info.update(|info| recount_landmarks(info, placements));
            }
            Commit::Constraint { key, data } => {
                debug!("Constraint {} written", key);
                self.widgets.constraint_data_written(&key);
                self.store.constraints.update(|s| s.insert(key, data));
                let data = self.store.constraints.get();
                self.store.constraint_info.update(|info| recount_constraints(info, data));
                self.sync_constraint_widgets();
            }
        }
    }

    fn sync_landmark_widgets(&mut self) {
        self.widgets.landmark_info_updated(
            &mut self.registry,
            visible_info(&self.options, LANDMARKS_LAYER, self.store.landmark_info.get()),
            self.store.landmarks.get(),
        );
    }

    fn sync_constraint_widgets(&mut self) {
        self.widgets.constraint_info_updated(
            &mut self.registry,
            visible_info(&self.options, CONSTRAINTS_LAYER, self.store.constraint_info.get()),
            self.store.constraints.get(),
            self.store.shown_constraints.get(),
        );
    }

    /// Accepts `X`/`Y`/`Z` or `L`/`P`/`S`.
    pub fn set_active_axis(&mut self, axis: &str) -> Result<()> {
        let axis: Axis = axis.parse()?;
        self.slices.set_axis(&mut self.registry, axis);
        self.registry.render_all();
        Ok(())
    }

    pub fn set_slice_index(&mut self, axis: &str, index: i64) -> Result<()> {
        let axis: Axis = axis.parse()?;
        self.slices.set_slice_index(&mut self.registry, axis, index);
        self.registry.render_all();
        Ok(())
    }

    pub fn set_window(&mut self, window: f64) {
        self.slices.set_window(&mut self.registry, window);
        self.registry.render_all();
    }

    pub fn set_level(&mut self, level: f64) {
        self.slices.set_level(&mut self.registry, level);
        self.registry.render_all();
    }

    pub fn set_crop_mode(&mut self, crop: bool) {
        self.slices.set_crop_mode(&mut self.registry, crop);
        self.registry.render_all();
    }

    pub fn set_intersect_mode(&mut self, intersect: bool) {
        self.slices.set_intersect_mode(&mut self.registry, intersect);
        self.registry.render_all();
    }

    /// Drops cached surfaces derived from `layer`; call after its data was
    /// refetched. Returns how many entries were dropped.
    pub fn invalidate_layer(&mut self, layer: &str) -> usize {
        let dropped = self.surfaces.invalidate_layer(layer);
        debug!("Invalidated {} cached surface(s) of {}", dropped, layer);
        dropped
    }

    /// Number of cached derived surfaces.
    pub fn cached_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    /// Removes a landmark and renumbers the rest; placements and widgets
    /// follow their landmark to its new id.
    pub fn delete_landmark(&mut self, id: usize) -> Result<()> {
        if !self.store.landmark_info.get().iter().any(|l| l.id == id) {
            return Err(ViewerError::UnknownLandmark(id));
        }
        self.cancel_placement();
        let mapping = self
            .store
            .landmark_info
            .update(|info| delete_and_renumber(info, id))
            .ok_or(ViewerError::UnknownLandmark(id))?;
        self.store.landmarks.update(|s| s.remap_ids(&mapping));
        self.widgets.remap_ids(&mut self.registry, AnnotationTarget::Landmark, &mapping);

        let placements = self.store.landmarks.get();
        self.store.landmark_info.update(|info| recount_landmarks(info, placements));
        self.sync_landmark_widgets();
        self.registry.render_all();
        info!("Deleted landmark {}", id);
        Ok(())
    }

    /// Removes a constraint and renumbers the rest, including the shown set.
    pub fn delete_constraint(&mut self, id: usize) -> Result<()> {
        if !self.store.constraint_info.get().iter().any(|c| c.id == id) {
            return Err(ViewerError::UnknownConstraint(id));
        }
        self.cancel_placement();
        let mapping = self
            .store
            .constraint_info
            .update(|info| delete_and_renumber(info, id))
            .ok_or(ViewerError::UnknownConstraint(id))?;
        self.store.constraints.update(|s| s.remap_ids(&mapping));
        self.store.shown_constraints.update(|shown| {
            *shown = shown.iter().filter_map(|old| mapping.get(old).copied()).collect();
        });
        self.widgets.remap_ids(&mut self.registry, AnnotationTarget::Constraint, &mapping);

        let data = self.store.constraints.get();
        self.store.constraint_info.update(|info| recount_constraints(info, data));
        self.sync_constraint_widgets();
        self.registry.render_all();
        info!("Deleted constraint {}", id);
        Ok(())
    }

    /// Propagates `source`'s camera motion to every other viewport.
    pub fn sync_cameras(&mut self, source: &str) -> Result<usize> {
        let updated = self.cameras.sync_all(&mut self.registry, source)?;
        self.registry.render_all();
        Ok(updated)
    }

    /// Orbits `label`'s camera and syncs the others. Returns whether the
    /// camera moved.
    pub fn handle_pointer(&mut self, label: &str, event: PointerEvent) -> Result<bool> {
        let viewport = self
            .registry
            .get_mut(label)
            .ok_or_else(|| ViewerError::UnknownViewport(label.to_string()))?;
        let renderer = viewport.renderer_mut();
        if !self.orbit.handle_event(&event, renderer.active_camera_mut()) {
            return Ok(false);
        }
        renderer.reset_camera_clipping_range();
        self.sync_cameras(label)?;
        Ok(true)
    }

    /// Rescales every particle glyph.
    pub fn set_glyph_size(&mut self, size: f64) {
        self.glyph_size = size;
        for viewport in self.registry.iter_mut() {
            let renderer = viewport.renderer_mut();
            for id in renderer.actors() {
                if let Some(ActorGeometry::Glyphs(glyphs)) = renderer.actor_mut(id).map(|a| &mut a.geometry) {
                    glyphs.scale = size;
                }
            }
        }
        self.registry.render_all();
    }

    /// Stores `subject`'s constraint records. The n-th record of a kind in a
    /// domain fills the n-th constraint of that kind and domain; missing
    /// definitions are appended. Returns how many records were stored.
    pub fn import_constraints(&mut self, subject: &str, records: Vec<ConstraintRecord>) -> usize {
        let mut seen: HashMap<(String, ConstraintKind), usize> = HashMap::new();
        let mut written = Vec::with_capacity(records.len());
        self.store.constraint_info.update(|info| {
            for record in records {
                let domain = record.domain.unwrap_or_else(|| "0".to_string());
                let kind = record.data.kind();
                let nth = seen.entry((domain.clone(), kind)).or_insert(0);
                let existing = info
                    .iter()
                    .filter(|c| c.domain == domain && c.kind == kind)
                    .nth(*nth)
                    .map(|c| c.id);
                *nth += 1;

                let id = match existing {
                    Some(id) => id,
                    None => {
                        let id = info.len();
                        info.push(ConstraintInfo {
                            id,
                            kind,
                            domain: domain.clone(),
                            name: record.name.clone(),
                            num_set: 0,
                        });
                        id
                    }
                };
                written.push((AnnotationKey::new(subject, domain, id), record.data));
            }
        });

        let count = written.len();
        for (key, _) in &written {
            self.widgets.constraint_data_written(key);
        }
        self.store.constraints.update(|s| {
            for (key, data) in written {
                s.insert(key, data);
            }
        });
        let data = self.store.constraints.get();
        self.store.constraint_info.update(|info| recount_constraints(info, data));
        self.sync_constraint_widgets();
        info!("Imported {} constraint(s) for {}", count, subject);
        count
    }

    /// `subject`'s constraints as file records, in id order.
    pub fn export_constraints(&self, subject: &str) -> Vec<ConstraintRecord> {
        let data = self.store.constraints.get();
        self.store
            .constraint_info
            .get()
            .iter()
            .filter_map(|c| {
                let value = data.get(&AnnotationKey::new(subject, c.domain.clone(), c.id))?;
                Some(ConstraintRecord {
                    domain: Some(c.domain.clone()),
                    name: c.name.clone(),
                    data: value.clone(),
                })
            })
            .collect()
    }

    /// Places `points` as `subject`'s landmarks of `domain`, in order. New
    /// definitions are named `L{id}` and take the palette color of their id.
    pub fn import_landmarks(&mut self, subject: &str, domain: &str, points: &[DVec3]) -> usize {
        let ids = self.store.landmark_info.update(|info| {
            let mut ids: Vec<usize> = info.iter().filter(|l| l.domain == domain).map(|l| l.id).collect();
            while ids.len() < points.len() {
                let id = info.len();
                info.push(LandmarkInfo {
                    id,
                    name: format!("L{}", id),
                    color: PALETTE[id % PALETTE.len()],
                    domain: domain.to_string(),
                    num_set: 0,
                    comment: None,
                });
                ids.push(id);
            }
            ids
        });
        self.store.landmarks.update(|s| {
            for (&id, &p) in ids.iter().zip(points) {
                s.insert(AnnotationKey::new(subject, domain, id), p);
            }
        });
        let placements = self.store.landmarks.get();
        self.store.landmark_info.update(|info| recount_landmarks(info, placements));
        self.sync_landmark_widgets();
        points.len()
    }

    /// Runs the handlers whose observables have settled. Returns how many
    /// handlers ran; renders if any did.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        let store = &self.store;
        let subs = &mut self.subs;
        let landmark_info = subs.landmark_info.poll(&store.landmark_info, now);
        let landmarks = subs.landmarks.poll(&store.landmarks, now);
        let landmark_size = subs.landmark_size.poll(&store.landmark_size, now);
        let constraint_info = subs.constraint_info.poll(&store.constraint_info, now);
        let shown = subs.shown_constraints.poll(&store.shown_constraints, now);
        let constraints = subs.constraints.poll(&store.constraints, now);

        let mut ran = 0;
        if landmark_size {
            self.widgets.landmark_size_updated(*self.store.landmark_size.get());
            ran += 1;
        }
        if landmark_info || landmarks {
            self.sync_landmark_widgets();
            ran += 1;
        }
        if constraint_info || shown || constraints {
            self.widgets.invalidate_field_indices();
            self.sync_constraint_widgets();
            ran += 1;
        }
        if ran > 0 {
            debug!("Ran {} settled handler(s)", ran);
            self.registry.render_all();
        }
        ran
    }
}
