//! Seed, plane and paint widgets and their lifecycle.
//!
//! Widgets exist per (subject, domain, id) and only for domains that have a
//! manipulator, i.e. a pickable surface, in the subject's viewport. The
//! manager never writes annotation data itself: finishing an interaction
//! yields a [`Commit`] that the caller stores. Handles carry the grid
//! generation they were issued in, so callbacks that outlive a grid rebuild
//! are recognized and dropped.

use super::colorize::{ConstraintColorizer, COLOR_ARRAY};
use super::model::{
    AnnotationKey, AnnotationStore, AnnotationTarget, ConstraintInfo, LandmarkInfo, WidgetId, WidgetKind,
};
use crate::config::ViewerConfig;
use crate::error::{Result, ViewerError};
use crate::geometry::SharedMesh;
use crate::spatial::SpatialIndex;
use crate::viewport::{Viewport, ViewportRegistry};
use glam::DVec3;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use shapeio::{ConstraintData, ConstraintKind, PaintField, Plane};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

/// What a paint stroke does to the points under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaintMode {
    #[default]
    Exclude,
    Include,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WidgetPhase {
    #[default]
    Idle,
    Active,
}

/// Reference to a widget valid for one grid generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetHandle {
    id: WidgetId,
    generation: u64,
}

impl WidgetHandle {
    #[inline]
    pub fn key(&self) -> &AnnotationKey {
        &self.id.key
    }

    #[inline]
    pub fn kind(&self) -> WidgetKind {
        self.id.kind
    }

    #[inline]
    pub fn id(&self) -> &WidgetId {
        &self.id
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedWidget {
    pub origin: Option<DVec3>,
    pub color: [u8; 3],
    pub scale: f64,
    pub phase: WidgetPhase,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaneWidget {
    pub origin: DVec3,
    pub normal: DVec3,
    pub visible: bool,
    pub phase: WidgetPhase,
}

#[derive(Debug, Clone)]
pub struct PaintWidget {
    pub radius: f64,
    pub trail: Vec<DVec3>,
    pub handle_visible: bool,
    pub phase: WidgetPhase,
    target: SharedMesh,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidgetSettings {
    pub landmark_size: f64,
    pub paint_radius: f64,
    pub paint_mode: PaintMode,
}

impl From<&ViewerConfig> for WidgetSettings {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            landmark_size: config.landmark_size,
            paint_radius: config.paint_radius,
            paint_mode: config.paint_mode,
        }
    }
}

/// Annotation data produced by a finished interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
    Landmark { key: AnnotationKey, position: DVec3 },
    Constraint { key: AnnotationKey, data: ConstraintData },
}

/// Result of starting a placement.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// A widget holds focus and waits for interaction.
    Interactive(WidgetHandle),
    /// The placement finished at once (planes start at the shape's center).
    Committed(Commit),
}

pub struct AnnotationWidgetManager {
    settings: WidgetSettings,
    seeds: BTreeMap<AnnotationKey, SeedWidget>,
    planes: BTreeMap<AnnotationKey, PlaneWidget>,
    paints: BTreeMap<AnnotationKey, PaintWidget>,
    generation: u64,
    colorizer: ConstraintColorizer,
    shape_indices: HashMap<(String, String), Rc<SpatialIndex>>,
}

fn widget_id(kind: WidgetKind, key: &AnnotationKey) -> WidgetId {
    WidgetId {
        kind,
        key: key.clone(),
    }
}

/// Domains of a viewport whose manipulator has a primary shape.
fn viewport_domains(viewport: &Viewport) -> Vec<String> {
    viewport
        .manipulators()
        .filter(|m| m.primary_actor().is_some())
        .map(|m| m.domain.clone())
        .collect()
}

impl AnnotationWidgetManager {
    pub fn new(settings: WidgetSettings) -> Self {
        Self {
            settings,
            seeds: BTreeMap::new(),
            planes: BTreeMap::new(),
            paints: BTreeMap::new(),
            generation: 0,
            colorizer: ConstraintColorizer::new(),
            shape_indices: HashMap::new(),
        }
    }

    #[inline]
    pub fn settings(&self) -> &WidgetSettings {
        &self.settings
    }

    pub fn set_paint_mode(&mut self, mode: PaintMode) {
        self.settings.paint_mode = mode;
    }

    pub fn set_paint_radius(&mut self, radius: f64) {
        self.settings.paint_radius = radius;
        for paint in self.paints.values_mut() {
            paint.radius = radius;
        }
    }

    pub fn seed(&self, key: &AnnotationKey) -> Option<&SeedWidget> {
        self.seeds.get(key)
    }

    pub fn plane(&self, key: &AnnotationKey) -> Option<&PlaneWidget> {
        self.planes.get(key)
    }

    pub fn paint(&self, key: &AnnotationKey) -> Option<&PaintWidget> {
        self.paints.get(key)
    }

    pub fn widget_count(&self, kind: WidgetKind) -> usize {
        match kind {
            WidgetKind::Seed => self.seeds.len(),
            WidgetKind::Plane => self.planes.len(),
            WidgetKind::Paint => self.paints.len(),
        }
    }

    /// The widget holding focus in any viewport.
    pub fn focused<'a>(&self, registry: &'a ViewportRegistry) -> Option<&'a WidgetId> {
        registry.iter().find_map(|v| v.interaction.focus())
    }

    pub fn colorizer(&self) -> &ConstraintColorizer {
        &self.colorizer
    }

    fn is_current(&self, registry: &ViewportRegistry, handle: &WidgetHandle) -> bool {
        if handle.generation != self.generation {
            return false;
        }
        registry
            .get(&handle.id.key.subject)
            .map_or(false, |v| v.generation() == handle.generation && v.interaction.has_widget(&handle.id))
    }

    /// Attaches the widgets to a freshly built grid. Paint widgets and cached
    /// shape indices belong to the old grid and are dropped; seed and plane
    /// widgets survive where their subject and domain still exist.
    pub fn attach_viewports(
        &mut self,
        registry: &mut ViewportRegistry,
        landmarks: (&[LandmarkInfo], &AnnotationStore<DVec3>),
        constraints: (&[ConstraintInfo], &AnnotationStore<ConstraintData>),
        shown: &BTreeSet<usize>,
    ) {
        self.generation = registry.generation();
        self.paints.clear();
        self.shape_indices.clear();
        self.colorizer.clear();

        self.landmark_info_updated(registry, landmarks.0, landmarks.1);
        self.constraint_info_updated(registry, constraints.0, constraints.1, shown);
        debug!(
            "Attached {} seed and {} plane widget(s) to generation {}",
            self.seeds.len(),
            self.planes.len(),
            self.generation
        );
    }

    /// Creates a seed for every (viewport, domain, landmark) combination,
    /// synchronizes position, color and scale, and removes seeds whose
    /// landmark or domain is gone.
    pub fn landmark_info_updated(
        &mut self,
        registry: &mut ViewportRegistry,
        info: &[LandmarkInfo],
        placements: &AnnotationStore<DVec3>,
    ) {
        let mut valid = BTreeSet::new();
        for viewport in registry.iter_mut() {
            let label = viewport.label().to_string();
            for domain in viewport_domains(viewport) {
                for landmark in info.iter().filter(|l| l.domain == domain) {
                    let key = AnnotationKey::new(label.clone(), domain.clone(), landmark.id);
                    let seed = self.seeds.entry(key.clone()).or_insert_with(|| SeedWidget {
                        origin: None,
                        color: landmark.color,
                        scale: self.settings.landmark_size,
                        phase: WidgetPhase::Idle,
                    });
                    if let Some(&location) = placements.get(&key) {
                        if seed.origin != Some(location) {
                            seed.origin = Some(location);
                        }
                    }
                    seed.color = landmark.color;
                    seed.scale = self.settings.landmark_size;

                    viewport.interaction.add_widget(widget_id(WidgetKind::Seed, &key));
                    valid.insert(key);
                }
            }
        }

        let stale: Vec<AnnotationKey> = self.seeds.keys().filter(|k| !valid.contains(*k)).cloned().collect();
        for key in stale {
            self.seeds.remove(&key);
            if let Some(viewport) = registry.get_mut(&key.subject) {
                viewport.interaction.remove_widget(&widget_id(WidgetKind::Seed, &key));
            }
        }
    }

    pub fn landmark_size_updated(&mut self, size: f64) {
        self.settings.landmark_size = size;
        for seed in self.seeds.values_mut() {
            seed.scale = size;
        }
    }

    /// Synchronizes plane widgets with the definitions and data, drops
    /// widgets of removed constraints, then recolors every shape.
    pub fn constraint_info_updated(
        &mut self,
        registry: &mut ViewportRegistry,
        info: &[ConstraintInfo],
        data: &AnnotationStore<ConstraintData>,
        shown: &BTreeSet<usize>,
    ) {
        let mut valid_planes = BTreeSet::new();
        for viewport in registry.iter_mut() {
            let label = viewport.label().to_string();
            for domain in viewport_domains(viewport) {
                let bounds = viewport.domain_bounds(&domain);
                for constraint in info
                    .iter()
                    .filter(|c| c.domain == domain && c.kind == ConstraintKind::Plane)
                {
                    let key = AnnotationKey::new(label.clone(), domain.clone(), constraint.id);
                    let widget = self.planes.entry(key.clone()).or_insert_with(|| PlaneWidget {
                        origin: bounds.center(),
                        normal: DVec3::Z,
                        visible: false,
                        phase: WidgetPhase::Idle,
                    });
                    let plane = data.get(&key).and_then(ConstraintData::as_plane);
                    if let Some(plane) = plane {
                        widget.origin = plane.origin();
                        widget.normal = plane.normal();
                    }
                    widget.visible = plane.is_some() && shown.contains(&constraint.id);

                    viewport.interaction.add_widget(widget_id(WidgetKind::Plane, &key));
                    valid_planes.insert(key);
                }
            }
        }

        let stale: Vec<AnnotationKey> = self
            .planes
            .keys()
            .filter(|k| !valid_planes.contains(*k))
            .cloned()
            .collect();
        for key in stale {
            self.planes.remove(&key);
            if let Some(viewport) = registry.get_mut(&key.subject) {
                viewport.interaction.remove_widget(&widget_id(WidgetKind::Plane, &key));
            }
        }

        let paint_ids: BTreeSet<(&str, usize)> = info
            .iter()
            .filter(|c| c.kind == ConstraintKind::Paint)
            .map(|c| (c.domain.as_str(), c.id))
            .collect();
        let stale: Vec<AnnotationKey> = self
            .paints
            .keys()
            .filter(|k| !paint_ids.contains(&(k.domain.as_str(), k.id)))
            .cloned()
            .collect();
        for key in stale {
            self.paints.remove(&key);
            if let Some(viewport) = registry.get_mut(&key.subject) {
                viewport.interaction.remove_widget(&widget_id(WidgetKind::Paint, &key));
            }
        }

        self.update_constraint_colors(registry, data, shown);
    }

    /// Returns every widget to idle, hides paint handles and releases focus
    /// in all viewports.
    pub fn cancel_placement(&mut self, registry: &mut ViewportRegistry) {
        for seed in self.seeds.values_mut() {
            seed.phase = WidgetPhase::Idle;
        }
        for plane in self.planes.values_mut() {
            plane.phase = WidgetPhase::Idle;
        }
        for paint in self.paints.values_mut() {
            paint.handle_visible = false;
            paint.phase = WidgetPhase::Idle;
            paint.trail.clear();
        }
        for viewport in registry.iter_mut() {
            viewport.interaction.release_focus();
        }
    }

    fn placement_viewport<'a>(
        registry: &'a mut ViewportRegistry,
        subject: &str,
        domain: &str,
    ) -> Result<&'a mut Viewport> {
        let viewport = registry
            .get_mut(subject)
            .ok_or_else(|| ViewerError::UnknownViewport(subject.to_string()))?;
        if viewport.manipulator(domain).and_then(|m| m.primary_actor()).is_none() {
            return Err(ViewerError::NoPickableActor {
                subject: subject.to_string(),
                domain: domain.to_string(),
            });
        }
        Ok(viewport)
    }

    /// Activates the seed of `landmark` on `subject` and gives it focus.
    pub fn begin_landmark(
        &mut self,
        registry: &mut ViewportRegistry,
        subject: &str,
        landmark: &LandmarkInfo,
    ) -> Result<WidgetHandle> {
        Self::placement_viewport(registry, subject, &landmark.domain)?;
        self.cancel_placement(registry);

        let key = AnnotationKey::new(subject, landmark.domain.clone(), landmark.id);
        let seed = self.seeds.entry(key.clone()).or_insert_with(|| SeedWidget {
            origin: None,
            color: landmark.color,
            scale: self.settings.landmark_size,
            phase: WidgetPhase::Idle,
        });
        seed.phase = WidgetPhase::Active;

        let id = widget_id(WidgetKind::Seed, &key);
        let viewport = Self::placement_viewport(registry, subject, &landmark.domain)?;
        viewport.interaction.add_widget(id.clone());
        viewport.interaction.grab_focus(id.clone());
        debug!("Placing landmark {}", key);

        Ok(WidgetHandle {
            id,
            generation: self.generation,
        })
    }

    /// Starts placing `constraint` on `subject`. Planes are committed at once
    /// at the center of the domain's primary shape with a +Z normal; paint
    /// gets a fresh focused widget over the primary shape.
    pub fn begin_constraint(
        &mut self,
        registry: &mut ViewportRegistry,
        subject: &str,
        constraint: &ConstraintInfo,
    ) -> Result<Placement> {
        Self::placement_viewport(registry, subject, &constraint.domain)?;
        self.cancel_placement(registry);

        let key = AnnotationKey::new(subject, constraint.domain.clone(), constraint.id);
        let viewport = Self::placement_viewport(registry, subject, &constraint.domain)?;

        match constraint.kind {
            ConstraintKind::Plane => {
                let origin = viewport.domain_bounds(&constraint.domain).center();
                let plane = Plane::new(origin, DVec3::Z)?;
                Ok(Placement::Committed(Commit::Constraint {
                    key,
                    data: ConstraintData::Plane(plane),
                }))
            }
            ConstraintKind::Paint => {
                let target = viewport.primary_mesh(&constraint.domain).ok_or_else(|| {
                    ViewerError::NoPickableActor {
                        subject: subject.to_string(),
                        domain: constraint.domain.clone(),
                    }
                })?;
                self.paints.insert(
                    key.clone(),
                    PaintWidget {
                        radius: self.settings.paint_radius,
                        trail: Vec::new(),
                        handle_visible: true,
                        phase: WidgetPhase::Active,
                        target,
                    },
                );
                let id = widget_id(WidgetKind::Paint, &key);
                viewport.interaction.add_widget(id.clone());
                viewport.interaction.grab_focus(id.clone());
                debug!("Painting constraint {}", key);
                Ok(Placement::Interactive(WidgetHandle {
                    id,
                    generation: self.generation,
                }))
            }
        }
    }

    /// Handle for dragging an existing plane widget. Cancels any other
    /// placement and gives the plane focus.
    pub fn grab_plane(&mut self, registry: &mut ViewportRegistry, key: &AnnotationKey) -> Option<WidgetHandle> {
        if !self.planes.contains_key(key) {
            return None;
        }
        self.cancel_placement(registry);

        let plane = self.planes.get_mut(key)?;
        plane.phase = WidgetPhase::Active;
        let id = widget_id(WidgetKind::Plane, key);
        if let Some(viewport) = registry.get_mut(&key.subject) {
            viewport.interaction.grab_focus(id.clone());
        }
        Some(WidgetHandle {
            id,
            generation: self.generation,
        })
    }

    pub fn move_seed(&mut self, handle: &WidgetHandle, position: DVec3) -> bool {
        if handle.generation != self.generation || handle.kind() != WidgetKind::Seed {
            return false;
        }
        match self.seeds.get_mut(handle.key()) {
            Some(seed) => {
                seed.origin = Some(position);
                true
            }
            None => false,
        }
    }

    pub fn drag_plane(&mut self, handle: &WidgetHandle, origin: DVec3, normal: DVec3) -> bool {
        if handle.generation != self.generation || handle.kind() != WidgetKind::Plane {
            return false;
        }
        match self.planes.get_mut(handle.key()) {
            Some(plane) => {
                plane.origin = origin;
                plane.normal = normal;
                true
            }
            None => false,
        }
    }

    /// Adds a point to the active paint stroke.
    pub fn record_trail(&mut self, handle: &WidgetHandle, point: DVec3) -> bool {
        if handle.generation != self.generation || handle.kind() != WidgetKind::Paint {
            return false;
        }
        match self.paints.get_mut(handle.key()) {
            Some(paint) if paint.phase == WidgetPhase::Active => {
                paint.trail.push(point);
                true
            }
            _ => false,
        }
    }

    /// Picks the domain's shapes at a viewport position.
    fn pick(&self, registry: &ViewportRegistry, handle: &WidgetHandle, x: f64, y: f64) -> Option<DVec3> {
        if !self.is_current(registry, handle) {
            return None;
        }
        let viewport = registry.get(&handle.key().subject)?;
        if !viewport.interaction.picking_enabled() {
            return None;
        }
        let manipulator = viewport.manipulator(&handle.key().domain)?;
        viewport
            .renderer()
            .pick(x, y, &manipulator.pick_list)
            .map(|hit| hit.position)
    }

    /// Moves the seed to the surface point under `(x, y)`.
    pub fn pick_seed(&mut self, registry: &ViewportRegistry, handle: &WidgetHandle, x: f64, y: f64) -> Option<DVec3> {
        let position = self.pick(registry, handle, x, y)?;
        self.move_seed(handle, position).then_some(position)
    }

    /// Extends the paint stroke with the surface point under `(x, y)`.
    pub fn paint_at(&mut self, registry: &ViewportRegistry, handle: &WidgetHandle, x: f64, y: f64) -> Option<DVec3> {
        let position = self.pick(registry, handle, x, y)?;
        self.record_trail(handle, position).then_some(position)
    }

    fn shape_index(&mut self, subject: &str, domain: &str, points: &[DVec3]) -> Rc<SpatialIndex> {
        self.shape_indices
            .entry((subject.to_string(), domain.to_string()))
            .or_insert_with(|| Rc::new(SpatialIndex::new(points.to_vec())))
            .clone()
    }

    /// Reads the widget's geometry back into annotation data. Returns `None`
    /// for stale handles and for interactions that changed nothing.
    pub fn end_interaction(
        &mut self,
        registry: &mut ViewportRegistry,
        handle: &WidgetHandle,
        placements: &AnnotationStore<DVec3>,
        constraints: &AnnotationStore<ConstraintData>,
    ) -> Option<Commit> {
        if !self.is_current(registry, handle) {
            warn!("Ignoring interaction of stale widget {}", handle.key());
            return None;
        }
        let key = handle.key().clone();

        match handle.kind() {
            WidgetKind::Seed => {
                let seed = self.seeds.get_mut(&key)?;
                let position = seed.origin?;
                seed.phase = WidgetPhase::Idle;
                if let Some(viewport) = registry.get_mut(&key.subject) {
                    viewport.interaction.release_focus();
                }
                if placements.get(&key) == Some(&position) {
                    return None;
                }
                Some(Commit::Landmark { key, position })
            }
            WidgetKind::Plane => {
                let widget = self.planes.get_mut(&key)?;
                widget.phase = WidgetPhase::Idle;
                if let Some(viewport) = registry.get_mut(&key.subject) {
                    viewport.interaction.release_focus();
                }
                match Plane::new(widget.origin, widget.normal) {
                    Ok(plane) => Some(Commit::Constraint {
                        key,
                        data: ConstraintData::Plane(plane),
                    }),
                    Err(e) => {
                        warn!("Discarding plane {}: {}", key, e);
                        None
                    }
                }
            }
            WidgetKind::Paint => {
                let (target, trail, radius) = {
                    let paint = self.paints.get_mut(&key)?;
                    (paint.target.clone(), std::mem::take(&mut paint.trail), paint.radius)
                };
                let points = target.borrow().points.clone();
                let mut field = constraints
                    .get(&key)
                    .and_then(ConstraintData::as_paint)
                    .cloned()
                    .unwrap_or_else(|| PaintField::uniform(points.clone(), true));

                let index = self.shape_index(&key.subject, &key.domain, &points);
                let include = self.settings.paint_mode == PaintMode::Include;
                let mut painted = 0;
                for point in &trail {
                    for hit in index.within_radius(*point, radius) {
                        let slot = if field.points().get(hit.index) == Some(&hit.position) {
                            Some(hit.index)
                        } else {
                            field.points().iter().position(|p| *p == hit.position)
                        };
                        if let Some(slot) = slot {
                            if field.set_included(slot, include) {
                                painted += 1;
                            }
                        }
                    }
                }
                debug!("Painted {} point(s) of {}", painted, key);
                Some(Commit::Constraint {
                    key,
                    data: ConstraintData::Paint(field),
                })
            }
        }
    }

    /// Reclassifies the primary shape of every (viewport, domain) that carries
    /// a color array against the shown constraints. Returns how many shapes
    /// were recolored.
    pub fn update_constraint_colors(
        &mut self,
        registry: &ViewportRegistry,
        data: &AnnotationStore<ConstraintData>,
        shown: &BTreeSet<usize>,
    ) -> usize {
        let mut colored = 0;
        for viewport in registry.iter() {
            for domain in viewport_domains(viewport) {
                let Some(mesh) = viewport.primary_mesh(&domain) else {
                    continue;
                };
                let mut mesh = mesh.borrow_mut();
                if mesh.point_array(COLOR_ARRAY).is_none() {
                    continue;
                }
                let active: Vec<(usize, &ConstraintData)> = data
                    .domain_entries(viewport.label(), &domain)
                    .into_iter()
                    .flatten()
                    .filter(|(id, _)| shown.contains(*id))
                    .map(|(&id, d)| (id, d))
                    .collect();
                self.colorizer.colorize(viewport.label(), &domain, &mut mesh, &active);
                colored += 1;
            }
        }
        colored
    }

    /// Must be called whenever a constraint's data is replaced.
    pub fn constraint_data_written(&mut self, key: &AnnotationKey) {
        self.colorizer.invalidate(key);
    }

    pub fn invalidate_field_indices(&mut self) {
        self.colorizer.clear();
    }

    /// Re-keys widgets after ids were renumbered; widgets of ids missing from
    /// `mapping` are removed.
    pub fn remap_ids(
        &mut self,
        registry: &mut ViewportRegistry,
        target: AnnotationTarget,
        mapping: &BTreeMap<usize, usize>,
    ) {
        fn remap<W>(
            widgets: &mut BTreeMap<AnnotationKey, W>,
            kind: WidgetKind,
            registry: &mut ViewportRegistry,
            mapping: &BTreeMap<usize, usize>,
        ) {
            let old = std::mem::take(widgets);
            for key in old.keys() {
                if let Some(viewport) = registry.get_mut(&key.subject) {
                    viewport.interaction.remove_widget(&widget_id(kind, key));
                }
            }
            for (key, widget) in old {
                let Some(&id) = mapping.get(&key.id) else {
                    continue;
                };
                let new_key = key.with_id(id);
                if let Some(viewport) = registry.get_mut(&new_key.subject) {
                    viewport.interaction.add_widget(widget_id(kind, &new_key));
                }
                widgets.insert(new_key, widget);
            }
        }

        match target {
            AnnotationTarget::Landmark => remap(&mut self.seeds, WidgetKind::Seed, registry, mapping),
            AnnotationTarget::Constraint => {
                remap(&mut self.planes, WidgetKind::Plane, registry, mapping);
                remap(&mut self.paints, WidgetKind::Paint, registry, mapping);
                self.colorizer.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Actor, HeadlessRenderer, Renderer};
    use crate::geometry::Mesh;
    use shapeio::{EXCLUDED, INCLUDED};

    /// 5x5 grid of points one unit apart in the z = 0 plane.
    fn grid_mesh(domain: &str) -> Mesh {
        let mut points = Vec::new();
        for y in 0..5 {
            for x in 0..5 {
                points.push(DVec3::new(x as f64, y as f64, 0.0));
            }
        }
        let mut triangles = Vec::new();
        for y in 0..4u32 {
            for x in 0..4u32 {
                let i = y * 5 + x;
                triangles.push([i, i + 1, i + 6]);
                triangles.push([i, i + 6, i + 5]);
            }
        }
        let mut mesh = Mesh::new(points, triangles).with_domain(domain);
        mesh.set_point_array(COLOR_ARRAY, vec![1.0; 25]);
        mesh
    }

    fn registry(subjects: &[&str]) -> ViewportRegistry {
        let mut registry = ViewportRegistry::new();
        for subject in subjects {
            let mut renderer = HeadlessRenderer::new();
            renderer.add_actor(Actor::surface(grid_mesh("0").into_shared()));
            renderer.reset_camera();
            registry.register(*subject, Box::new(renderer), [0.0, 0.0, 1.0, 1.0]);
        }
        registry.enable_picking();
        registry
    }

    fn settings() -> WidgetSettings {
        WidgetSettings {
            landmark_size: 2.0,
            paint_radius: 1.0,
            paint_mode: PaintMode::Exclude,
        }
    }

    fn landmark(id: usize, domain: &str) -> LandmarkInfo {
        LandmarkInfo {
            id,
            name: format!("L{}", id),
            color: [10, 20, 30],
            domain: domain.into(),
            num_set: 0,
            comment: None,
        }
    }

    fn constraint(id: usize, kind: ConstraintKind) -> ConstraintInfo {
        ConstraintInfo {
            id,
            kind,
            domain: "0".into(),
            name: None,
            num_set: 0,
        }
    }

    #[test]
    fn seeds_track_landmark_info() {
        let mut registry = registry(&["a", "b"]);
        let mut manager = AnnotationWidgetManager::new(settings());
        let mut info = vec![landmark(0, "0"), landmark(1, "0"), landmark(2, "1")];
        let placements = AnnotationStore::new();

        manager.landmark_info_updated(&mut registry, &info, &placements);
        assert_eq!(manager.widget_count(WidgetKind::Seed), 4);
        assert_eq!(registry.get("a").unwrap().interaction.widgets().count(), 2);

        info.remove(0);
        manager.landmark_info_updated(&mut registry, &info, &placements);
        assert_eq!(manager.widget_count(WidgetKind::Seed), 2);
        assert!(manager.seed(&AnnotationKey::new("a", "0", 0)).is_none());
        assert_eq!(registry.get("b").unwrap().interaction.widgets().count(), 1);

        manager.landmark_size_updated(4.0);
        assert_eq!(manager.seed(&AnnotationKey::new("b", "0", 1)).unwrap().scale, 4.0);
    }

    #[test]
    fn constraint_widgets_track_constraint_info() {
        let mut registry = registry(&["a", "b"]);
        let mut manager = AnnotationWidgetManager::new(settings());
        manager.attach_viewports(
            &mut registry,
            (&[], &AnnotationStore::new()),
            (&[], &AnnotationStore::new()),
            &BTreeSet::new(),
        );
        let data = AnnotationStore::new();
        let shown = BTreeSet::from([0, 1, 2]);

        let mut info = vec![constraint(0, ConstraintKind::Plane), constraint(1, ConstraintKind::Paint)];
        manager.constraint_info_updated(&mut registry, &info, &data, &shown);
        assert_eq!(manager.widget_count(WidgetKind::Plane), 2);
        for subject in ["a", "b"] {
            manager.begin_constraint(&mut registry, subject, &info[1]).unwrap();
        }
        assert_eq!(manager.widget_count(WidgetKind::Paint), 2);
        for subject in ["a", "b"] {
            assert_eq!(registry.get(subject).unwrap().interaction.widgets().count(), 2);
        }

        info.push(constraint(2, ConstraintKind::Plane));
        manager.constraint_info_updated(&mut registry, &info, &data, &shown);
        assert_eq!(manager.widget_count(WidgetKind::Plane), 4);
        assert_eq!(registry.get("a").unwrap().interaction.widgets().count(), 3);

        // Dropping the paint entry drops its widget in every viewport.
        info.retain(|c| c.kind != ConstraintKind::Paint);
        manager.constraint_info_updated(&mut registry, &info, &data, &shown);
        assert_eq!(manager.widget_count(WidgetKind::Paint), 0);
        assert_eq!(manager.widget_count(WidgetKind::Plane), 4);
        for subject in ["a", "b"] {
            let viewport = registry.get(subject).unwrap();
            assert!(!viewport
                .interaction
                .has_widget(&widget_id(WidgetKind::Paint, &AnnotationKey::new(subject, "0", 1))));
            assert_eq!(viewport.interaction.widgets().count(), 2);
        }
        assert!(manager.focused(&registry).is_none());

        info.truncate(1);
        manager.constraint_info_updated(&mut registry, &info, &data, &shown);
        assert_eq!(manager.widget_count(WidgetKind::Plane), 2);
        assert!(manager.plane(&AnnotationKey::new("b", "0", 2)).is_none());
        assert_eq!(registry.get("b").unwrap().interaction.widgets().count(), 1);
    }

    #[test]
    fn landmark_placement_commits_only_changes() {
        let mut registry = registry(&["a"]);
        let mut manager = AnnotationWidgetManager::new(settings());
        manager.attach_viewports(
            &mut registry,
            (&[], &AnnotationStore::new()),
            (&[], &AnnotationStore::new()),
            &BTreeSet::new(),
        );

        let info = landmark(0, "0");
        let handle = manager.begin_landmark(&mut registry, "a", &info).unwrap();
        assert_eq!(manager.focused(&registry), Some(handle.id()));

        let position = manager.pick_seed(&registry, &handle, 0.5, 0.5).unwrap();
        assert!((position - DVec3::new(2.0, 2.0, 0.0)).length() < 1e-9);

        let mut placements = AnnotationStore::new();
        let commit = manager
            .end_interaction(&mut registry, &handle, &placements, &AnnotationStore::new())
            .unwrap();
        assert_eq!(
            commit,
            Commit::Landmark {
                key: handle.key().clone(),
                position
            }
        );
        assert!(manager.focused(&registry).is_none());

        placements.insert(handle.key().clone(), position);
        assert!(manager
            .end_interaction(&mut registry, &handle, &placements, &AnnotationStore::new())
            .is_none());
    }

    #[test]
    fn handles_from_an_old_grid_are_ignored() {
        let mut registry = registry(&["a"]);
        let mut manager = AnnotationWidgetManager::new(settings());
        let handle = manager.begin_landmark(&mut registry, "a", &landmark(0, "0")).unwrap();
        manager.move_seed(&handle, DVec3::ONE);

        registry.clear();
        let mut renderer = HeadlessRenderer::new();
        renderer.add_actor(Actor::surface(grid_mesh("0").into_shared()));
        registry.register("a", Box::new(renderer), [0.0; 4]);
        manager.attach_viewports(
            &mut registry,
            (&[landmark(0, "0")], &AnnotationStore::new()),
            (&[], &AnnotationStore::new()),
            &BTreeSet::new(),
        );

        let commit = manager.end_interaction(
            &mut registry,
            &handle,
            &AnnotationStore::new(),
            &AnnotationStore::new(),
        );
        assert!(commit.is_none());
        assert!(!manager.move_seed(&handle, DVec3::ZERO));
    }

    #[test]
    fn placement_requires_a_pickable_domain() {
        let mut registry = registry(&["a"]);
        let mut manager = AnnotationWidgetManager::new(settings());
        assert!(matches!(
            manager.begin_landmark(&mut registry, "a", &landmark(0, "7")),
            Err(ViewerError::NoPickableActor { .. })
        ));
        assert!(matches!(
            manager.begin_landmark(&mut registry, "z", &landmark(0, "0")),
            Err(ViewerError::UnknownViewport(_))
        ));
    }

    #[test]
    fn plane_placement_starts_at_the_shape_center() {
        let mut registry = registry(&["a"]);
        let mut manager = AnnotationWidgetManager::new(settings());
        let info = vec![constraint(0, ConstraintKind::Plane)];

        let Placement::Committed(Commit::Constraint { key, data }) =
            manager.begin_constraint(&mut registry, "a", &info[0]).unwrap()
        else {
            panic!("plane placement should commit at once");
        };
        let plane = data.as_plane().unwrap();
        assert_eq!(plane.origin(), DVec3::new(2.0, 2.0, 0.0));
        assert_eq!(plane.normal(), DVec3::Z);

        let mut store = AnnotationStore::new();
        store.insert(key.clone(), data);
        let mut shown = BTreeSet::new();
        manager.constraint_info_updated(&mut registry, &info, &store, &shown);
        assert!(!manager.plane(&key).unwrap().visible);

        shown.insert(0);
        manager.constraint_info_updated(&mut registry, &info, &store, &shown);
        assert!(manager.plane(&key).unwrap().visible);

        // Everything at or above z = 0 is excluded.
        let mesh = registry.get("a").unwrap().primary_mesh("0").unwrap();
        let colors = mesh.borrow().point_array(COLOR_ARRAY).unwrap().to_vec();
        assert!(colors.iter().all(|&c| c == f64::from(EXCLUDED)));

        manager.constraint_info_updated(&mut registry, &[], &store, &shown);
        assert_eq!(manager.widget_count(WidgetKind::Plane), 0);
    }

    #[test]
    fn paint_stroke_excludes_points_within_the_radius() {
        let mut registry = registry(&["a"]);
        let mut manager = AnnotationWidgetManager::new(settings());
        let info = constraint(1, ConstraintKind::Paint);

        let Placement::Interactive(handle) = manager.begin_constraint(&mut registry, "a", &info).unwrap()
        else {
            panic!("paint placement should be interactive");
        };
        assert!(manager.record_trail(&handle, DVec3::new(0.0, 0.0, 0.0)));

        let Some(Commit::Constraint { data, .. }) = manager.end_interaction(
            &mut registry,
            &handle,
            &AnnotationStore::new(),
            &AnnotationStore::new(),
        ) else {
            panic!("paint stroke should commit");
        };
        let field = data.as_paint().unwrap();
        assert_eq!(field.len(), 25);
        // (0,0), (1,0) and (0,1) lie within one unit of the origin.
        assert_eq!(field.excluded_count(), 3);
        assert_eq!(field.scalars()[0], EXCLUDED);
        assert_eq!(field.scalars()[6], INCLUDED);

        // Focus and the active phase survive the stroke.
        assert_eq!(manager.focused(&registry), Some(handle.id()));
        assert!(manager.paint(handle.key()).unwrap().trail.is_empty());

        manager.cancel_placement(&mut registry);
        let paint = manager.paint(handle.key()).unwrap();
        assert!(!paint.handle_visible);
        assert_eq!(paint.phase, WidgetPhase::Idle);
        assert!(manager.focused(&registry).is_none());
        assert!(!manager.record_trail(&handle, DVec3::ZERO));
    }

    #[test]
    fn include_mode_repaints_an_existing_field() {
        let mut registry = registry(&["a"]);
        let mut manager = AnnotationWidgetManager::new(WidgetSettings {
            paint_mode: PaintMode::Include,
            ..settings()
        });
        let info = constraint(0, ConstraintKind::Paint);
        let Placement::Interactive(handle) = manager.begin_constraint(&mut registry, "a", &info).unwrap()
        else {
            panic!("paint placement should be interactive");
        };

        let points = registry.get("a").unwrap().primary_mesh("0").unwrap().borrow().points.clone();
        let mut store = AnnotationStore::new();
        store.insert(
            handle.key().clone(),
            ConstraintData::Paint(PaintField::uniform(points, false)),
        );

        manager.record_trail(&handle, DVec3::new(4.0, 4.0, 0.0));
        let Some(Commit::Constraint { data, .. }) =
            manager.end_interaction(&mut registry, &handle, &AnnotationStore::new(), &store)
        else {
            panic!("paint stroke should commit");
        };
        assert_eq!(data.as_paint().unwrap().excluded_count(), 22);
    }

    #[test]
    fn remapping_rekeys_widgets() {
        let mut registry = registry(&["a"]);
        let mut manager = AnnotationWidgetManager::new(settings());
        let info = vec![landmark(0, "0"), landmark(1, "0"), landmark(2, "0")];
        manager.landmark_info_updated(&mut registry, &info, &AnnotationStore::new());

        let mapping = BTreeMap::from([(0, 0), (2, 1)]);
        manager.remap_ids(&mut registry, AnnotationTarget::Landmark, &mapping);

        assert_eq!(manager.widget_count(WidgetKind::Seed), 2);
        assert!(manager.seed(&AnnotationKey::new("a", "0", 1)).is_some());
        assert!(manager.seed(&AnnotationKey::new("a", "0", 2)).is_none());
        let ids: Vec<usize> = registry
            .get("a")
            .unwrap()
            .interaction
            .widgets()
            .map(|w| w.key.id)
            .collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
