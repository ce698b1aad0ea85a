//! Viewports of the grid and the registry that owns them.

use crate::annotation::WidgetId;
use crate::backend::{ActorId, Renderer};
use crate::geometry::{Bounds, SharedMesh};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Picks and drives widgets for one domain. The first entry of `pick_list`
/// is the domain's primary shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Manipulator {
    pub domain: String,
    pub pick_list: Vec<ActorId>,
}

impl Manipulator {
    #[inline]
    pub fn primary_actor(&self) -> Option<ActorId> {
        self.pick_list.first().copied()
    }
}

/// Widgets registered in one viewport plus the single focus slot.
#[derive(Debug, Default)]
pub struct InteractionManager {
    widgets: BTreeSet<WidgetId>,
    focus: Option<WidgetId>,
    picking_enabled: bool,
}

impl InteractionManager {
    pub fn add_widget(&mut self, id: WidgetId) -> bool {
        self.widgets.insert(id)
    }

    pub fn remove_widget(&mut self, id: &WidgetId) -> bool {
        if self.focus.as_ref() == Some(id) {
            self.focus = None;
        }
        self.widgets.remove(id)
    }

    pub fn has_widget(&self, id: &WidgetId) -> bool {
        self.widgets.contains(id)
    }

    pub fn widgets(&self) -> impl Iterator<Item = &WidgetId> {
        self.widgets.iter()
    }

    pub fn grab_focus(&mut self, id: WidgetId) {
        self.focus = Some(id);
    }

    pub fn release_focus(&mut self) -> Option<WidgetId> {
        self.focus.take()
    }

    #[inline]
    pub fn focus(&self) -> Option<&WidgetId> {
        self.focus.as_ref()
    }

    #[inline]
    pub fn picking_enabled(&self) -> bool {
        self.picking_enabled
    }

    pub fn set_picking(&mut self, enabled: bool) {
        self.picking_enabled = enabled;
    }
}

/// One subject's cell of the grid.
pub struct Viewport {
    label: String,
    renderer: Box<dyn Renderer>,
    manipulators: BTreeMap<String, Manipulator>,
    pub interaction: InteractionManager,
    generation: u64,
    rect: [f64; 4],
}

impl Viewport {
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> &mut dyn Renderer {
        self.renderer.as_mut()
    }

    pub fn manipulator(&self, domain: &str) -> Option<&Manipulator> {
        self.manipulators.get(domain)
    }

    pub fn manipulators(&self) -> impl Iterator<Item = &Manipulator> {
        self.manipulators.values()
    }

    /// Grid generation this viewport was registered in.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Normalized `[xmin, ymin, xmax, ymax]` cell.
    #[inline]
    pub fn rect(&self) -> [f64; 4] {
        self.rect
    }

    /// Surface of the domain's primary actor.
    pub fn primary_mesh(&self, domain: &str) -> Option<SharedMesh> {
        let id = self.manipulator(domain)?.primary_actor()?;
        self.renderer.actor(id)?.mesh().cloned()
    }

    pub fn domain_bounds(&self, domain: &str) -> Bounds {
        self.manipulator(domain)
            .and_then(Manipulator::primary_actor)
            .and_then(|id| self.renderer.actor(id))
            .map(|actor| actor.bounds())
            .unwrap_or_default()
    }

    /// Rebuilds one manipulator per domain found on the pickable surfaces,
    /// in actor order.
    fn discover_manipulators(&mut self) {
        self.manipulators.clear();
        for id in self.renderer.actors() {
            let Some(actor) = self.renderer.actor(id) else {
                continue;
            };
            if !actor.pickable {
                continue;
            }
            let Some(domain) = actor.domain() else {
                continue;
            };
            self.manipulators
                .entry(domain.clone())
                .or_insert_with(|| Manipulator {
                    domain,
                    pick_list: Vec::new(),
                })
                .pick_list
                .push(id);
        }
    }
}

/// The viewports of the current grid, in grid order.
#[derive(Default)]
pub struct ViewportRegistry {
    viewports: Vec<Viewport>,
    generation: u64,
}

impl ViewportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a populated renderer under `label`, replacing any viewport with
    /// the same label.
    pub fn register(
        &mut self,
        label: impl Into<String>,
        renderer: Box<dyn Renderer>,
        rect: [f64; 4],
    ) -> &mut Viewport {
        let label = label.into();
        self.viewports.retain(|v| v.label != label);

        let mut viewport = Viewport {
            label,
            renderer,
            manipulators: BTreeMap::new(),
            interaction: InteractionManager::default(),
            generation: self.generation,
            rect,
        };
        viewport.discover_manipulators();
        debug!(
            "Registered viewport {} with {} manipulator(s)",
            viewport.label,
            viewport.manipulators.len()
        );

        self.viewports.push(viewport);
        let last = self.viewports.len() - 1;
        &mut self.viewports[last]
    }

    pub fn get(&self, label: &str) -> Option<&Viewport> {
        self.viewports.iter().find(|v| v.label == label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut Viewport> {
        self.viewports.iter_mut().find(|v| v.label == label)
    }

    pub fn first(&self) -> Option<&Viewport> {
        self.viewports.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Viewport> {
        self.viewports.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Viewport> {
        self.viewports.iter_mut()
    }

    pub fn labels(&self) -> Vec<String> {
        self.viewports.iter().map(|v| v.label.clone()).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.viewports.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.viewports.is_empty()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tears down every viewport and starts a new generation.
    pub fn clear(&mut self) {
        self.viewports.clear();
        self.generation += 1;
    }

    pub fn enable_picking(&mut self) {
        for viewport in &mut self.viewports {
            viewport.interaction.set_picking(true);
        }
    }

    pub fn disable_picking(&mut self) {
        for viewport in &mut self.viewports {
            viewport.interaction.set_picking(false);
        }
    }

    pub fn render_all(&mut self) {
        for viewport in &mut self.viewports {
            viewport.renderer.render();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Actor, GlyphSet, HeadlessRenderer};
    use crate::geometry::Mesh;
    use glam::DVec3;

    fn tri(domain: &str) -> Actor {
        Actor::surface(
            Mesh::new(vec![DVec3::ZERO, DVec3::X, DVec3::Y], vec![[0, 1, 2]])
                .with_domain(domain)
                .into_shared(),
        )
    }

    #[test]
    fn register_finds_one_manipulator_per_pickable_domain() {
        let mut renderer = HeadlessRenderer::new();
        let a = renderer.add_actor(tri("0"));
        renderer.add_actor(tri("1"));
        let again = renderer.add_actor(tri("0"));
        renderer.add_actor(Actor::glyphs(GlyphSet::new(vec![DVec3::ZERO], vec![[0, 0, 0]], 1.0)));
        let mut hidden = tri("2");
        hidden.pickable = false;
        renderer.add_actor(hidden);

        let mut registry = ViewportRegistry::new();
        let viewport = registry.register("sub01", Box::new(renderer), [0.0, 0.0, 1.0, 1.0]);

        assert_eq!(viewport.manipulators().count(), 2);
        let zero = viewport.manipulator("0").unwrap();
        assert_eq!(zero.pick_list, vec![a, again]);
        assert_eq!(zero.primary_actor(), Some(a));
        assert!(viewport.manipulator("2").is_none());
        assert!(viewport.primary_mesh("1").is_some());
    }

    #[test]
    fn clear_starts_a_new_generation() {
        let mut registry = ViewportRegistry::new();
        registry.register("a", Box::new(HeadlessRenderer::new()), [0.0; 4]);
        assert_eq!(registry.get("a").unwrap().generation(), 0);

        registry.clear();
        assert!(registry.is_empty());
        registry.register("a", Box::new(HeadlessRenderer::new()), [0.0; 4]);
        assert_eq!(registry.get("a").unwrap().generation(), 1);
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn picking_toggles_every_viewport() {
        let mut registry = ViewportRegistry::new();
        registry.register("a", Box::new(HeadlessRenderer::new()), [0.0; 4]);
        registry.register("b", Box::new(HeadlessRenderer::new()), [0.0; 4]);
        registry.enable_picking();
        assert!(registry.iter().all(|v| v.interaction.picking_enabled()));
        registry.disable_picking();
        assert!(registry.iter().all(|v| !v.interaction.picking_enabled()));
        assert_eq!(registry.labels(), vec!["a".to_string(), "b".to_string()]);
    }
}
