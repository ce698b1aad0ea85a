use super::{Actor, ActorGeometry, ActorId, PickResult, Renderer};
use crate::camera::Camera;
use glam::DVec3;
use std::collections::BTreeMap;

/// In-memory renderer: keeps actors and a camera, picks by ray casting
/// against surface triangles, and counts frames instead of drawing them.
pub struct HeadlessRenderer {
    actors: BTreeMap<ActorId, Actor>,
    next_id: u64,
    camera: Camera,
    viewport: [f64; 4],
    background: DVec3,
    /// Width over height of the drawable area.
    pub aspect: f64,
    frames: u64,
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self {
            actors: BTreeMap::new(),
            next_id: 0,
            camera: Camera::default(),
            viewport: [0.0, 0.0, 1.0, 1.0],
            background: DVec3::ZERO,
            aspect: 1.0,
            frames: 0,
        }
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[inline]
    pub fn background(&self) -> DVec3 {
        self.background
    }

    /// World-space ray through a normalized screen position.
    fn ray(&self, x: f64, y: f64) -> (DVec3, DVec3) {
        let cam = &self.camera;
        let forward = cam.direction_of_projection();
        let right = forward.cross(cam.view_up).normalize_or_zero();
        let up = right.cross(forward);
        let tan_half = (cam.view_angle_deg.to_radians() * 0.5).tan();

        let dir = forward
            + right * ((2.0 * x - 1.0) * tan_half * self.aspect)
            + up * ((2.0 * y - 1.0) * tan_half);
        (cam.position, dir.normalize_or_zero())
    }
}

/// Möller–Trumbore; returns the ray parameter of the hit.
fn intersect_triangle(origin: DVec3, dir: DVec3, tri: [DVec3; 3]) -> Option<f64> {
    const EPS: f64 = 1e-12;
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPS {
        return None;
    }
    let inv = 1.0 / det;
    let s = origin - tri[0];
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    (t > EPS).then_some(t)
}

impl Renderer for HeadlessRenderer {
    fn add_actor(&mut self, actor: Actor) -> ActorId {
        let id = ActorId(self.next_id);
        self.next_id += 1;
        self.actors.insert(id, actor);
        id
    }

    fn remove_actor(&mut self, id: ActorId) -> Option<Actor> {
        self.actors.remove(&id)
    }

    fn actors(&self) -> Vec<ActorId> {
        self.actors.keys().copied().collect()
    }

    fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }

    fn active_camera(&self) -> &Camera {
        &self.camera
    }

    fn active_camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    fn set_active_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    fn pick(&self, x: f64, y: f64, pick_list: &[ActorId]) -> Option<PickResult> {
        let (origin, dir) = self.ray(x, y);
        if dir == DVec3::ZERO {
            return None;
        }

        let mut best: Option<(f64, PickResult)> = None;
        for (&id, actor) in &self.actors {
            if !actor.pickable || !actor.visible {
                continue;
            }
            if !pick_list.is_empty() && !pick_list.contains(&id) {
                continue;
            }
            let ActorGeometry::Surface(mesh) = &actor.geometry else {
                continue;
            };

            let mesh = mesh.borrow();
            for (ti, tri) in mesh.triangles.iter().enumerate() {
                let Some(corners) = mesh.triangle(ti) else {
                    continue;
                };
                let Some(t) = intersect_triangle(origin, dir, corners) else {
                    continue;
                };
                if best.as_ref().map_or(true, |(bt, _)| t < *bt) {
                    let position = origin + dir * t;
                    let point_id = tri
                        .iter()
                        .map(|&v| v as usize)
                        .min_by(|&a, &b| {
                            mesh.points[a]
                                .distance_squared(position)
                                .total_cmp(&mesh.points[b].distance_squared(position))
                        });
                    best = Some((
                        t,
                        PickResult {
                            actor: id,
                            position,
                            point_id,
                        },
                    ));
                }
            }
        }

        best.map(|(_, hit)| hit)
    }

    fn render(&mut self) {
        self.frames += 1;
    }

    fn viewport(&self) -> [f64; 4] {
        self.viewport
    }

    fn set_viewport(&mut self, rect: [f64; 4]) {
        self.viewport = rect;
    }

    fn set_background(&mut self, rgb: DVec3) {
        self.background = rgb;
    }
}
