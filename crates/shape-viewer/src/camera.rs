use crate::geometry::Bounds;
use glam::{DMat4, DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Smallest allowed ratio between the near and far clipping planes.
const NEAR_CLIPPING_RATIO: f64 = 0.001;

/// Perspective camera described by position, focal point and view-up.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: DVec3,
    pub focal_point: DVec3,
    pub view_up: DVec3,
    /// Full vertical view angle in degrees.
    pub view_angle_deg: f64,
    pub clipping_range: [f64; 2],
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: DVec3::Z,
            focal_point: DVec3::ZERO,
            view_up: DVec3::Y,
            view_angle_deg: 30.0,
            clipping_range: [0.01, 1000.01],
        }
    }
}

/// The part of a camera that is synchronized between viewports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub position: DVec3,
    pub view_up: DVec3,
}

impl Camera {
    #[inline]
    pub fn distance(&self) -> f64 {
        self.position.distance(self.focal_point)
    }

    /// Unit vector from the position towards the focal point.
    #[inline]
    pub fn direction_of_projection(&self) -> DVec3 {
        (self.focal_point - self.position).normalize_or_zero()
    }

    /// Points the camera along `direction`, keeping position and distance.
    pub fn set_direction_of_projection(&mut self, direction: DVec3) {
        let dir = direction.normalize_or_zero();
        if dir == DVec3::ZERO {
            return;
        }
        let distance = self.distance().max(f64::EPSILON);
        self.focal_point = self.position + dir * distance;
    }

    #[inline]
    pub fn state(&self) -> CameraState {
        CameraState {
            position: self.position,
            view_up: self.view_up,
        }
    }

    /// Rotates the position about the view-up vector centered at the focal point.
    pub fn azimuth(&mut self, angle_rad: f64) {
        let axis = self.view_up.normalize_or_zero();
        if axis == DVec3::ZERO {
            return;
        }
        let rot = DQuat::from_axis_angle(axis, angle_rad);
        self.position = self.focal_point + rot * (self.position - self.focal_point);
    }

    /// Rotates the position about the camera's right axis. Rotations that
    /// would bring the view direction within a degree of view-up are refused.
    pub fn elevation(&mut self, angle_rad: f64) -> bool {
        let dir = self.direction_of_projection();
        let right = dir.cross(self.view_up).normalize_or_zero();
        if right == DVec3::ZERO {
            return false;
        }
        let rot = DQuat::from_axis_angle(right, angle_rad);
        let offset = rot * (self.position - self.focal_point);
        let new_dir = (-offset).normalize_or_zero();
        if new_dir.dot(self.view_up.normalize_or_zero()).abs() > 1.0f64.to_radians().cos() {
            return false;
        }
        self.position = self.focal_point + offset;
        self.orthogonalize_view_up();
        true
    }

    /// Moves towards the focal point by `factor` (> 1 moves closer).
    pub fn dolly(&mut self, factor: f64) {
        if factor <= 0.0 {
            return;
        }
        let distance = self.distance() / factor;
        self.set_distance(distance);
    }

    pub fn set_distance(&mut self, distance: f64) {
        let dir = self.direction_of_projection();
        if dir == DVec3::ZERO {
            return;
        }
        self.position = self.focal_point - dir * distance;
    }

    /// Makes view-up perpendicular to the view direction.
    pub fn orthogonalize_view_up(&mut self) {
        let dir = self.direction_of_projection();
        let right = dir.cross(self.view_up);
        if right.length_squared() < 1e-24 {
            return;
        }
        self.view_up = right.cross(dir).normalize();
    }

    pub fn view_matrix(&self) -> DMat4 {
        DMat4::look_at_rh(self.position, self.focal_point, self.view_up)
    }

    /// Fits `bounds` into the view: focal point at the center, bounding sphere
    /// filling the view angle, direction of projection kept.
    pub fn reset_to_bounds(&mut self, bounds: &Bounds) {
        if bounds.is_empty() {
            return;
        }
        let mut dir = self.direction_of_projection();
        if dir == DVec3::ZERO {
            dir = -DVec3::Z;
        }
        if dir.cross(self.view_up).length_squared() < 1e-24 {
            self.view_up = if dir.y.abs() < 0.9 { DVec3::Y } else { DVec3::Z };
        }

        let center = bounds.center();
        let mut radius = bounds.diagonal() * 0.5;
        if radius <= 0.0 {
            radius = 0.5;
        }
        let half_angle = (self.view_angle_deg.to_radians() * 0.5).max(1e-3);
        let distance = radius / half_angle.sin();

        self.focal_point = center;
        self.position = center - dir * distance;
        self.orthogonalize_view_up();
        self.reset_clipping_range(bounds);
    }

    /// Near/far planes bracketing `bounds` along the view direction.
    pub fn reset_clipping_range(&mut self, bounds: &Bounds) {
        if bounds.is_empty() {
            return;
        }
        let dir = self.direction_of_projection();
        let (mut near, mut far) = (f64::INFINITY, f64::NEG_INFINITY);
        for corner in bounds.corners() {
            let d = (corner - self.position).dot(dir);
            near = near.min(d);
            far = far.max(d);
        }

        // A little slack so geometry on the planes is not clipped.
        let slack = (far - near).max(1e-6) * 0.005;
        far += slack;
        near -= slack;
        if far <= 0.0 {
            far = 1.0;
        }
        near = near.max(far * NEAR_CLIPPING_RATIO);
        self.clipping_range = [near, far];
    }
}

/// Pointer input in viewport-normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Pressed,
    Released,
    Moved { x: f64, y: f64 },
    /// Positive values scroll up, zooming in.
    Wheel(f64),
}

/// Drag to orbit about the focal point, wheel to dolly.
pub struct OrbitController {
    mouse_down: bool,
    last_mouse: Option<(f64, f64)>,
    /// Radians per normalized unit of pointer travel.
    pub rotate_speed: f64,
    pub min_distance: f64,
    pub max_distance: f64,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self::new()
    }
}

impl OrbitController {
    /// Creates a new controller with default state.
    pub fn new() -> Self {
        Self {
            mouse_down: false,
            last_mouse: None,
            rotate_speed: std::f64::consts::PI,
            min_distance: 1e-3,
            max_distance: 1e6,
        }
    }

    /// Applies one pointer event; returns whether the camera moved.
    pub fn handle_event(&mut self, event: &PointerEvent, camera: &mut Camera) -> bool {
        match *event {
            PointerEvent::Pressed => {
                self.mouse_down = true;
                false
            }
            PointerEvent::Released => {
                self.mouse_down = false;
                false
            }
            PointerEvent::Moved { x, y } => self.handle_cursor_orbit((x, y), camera),
            PointerEvent::Wheel(delta) => self.handle_scroll(delta, camera),
        }
    }

    /// Scales the focal distance by `1.1^-delta`.
    fn handle_scroll(&mut self, delta: f64, camera: &mut Camera) -> bool {
        let zoom = 1.1_f64.powf(-delta);
        let distance = (camera.distance() * zoom).clamp(self.min_distance, self.max_distance);
        camera.set_distance(distance);
        true
    }

    /// Rotates the camera around the focal point while the button is held.
    fn handle_cursor_orbit(&mut self, xy: (f64, f64), camera: &mut Camera) -> bool {
        let mut moved = false;
        if let Some(last) = self.last_mouse {
            if self.mouse_down {
                let dx = (xy.0 - last.0) * self.rotate_speed;
                let dy = (xy.1 - last.1) * self.rotate_speed;

                camera.azimuth(-dx);
                // Refused near the poles, which keeps view-up valid.
                camera.elevation(-dy);
                moved = dx != 0.0 || dy != 0.0;
            }
        }
        self.last_mouse = Some(xy);
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn reset_fits_bounding_sphere() {
        let mut camera = Camera::default();
        let bounds = Bounds::new(DVec3::splat(-1.0), DVec3::splat(1.0));
        camera.reset_to_bounds(&bounds);

        let radius = 3f64.sqrt();
        let expected = radius / 15f64.to_radians().sin();
        assert!((camera.distance() - expected).abs() < EPS);
        assert_eq!(camera.focal_point, DVec3::ZERO);
        assert!((camera.direction_of_projection() - (-DVec3::Z)).length() < EPS);
        assert!(camera.clipping_range[0] > 0.0);
        assert!(camera.clipping_range[0] < camera.clipping_range[1]);
    }

    #[test]
    fn azimuth_keeps_distance() {
        let mut camera = Camera {
            position: DVec3::new(0.0, 0.0, 5.0),
            ..Default::default()
        };
        camera.azimuth(std::f64::consts::FRAC_PI_2);
        assert!((camera.distance() - 5.0).abs() < EPS);
        assert!((camera.position - DVec3::new(5.0, 0.0, 0.0)).length() < EPS);
    }

    #[test]
    fn elevation_refuses_to_cross_the_pole() {
        let mut camera = Camera {
            position: DVec3::new(0.0, 0.0, 5.0),
            ..Default::default()
        };
        let before = camera.clone();
        assert!(!camera.elevation(std::f64::consts::FRAC_PI_2));
        assert_eq!(camera, before);
        assert!(camera.elevation(0.3));
        assert!(camera.view_up.dot(camera.direction_of_projection()).abs() < 1e-9);
    }

    #[test]
    fn wheel_dollies_by_powers_of_1_1() {
        let mut camera = Camera {
            position: DVec3::new(0.0, 0.0, 10.0),
            ..Default::default()
        };
        let mut controller = OrbitController::new();
        assert!(controller.handle_event(&PointerEvent::Wheel(1.0), &mut camera));
        assert!((camera.distance() - 10.0 / 1.1).abs() < EPS);

        controller.max_distance = 20.0;
        controller.handle_event(&PointerEvent::Wheel(-100.0), &mut camera);
        assert!((camera.distance() - 20.0).abs() < EPS);
    }

    #[test]
    fn drag_orbits_only_while_pressed() {
        let mut camera = Camera {
            position: DVec3::new(0.0, 0.0, 4.0),
            ..Default::default()
        };
        let mut controller = OrbitController::new();
        let start = camera.clone();
        assert!(!controller.handle_event(&PointerEvent::Moved { x: 0.5, y: 0.5 }, &mut camera));
        assert!(!controller.handle_event(&PointerEvent::Moved { x: 0.6, y: 0.5 }, &mut camera));
        assert_eq!(camera, start);

        controller.handle_event(&PointerEvent::Pressed, &mut camera);
        assert!(controller.handle_event(&PointerEvent::Moved { x: 0.7, y: 0.55 }, &mut camera));
        assert_ne!(camera.position, start.position);
        assert!((camera.distance() - 4.0).abs() < 1e-9);
    }
}
