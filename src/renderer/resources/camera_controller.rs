use std::collections::HashSet;
use std::f32::consts::{FRAC_PI_2, TAU};

use glam::{Mat4, Vec3};
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Keeps the camera from flipping over the poles.
const MAX_PITCH: f32 = FRAC_PI_2 - 0.1;

/// First-person camera: WASD to move, Space/Shift for up and down, mouse to look.
///
/// Yaw 0 looks down -Z.
pub struct CameraController {
    position: Vec3,
    /// Radians around +Y.
    yaw: f32,
    /// Radians, clamped to `±MAX_PITCH`.
    pitch: f32,
    keys_pressed: HashSet<KeyCode>,
    mouse_delta: (f32, f32),
    /// World units per second.
    speed: f32,
    /// Radians per pixel of mouse motion.
    sensitivity: f32,
}

impl CameraController {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            keys_pressed: HashSet::new(),
            mouse_delta: (0.0, 0.0),
            speed: 5.0,
            sensitivity: 0.002,
        }
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed.max(0.0);
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity.max(0.0);
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Applies accumulated mouse motion, then moves along the held keys.
    pub fn update(&mut self, delta_time: f32) {
        self.apply_mouse_look();
        self.apply_movement(delta_time);
    }

    pub fn handle_key_event(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(code) = event.physical_key {
            self.set_key(code, event.state == ElementState::Pressed);
        }
    }

    pub fn set_key(&mut self, code: KeyCode, pressed: bool) {
        if pressed {
            self.keys_pressed.insert(code);
        } else {
            self.keys_pressed.remove(&code);
        }
    }

    /// Motion accumulates until the next `update`.
    pub fn handle_mouse_motion(&mut self, delta: (f32, f32)) {
        self.mouse_delta.0 += delta.0;
        self.mouse_delta.1 += delta.1;
    }

    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            -self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            -self.yaw.cos() * self.pitch.cos(),
        )
    }

    /// Horizontal right vector; pitch does not tilt it.
    pub fn right(&self) -> Vec3 {
        Vec3::new(self.yaw.cos(), 0.0, -self.yaw.sin())
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    fn apply_movement(&mut self, delta_time: f32) {
        let mut direction = Vec3::ZERO;
        for key in &self.keys_pressed {
            match key {
                KeyCode::KeyW => direction += self.forward(),
                KeyCode::KeyS => direction -= self.forward(),
                KeyCode::KeyD => direction += self.right(),
                KeyCode::KeyA => direction -= self.right(),
                KeyCode::Space => direction += Vec3::Y,
                KeyCode::ShiftLeft | KeyCode::ShiftRight => direction -= Vec3::Y,
                _ => {}
            }
        }

        if let Some(direction) = direction.try_normalize() {
            self.position += direction * self.speed * delta_time;
        }
    }

    fn apply_mouse_look(&mut self) {
        let (dx, dy) = std::mem::take(&mut self.mouse_delta);
        if dx == 0.0 && dy == 0.0 {
            return;
        }

        self.yaw = (self.yaw - dx * self.sensitivity).rem_euclid(TAU);
        self.pitch = (self.pitch - dy * self.sensitivity).clamp(-MAX_PITCH, MAX_PITCH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn initially_looks_down_negative_z() {
        let camera = CameraController::new(Vec3::ZERO);
        assert!(approx(camera.forward(), Vec3::NEG_Z));
        assert!(approx(camera.right(), Vec3::X));
    }

    #[test]
    fn holding_w_moves_forward_at_speed() {
        let mut camera = CameraController::new(Vec3::ZERO);
        camera.set_speed(2.0);
        camera.set_key(KeyCode::KeyW, true);
        camera.update(0.5);
        assert!(approx(camera.position(), Vec3::new(0.0, 0.0, -1.0)));

        camera.set_key(KeyCode::KeyW, false);
        camera.update(0.5);
        assert!(approx(camera.position(), Vec3::new(0.0, 0.0, -1.0)));
    }

    #[test]
    fn opposing_keys_cancel() {
        let mut camera = CameraController::new(Vec3::ONE);
        camera.set_key(KeyCode::KeyA, true);
        camera.set_key(KeyCode::KeyD, true);
        camera.update(1.0);
        assert!(approx(camera.position(), Vec3::ONE));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = CameraController::new(Vec3::ZERO);
        camera.set_sensitivity(1.0);
        camera.handle_mouse_motion((0.0, -100.0));
        camera.update(0.0);
        assert!(camera.forward().y > 0.99);
        assert!(camera.forward().y < 1.0);
    }

    #[test]
    fn mouse_motion_is_consumed_by_update() {
        let mut camera = CameraController::new(Vec3::ZERO);
        camera.set_sensitivity(0.01);
        camera.handle_mouse_motion((10.0, 0.0));
        camera.update(0.0);
        let after_first = camera.forward();
        camera.update(0.0);
        assert!(approx(camera.forward(), after_first));
        assert!(!approx(after_first, Vec3::NEG_Z));
    }

    #[test]
    fn view_matrix_moves_the_eye_to_the_origin() {
        let camera = CameraController::new(Vec3::new(1.0, 2.0, 3.0));
        let eye = camera.view_matrix().transform_point3(Vec3::new(1.0, 2.0, 3.0));
        assert!(approx(eye, Vec3::ZERO));
    }

    #[test]
    fn negative_speed_is_clamped_to_zero() {
        let mut camera = CameraController::new(Vec3::ZERO);
        camera.set_speed(-3.0);
        assert_eq!(camera.speed(), 0.0);
    }
}
