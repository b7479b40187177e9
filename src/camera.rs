//! First-person camera for a right-handed, Z-up world.
//!
//! - [`Camera`] holds eye position, yaw and pitch
//! - [`Projection`] holds the perspective parameters and follows the back buffer
//! - [`CameraController`] turns routed input into camera motion
//!
//! Yaw is measured from +X toward +Y, pitch is positive looking up.

use std::f32::consts::FRAC_PI_2;

use cgmath::{InnerSpace, Matrix4, Point3, Rad, Vector3, perspective};
use instant::Duration;

use crate::input::{InputEvent, Key, MouseButton};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

const SAFE_FRAC_PI_2: f32 = FRAC_PI_2 - 0.0001;

pub const START_EYE: [f32; 3] = [5.5, -5.5, 3.0];
/// Looking from the start position back across the grid.
pub const START_YAW: Rad<f32> = Rad(std::f32::consts::PI * 0.75);
pub const START_PITCH: Rad<f32> = Rad(-std::f32::consts::PI / 6.0);

pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 200.0;
/// Field of view right after device creation.
pub const CREATE_FOVY: Rad<f32> = Rad(std::f32::consts::FRAC_PI_4);
/// Field of view once the back buffer is known.
pub const RESET_FOVY: Rad<f32> = Rad(std::f32::consts::FRAC_PI_3);
pub const MOVE_SPEED: f32 = 4.0;
pub const LOOK_SENSITIVITY: f32 = 0.4;

#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub position: Point3<f32>,
    yaw: Rad<f32>,
    pitch: Rad<f32>,
}

impl Camera {
    pub fn new<V: Into<Point3<f32>>, Y: Into<Rad<f32>>, P: Into<Rad<f32>>>(
        position: V,
        yaw: Y,
        pitch: P,
    ) -> Self {
        Self {
            position: position.into(),
            yaw: yaw.into(),
            pitch: Rad(pitch.into().0.clamp(-SAFE_FRAC_PI_2, SAFE_FRAC_PI_2)),
        }
    }

    pub fn yaw(&self) -> Rad<f32> {
        self.yaw
    }

    pub fn pitch(&self) -> Rad<f32> {
        self.pitch
    }

    pub fn forward(&self) -> Vector3<f32> {
        let (sin_pitch, cos_pitch) = self.pitch.0.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.0.sin_cos();
        Vector3::new(cos_pitch * cos_yaw, cos_pitch * sin_yaw, sin_pitch).normalize()
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_to_rh(self.position, self.forward(), Vector3::unit_z())
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(START_EYE, START_YAW, START_PITCH)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Projection {
    aspect: f32,
    fovy: Rad<f32>,
    znear: f32,
    zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: width as f32 / height.max(1) as f32,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn fovy(&self) -> Rad<f32> {
        self.fovy
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Axis {
    positive: f32,
    negative: f32,
}

impl Axis {
    fn value(&self) -> f32 {
        self.positive - self.negative
    }
}

/// Keyboard and mouse driven camera motion.
///
/// W/S move along the view direction, A/D strafe, E/Q move along +Z/-Z and
/// the arrow keys turn. Dragging with the right mouse button looks around,
/// the wheel moves along the view direction.
#[derive(Debug)]
pub struct CameraController {
    forward: Axis,
    right: Axis,
    up: Axis,
    turn_yaw: Axis,
    turn_pitch: Axis,
    captured: bool,
    last_cursor: Option<(f64, f64)>,
    rotate_horizontal: f32,
    rotate_vertical: f32,
    scroll: f32,
    speed: f32,
    sensitivity: f32,
}

impl CameraController {
    pub fn new(speed: f32, sensitivity: f32) -> Self {
        Self {
            forward: Axis::default(),
            right: Axis::default(),
            up: Axis::default(),
            turn_yaw: Axis::default(),
            turn_pitch: Axis::default(),
            captured: false,
            last_cursor: None,
            rotate_horizontal: 0.0,
            rotate_vertical: 0.0,
            scroll: 0.0,
            speed,
            sensitivity,
        }
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    /// Returns whether the event was used.
    pub fn handle_input(&mut self, event: &InputEvent) -> bool {
        match *event {
            InputEvent::MouseDown {
                button: MouseButton::Right,
                x,
                y,
            } => {
                self.captured = true;
                self.last_cursor = Some((x, y));
                true
            }
            InputEvent::MouseUp {
                button: MouseButton::Right,
                ..
            } => {
                self.captured = false;
                self.last_cursor = None;
                true
            }
            InputEvent::MouseMove { x, y } => {
                if !self.captured {
                    return false;
                }
                if let Some((lx, ly)) = self.last_cursor {
                    self.rotate_horizontal += (x - lx) as f32;
                    self.rotate_vertical += (y - ly) as f32;
                }
                self.last_cursor = Some((x, y));
                true
            }
            InputEvent::Wheel { delta } => {
                self.scroll += delta;
                true
            }
            InputEvent::Key { key, pressed } => self.process_key(key, pressed),
            _ => false,
        }
    }

    fn process_key(&mut self, key: Key, pressed: bool) -> bool {
        let amount = if pressed { 1.0 } else { 0.0 };
        let slot = match key {
            Key::Character('w') => &mut self.forward.positive,
            Key::Character('s') => &mut self.forward.negative,
            Key::Character('d') => &mut self.right.positive,
            Key::Character('a') => &mut self.right.negative,
            Key::Character('e') => &mut self.up.positive,
            Key::Character('q') => &mut self.up.negative,
            Key::Left => &mut self.turn_yaw.positive,
            Key::Right => &mut self.turn_yaw.negative,
            Key::Up => &mut self.turn_pitch.positive,
            Key::Down => &mut self.turn_pitch.negative,
            _ => return false,
        };
        *slot = amount;
        true
    }

    pub fn update(&mut self, camera: &mut Camera, dt: Duration) {
        let dt = dt.as_secs_f32();

        let forward = camera.forward();
        let (sin_yaw, cos_yaw) = camera.yaw.0.sin_cos();
        let right = Vector3::new(sin_yaw, -cos_yaw, 0.0);
        camera.position += forward * self.forward.value() * self.speed * dt;
        camera.position += right * self.right.value() * self.speed * dt;
        camera.position += Vector3::unit_z() * self.up.value() * self.speed * dt;

        camera.position += forward * self.scroll * self.speed * self.sensitivity * 0.01;
        self.scroll = 0.0;

        camera.yaw += Rad(self.turn_yaw.value() * self.sensitivity * 2.0 * dt);
        camera.pitch += Rad(self.turn_pitch.value() * self.sensitivity * 2.0 * dt);

        camera.yaw += Rad(-self.rotate_horizontal * self.sensitivity * 0.01);
        camera.pitch += Rad(-self.rotate_vertical * self.sensitivity * 0.01);
        self.rotate_horizontal = 0.0;
        self.rotate_vertical = 0.0;

        camera.pitch = Rad(camera.pitch.0.clamp(-SAFE_FRAC_PI_2, SAFE_FRAC_PI_2));
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::Transform;

    use super::*;

    #[test]
    fn should_start_looking_at_the_grid() {
        let camera = Camera::default();
        let view = camera.calc_matrix();
        let origin = view.transform_point(Point3::new(0.0, 0.0, 0.0));
        // right-handed view space looks down -Z
        assert!(origin.z < 0.0);
        assert_relative_eq!(origin.x, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn should_only_look_around_while_captured() {
        let mut controller = CameraController::new(4.0, 0.4);
        let mut camera = Camera::default();
        assert!(!controller.handle_input(&InputEvent::MouseMove { x: 10.0, y: 0.0 }));
        controller.handle_input(&InputEvent::MouseDown {
            button: MouseButton::Right,
            x: 0.0,
            y: 0.0,
        });
        assert!(controller.handle_input(&InputEvent::MouseMove { x: 10.0, y: 0.0 }));
        controller.update(&mut camera, Duration::from_millis(16));
        assert!(camera.yaw().0 < START_YAW.0);
        controller.handle_input(&InputEvent::MouseUp {
            button: MouseButton::Right,
            x: 10.0,
            y: 0.0,
        });
        assert!(!controller.is_captured());
    }

    #[test]
    fn should_move_up_with_e() {
        let mut controller = CameraController::new(4.0, 0.4);
        let mut camera = Camera::default();
        controller.handle_input(&InputEvent::Key {
            key: Key::Character('e'),
            pressed: true,
        });
        controller.update(&mut camera, Duration::from_secs(1));
        assert_relative_eq!(camera.position.z, START_EYE[2] + 4.0, epsilon = 1e-4);
    }
}
