//! Placement of a single crowd member.
//!
//! A transform is built once from a grid cell and never changes for the
//! lifetime of the instance.

use std::ops::Mul;

use cgmath::One;

/// Position, rotation (as quaternion), and uniform scale of a crowd member.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: f32,
}

impl Transform {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            rotation: cgmath::Quaternion::one(),
            scale: 1.0,
        }
    }

    pub fn placed(position: cgmath::Vector3<f32>, scale: f32) -> Self {
        Self {
            position,
            scale,
            ..Self::new()
        }
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_scale(self.scale)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

/// Parent-child composition: `parent * child` places `child` in the space of `parent`.
impl<'a, 'b> Mul<&'b Transform> for &'a Transform {
    type Output = Transform;

    fn mul(self, rhs: &'b Transform) -> Self::Output {
        Transform {
            position: self.position + self.rotation * (rhs.position * self.scale),
            rotation: self.rotation * rhs.rotation,
            scale: self.scale * rhs.scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::{Deg, Rotation3, Transform as _, Vector3};

    use super::*;

    #[test]
    fn should_match_matrix_composition() {
        let parent = Transform {
            position: Vector3::new(1.0, 2.0, 0.0),
            rotation: cgmath::Quaternion::from_angle_z(Deg(90.0)),
            scale: 2.0,
        };
        let child = Transform::placed(Vector3::new(1.0, 0.0, 0.0), 0.5);
        let composed = (&parent * &child).to_matrix();
        let expected = parent.to_matrix() * child.to_matrix();
        let p = cgmath::Point3::new(0.3, -0.2, 1.0);
        let a = composed.transform_point(p);
        let b = expected.transform_point(p);
        assert_relative_eq!(a.x, b.x, epsilon = 1e-5);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-5);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-5);
    }
}
