//! Camera math for the scenes.
//!
//! Everything is right-handed with clip-space depth in `[0, 1]`. Shaders see
//! an OpenGL-style clip space (+Y up), so no Y flip is applied here.

use glam::{Mat4, Vec3};

/// Projection used by a camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Standard perspective: depth 0 at the near plane, 1 at the far plane.
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    /// Reverse-Z perspective with a horizontal field of view.
    ///
    /// `aspect_inverse` is height over width. Depth is 1 at the near plane
    /// and 0 at the far plane.
    ReverseZ {
        fov_x: f32,
        aspect_inverse: f32,
        near: f32,
        far: f32,
    },
}

impl Projection {
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::ReverseZ {
                fov_x,
                aspect_inverse,
                near,
                far,
            } => perspective_reverse_z(fov_x, aspect_inverse, near, far),
        }
    }
}

/// Reverse-Z perspective from a horizontal field of view.
///
/// Swapping the near and far planes of a `[0, 1]` projection maps the near
/// plane to depth 1 and the far plane to depth 0.
pub fn perspective_reverse_z(fov_x: f32, aspect_inverse: f32, near: f32, far: f32) -> Mat4 {
    let fov_y = 2.0 * ((fov_x * 0.5).tan() * aspect_inverse).atan();
    Mat4::perspective_rh(fov_y, 1.0 / aspect_inverse, far, near)
}

/// A look-at camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::Perspective {
                fov_y: 45.0_f32.to_radians(),
                aspect: 16.0 / 9.0,
                near: 0.1,
                far: 100.0,
            },
        }
    }
}

impl Camera {
    pub fn new(eye: Vec3, target: Vec3, projection: Projection) -> Self {
        Self {
            eye,
            target,
            up: Vec3::Y,
            projection,
        }
    }

    /// Update the aspect ratio (width over height) of the projection.
    pub fn set_aspect(&mut self, aspect: f32) {
        match &mut self.projection {
            Projection::Perspective { aspect: a, .. } => *a = aspect,
            Projection::ReverseZ { aspect_inverse, .. } => *aspect_inverse = 1.0 / aspect,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}
