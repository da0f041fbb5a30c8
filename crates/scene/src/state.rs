//! Per-tick animation of the scenes.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use glam::{Mat4, Vec3};

use frameloop_rhi::backend::Extent2D;

use crate::camera::{Camera, Projection, perspective_reverse_z};
use crate::scenes::SceneKind;

/// Radians added per tick by `simple-cube`: a speed of 50 scaled by an
/// assumed 1 ms frame.
const SIMPLE_CUBE_STEP: f32 = 50.0 * 0.001;

/// Animation state advanced once per drawn frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneState {
    kind: SceneKind,
    /// Rotation about Y in radians.
    angle: f32,
    ticks: u64,
}

impl SceneState {
    pub fn new(kind: SceneKind) -> Self {
        Self {
            kind,
            angle: 0.0,
            ticks: 0,
        }
    }

    /// Advances the animation by one tick of `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        match self.kind {
            SceneKind::Hades3 | SceneKind::RedCube35 => self.angle += dt,
            SceneKind::SimpleCube => self.angle += SIMPLE_CUBE_STEP,
            SceneKind::RedCube => {}
        }
        self.ticks += 1;
    }

    /// Model-view-projection matrix for the current state drawn into a
    /// target of the given size.
    pub fn mvp(&self, extent: Extent2D) -> Mat4 {
        let aspect = extent.aspect_ratio();
        let model = Mat4::from_rotation_y(self.angle);
        match self.kind {
            SceneKind::Hades3 => perspective_reverse_z(FRAC_PI_2, 1.0 / aspect, 0.1, 10.0) * model,
            // Width over height is passed where height over width is
            // expected, which narrows the view on wide targets.
            SceneKind::RedCube => {
                perspective_reverse_z(FRAC_PI_4, aspect, 0.1, 100.0)
                    * Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0))
            }
            SceneKind::RedCube35 => {
                let camera = Camera::new(
                    Vec3::new(0.0, 0.0, 5.0),
                    Vec3::ZERO,
                    Projection::ReverseZ {
                        fov_x: FRAC_PI_2,
                        aspect_inverse: 1.0 / aspect,
                        near: 0.1,
                        far: 100.0,
                    },
                );
                camera.view_projection_matrix() * model
            }
            SceneKind::SimpleCube => {
                let camera = Camera::new(
                    Vec3::new(2.0, 2.0, 2.0),
                    Vec3::ZERO,
                    Projection::Perspective {
                        fov_y: 60.0_f32.to_radians(),
                        aspect,
                        near: 0.1,
                        far: 100.0,
                    },
                );
                camera.view_projection_matrix() * model
            }
        }
    }

    #[inline]
    pub fn kind(&self) -> SceneKind {
        self.kind
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.angle
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
