//! Uniform block shared by every scene's shaders.
//!
//! The struct is `#[repr(C)]` and `Pod` so it can be copied straight into a
//! mapped uniform buffer. It matches this GLSL std140 block:
//!
//! ```glsl
//! layout(set = 0, binding = 0) uniform FrameUniforms {
//!     mat4 mvp;
//!     vec4 color;
//! };
//! ```

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Per-frame uniform data.
///
/// # Memory Layout
///
/// - Offset 0: model-view-projection matrix (64 bytes)
/// - Offset 64: surface color (16 bytes)
/// - Total size: 80 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformPayload {
    pub mvp: Mat4,
    pub color: Vec4,
}

impl UniformPayload {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(mvp: Mat4, color: Vec4) -> Self {
        Self { mvp, color }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl Default for UniformPayload {
    fn default() -> Self {
        Self {
            mvp: Mat4::IDENTITY,
            color: Vec4::ONE,
        }
    }
}
