//! Demo scenes driven by the frame loop.
//!
//! A scene is plain data ([`SceneDesc`]) plus an animation rule
//! ([`SceneState`]). The renderer turns the state into the uniform payload
//! each tick.

pub mod camera;
pub mod mesh;
pub mod scenes;
pub mod state;

pub use camera::{Camera, Projection, perspective_reverse_z};
pub use mesh::{ColorVertex, Indices, NormalVertex, PositionVertex, StaticMesh};
pub use scenes::{SceneDesc, SceneKind, UnknownScene};
pub use state::SceneState;
