//! The four demo scenes as data.
//!
//! Each scene is a [`SceneDesc`]: mesh, GLSL sources, fixed pipeline state
//! and clear values. The per-tick animation lives in [`crate::SceneState`].
//!
//! All shaders share one uniform block at set 0, binding 0:
//!
//! ```glsl
//! layout(set = 0, binding = 0) uniform FrameUniforms { mat4 mvp; vec4 color; } frame;
//! ```

use std::fmt;
use std::str::FromStr;

use glam::Vec4;
use thiserror::Error;

use frameloop_rhi::backend::{ClearValues, CompareOp, CullMode, DepthState, PipelineDesc};

use crate::mesh::{ColorVertex, Indices, NormalVertex, PositionVertex, StaticMesh};
use crate::state::SceneState;

/// Which demo scene to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SceneKind {
    /// Vertex-colored pyramid spinning around Y.
    Hades3,
    /// Static lit cube with per-face normals.
    RedCube,
    /// Indexed cube spinning in front of a look-at camera.
    RedCube35,
    /// Flat-colored cube with a fixed per-tick spin.
    #[default]
    SimpleCube,
}

impl SceneKind {
    pub const ALL: [SceneKind; 4] = [
        SceneKind::Hades3,
        SceneKind::RedCube,
        SceneKind::RedCube35,
        SceneKind::SimpleCube,
    ];

    /// Name accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            SceneKind::Hades3 => "hades3",
            SceneKind::RedCube => "red-cube",
            SceneKind::RedCube35 => "red-cube-35",
            SceneKind::SimpleCube => "simple-cube",
        }
    }

    pub fn desc(self) -> SceneDesc {
        match self {
            SceneKind::Hades3 => hades3(),
            SceneKind::RedCube => red_cube(),
            SceneKind::RedCube35 => red_cube_35(),
            SceneKind::SimpleCube => simple_cube(),
        }
    }
}

impl fmt::Display for SceneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown scene '{0}' (expected hades3, red-cube, red-cube-35 or simple-cube)")]
pub struct UnknownScene(pub String);

impl FromStr for SceneKind {
    type Err = UnknownScene;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SceneKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownScene(s.to_owned()))
    }
}

/// Everything the renderer needs to load and draw a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDesc {
    pub kind: SceneKind,
    /// Window title.
    pub title: &'static str,
    pub vertex_shader: &'static str,
    pub fragment_shader: &'static str,
    pub mesh: StaticMesh,
    pub cull_mode: CullMode,
    /// Depth test state. `None` means the scene renders without a depth
    /// target.
    pub depth: Option<DepthState>,
    pub clear: ClearValues,
    /// Value of `frame.color` in the uniform block.
    pub color: Vec4,
}

impl SceneDesc {
    #[inline]
    pub fn uses_depth(&self) -> bool {
        self.depth.is_some()
    }

    /// Pipeline description for a uniform block of `uniform_size` bytes.
    pub fn pipeline_desc(&self, uniform_size: u64) -> PipelineDesc<'_> {
        PipelineDesc {
            label: self.kind.name(),
            vertex_shader: self.vertex_shader,
            fragment_shader: self.fragment_shader,
            vertex_layout: self.mesh.layout(),
            cull_mode: self.cull_mode,
            depth: self.depth,
            uniform_size,
        }
    }

    /// Fresh animation state for this scene.
    pub fn initial_state(&self) -> SceneState {
        SceneState::new(self.kind)
    }
}

const COLOR_VERTEX_SHADER: &str = r#"
#version 450

layout(set = 0, binding = 0) uniform FrameUniforms {
    mat4 mvp;
    vec4 color;
} frame;

layout(location = 0) in vec3 in_position;
layout(location = 1) in vec3 in_color;

layout(location = 0) out vec3 v_color;

void main() {
    v_color = in_color;
    gl_Position = frame.mvp * vec4(in_position, 1.0);
}
"#;

const COLOR_FRAGMENT_SHADER: &str = r#"
#version 450

layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 out_color;

void main() {
    out_color = vec4(v_color, 1.0);
}
"#;

const LIT_VERTEX_SHADER: &str = r#"
#version 450

layout(set = 0, binding = 0) uniform FrameUniforms {
    mat4 mvp;
    vec4 color;
} frame;

layout(location = 0) in vec3 in_position;
layout(location = 1) in vec3 in_normal;

layout(location = 0) out vec3 v_normal;

void main() {
    v_normal = in_normal;
    gl_Position = frame.mvp * vec4(in_position, 1.0);
}
"#;

const LIT_FRAGMENT_SHADER: &str = r#"
#version 450

layout(set = 0, binding = 0) uniform FrameUniforms {
    mat4 mvp;
    vec4 color;
} frame;

layout(location = 0) in vec3 v_normal;
layout(location = 0) out vec4 out_color;

void main() {
    vec3 light_dir = normalize(vec3(0.4, 0.6, 1.0));
    float diffuse = max(dot(normalize(v_normal), light_dir), 0.0);
    out_color = vec4(frame.color.rgb * (0.2 + 0.8 * diffuse), frame.color.a);
}
"#;

const FLAT_VERTEX_SHADER: &str = r#"
#version 450

layout(set = 0, binding = 0) uniform FrameUniforms {
    mat4 mvp;
    vec4 color;
} frame;

layout(location = 0) in vec3 in_position;

void main() {
    gl_Position = frame.mvp * vec4(in_position, 1.0);
}
"#;

const FLAT_FRAGMENT_SHADER: &str = r#"
#version 450

layout(set = 0, binding = 0) uniform FrameUniforms {
    mat4 mvp;
    vec4 color;
} frame;

layout(location = 0) out vec4 out_color;

void main() {
    out_color = frame.color;
}
"#;

const fn color_vertex(position: [f32; 3], color: [f32; 3]) -> ColorVertex {
    ColorVertex { position, color }
}

const fn normal_vertex(position: [f32; 3], normal: [f32; 3]) -> NormalVertex {
    NormalVertex { position, normal }
}

fn hades3() -> SceneDesc {
    const APEX: [f32; 3] = [0.0, 0.5, 0.0];
    const RED: [f32; 3] = [1.0, 0.0, 0.0];
    const FRONT_LEFT: ([f32; 3], [f32; 3]) = ([-0.5, -0.5, 0.5], [0.0, 1.0, 0.0]);
    const FRONT_RIGHT: ([f32; 3], [f32; 3]) = ([0.5, -0.5, 0.5], [0.0, 0.0, 1.0]);
    const BACK_RIGHT: ([f32; 3], [f32; 3]) = ([0.5, -0.5, -0.5], [1.0, 1.0, 0.0]);
    const BACK_LEFT: ([f32; 3], [f32; 3]) = ([-0.5, -0.5, -0.5], [0.0, 1.0, 1.0]);

    // Four sides, each apex first; the base is open.
    let sides = [
        (FRONT_LEFT, FRONT_RIGHT),
        (FRONT_RIGHT, BACK_RIGHT),
        (BACK_RIGHT, BACK_LEFT),
        (BACK_LEFT, FRONT_LEFT),
    ];
    let vertices: Vec<ColorVertex> = sides
        .iter()
        .flat_map(|&(a, b)| {
            [
                color_vertex(APEX, RED),
                color_vertex(a.0, a.1),
                color_vertex(b.0, b.1),
            ]
        })
        .collect();

    SceneDesc {
        kind: SceneKind::Hades3,
        title: "00_Hades3",
        vertex_shader: COLOR_VERTEX_SHADER,
        fragment_shader: COLOR_FRAGMENT_SHADER,
        mesh: StaticMesh::new(&vertices, ColorVertex::LAYOUT),
        cull_mode: CullMode::None,
        depth: None,
        clear: ClearValues {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: None,
        },
        color: Vec4::ONE,
    }
}

fn red_cube() -> SceneDesc {
    // One quad per face, counter-clockwise seen from outside.
    let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
        (
            [0.0, 0.0, 1.0],
            [[-1.0, -1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0], [-1.0, 1.0, 1.0]],
        ),
        (
            [0.0, 0.0, -1.0],
            [[1.0, -1.0, -1.0], [-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [1.0, 1.0, -1.0]],
        ),
        (
            [-1.0, 0.0, 0.0],
            [[-1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [-1.0, 1.0, 1.0], [-1.0, 1.0, -1.0]],
        ),
        (
            [1.0, 0.0, 0.0],
            [[1.0, -1.0, 1.0], [1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [1.0, 1.0, 1.0]],
        ),
        (
            [0.0, 1.0, 0.0],
            [[-1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [-1.0, 1.0, -1.0]],
        ),
        (
            [0.0, -1.0, 0.0],
            [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, -1.0, 1.0], [-1.0, -1.0, 1.0]],
        ),
    ];
    let vertices: Vec<NormalVertex> = faces
        .iter()
        .flat_map(|(normal, corners)| corners.map(|corner| normal_vertex(corner, *normal)))
        .collect();
    let indices: Vec<u16> = (0..6u16)
        .flat_map(|face| {
            let base = face * 4;
            [base, base + 1, base + 2, base, base + 2, base + 3]
        })
        .collect();

    SceneDesc {
        kind: SceneKind::RedCube,
        title: "RedCube",
        vertex_shader: LIT_VERTEX_SHADER,
        fragment_shader: LIT_FRAGMENT_SHADER,
        mesh: StaticMesh::indexed(&vertices, NormalVertex::LAYOUT, Indices::U16(indices)),
        cull_mode: CullMode::Back,
        depth: Some(DepthState {
            compare: CompareOp::GreaterOrEqual,
            write: true,
        }),
        clear: ClearValues {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: Some(0.0),
        },
        color: Vec4::new(1.0, 0.0, 0.0, 1.0),
    }
}

fn red_cube_35() -> SceneDesc {
    let vertices = [
        PositionVertex::new(-1.0, -1.0, -1.0),
        PositionVertex::new(-1.0, 1.0, -1.0),
        PositionVertex::new(1.0, 1.0, -1.0),
        PositionVertex::new(1.0, -1.0, -1.0),
        PositionVertex::new(-1.0, -1.0, 1.0),
        PositionVertex::new(-1.0, 1.0, 1.0),
        PositionVertex::new(1.0, 1.0, 1.0),
        PositionVertex::new(1.0, -1.0, 1.0),
    ];
    #[rustfmt::skip]
    let indices = vec![
        0, 1, 2, 0, 2, 3,
        4, 5, 6, 4, 6, 7,
        0, 4, 7, 0, 7, 3,
        1, 5, 6, 1, 6, 2,
        3, 2, 6, 3, 6, 7,
        0, 1, 5, 0, 5, 4,
    ];

    SceneDesc {
        kind: SceneKind::RedCube35,
        title: "35_RedCube",
        vertex_shader: FLAT_VERTEX_SHADER,
        fragment_shader: FLAT_FRAGMENT_SHADER,
        mesh: StaticMesh::indexed(&vertices, PositionVertex::LAYOUT, Indices::U16(indices)),
        // The index list mixes windings, so no face can be culled.
        cull_mode: CullMode::None,
        depth: Some(DepthState {
            compare: CompareOp::LessOrEqual,
            write: true,
        }),
        clear: ClearValues {
            color: [0.0, 0.0, 1.0, 1.0],
            depth: Some(1.0),
        },
        color: Vec4::new(1.0, 0.0, 0.0, 1.0),
    }
}

fn simple_cube() -> SceneDesc {
    const H: f32 = 0.5;
    #[rustfmt::skip]
    let positions: [[f32; 3]; 36] = [
        [-H, -H, -H], [H, -H, -H], [H, H, -H],
        [H, H, -H], [-H, H, -H], [-H, -H, -H],
        [-H, -H, H], [H, -H, H], [H, H, H],
        [H, H, H], [-H, H, H], [-H, -H, H],
        [-H, H, H], [-H, H, -H], [-H, -H, -H],
        [-H, -H, -H], [-H, -H, H], [-H, H, H],
        [H, H, H], [H, H, -H], [H, -H, -H],
        [H, -H, -H], [H, -H, H], [H, H, H],
        [-H, -H, -H], [H, -H, -H], [H, -H, H],
        [H, -H, H], [-H, -H, H], [-H, -H, -H],
        [-H, H, -H], [H, H, -H], [H, H, H],
        [H, H, H], [-H, H, H], [-H, H, -H],
    ];
    let vertices = positions.map(|position| PositionVertex { position });

    SceneDesc {
        kind: SceneKind::SimpleCube,
        title: "SimpleCube",
        vertex_shader: FLAT_VERTEX_SHADER,
        fragment_shader: FLAT_FRAGMENT_SHADER,
        mesh: StaticMesh::new(&vertices, PositionVertex::LAYOUT),
        cull_mode: CullMode::None,
        depth: Some(DepthState {
            compare: CompareOp::Less,
            write: true,
        }),
        clear: ClearValues {
            color: [0.1, 0.1, 0.1, 1.0],
            depth: Some(1.0),
        },
        color: Vec4::new(0.2, 0.7, 0.9, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameloop_rhi::backend::DrawCall;
    use frameloop_rhi::shader::{ShaderStage, compile_glsl};

    fn read_vertices<V: bytemuck::Pod>(bytes: &[u8]) -> Vec<V> {
        bytes
            .chunks_exact(std::mem::size_of::<V>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    #[test]
    fn test_scene_names_round_trip() {
        for kind in SceneKind::ALL {
            assert_eq!(kind.name().parse::<SceneKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.name());
        }
        assert_eq!("RED-CUBE".parse::<SceneKind>().unwrap(), SceneKind::RedCube);
    }

    #[test]
    fn test_unknown_scene() {
        let err = "teapot".parse::<SceneKind>().unwrap_err();
        assert_eq!(err, UnknownScene("teapot".into()));
        assert!(err.to_string().contains("teapot"));
    }

    #[test]
    fn test_mesh_shapes() {
        let hades3 = SceneKind::Hades3.desc();
        assert_eq!(hades3.mesh.draw_call(), DrawCall::Vertices { count: 12 });
        assert!(!hades3.uses_depth());

        let red_cube = SceneKind::RedCube.desc();
        assert_eq!(red_cube.mesh.vertex_count(), 24);
        assert_eq!(red_cube.mesh.draw_call(), DrawCall::Indexed { count: 36 });

        let red_cube_35 = SceneKind::RedCube35.desc();
        assert_eq!(red_cube_35.mesh.vertex_count(), 8);
        assert_eq!(red_cube_35.mesh.draw_call(), DrawCall::Indexed { count: 36 });

        let simple_cube = SceneKind::SimpleCube.desc();
        assert_eq!(simple_cube.mesh.draw_call(), DrawCall::Vertices { count: 36 });
    }

    #[test]
    fn test_pyramid_sides_share_apex() {
        let desc = SceneKind::Hades3.desc();
        let vertices: Vec<ColorVertex> = read_vertices(desc.mesh.vertex_bytes());
        for side in vertices.chunks(3) {
            assert_eq!(side[0].position, [0.0, 0.5, 0.0]);
            assert_eq!(side[0].color, [1.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_red_cube_faces_wind_outward() {
        let desc = SceneKind::RedCube.desc();
        let vertices: Vec<NormalVertex> = read_vertices(desc.mesh.vertex_bytes());
        for quad in vertices.chunks(4) {
            let [a, b, c] = [quad[0], quad[1], quad[2]].map(|v| glam::Vec3::from(v.position));
            let face_normal = (b - a).cross(c - a).normalize();
            assert_eq!(face_normal, glam::Vec3::from(quad[0].normal));
        }
    }

    #[test]
    fn test_depth_clear_matches_compare() {
        for kind in SceneKind::ALL {
            let desc = kind.desc();
            assert_eq!(desc.uses_depth(), desc.clear.depth.is_some(), "{}", kind);
        }
        let reverse = SceneKind::RedCube.desc();
        assert_eq!(reverse.clear.depth, Some(0.0));
        assert_eq!(reverse.depth.unwrap().compare, CompareOp::GreaterOrEqual);
    }

    #[test]
    fn test_pipeline_desc() {
        let desc = SceneKind::SimpleCube.desc();
        let pipeline = desc.pipeline_desc(80);
        assert_eq!(pipeline.label, "simple-cube");
        assert_eq!(pipeline.vertex_layout, PositionVertex::LAYOUT);
        assert_eq!(pipeline.uniform_size, 80);
        assert_eq!(pipeline.depth, desc.depth);
    }

    #[test]
    fn test_shaders_compile() {
        for kind in SceneKind::ALL {
            let desc = kind.desc();
            compile_glsl(desc.vertex_shader, ShaderStage::Vertex)
                .unwrap_or_else(|e| panic!("{} vertex: {}", kind, e));
            compile_glsl(desc.fragment_shader, ShaderStage::Fragment)
                .unwrap_or_else(|e| panic!("{} fragment: {}", kind, e));
        }
    }
}
