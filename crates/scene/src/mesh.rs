//! Static mesh data and the vertex formats the scenes use.

use bytemuck::{Pod, Zeroable};
use frameloop_rhi::backend::{
    BufferUsage, DrawCall, IndexFormat, VertexAttribute, VertexFormat, VertexLayout,
};

/// Position-only vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PositionVertex {
    pub position: [f32; 3],
}

impl PositionVertex {
    pub const LAYOUT: VertexLayout = VertexLayout {
        stride: std::mem::size_of::<Self>() as u32,
        attributes: &[VertexAttribute {
            location: 0,
            format: VertexFormat::Float32x3,
            offset: 0,
        }],
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: [x, y, z],
        }
    }
}

/// Vertex with a per-vertex color.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl ColorVertex {
    pub const LAYOUT: VertexLayout = VertexLayout {
        stride: std::mem::size_of::<Self>() as u32,
        attributes: &[
            VertexAttribute {
                location: 0,
                format: VertexFormat::Float32x3,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                format: VertexFormat::Float32x3,
                offset: 12,
            },
        ],
    };
}

/// Vertex with a face normal.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct NormalVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl NormalVertex {
    pub const LAYOUT: VertexLayout = VertexLayout {
        stride: std::mem::size_of::<Self>() as u32,
        attributes: &[
            VertexAttribute {
                location: 0,
                format: VertexFormat::Float32x3,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                format: VertexFormat::Float32x3,
                offset: 12,
            },
        ],
    };
}

/// Index data of a mesh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Indices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Indices {
    pub fn len(&self) -> usize {
        match self {
            Indices::U16(indices) => indices.len(),
            Indices::U32(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> IndexFormat {
        match self {
            Indices::U16(_) => IndexFormat::U16,
            Indices::U32(_) => IndexFormat::U32,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Indices::U16(indices) => bytemuck::cast_slice(indices),
            Indices::U32(indices) => bytemuck::cast_slice(indices),
        }
    }

    fn max(&self) -> Option<u32> {
        match self {
            Indices::U16(indices) => indices.iter().max().map(|&i| u32::from(i)),
            Indices::U32(indices) => indices.iter().max().copied(),
        }
    }
}

/// Geometry uploaded once at load and never modified afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticMesh {
    vertex_bytes: Vec<u8>,
    vertex_count: u32,
    layout: VertexLayout,
    indices: Option<Indices>,
}

impl StaticMesh {
    /// Non-indexed mesh drawn as a triangle list.
    pub fn new<V: Pod>(vertices: &[V], layout: VertexLayout) -> Self {
        Self {
            vertex_bytes: bytemuck::cast_slice(vertices).to_vec(),
            vertex_count: vertices.len() as u32,
            layout,
            indices: None,
        }
    }

    /// Indexed mesh drawn as a triangle list.
    pub fn indexed<V: Pod>(vertices: &[V], layout: VertexLayout, indices: Indices) -> Self {
        debug_assert!(
            indices.max().is_none_or(|max| (max as usize) < vertices.len()),
            "index out of range"
        );
        Self {
            indices: Some(indices),
            ..Self::new(vertices, layout)
        }
    }

    #[inline]
    pub fn vertex_bytes(&self) -> &[u8] {
        &self.vertex_bytes
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    #[inline]
    pub fn indices(&self) -> Option<&Indices> {
        self.indices.as_ref()
    }

    /// Usage of each buffer the mesh uploads, vertex buffer first.
    pub fn buffer_usages(&self) -> impl Iterator<Item = BufferUsage> {
        std::iter::once(BufferUsage::Vertex).chain(self.indices.as_ref().map(|_| BufferUsage::Index))
    }

    /// The draw call that renders the whole mesh.
    pub fn draw_call(&self) -> DrawCall {
        match &self.indices {
            Some(indices) => DrawCall::Indexed {
                count: indices.len() as u32,
            },
            None => DrawCall::Vertices {
                count: self.vertex_count,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_strides() {
        assert_eq!(PositionVertex::LAYOUT.stride, 12);
        assert_eq!(ColorVertex::LAYOUT.stride, 24);
        assert_eq!(NormalVertex::LAYOUT.stride, 24);
    }

    #[test]
    fn test_non_indexed_draw() {
        let vertices = [PositionVertex::new(0.0, 0.0, 0.0); 6];
        let mesh = StaticMesh::new(&vertices, PositionVertex::LAYOUT);
        assert_eq!(mesh.vertex_bytes().len(), 72);
        assert_eq!(mesh.draw_call(), DrawCall::Vertices { count: 6 });
        assert_eq!(mesh.buffer_usages().count(), 1);
    }

    #[test]
    fn test_indexed_draw() {
        let vertices = [PositionVertex::new(0.0, 0.0, 0.0); 4];
        let mesh = StaticMesh::indexed(
            &vertices,
            PositionVertex::LAYOUT,
            Indices::U16(vec![0, 1, 2, 0, 2, 3]),
        );
        assert_eq!(mesh.draw_call(), DrawCall::Indexed { count: 6 });
        let indices = mesh.indices().unwrap();
        assert_eq!(indices.format(), IndexFormat::U16);
        assert_eq!(indices.as_bytes().len(), 12);
        assert_eq!(
            mesh.buffer_usages().collect::<Vec<_>>(),
            vec![BufferUsage::Vertex, BufferUsage::Index]
        );
    }

    #[test]
    fn test_u32_indices() {
        let indices = Indices::U32(vec![0, 1, 2]);
        assert_eq!(indices.format(), IndexFormat::U32);
        assert_eq!(indices.as_bytes().len(), 12);
        assert!(!indices.is_empty());
    }
}
