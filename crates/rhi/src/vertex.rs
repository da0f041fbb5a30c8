//! Vertex input descriptions.
//!
//! Scenes describe their vertex format with a backend-neutral
//! [`VertexLayout`]; this module turns it into the Vulkan binding and
//! attribute descriptions the pipeline consumes. All vertex data lives in a
//! single interleaved buffer at binding 0.

use ash::vk;

use crate::backend::{IndexFormat, VertexFormat, VertexLayout};

pub const VERTEX_BINDING: u32 = 0;

pub fn vertex_format_to_vk(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub fn index_format_to_vk(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

pub fn binding_description(layout: &VertexLayout) -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: VERTEX_BINDING,
        stride: layout.stride,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn attribute_descriptions(layout: &VertexLayout) -> Vec<vk::VertexInputAttributeDescription> {
    layout
        .attributes
        .iter()
        .map(|attr| vk::VertexInputAttributeDescription {
            binding: VERTEX_BINDING,
            location: attr.location,
            format: vertex_format_to_vk(attr.format),
            offset: attr.offset,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VertexAttribute;

    const POSITION_COLOR: VertexLayout = VertexLayout {
        stride: 24,
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

    #[test]
    fn test_binding_description() {
        let binding = binding_description(&POSITION_COLOR);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 24);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_attribute_descriptions() {
        let attrs = attribute_descriptions(&POSITION_COLOR);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].offset, 12);
    }

    #[test]
    fn test_format_mapping() {
        assert_eq!(
            vertex_format_to_vk(VertexFormat::Float32x2),
            vk::Format::R32G32_SFLOAT
        );
        assert_eq!(
            vertex_format_to_vk(VertexFormat::Float32x4),
            vk::Format::R32G32B32A32_SFLOAT
        );
        assert_eq!(index_format_to_vk(IndexFormat::U16), vk::IndexType::UINT16);
        assert_eq!(index_format_to_vk(IndexFormat::U32), vk::IndexType::UINT32);
    }
}
