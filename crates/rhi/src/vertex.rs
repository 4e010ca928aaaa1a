//! Vertex format and input descriptions.
//!
//! [`Vertex`] is the one vertex layout the forward pass draws: position,
//! normal and color, each three floats, tightly packed at binding 0.

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Mesh vertex with position, normal and color.
///
/// # Memory Layout
///
/// The struct uses `#[repr(C)]` to ensure predictable memory layout:
/// - Offset 0: position (12 bytes)
/// - Offset 12: normal (12 bytes)
/// - Offset 24: color (12 bytes)
/// - Total size: 36 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in object space.
    pub position: Vec3,
    /// Surface normal, expected normalized.
    pub normal: Vec3,
    /// Linear RGB color.
    pub color: Vec3,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, color: Vec3) -> Self {
        Self {
            position,
            normal,
            color,
        }
    }

    /// Returns the size of the vertex in bytes.
    #[inline]
    pub const fn size() -> usize {
        size_of::<Self>()
    }

    /// Get the vertex input binding description.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: Self::size() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Get the vertex attribute descriptions (locations 0, 1, 2).
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        // Vertex: 3 x Vec3 = 3 x 12 = 36 bytes
        assert_eq!(std::mem::size_of::<Vertex>(), 36);
        assert_eq!(Vertex::size(), 36);
    }

    #[test]
    fn test_vertex_binding_description() {
        let binding = Vertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 36);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_vertex_attribute_descriptions() {
        let attrs = Vertex::attribute_descriptions();

        let layout: Vec<(u32, u32)> = attrs.iter().map(|a| (a.location, a.offset)).collect();
        assert_eq!(layout, vec![(0, 0), (1, 12), (2, 24)]);
        assert!(attrs
            .iter()
            .all(|a| a.binding == 0 && a.format == vk::Format::R32G32B32_SFLOAT));
    }

    #[test]
    fn test_vertex_pod_cast() {
        let vertex = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Y, Vec3::new(0.5, 0.6, 0.7));

        let bytes: &[u8] = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 36);

        let vertex_back: &Vertex = bytemuck::from_bytes(bytes);
        assert_eq!(*vertex_back, vertex);
    }
}
