//! Per-draw push constant blocks.
//!
//! These structures must match the `push_constant` blocks of the GLSL
//! shaders exactly. They use `#[repr(C)]` for a predictable layout and
//! implement `Pod` and `Zeroable` so they can be pushed as raw bytes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use vkframe_rhi::vk;

/// Per-object constants for the mesh pipelines.
///
/// # Memory Layout
///
/// - Offset 0: data (16 bytes)
/// - Offset 16: render matrix (64 bytes)
/// - Total size: 80 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshPushConstants {
    /// Free-form per-draw data. `x` carries the frame number.
    pub data: Vec4,
    /// Object to clip space: `projection * view * model`.
    pub render_matrix: Mat4,
}

impl MeshPushConstants {
    /// Size of the struct in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(data: Vec4, render_matrix: Mat4) -> Self {
        Self {
            data,
            render_matrix,
        }
    }
}

/// The push constant range a pipeline layout declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PushConstantLayout {
    pub stages: vk::ShaderStageFlags,
    pub size: u32,
}

impl PushConstantLayout {
    /// [`MeshPushConstants`] read by the vertex stage.
    pub fn mesh() -> Self {
        Self {
            stages: vk::ShaderStageFlags::VERTEX,
            size: MeshPushConstants::SIZE,
        }
    }

    /// The range at offset 0.
    pub fn range(self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stages,
            offset: 0,
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_push_constants_layout() {
        assert_eq!(MeshPushConstants::SIZE, 80);
        assert_eq!(std::mem::offset_of!(MeshPushConstants, render_matrix), 16);
        // Vulkan guarantees at least 128 bytes of push constants
        assert!(MeshPushConstants::SIZE <= 128);
    }

    #[test]
    fn test_mesh_range() {
        let range = PushConstantLayout::mesh().range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 80);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_bytes_match_fields() {
        let constants = MeshPushConstants::new(Vec4::new(3.0, 0.0, 0.0, 0.0), Mat4::IDENTITY);
        let bytes = bytemuck::bytes_of(&constants);
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[0..4], &3.0f32.to_ne_bytes());
        assert_eq!(&bytes[16..20], &1.0f32.to_ne_bytes());
    }
}
