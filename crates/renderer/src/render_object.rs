//! What the host asks the scheduler to draw.

use glam::Mat4;

use crate::mesh::MeshHandle;
use crate::pipeline_set::MaterialHandle;

/// One draw: a mesh, the pipeline to draw it with and its model matrix.
///
/// Objects are drawn in slice order. Consecutive objects sharing a material
/// or mesh skip the redundant pipeline or vertex buffer bind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderObject {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    /// Object to world space.
    pub transform: Mat4,
}

impl RenderObject {
    pub fn new(mesh: MeshHandle, material: MaterialHandle, transform: Mat4) -> Self {
        Self {
            mesh,
            material,
            transform,
        }
    }
}
