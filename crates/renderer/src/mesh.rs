//! CPU-side meshes and their GPU vertex buffers.

use glam::Vec3;
use vkframe_rhi::vertex::Vertex;
use vkframe_rhi::vk;

/// A named, non-indexed triangle list.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
}

impl MeshData {
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>) -> Self {
        Self {
            name: name.into(),
            vertices,
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    /// A single triangle with red, green and blue corners facing +Z.
    pub fn triangle() -> Self {
        Self::new(
            "triangle",
            vec![
                Vertex::new(Vec3::new(1.0, 1.0, 0.0), Vec3::Z, Vec3::new(0.0, 0.0, 1.0)),
                Vertex::new(Vec3::new(-1.0, 1.0, 0.0), Vec3::Z, Vec3::new(0.0, 1.0, 0.0)),
                Vertex::new(Vec3::new(0.0, -1.0, 0.0), Vec3::Z, Vec3::new(1.0, 0.0, 0.0)),
            ],
        )
    }

    /// A unit cube centered at the origin, two triangles per face.
    ///
    /// Faces are wound counter-clockwise seen from outside and colored by
    /// their normal direction.
    pub fn cube() -> Self {
        // (normal, u, v) with u x v == normal
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];

        let mut vertices = Vec::with_capacity(36);
        for (normal, u, v) in faces {
            let center = normal * 0.5;
            let corner = |su: f32, sv: f32| center + u * (0.5 * su) + v * (0.5 * sv);
            let color = normal.abs() * 0.6 + Vec3::splat(0.2);
            for position in [
                corner(-1.0, -1.0),
                corner(1.0, -1.0),
                corner(1.0, 1.0),
                corner(-1.0, -1.0),
                corner(1.0, 1.0),
                corner(-1.0, 1.0),
            ] {
                vertices.push(Vertex::new(position, normal, color));
            }
        }

        Self::new("cube", vertices)
    }
}

/// Index of a mesh uploaded by the frame scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) usize);

impl MeshHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A mesh resident in a vertex buffer. The buffer is owned by the scheduler.
#[derive(Clone, Debug)]
pub(crate) struct GpuMesh {
    pub name: String,
    pub buffer: vk::Buffer,
    pub vertex_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_has_three_vertices() {
        let mesh = MeshData::triangle();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.name, "triangle");
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let mesh = MeshData::cube();
        assert_eq!(mesh.vertex_count(), 36);

        for triangle in mesh.vertices.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]];
            let winding = (b.position - a.position).cross(c.position - a.position);
            assert!(
                winding.normalize().dot(a.normal) > 0.99,
                "triangle {:?} is wound against its normal",
                triangle
            );
            // Every corner lies on the face plane
            for vertex in triangle {
                assert!((vertex.position.dot(vertex.normal) - 0.5).abs() < 1e-6);
            }
        }
    }
}
