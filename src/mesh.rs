//! Built-in primitive meshes and placement transforms.
//!
//! A [`Mesh`] is CPU-side vertex data plus indices, ready for
//! [`Renderer::create_mesh`](crate::Renderer::create_mesh). All primitives use
//! the [`VertexLayout::PositionNormalUv`](crate::VertexLayout::PositionNormalUv)
//! layout with counter-clockwise front faces.
//!
//! ```ignore
//! let cube = renderer.create_mesh("cube", &Mesh::cube())?;
//! let ball = renderer.create_mesh("ball", &Mesh::sphere(32, 16))?;
//! ```

use glam::{Mat4, Quat, Vec3};

use crate::geometry::VertexData;

/// A single vertex with position, normal, and texture coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex3d {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex3d {
    /// A vertex with every attribute given.
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Indexed vertex data not yet uploaded.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    pub data: VertexData,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Splits interleaved vertices into flat attribute arrays.
    pub fn new(vertices: &[Vertex3d], indices: Vec<u32>) -> Self {
        let mut positions = Vec::with_capacity(vertices.len() * 3);
        let mut normals = Vec::with_capacity(vertices.len() * 3);
        let mut uvs = Vec::with_capacity(vertices.len() * 2);
        for vertex in vertices {
            positions.extend_from_slice(&vertex.position);
            normals.extend_from_slice(&vertex.normal);
            uvs.extend_from_slice(&vertex.uv);
        }
        Self {
            data: VertexData::PositionNormalUv {
                positions,
                normals,
                uvs,
            },
            indices,
        }
    }

    /// Unit cube centred on the origin.
    ///
    /// Every face gets its own four vertices so normals stay flat.
    pub fn cube() -> Self {
        // (normal, u axis, v axis) with u × v = normal, so faces wind CCW
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        ];
        const CORNERS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in FACES {
            let base = vertices.len() as u32;
            for uv in CORNERS {
                let position = (normal + u * (uv[0] * 2.0 - 1.0) + v * (uv[1] * 2.0 - 1.0)) * 0.5;
                vertices.push(Vertex3d::new(position.to_array(), normal.to_array(), uv));
            }
            indices.extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
        }

        Self::new(&vertices, indices)
    }

    /// UV sphere of diameter 1. `segments` and `rings` are clamped to at
    /// least 3 and 2.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for seg in 0..=segments {
                let theta = 2.0 * std::f32::consts::PI * seg as f32 / segments as f32;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                vertices.push(Vertex3d::new(
                    [x * 0.5, y * 0.5, z * 0.5],
                    [x, y, z],
                    [seg as f32 / segments as f32, ring as f32 / rings as f32],
                ));
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let below = current + segments + 1;

                indices.extend_from_slice(&[current, current + 1, below]);
                indices.extend_from_slice(&[current + 1, below + 1, below]);
            }
        }

        Self::new(&vertices, indices)
    }

    /// Square in the XZ plane facing +Y.
    pub fn plane(size: f32) -> Self {
        let half = size * 0.5;
        let vertices = [
            Vertex3d::new([-half, 0.0, -half], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex3d::new([half, 0.0, -half], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex3d::new([half, 0.0, half], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex3d::new([-half, 0.0, half], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];

        Self::new(&vertices, vec![0, 3, 2, 0, 2, 1])
    }
}

/// Position, rotation and scale of one instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Identity transform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity transform moved to `position`.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Sets the translation.
    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Sets the rotation.
    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Sets a per-axis scale.
    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the same scale on every axis.
    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// Scale, then rotate, then translate.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

impl From<Transform> for Mat4 {
    fn from(transform: Transform) -> Self {
        transform.matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Asserts every non-degenerate triangle winds counter-clockwise when seen
    /// from the side its vertex normals point to.
    fn assert_outward_winding(mesh: &Mesh) {
        let VertexData::PositionNormalUv {
            positions, normals, ..
        } = &mesh.data
        else {
            panic!("primitives use the position-normal-uv layout");
        };
        let point = |i: u32| Vec3::from_slice(&positions[i as usize * 3..]);
        let normal = |i: u32| Vec3::from_slice(&normals[i as usize * 3..]);

        for triangle in mesh.indices.chunks_exact(3) {
            let (a, b, c) = (triangle[0], triangle[1], triangle[2]);
            let face = (point(b) - point(a)).cross(point(c) - point(a));
            if face.length() < 1e-6 {
                continue;
            }
            let expected = normal(a) + normal(b) + normal(c);
            assert!(face.dot(expected) > 0.0, "triangle {triangle:?} faces inward");
        }
    }

    #[test]
    fn primitives_are_valid_geometry() {
        for mesh in [Mesh::cube(), Mesh::sphere(12, 6), Mesh::plane(2.0)] {
            let count = mesh.data.validate().unwrap();
            assert!(mesh.indices.iter().all(|&i| i < count));
            assert_eq!(mesh.indices.len() % 3, 0);
        }
        assert_eq!(Mesh::cube().data.vertex_count(), 24);
        assert_eq!(Mesh::cube().indices.len(), 36);
    }

    #[test]
    fn primitives_wind_counter_clockwise() {
        assert_outward_winding(&Mesh::cube());
        assert_outward_winding(&Mesh::sphere(16, 8));
        assert_outward_winding(&Mesh::plane(4.0));
    }

    #[test]
    fn sphere_clamps_tessellation() {
        let sphere = Mesh::sphere(0, 0);
        assert_eq!(sphere.data.vertex_count(), 4 * 3);
        assert_eq!(sphere.indices.len(), 3 * 2 * 6);
    }

    #[test]
    fn plane_spans_requested_size() {
        let (min, max) = Mesh::plane(4.0).data.bounds().unwrap();
        assert_eq!(min, Vec3::new(-2.0, 0.0, -2.0));
        assert_eq!(max, Vec3::new(2.0, 0.0, 2.0));
    }

    #[test]
    fn transform_matrix_applies_scale_before_translation() {
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0)).uniform_scale(2.0);
        let point = transform.matrix().transform_point3(Vec3::ONE);
        assert_eq!(point, Vec3::new(3.0, 4.0, 5.0));
        assert_eq!(Mat4::from(Transform::new()), Mat4::IDENTITY);
    }
}
