//! Drawable units: a geometry, a material and per-instance transforms.
//!
//! Each instance occupies 128 bytes of the instance buffer: the model matrix
//! followed by its inverse transpose, both column-major. Updating one instance
//! writes only its own slot.

use glam::Mat4;

use crate::backend::{Backend, BufferDescriptor, BufferHandle, BufferKind};
use crate::error::{Error, Result};
use crate::geometry::GeometryId;
use crate::material::MaterialId;
use crate::vertex::INSTANCE_STRIDE;

/// Identifies a model within a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub(crate) u64);

const IDENTITY_COLUMNS: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// GPU layout of one instance.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceTransform {
    pub model: [[f32; 4]; 4],
    /// Inverse transpose of `model`, for transforming normals.
    pub normal: [[f32; 4]; 4],
}

impl InstanceTransform {
    /// Identity model and normal matrices.
    pub const IDENTITY: Self = Self {
        model: IDENTITY_COLUMNS,
        normal: IDENTITY_COLUMNS,
    };

    /// Pairs `matrix` with its normal matrix. `None` if `matrix` has no
    /// usable inverse (zero, subnormal or non-finite determinant).
    pub fn from_matrix(matrix: Mat4) -> Option<Self> {
        if !matrix.determinant().is_normal() {
            return None;
        }
        Some(Self {
            model: matrix.to_cols_array_2d(),
            normal: matrix.inverse().transpose().to_cols_array_2d(),
        })
    }

    /// Object to world transform.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }

    /// Inverse transpose of the model matrix.
    pub fn normal_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.normal)
    }
}

/// A geometry drawn with a material, `instance_count` times per frame.
#[derive(Debug)]
pub struct Model {
    label: String,
    geometry: GeometryId,
    material: MaterialId,
    buffer: BufferHandle,
    instances: Vec<InstanceTransform>,
}

impl Model {
    /// Allocates the instance buffer with every instance at identity.
    pub fn new(
        backend: &mut dyn Backend,
        label: &str,
        geometry: GeometryId,
        material: MaterialId,
        instance_count: u32,
    ) -> Result<Self> {
        if instance_count < 1 {
            return Err(Error::InvalidArgument(format!(
                "model '{label}' needs at least one instance"
            )));
        }
        let instances = vec![InstanceTransform::IDENTITY; instance_count as usize];
        let buffer = backend.create_buffer(&BufferDescriptor {
            label,
            kind: BufferKind::Vertex,
            contents: bytemuck::cast_slice(&instances),
        })?;
        log::debug!("model '{label}': {instance_count} instance(s)");
        Ok(Self {
            label: label.to_string(),
            geometry,
            material,
            buffer,
            instances,
        })
    }

    /// Replaces the transform of instance `index`.
    ///
    /// A singular `matrix` leaves both the buffer and [`instance`](Self::instance)
    /// unchanged.
    pub fn transform(
        &mut self,
        backend: &mut dyn Backend,
        matrix: Mat4,
        index: u32,
    ) -> Result<()> {
        if index >= self.instance_count() {
            return Err(Error::InvalidArgument(format!(
                "instance {index} out of range for model '{}' ({} instances)",
                self.label,
                self.instances.len()
            )));
        }
        let transform =
            InstanceTransform::from_matrix(matrix).ok_or(Error::SingularMatrix { index })?;
        backend.write_buffer(
            self.buffer,
            index as u64 * INSTANCE_STRIDE,
            bytemuck::bytes_of(&transform),
        )?;
        self.instances[index as usize] = transform;
        Ok(())
    }

    /// Last transform written for instance `index`.
    pub fn instance(&self, index: u32) -> Option<&InstanceTransform> {
        self.instances.get(index as usize)
    }

    /// Transforms as last written, by instance index.
    pub fn instances(&self) -> &[InstanceTransform] {
        &self.instances
    }

    /// Number of instances drawn.
    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    /// Debug label given at creation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Geometry drawn by every instance.
    pub fn geometry(&self) -> GeometryId {
        self.geometry
    }

    /// Material drawn with.
    pub fn material(&self) -> MaterialId {
        self.material
    }

    /// Buffer bound at the instance slot.
    pub fn instance_buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Releases the instance buffer.
    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingBackend;
    use glam::{Quat, Vec3};

    fn model(backend: &mut RecordingBackend, count: u32) -> Result<Model> {
        Model::new(backend, "test", GeometryId(1), MaterialId(1), count)
    }

    /// Decodes instance `index` from the recorded buffer bytes.
    fn uploaded(backend: &RecordingBackend, model: &Model, index: usize) -> InstanceTransform {
        let bytes = &backend.buffer(model.instance_buffer()).unwrap().data;
        let start = index * INSTANCE_STRIDE as usize;
        bytemuck::pod_read_unaligned(&bytes[start..start + INSTANCE_STRIDE as usize])
    }

    #[test]
    fn zero_instances_is_invalid() {
        let mut backend = RecordingBackend::default();
        assert!(matches!(
            model(&mut backend, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(backend.live_objects().buffers, 0);
    }

    #[test]
    fn instances_start_at_identity() {
        let mut backend = RecordingBackend::default();
        let model = model(&mut backend, 4).unwrap();
        assert_eq!(
            backend.buffer(model.instance_buffer()).unwrap().data.len(),
            4 * 128
        );
        for i in 0..4 {
            assert_eq!(uploaded(&backend, &model, i), InstanceTransform::IDENTITY);
            assert_eq!(model.instance(i as u32), Some(&InstanceTransform::IDENTITY));
        }
    }

    #[test]
    fn transform_writes_matrix_and_inverse_transpose() {
        let mut backend = RecordingBackend::default();
        let mut model = model(&mut backend, 3).unwrap();
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 2.0, 4.0),
            Quat::from_rotation_y(0.5),
            Vec3::new(3.0, -1.0, 2.0),
        );

        model.transform(&mut backend, matrix, 1).unwrap();

        let written = uploaded(&backend, &model, 1);
        assert_eq!(written.model_matrix(), matrix);
        assert!(
            written
                .normal_matrix()
                .abs_diff_eq(matrix.inverse().transpose(), 1e-6)
        );
        assert_eq!(model.instance(1), Some(&written));
        assert_eq!(uploaded(&backend, &model, 0), InstanceTransform::IDENTITY);
        assert_eq!(uploaded(&backend, &model, 2), InstanceTransform::IDENTITY);
    }

    #[test]
    fn singular_matrix_changes_nothing() {
        let mut backend = RecordingBackend::default();
        let mut model = model(&mut backend, 2).unwrap();
        let translate = Mat4::from_translation(Vec3::X);
        model.transform(&mut backend, translate, 0).unwrap();
        let before = backend.buffer(model.instance_buffer()).unwrap().data.clone();

        let flat = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert!(matches!(
            model.transform(&mut backend, flat, 0),
            Err(Error::SingularMatrix { index: 0 })
        ));
        let nan = Mat4::from_scale(Vec3::splat(f32::NAN));
        assert!(model.transform(&mut backend, nan, 1).is_err());

        assert_eq!(backend.buffer(model.instance_buffer()).unwrap().data, before);
        assert_eq!(model.instance(0).unwrap().model_matrix(), translate);
    }

    #[test]
    fn index_out_of_range_is_invalid() {
        let mut backend = RecordingBackend::default();
        let mut model = model(&mut backend, 2).unwrap();
        assert!(matches!(
            model.transform(&mut backend, Mat4::IDENTITY, 2),
            Err(Error::InvalidArgument(_))
        ));
    }
}
