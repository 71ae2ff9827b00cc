//! Named uniform buffers bound by materials.

use crate::backend::{Backend, BufferDescriptor, BufferHandle, BufferKind};
use crate::error::{Error, Result};

/// Identifies a uniform buffer within a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformId(pub(crate) u64);

/// A zero-initialised uniform buffer written from the CPU.
#[derive(Debug)]
pub struct Uniform {
    label: String,
    buffer: BufferHandle,
    size: u64,
}

impl Uniform {
    /// Allocates `size` bytes rounded up to [`wgpu::COPY_BUFFER_ALIGNMENT`].
    pub fn new(backend: &mut dyn Backend, label: &str, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument(format!(
                "uniform '{label}' must not be empty"
            )));
        }
        let size = wgpu::util::align_to(size, wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = backend.create_buffer(&BufferDescriptor {
            label,
            kind: BufferKind::Uniform,
            contents: &vec![0; size as usize],
        })?;
        log::debug!("uniform '{label}': {size} bytes");
        Ok(Self {
            label: label.to_string(),
            buffer,
            size,
        })
    }

    /// Debug label given at creation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Backend buffer bound by materials.
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Size in bytes after alignment.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Writes `data` at byte `offset`. Both must be multiples of 4.
    pub fn write(&self, backend: &mut dyn Backend, offset: u64, data: &[u8]) -> Result<()> {
        let in_range = offset
            .checked_add(data.len() as u64)
            .is_some_and(|end| end <= self.size);
        if !in_range {
            return Err(Error::InvalidArgument(format!(
                "write of {} bytes at {offset} overruns uniform '{}' ({} bytes)",
                data.len(),
                self.label,
                self.size
            )));
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
            || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
        {
            return Err(Error::InvalidArgument(format!(
                "uniform '{}' writes must be 4-byte aligned",
                self.label
            )));
        }
        backend.write_buffer(self.buffer, offset, data)
    }

    /// Releases the backend buffer.
    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingBackend;

    #[test]
    fn size_is_aligned_and_zeroed() {
        let mut backend = RecordingBackend::default();
        let uniform = Uniform::new(&mut backend, "odd", 6).unwrap();
        assert_eq!(uniform.size(), 8);
        assert_eq!(backend.buffer(uniform.buffer()).unwrap().data, vec![0; 8]);
        assert!(Uniform::new(&mut backend, "empty", 0).is_err());
    }

    #[test]
    fn writes_land_at_offset() {
        let mut backend = RecordingBackend::default();
        let uniform = Uniform::new(&mut backend, "tint", 16).unwrap();
        let value = [0.5f32, 0.25];
        uniform
            .write(&mut backend, 8, bytemuck::cast_slice(&value))
            .unwrap();
        let data = &backend.buffer(uniform.buffer()).unwrap().data;
        let floats: Vec<f32> = data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats, vec![0.0, 0.0, 0.5, 0.25]);
    }

    #[test]
    fn out_of_range_and_misaligned_writes_fail() {
        let mut backend = RecordingBackend::default();
        let uniform = Uniform::new(&mut backend, "small", 8).unwrap();
        assert!(matches!(
            uniform.write(&mut backend, 4, &[0; 8]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            uniform.write(&mut backend, 2, &[0; 4]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            uniform.write(&mut backend, u64::MAX - 3, &[0; 4]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(backend.buffer(uniform.buffer()).unwrap().data, vec![0; 8]);
    }
}
