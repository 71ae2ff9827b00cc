//! Vertex and index data packed into GPU buffers.
//!
//! Callers describe vertices with [`VertexData`], one variant per
//! [`VertexLayout`], holding flat `f32` arrays per attribute. [`Geometry::new`]
//! validates the arrays, interleaves them in the order given by the layout's
//! attribute table and uploads the result.
//!
//! ```ignore
//! let triangle = VertexData::PositionColor {
//!     positions: vec![0.0, 0.5, 0.0, -0.5, -0.5, 0.0, 0.5, -0.5, 0.0],
//!     colors: vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0],
//! };
//! let geometry = renderer.create_geometry("triangle", &triangle, None)?;
//! ```

use glam::Vec3;

use crate::backend::{Backend, BufferDescriptor, BufferHandle, BufferKind};
use crate::error::{GeometryError, Result};
use crate::vertex::{Semantic, VertexLayout};

/// Per-attribute vertex arrays for one layout.
///
/// Each array is flat: three floats per vertex for positions, normals and
/// tangents, two for uvs, four for colors.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexData {
    Position {
        positions: Vec<f32>,
    },
    PositionColor {
        positions: Vec<f32>,
        colors: Vec<f32>,
    },
    PositionUv {
        positions: Vec<f32>,
        uvs: Vec<f32>,
    },
    PositionNormal {
        positions: Vec<f32>,
        normals: Vec<f32>,
    },
    PositionNormalColor {
        positions: Vec<f32>,
        normals: Vec<f32>,
        colors: Vec<f32>,
    },
    PositionNormalUv {
        positions: Vec<f32>,
        normals: Vec<f32>,
        uvs: Vec<f32>,
    },
    PositionNormalTangentUv {
        positions: Vec<f32>,
        normals: Vec<f32>,
        tangents: Vec<f32>,
        uvs: Vec<f32>,
    },
}

impl VertexData {
    /// Layout matching this variant.
    pub fn layout(&self) -> VertexLayout {
        match self {
            VertexData::Position { .. } => VertexLayout::Position,
            VertexData::PositionColor { .. } => VertexLayout::PositionColor,
            VertexData::PositionUv { .. } => VertexLayout::PositionUv,
            VertexData::PositionNormal { .. } => VertexLayout::PositionNormal,
            VertexData::PositionNormalColor { .. } => VertexLayout::PositionNormalColor,
            VertexData::PositionNormalUv { .. } => VertexLayout::PositionNormalUv,
            VertexData::PositionNormalTangentUv { .. } => VertexLayout::PositionNormalTangentUv,
        }
    }

    /// Attribute arrays in the layout's semantic order.
    fn arrays(&self) -> Vec<&[f32]> {
        match self {
            VertexData::Position { positions } => vec![positions.as_slice()],
            VertexData::PositionColor { positions, colors } => {
                vec![positions.as_slice(), colors.as_slice()]
            }
            VertexData::PositionUv { positions, uvs } => {
                vec![positions.as_slice(), uvs.as_slice()]
            }
            VertexData::PositionNormal { positions, normals } => {
                vec![positions.as_slice(), normals.as_slice()]
            }
            VertexData::PositionNormalColor {
                positions,
                normals,
                colors,
            } => vec![positions.as_slice(), normals.as_slice(), colors.as_slice()],
            VertexData::PositionNormalUv {
                positions,
                normals,
                uvs,
            } => vec![positions.as_slice(), normals.as_slice(), uvs.as_slice()],
            VertexData::PositionNormalTangentUv {
                positions,
                normals,
                tangents,
                uvs,
            } => vec![
                positions.as_slice(),
                normals.as_slice(),
                tangents.as_slice(),
                uvs.as_slice(),
            ],
        }
    }

    fn from_arrays(layout: VertexLayout, arrays: Vec<Vec<f32>>) -> Self {
        let mut arrays = arrays.into_iter();
        let mut next = || arrays.next().unwrap_or_default();
        match layout {
            VertexLayout::Position => VertexData::Position { positions: next() },
            VertexLayout::PositionColor => VertexData::PositionColor {
                positions: next(),
                colors: next(),
            },
            VertexLayout::PositionUv => VertexData::PositionUv {
                positions: next(),
                uvs: next(),
            },
            VertexLayout::PositionNormal => VertexData::PositionNormal {
                positions: next(),
                normals: next(),
            },
            VertexLayout::PositionNormalColor => VertexData::PositionNormalColor {
                positions: next(),
                normals: next(),
                colors: next(),
            },
            VertexLayout::PositionNormalUv => VertexData::PositionNormalUv {
                positions: next(),
                normals: next(),
                uvs: next(),
            },
            VertexLayout::PositionNormalTangentUv => VertexData::PositionNormalTangentUv {
                positions: next(),
                normals: next(),
                tangents: next(),
                uvs: next(),
            },
        }
    }

    /// Flat `xyz` positions.
    pub fn positions(&self) -> &[f32] {
        self.arrays()[0]
    }

    /// Number of vertices implied by the position array.
    pub fn vertex_count(&self) -> usize {
        self.positions().len() / 3
    }

    /// Checks every array against the vertex count and returns that count.
    pub fn validate(&self) -> Result<u32, GeometryError> {
        let positions = self.positions();
        if positions.is_empty() {
            return Err(GeometryError::Empty);
        }
        if positions.len() % 3 != 0 {
            return Err(GeometryError::PositionLength(positions.len()));
        }
        let count = positions.len() / 3;
        for (semantic, array) in self.layout().semantics().iter().zip(self.arrays()) {
            let expected = count * semantic.components();
            if array.len() != expected {
                return Err(GeometryError::AttributeLength {
                    attribute: semantic.name(),
                    expected,
                    actual: array.len(),
                });
            }
        }
        Ok(count as u32)
    }

    /// Interleaves the arrays into one buffer, vertex by vertex.
    ///
    /// Assumes [`validate`](Self::validate) passed.
    pub fn pack(&self) -> Vec<f32> {
        let layout = self.layout();
        let arrays = self.arrays();
        let count = self.vertex_count();
        let mut packed = Vec::with_capacity(count * layout.floats_per_vertex());
        for vertex in 0..count {
            for (semantic, array) in layout.semantics().iter().zip(&arrays) {
                let width = semantic.components();
                packed.extend_from_slice(&array[vertex * width..(vertex + 1) * width]);
            }
        }
        packed
    }

    /// Splits interleaved data back into per-attribute arrays.
    pub fn unpack(layout: VertexLayout, packed: &[f32]) -> Result<Self, GeometryError> {
        let floats_per_vertex = layout.floats_per_vertex();
        if packed.len() % floats_per_vertex != 0 {
            return Err(GeometryError::PackedLength {
                floats_per_vertex,
                actual: packed.len(),
            });
        }
        let count = packed.len() / floats_per_vertex;
        let mut arrays: Vec<Vec<f32>> = layout
            .semantics()
            .iter()
            .map(|s| Vec::with_capacity(count * s.components()))
            .collect();
        for vertex in packed.chunks_exact(floats_per_vertex) {
            let mut offset = 0;
            for (semantic, array) in layout.semantics().iter().zip(arrays.iter_mut()) {
                let width = semantic.components();
                array.extend_from_slice(&vertex[offset..offset + width]);
                offset += width;
            }
        }
        Ok(Self::from_arrays(layout, arrays))
    }

    /// Axis-aligned bounding box of the positions.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut points = self.positions().chunks_exact(3).map(Vec3::from_slice);
        let first = points.next()?;
        Some(points.fold((first, first), |(min, max), p| (min.min(p), max.max(p))))
    }
}

/// Index values encoded for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedIndices {
    /// Little-endian index values, zero-padded to [`wgpu::COPY_BUFFER_ALIGNMENT`].
    pub bytes: Vec<u8>,
    pub format: wgpu::IndexFormat,
    pub count: u32,
}

/// Narrowest index format able to address `max_index`.
pub fn index_format_for(max_index: u32) -> wgpu::IndexFormat {
    if max_index <= u16::MAX as u32 {
        wgpu::IndexFormat::Uint16
    } else {
        wgpu::IndexFormat::Uint32
    }
}

/// Encodes indices in sequence order, `array[i] = indices[i]`.
pub fn pack_indices(indices: &[u32]) -> PackedIndices {
    let max = indices.iter().copied().max().unwrap_or(0);
    let format = index_format_for(max);
    let mut bytes: Vec<u8> = match format {
        wgpu::IndexFormat::Uint16 => indices
            .iter()
            .flat_map(|&i| (i as u16).to_le_bytes())
            .collect(),
        wgpu::IndexFormat::Uint32 => indices.iter().flat_map(|&i| i.to_le_bytes()).collect(),
    };
    let padded = wgpu::util::align_to(bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
    bytes.resize(padded as usize, 0);
    PackedIndices {
        bytes,
        format,
        count: indices.len() as u32,
    }
}

fn validate_indices(indices: &[u32], vertex_count: u32) -> Result<(), GeometryError> {
    if indices.is_empty() {
        return Err(GeometryError::EmptyIndices);
    }
    if let Some((position, &index)) = indices
        .iter()
        .enumerate()
        .find(|(_, index)| **index >= vertex_count)
    {
        return Err(GeometryError::IndexOutOfBounds {
            position,
            index,
            vertex_count,
        });
    }
    Ok(())
}

/// Identifies a geometry within a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub(crate) u64);

/// Immutable vertex buffer and optional index buffer for one layout.
#[derive(Debug)]
pub struct Geometry {
    label: String,
    layout: VertexLayout,
    vertex_buffer: BufferHandle,
    index_buffer: Option<BufferHandle>,
    vertex_count: u32,
    index_count: u32,
    index_format: wgpu::IndexFormat,
}

impl Geometry {
    /// Validates `data` and `indices`, then uploads them.
    ///
    /// Without `indices` the geometry draws vertices `0..vertex_count` in
    /// order. Nothing stays allocated when an error is returned.
    pub fn new(
        backend: &mut dyn Backend,
        label: &str,
        data: &VertexData,
        indices: Option<&[u32]>,
    ) -> Result<Self> {
        let vertex_count = data.validate()?;
        if let Some(indices) = indices {
            validate_indices(indices, vertex_count)?;
        }

        let packed = data.pack();
        let vertex_buffer = backend.create_buffer(&BufferDescriptor {
            label,
            kind: BufferKind::Vertex,
            contents: bytemuck::cast_slice(&packed),
        })?;

        let (index_buffer, index_count, index_format) = match indices {
            Some(indices) => {
                let packed = pack_indices(indices);
                let buffer = backend.create_buffer(&BufferDescriptor {
                    label,
                    kind: BufferKind::Index,
                    contents: &packed.bytes,
                });
                match buffer {
                    Ok(buffer) => (Some(buffer), packed.count, packed.format),
                    Err(err) => {
                        backend.destroy_buffer(vertex_buffer);
                        return Err(err);
                    }
                }
            }
            None => (None, vertex_count, index_format_for(vertex_count - 1)),
        };

        log::debug!(
            "geometry '{label}': {vertex_count} {} vertices, {index_count} elements{}",
            data.layout(),
            if index_buffer.is_some() { " (indexed)" } else { "" }
        );

        Ok(Self {
            label: label.to_string(),
            layout: data.layout(),
            vertex_buffer,
            index_buffer,
            vertex_count,
            index_count,
            index_format,
        })
    }

    /// Debug label given at creation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Vertex layout the data was packed with.
    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    /// Number of vertices uploaded.
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of elements drawn. Equal to the vertex count when not indexed.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Narrowest format for the index range, also reported for implicit indices.
    pub fn index_format(&self) -> wgpu::IndexFormat {
        self.index_format
    }

    /// Whether an index buffer was uploaded.
    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }

    /// Buffer bound at the vertex slot.
    pub fn vertex_buffer(&self) -> BufferHandle {
        self.vertex_buffer
    }

    /// Index buffer, absent for implicit indices.
    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.index_buffer
    }

    /// Whether the layout carries `semantic`.
    pub fn has(&self, semantic: Semantic) -> bool {
        self.layout.has(semantic)
    }

    /// Releases both buffers.
    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.vertex_buffer);
        if let Some(index_buffer) = self.index_buffer {
            backend.destroy_buffer(index_buffer);
        }
    }
}
