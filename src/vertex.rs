//! The fixed set of vertex layouts understood by the engine.
//!
//! Every [`VertexLayout`] owns one attribute table. Geometry packing, the
//! pipeline's vertex buffer descriptor and the generated WGSL input struct are
//! all read from that table, so the three can never disagree on offsets,
//! formats or shader locations.
//!
//! | Layout                    | Stride | Attributes (location)                               |
//! |---------------------------|--------|-----------------------------------------------------|
//! | `Position`                | 12     | position (8)                                        |
//! | `PositionColor`           | 28     | position (8), color (9)                             |
//! | `PositionUv`              | 20     | position (8), uv (9)                                |
//! | `PositionNormal`          | 24     | position (8), normal (9)                            |
//! | `PositionNormalColor`     | 40     | position (8), normal (9), color (10)                |
//! | `PositionNormalUv`        | 32     | position (8), normal (9), uv (10)                   |
//! | `PositionNormalTangentUv` | 44     | position (8), normal (9), tangent (10), uv (11)     |
//!
//! Locations 0..=7 belong to the per-instance transform pair, see
//! [`INSTANCE_LAYOUT`].

use std::fmt;

/// Per-vertex attribute meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Semantic {
    Position,
    Normal,
    Tangent,
    Uv,
    Color,
}

impl Semantic {
    /// Number of `f32` components.
    pub const fn components(self) -> usize {
        match self {
            Semantic::Position | Semantic::Normal | Semantic::Tangent => 3,
            Semantic::Uv => 2,
            Semantic::Color => 4,
        }
    }

    /// Field name used in the generated WGSL structs.
    pub const fn name(self) -> &'static str {
        match self {
            Semantic::Position => "position",
            Semantic::Normal => "normal",
            Semantic::Tangent => "tangent",
            Semantic::Uv => "uv",
            Semantic::Color => "color",
        }
    }
}

/// Shape of a geometry's vertex buffer.
///
/// The set is closed on purpose: the shader variant cache and the pipeline
/// cache build one entry per variant of [`VertexLayout::ALL`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexLayout {
    Position,
    PositionColor,
    PositionUv,
    PositionNormal,
    PositionNormalColor,
    PositionNormalUv,
    PositionNormalTangentUv,
}

const POSITION: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![8 => Float32x3];
const POSITION_COLOR: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![8 => Float32x3, 9 => Float32x4];
const POSITION_UV: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![8 => Float32x3, 9 => Float32x2];
const POSITION_NORMAL: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![8 => Float32x3, 9 => Float32x3];
const POSITION_NORMAL_COLOR: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![8 => Float32x3, 9 => Float32x3, 10 => Float32x4];
const POSITION_NORMAL_UV: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![8 => Float32x3, 9 => Float32x3, 10 => Float32x2];
const POSITION_NORMAL_TANGENT_UV: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    8 => Float32x3,
    9 => Float32x3,
    10 => Float32x3,
    11 => Float32x2,
];

/// Bytes per instance: a model matrix and a normal matrix, 16 floats each.
pub const INSTANCE_STRIDE: u64 = 128;

const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 8] = wgpu::vertex_attr_array![
    // model matrix columns
    0 => Float32x4,
    1 => Float32x4,
    2 => Float32x4,
    3 => Float32x4,
    // normal matrix columns
    4 => Float32x4,
    5 => Float32x4,
    6 => Float32x4,
    7 => Float32x4,
];

/// Per-instance buffer layout shared by every pipeline (vertex buffer slot 0).
pub const INSTANCE_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: INSTANCE_STRIDE,
    step_mode: wgpu::VertexStepMode::Instance,
    attributes: &INSTANCE_ATTRIBUTES,
};

impl VertexLayout {
    /// Every layout, in the order caches iterate them.
    pub const ALL: [VertexLayout; 7] = [
        VertexLayout::Position,
        VertexLayout::PositionColor,
        VertexLayout::PositionUv,
        VertexLayout::PositionNormal,
        VertexLayout::PositionNormalColor,
        VertexLayout::PositionNormalUv,
        VertexLayout::PositionNormalTangentUv,
    ];

    /// Position of this layout within [`VertexLayout::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Attribute meanings, in buffer order.
    pub const fn semantics(self) -> &'static [Semantic] {
        use Semantic::*;
        match self {
            VertexLayout::Position => &[Position],
            VertexLayout::PositionColor => &[Position, Color],
            VertexLayout::PositionUv => &[Position, Uv],
            VertexLayout::PositionNormal => &[Position, Normal],
            VertexLayout::PositionNormalColor => &[Position, Normal, Color],
            VertexLayout::PositionNormalUv => &[Position, Normal, Uv],
            VertexLayout::PositionNormalTangentUv => &[Position, Normal, Tangent, Uv],
        }
    }

    /// GPU attribute descriptors, parallel to [`semantics`](Self::semantics).
    pub const fn attributes(self) -> &'static [wgpu::VertexAttribute] {
        match self {
            VertexLayout::Position => &POSITION,
            VertexLayout::PositionColor => &POSITION_COLOR,
            VertexLayout::PositionUv => &POSITION_UV,
            VertexLayout::PositionNormal => &POSITION_NORMAL,
            VertexLayout::PositionNormalColor => &POSITION_NORMAL_COLOR,
            VertexLayout::PositionNormalUv => &POSITION_NORMAL_UV,
            VertexLayout::PositionNormalTangentUv => &POSITION_NORMAL_TANGENT_UV,
        }
    }

    /// Pairs each semantic with its descriptor.
    pub fn attribute_table(
        self,
    ) -> impl Iterator<Item = (Semantic, &'static wgpu::VertexAttribute)> {
        self.semantics()
            .iter()
            .copied()
            .zip(self.attributes().iter())
    }

    /// Bytes per vertex.
    pub fn stride(self) -> u64 {
        self.attributes().iter().map(|a| a.format.size()).sum()
    }

    /// `f32`s per vertex.
    pub fn floats_per_vertex(self) -> usize {
        (self.stride() / 4) as usize
    }

    /// Whether the layout carries `semantic`.
    pub fn has(self, semantic: Semantic) -> bool {
        self.semantics().contains(&semantic)
    }

    /// Vertex buffer descriptor for pipeline creation (vertex buffer slot 1).
    pub fn buffer_layout(self) -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride(),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: self.attributes(),
        }
    }

    /// Fields of the generated WGSL `VertexIn` struct.
    pub fn shader_input(self) -> String {
        self.attribute_table()
            .map(|(semantic, attribute)| {
                format!(
                    "    @location({}) {}: {},\n",
                    attribute.shader_location,
                    semantic.name(),
                    wgsl_type(attribute.format)
                )
            })
            .collect()
    }

    /// Statements copying `VertexIn` fields into the canonical `Vertex` record.
    pub fn shader_adapter(self) -> String {
        self.semantics()
            .iter()
            .map(|semantic| format!("    result.{0} = vertex_in.{0};\n", semantic.name()))
            .collect()
    }

    /// Kebab-case name, used in GPU object labels.
    pub const fn name(self) -> &'static str {
        match self {
            VertexLayout::Position => "position",
            VertexLayout::PositionColor => "position-color",
            VertexLayout::PositionUv => "position-uv",
            VertexLayout::PositionNormal => "position-normal",
            VertexLayout::PositionNormalColor => "position-normal-color",
            VertexLayout::PositionNormalUv => "position-normal-uv",
            VertexLayout::PositionNormalTangentUv => "position-normal-tangent-uv",
        }
    }
}

impl fmt::Display for VertexLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn wgsl_type(format: wgpu::VertexFormat) -> &'static str {
    match format {
        wgpu::VertexFormat::Float32 => "f32",
        wgpu::VertexFormat::Float32x2 => "vec2f",
        wgpu::VertexFormat::Float32x3 => "vec3f",
        wgpu::VertexFormat::Float32x4 => "vec4f",
        // The tables above only use f32 formats.
        _ => unreachable!("non-f32 vertex format {format:?}"),
    }
}
