//! The seam between the engine and the GPU.
//!
//! Everything the engine allocates goes through [`Backend`] and comes back as a
//! small copyable handle. The engine never touches a `wgpu::Buffer` directly,
//! which lets the same renderer drive a real device ([`WgpuBackend`]) or a
//! headless recorder ([`RecordingBackend`]).
//!
//! A frame is submitted as a flat list of [`RenderCommand`]s that the backend
//! replays inside a single render pass.
//!
//! [`WgpuBackend`]: crate::WgpuBackend
//! [`RecordingBackend`]: crate::RecordingBackend

use std::ops::Range;

use crate::color::Color;
use crate::error::Result;
use crate::vertex::VertexLayout;

/// Handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a sampled texture (texture, view and sampler together).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a compiled shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderModuleHandle(pub(crate) u64);

/// Handle to a bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindGroupHandle(pub(crate) u64);

/// Handle to a render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub(crate) u64);

/// Monotonic handle source shared by backend implementations.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub(crate) fn next(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

/// What a buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

impl BufferKind {
    /// wgpu usages for a buffer of this kind.
    pub fn usages(self) -> wgpu::BufferUsages {
        let usage = match self {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
        };
        usage | wgpu::BufferUsages::COPY_DST
    }
}

/// Buffer creation request. `contents` length is the buffer size and must be
/// a multiple of [`wgpu::COPY_BUFFER_ALIGNMENT`].
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub kind: BufferKind,
    pub contents: &'a [u8],
}

/// Sampler settings carried by a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
        }
    }
}

/// RGBA8 texture creation request.
#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    /// Tightly packed rows, 4 bytes per texel.
    pub data: &'a [u8],
    pub sampler: SamplerSettings,
}

/// One entry of a bind group, in binding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingResource {
    Uniform(BufferHandle),
    TextureView(TextureHandle),
    Sampler(TextureHandle),
}

impl BindingResource {
    /// Layout slot this resource occupies.
    pub fn kind(&self) -> BindingKind {
        match self {
            BindingResource::Uniform(_) => BindingKind::Uniform,
            BindingResource::TextureView(_) => BindingKind::Texture,
            BindingResource::Sampler(_) => BindingKind::Sampler,
        }
    }
}

/// Shape of a bind group slot, used to derive bind group layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Uniform,
    Texture,
    Sampler,
}

/// Fixed-function state taken from a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveSettings {
    pub topology: wgpu::PrimitiveTopology,
    pub front_face: wgpu::FrontFace,
    pub cull_mode: Option<wgpu::Face>,
}

/// Render pipeline creation request.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor<'a> {
    pub label: &'a str,
    /// Module exposing `vertex_main` and `fragment_main`.
    pub shader: ShaderModuleHandle,
    /// Layout of vertex buffer slot 1. Slot 0 is always the instance layout.
    pub vertex_layout: VertexLayout,
    /// Binding kinds per bind group, group 0 first.
    pub bind_groups: &'a [&'a [BindingKind]],
    pub primitive: PrimitiveSettings,
}

/// A single recorded render pass operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCommand {
    SetPipeline(PipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        format: wgpu::IndexFormat,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

/// Everything one call to `render()` submits.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub clear_color: Color,
    pub commands: Vec<RenderCommand>,
}

impl Frame {
    /// Number of draw commands in the frame.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RenderCommand::Draw { .. } | RenderCommand::DrawIndexed { .. }))
            .count()
    }
}

/// GPU object factory and command sink.
///
/// Destroying an unknown or already destroyed handle is a no-op.
pub trait Backend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle>;

    /// Writes `data` at byte `offset`. Both must respect
    /// [`wgpu::COPY_BUFFER_ALIGNMENT`].
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Creates a module from WGSL that has already passed validation.
    fn create_shader_module(&mut self, label: &str, source: &str) -> Result<ShaderModuleHandle>;

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle);

    fn create_bind_group(
        &mut self,
        label: &str,
        entries: &[BindingResource],
    ) -> Result<BindGroupHandle>;

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);

    fn create_render_pipeline(&mut self, desc: &PipelineDescriptor<'_>)
    -> Result<PipelineHandle>;

    fn destroy_render_pipeline(&mut self, pipeline: PipelineHandle);

    /// Records one render pass from `frame` and submits it.
    fn submit(&mut self, frame: &Frame) -> Result<()>;

    /// Reconfigures the output for a new surface size.
    fn resize(&mut self, width: u32, height: u32);

    /// Current output size in pixels.
    fn size(&self) -> (u32, u32);

    /// Releases the surface configuration and the device.
    fn dispose(&mut self);
}
