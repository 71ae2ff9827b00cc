//! Headless backend that records instead of rendering.
//!
//! [`RecordingBackend`] keeps every object it is asked to create, stores buffer
//! contents in memory and appends each submitted [`Frame`] to a log. It checks
//! the same things wgpu validation would reject (copy alignment, out of range
//! writes, commands naming destroyed objects), so engine bugs show up as errors
//! instead of silently passing.

use std::collections::HashMap;

use crate::backend::{
    Backend, BindGroupHandle, BindingKind, BindingResource, BufferDescriptor, BufferHandle,
    BufferKind, Frame, HandleAllocator, PipelineDescriptor, PipelineHandle, PrimitiveSettings,
    RenderCommand, SamplerSettings, ShaderModuleHandle, TextureDescriptor, TextureHandle,
};
use crate::error::{Error, Result};
use crate::shader::{self, ShaderBinding};
use crate::vertex::VertexLayout;

/// A buffer as last written.
#[derive(Debug, Clone)]
pub struct RecordedBuffer {
    pub label: String,
    pub kind: BufferKind,
    pub data: Vec<u8>,
}

/// A texture with its uploaded pixels.
#[derive(Debug, Clone)]
pub struct RecordedTexture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub sampler: SamplerSettings,
}

/// A shader module with the resource bindings its source declares.
#[derive(Debug, Clone)]
pub struct RecordedShaderModule {
    pub label: String,
    pub source: String,
    pub bindings: Vec<ShaderBinding>,
}

/// A render pipeline and the state it was created with.
#[derive(Debug, Clone)]
pub struct RecordedPipeline {
    pub label: String,
    pub shader: ShaderModuleHandle,
    pub vertex_layout: VertexLayout,
    pub bind_groups: Vec<Vec<BindingKind>>,
    pub primitive: PrimitiveSettings,
}

/// Counts of objects created and not yet destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub textures: usize,
    pub shader_modules: usize,
    pub bind_groups: usize,
    pub pipelines: usize,
}

impl LiveObjects {
    /// Sum over every kind.
    pub fn total(&self) -> usize {
        self.buffers + self.textures + self.shader_modules + self.bind_groups + self.pipelines
    }
}

/// In-memory [`Backend`] for tests and tooling.
#[derive(Debug)]
pub struct RecordingBackend {
    handles: HandleAllocator,
    buffers: HashMap<BufferHandle, RecordedBuffer>,
    textures: HashMap<TextureHandle, RecordedTexture>,
    shader_modules: HashMap<ShaderModuleHandle, RecordedShaderModule>,
    bind_groups: HashMap<BindGroupHandle, Vec<BindingResource>>,
    pipelines: HashMap<PipelineHandle, RecordedPipeline>,
    frames: Vec<Frame>,
    size: (u32, u32),
    shader_modules_created: usize,
    pipelines_created: usize,
    shader_module_budget: Option<usize>,
    surface_lost: bool,
    disposed: bool,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl RecordingBackend {
    /// Creates a recorder standing in for a surface of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            handles: HandleAllocator::default(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            shader_modules: HashMap::new(),
            bind_groups: HashMap::new(),
            pipelines: HashMap::new(),
            frames: Vec::new(),
            size: (width, height),
            shader_modules_created: 0,
            pipelines_created: 0,
            shader_module_budget: None,
            surface_lost: false,
            disposed: false,
        }
    }

    /// A live buffer and its current contents.
    pub fn buffer(&self, handle: BufferHandle) -> Option<&RecordedBuffer> {
        self.buffers.get(&handle)
    }

    /// A live texture.
    pub fn texture(&self, handle: TextureHandle) -> Option<&RecordedTexture> {
        self.textures.get(&handle)
    }

    /// A live shader module with its source and declared bindings.
    pub fn shader_module(&self, handle: ShaderModuleHandle) -> Option<&RecordedShaderModule> {
        self.shader_modules.get(&handle)
    }

    /// Resources of a live bind group, in binding order.
    pub fn bind_group(&self, handle: BindGroupHandle) -> Option<&[BindingResource]> {
        self.bind_groups.get(&handle).map(Vec::as_slice)
    }

    /// A live render pipeline.
    pub fn pipeline(&self, handle: PipelineHandle) -> Option<&RecordedPipeline> {
        self.pipelines.get(&handle)
    }

    /// Frames submitted since the last [`take_frames`](Self::take_frames),
    /// oldest first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Most recently submitted frame still held.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Hands over the recorded frames, leaving the log empty.
    pub fn take_frames(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }

    /// Drops the recorded frames.
    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    /// Objects created and not yet destroyed, by kind.
    pub fn live_objects(&self) -> LiveObjects {
        LiveObjects {
            buffers: self.buffers.len(),
            textures: self.textures.len(),
            shader_modules: self.shader_modules.len(),
            bind_groups: self.bind_groups.len(),
            pipelines: self.pipelines.len(),
        }
    }

    /// Total shader modules ever created, including destroyed ones.
    pub fn shader_modules_created(&self) -> usize {
        self.shader_modules_created
    }

    /// Total pipelines ever created, including destroyed ones.
    pub fn pipelines_created(&self) -> usize {
        self.pipelines_created
    }

    /// Makes shader module creation fail once `count` more modules exist.
    pub fn fail_shader_modules_after(&mut self, count: usize) {
        self.shader_module_budget = Some(count);
    }

    /// Every later submit fails with [`Error::SurfaceLost`].
    pub fn lose_surface(&mut self) {
        self.surface_lost = true;
    }

    /// Whether [`Backend::dispose`] was called.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Backend("device has been destroyed".into()));
        }
        Ok(())
    }

    fn validate_command(&self, command: &RenderCommand) -> Result<()> {
        let known = match command {
            RenderCommand::SetPipeline(pipeline) => self.pipelines.contains_key(pipeline),
            RenderCommand::SetBindGroup { bind_group, .. } => {
                self.bind_groups.contains_key(bind_group)
            }
            RenderCommand::SetVertexBuffer { buffer, .. } => self
                .buffers
                .get(buffer)
                .is_some_and(|b| b.kind == BufferKind::Vertex),
            RenderCommand::SetIndexBuffer { buffer, .. } => self
                .buffers
                .get(buffer)
                .is_some_and(|b| b.kind == BufferKind::Index),
            RenderCommand::Draw { .. } | RenderCommand::DrawIndexed { .. } => true,
        };
        if known {
            Ok(())
        } else {
            Err(Error::Backend(format!(
                "command references a destroyed or mismatched object: {command:?}"
            )))
        }
    }
}

fn check_alignment(what: &str, value: u64) -> Result<()> {
    if value % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(Error::Backend(format!(
            "{what} {value} is not a multiple of {}",
            wgpu::COPY_BUFFER_ALIGNMENT
        )));
    }
    Ok(())
}

impl Backend for RecordingBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle> {
        self.ensure_alive()?;
        check_alignment("buffer size", desc.contents.len() as u64)?;
        let handle = BufferHandle(self.handles.next());
        self.buffers.insert(
            handle,
            RecordedBuffer {
                label: desc.label.to_string(),
                kind: desc.kind,
                data: desc.contents.to_vec(),
            },
        );
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        check_alignment("write offset", offset)?;
        check_alignment("write size", data.len() as u64)?;
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::Backend(format!("write to unknown buffer {buffer:?}")))?;
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(data.len())?))
            .filter(|range| range.end <= target.data.len());
        let Some(range) = range else {
            return Err(Error::Backend(format!(
                "write of {} bytes at {offset} overruns '{}' ({} bytes)",
                data.len(),
                target.label,
                target.data.len()
            )));
        };
        target.data[range].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle> {
        self.ensure_alive()?;
        let handle = TextureHandle(self.handles.next());
        self.textures.insert(
            handle,
            RecordedTexture {
                label: desc.label.to_string(),
                width: desc.width,
                height: desc.height,
                data: desc.data.to_vec(),
                sampler: desc.sampler,
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn create_shader_module(&mut self, label: &str, source: &str) -> Result<ShaderModuleHandle> {
        self.ensure_alive()?;
        if let Some(budget) = self.shader_module_budget {
            if budget == 0 {
                return Err(Error::Backend(format!("shader module '{label}' rejected")));
            }
            self.shader_module_budget = Some(budget - 1);
        }
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| Error::Backend(e.emit_to_string(source)))?;
        let bindings = shader::reflect_bindings(&module)
            .map_err(|message| Error::Backend(format!("shader module '{label}': {message}")))?;
        let handle = ShaderModuleHandle(self.handles.next());
        self.shader_modules.insert(
            handle,
            RecordedShaderModule {
                label: label.to_string(),
                source: source.to_string(),
                bindings,
            },
        );
        self.shader_modules_created += 1;
        Ok(handle)
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        self.shader_modules.remove(&module);
    }

    fn create_bind_group(
        &mut self,
        label: &str,
        entries: &[BindingResource],
    ) -> Result<BindGroupHandle> {
        self.ensure_alive()?;
        for entry in entries {
            let known = match entry {
                BindingResource::Uniform(buffer) => self
                    .buffers
                    .get(buffer)
                    .is_some_and(|b| b.kind == BufferKind::Uniform),
                BindingResource::TextureView(texture) | BindingResource::Sampler(texture) => {
                    self.textures.contains_key(texture)
                }
            };
            if !known {
                return Err(Error::Backend(format!(
                    "bind group '{label}' references unknown resource {entry:?}"
                )));
            }
        }
        let handle = BindGroupHandle(self.handles.next());
        self.bind_groups.insert(handle, entries.to_vec());
        Ok(handle)
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group);
    }

    fn create_render_pipeline(
        &mut self,
        desc: &PipelineDescriptor<'_>,
    ) -> Result<PipelineHandle> {
        self.ensure_alive()?;
        let module = self.shader_modules.get(&desc.shader).ok_or_else(|| {
            Error::Backend(format!(
                "pipeline '{}' uses unknown shader module",
                desc.label
            ))
        })?;
        shader::check_bindings(&module.bindings, desc.bind_groups)
            .map_err(|message| Error::Backend(format!("pipeline '{}': {message}", desc.label)))?;
        let handle = PipelineHandle(self.handles.next());
        self.pipelines.insert(
            handle,
            RecordedPipeline {
                label: desc.label.to_string(),
                shader: desc.shader,
                vertex_layout: desc.vertex_layout,
                bind_groups: desc.bind_groups.iter().map(|g| g.to_vec()).collect(),
                primitive: desc.primitive,
            },
        );
        self.pipelines_created += 1;
        Ok(handle)
    }

    fn destroy_render_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline);
    }

    fn submit(&mut self, frame: &Frame) -> Result<()> {
        self.ensure_alive()?;
        if self.surface_lost {
            return Err(Error::SurfaceLost);
        }
        for command in &frame.commands {
            self.validate_command(command)?;
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.size = (width, height);
        }
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_buffer(backend: &mut RecordingBackend, bytes: usize) -> BufferHandle {
        backend
            .create_buffer(&BufferDescriptor {
                label: "test",
                kind: BufferKind::Vertex,
                contents: &vec![0u8; bytes],
            })
            .unwrap()
    }

    #[test]
    fn partial_writes_only_touch_their_range() {
        let mut backend = RecordingBackend::default();
        let buffer = vertex_buffer(&mut backend, 16);
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            backend.buffer(buffer).unwrap().data,
            vec![0, 0, 0, 0, 1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn rejects_misaligned_and_overrunning_writes() {
        let mut backend = RecordingBackend::default();
        let buffer = vertex_buffer(&mut backend, 8);
        assert!(backend.write_buffer(buffer, 2, &[0; 4]).is_err());
        assert!(backend.write_buffer(buffer, 4, &[0; 8]).is_err());
        assert!(
            backend
                .create_buffer(&BufferDescriptor {
                    label: "odd",
                    kind: BufferKind::Index,
                    contents: &[0; 6],
                })
                .is_err()
        );
    }

    #[test]
    fn submit_rejects_destroyed_objects() {
        let mut backend = RecordingBackend::default();
        let buffer = vertex_buffer(&mut backend, 4);
        backend.destroy_buffer(buffer);
        let frame = Frame {
            clear_color: crate::Color::BLACK,
            commands: vec![RenderCommand::SetVertexBuffer { slot: 1, buffer }],
        };
        assert!(backend.submit(&frame).is_err());
        assert!(backend.frames().is_empty());
    }

    #[test]
    fn writes_past_the_address_space_fail() {
        let mut backend = RecordingBackend::default();
        let buffer = vertex_buffer(&mut backend, 8);
        assert!(matches!(
            backend.write_buffer(buffer, u64::MAX - 3, &[0; 4]),
            Err(Error::Backend(_))
        ));
        assert_eq!(backend.buffer(buffer).unwrap().data, vec![0; 8]);
    }

    #[test]
    fn taking_frames_empties_the_log() {
        let mut backend = RecordingBackend::default();
        let frame = Frame {
            clear_color: crate::Color::BLACK,
            commands: Vec::new(),
        };
        for _ in 0..3 {
            backend.submit(&frame).unwrap();
        }
        assert_eq!(backend.take_frames().len(), 3);
        assert!(backend.frames().is_empty());

        backend.submit(&frame).unwrap();
        backend.clear_frames();
        assert!(backend.last_frame().is_none());
    }

    #[test]
    fn pipelines_must_provide_declared_bindings() {
        let mut backend = RecordingBackend::default();
        let source = "@group(1) @binding(1) var tex: texture_2d<f32>;\n\
                      @fragment fn main() -> @location(0) vec4f { \
                      return textureLoad(tex, vec2i(0), 0); }";
        let module = backend.create_shader_module("textured", source).unwrap();
        assert_eq!(
            backend.shader_module(module).unwrap().bindings,
            vec![ShaderBinding {
                group: 1,
                binding: 1,
                kind: BindingKind::Texture,
            }]
        );

        fn pipeline<'a>(
            shader: ShaderModuleHandle,
            bind_groups: &'a [&'a [BindingKind]],
        ) -> PipelineDescriptor<'a> {
            PipelineDescriptor {
                label: "textured",
                shader,
                vertex_layout: VertexLayout::PositionUv,
                bind_groups,
                primitive: PrimitiveSettings {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                },
            }
        }
        let uniform_only: [&[BindingKind]; 2] = [&[BindingKind::Uniform], &[BindingKind::Uniform]];
        assert!(backend.create_render_pipeline(&pipeline(module, &uniform_only)).is_err());
        let wrong_kind: [&[BindingKind]; 2] = [
            &[BindingKind::Uniform],
            &[BindingKind::Uniform, BindingKind::Uniform],
        ];
        assert!(backend.create_render_pipeline(&pipeline(module, &wrong_kind)).is_err());
        let matching: [&[BindingKind]; 2] = [
            &[BindingKind::Uniform],
            &[BindingKind::Uniform, BindingKind::Texture],
        ];
        assert!(backend.create_render_pipeline(&pipeline(module, &matching)).is_ok());
        assert_eq!(backend.live_objects().pipelines, 1);
    }

    #[test]
    fn lost_surface_fails_submission() {
        let mut backend = RecordingBackend::default();
        backend.lose_surface();
        let frame = Frame {
            clear_color: crate::Color::BLACK,
            commands: Vec::new(),
        };
        assert!(matches!(backend.submit(&frame), Err(Error::SurfaceLost)));
    }

    #[test]
    fn resize_ignores_zero_sizes() {
        let mut backend = RecordingBackend::new(640, 480);
        backend.resize(0, 100);
        assert_eq!(backend.size(), (640, 480));
        backend.resize(1024, 768);
        assert_eq!(backend.size(), (1024, 768));
    }
}
