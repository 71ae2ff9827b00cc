//! wgpu implementation of [`Backend`].
//!
//! [`WgpuBackend`] owns the surface, device and queue, plus every GPU object the
//! engine asks for, stored behind the handles from [`crate::backend`]. Bind
//! group layouts are derived from the binding kinds of each group and cached,
//! so a pipeline and the bind groups later used with it always agree.
//!
//! ```no_run
//! use std::sync::Arc;
//! use phalanx::{GpuConfig, WgpuBackend};
//! # fn window() -> Arc<winit::window::Window> { unimplemented!() }
//!
//! let window = window();
//! let size = window.inner_size();
//! let backend = WgpuBackend::new_blocking(window, size.width, size.height, &GpuConfig::default())?;
//! # Ok::<(), phalanx::Error>(())
//! ```

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::backend::{
    Backend, BindGroupHandle, BindingKind, BindingResource, BufferDescriptor, BufferHandle, Frame,
    HandleAllocator, PipelineDescriptor, PipelineHandle, RenderCommand, ShaderModuleHandle,
    TextureDescriptor, TextureHandle,
};
use crate::error::{Error, Result};
use crate::shader::{FRAGMENT_ENTRY, VERTEX_ENTRY};
use crate::vertex::INSTANCE_LAYOUT;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Device and surface options.
#[derive(Debug, Clone)]
pub struct GpuConfig {
    pub power_preference: wgpu::PowerPreference,
    /// Falls back to `Fifo` when the surface does not support it.
    pub present_mode: wgpu::PresentMode,
    /// Pick an sRGB surface format when one is available.
    pub prefer_srgb: bool,
    pub desired_maximum_frame_latency: u32,
    /// Attach a depth buffer and depth-test every pipeline.
    pub depth: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::default(),
            present_mode: wgpu::PresentMode::Fifo,
            prefer_srgb: true,
            desired_maximum_frame_latency: 2,
            depth: true,
        }
    }
}

impl GpuConfig {
    /// Defaults: `Fifo`, sRGB surface, depth on, two frames of latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter selection preference.
    pub fn power_preference(mut self, preference: wgpu::PowerPreference) -> Self {
        self.power_preference = preference;
        self
    }

    /// Used when the surface supports it, otherwise `Fifo`.
    pub fn present_mode(mut self, mode: wgpu::PresentMode) -> Self {
        self.present_mode = mode;
        self
    }

    /// Prefer an sRGB surface format.
    pub fn srgb(mut self, prefer: bool) -> Self {
        self.prefer_srgb = prefer;
        self
    }

    /// Desired maximum frames in flight.
    pub fn frame_latency(mut self, frames: u32) -> Self {
        self.desired_maximum_frame_latency = frames;
        self
    }

    /// Whether render passes use a depth buffer.
    pub fn depth(mut self, enabled: bool) -> Self {
        self.depth = enabled;
        self
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

struct DepthBuffer {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthBuffer {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// Renders to a window surface through wgpu.
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth: Option<DepthBuffer>,
    handles: HandleAllocator,
    buffers: HashMap<BufferHandle, wgpu::Buffer>,
    textures: HashMap<TextureHandle, GpuTexture>,
    shader_modules: HashMap<ShaderModuleHandle, wgpu::ShaderModule>,
    bind_groups: HashMap<BindGroupHandle, wgpu::BindGroup>,
    pipelines: HashMap<PipelineHandle, wgpu::RenderPipeline>,
    bind_group_layouts: HashMap<Vec<BindingKind>, wgpu::BindGroupLayout>,
    disposed: bool,
}

impl WgpuBackend {
    /// Acquires an adapter and device for `target` and configures its surface.
    pub async fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
        config: &GpuConfig,
    ) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(target)
            .map_err(|e| Error::SurfaceUnavailable(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::AdapterUnavailable(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("using adapter '{}' ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Phalanx Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
                experimental_features: Default::default(),
            })
            .await
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb() == config.prefer_srgb)
            .or_else(|| caps.formats.first())
            .copied()
            .ok_or_else(|| {
                Error::SurfaceUnavailable("surface is not supported by the adapter".into())
            })?;
        let present_mode = if caps.present_modes.contains(&config.present_mode) {
            config.present_mode
        } else {
            log::warn!(
                "present mode {:?} unsupported, using Fifo",
                config.present_mode
            );
            wgpu::PresentMode::Fifo
        };

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: config.desired_maximum_frame_latency,
        };
        surface.configure(&device, &surface_config);
        log::debug!(
            "surface configured: {}x{} {:?} {:?}",
            surface_config.width,
            surface_config.height,
            format,
            present_mode
        );

        let depth = config
            .depth
            .then(|| DepthBuffer::new(&device, surface_config.width, surface_config.height));

        Ok(Self {
            surface,
            device,
            queue,
            config: surface_config,
            depth,
            handles: HandleAllocator::default(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            shader_modules: HashMap::new(),
            bind_groups: HashMap::new(),
            pipelines: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            disposed: false,
        })
    }

    /// [`new`](Self::new), blocking on the current thread.
    pub fn new_blocking(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
        config: &GpuConfig,
    ) -> Result<Self> {
        pollster::block_on(Self::new(target, width, height, config))
    }

    /// The underlying wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The underlying wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Color format of the surface, used by every pipeline.
    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Backend("device has been destroyed".into()));
        }
        Ok(())
    }

    fn bind_group_layout(&mut self, kinds: &[BindingKind]) -> wgpu::BindGroupLayout {
        let device = &self.device;
        self.bind_group_layouts
            .entry(kinds.to_vec())
            .or_insert_with(|| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = kinds
                    .iter()
                    .enumerate()
                    .map(|(binding, kind)| layout_entry(binding as u32, *kind))
                    .collect();
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Bind Group Layout"),
                    entries: &entries,
                })
            })
            .clone()
    }

    fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.config);
        if self.depth.is_some() {
            self.depth = Some(DepthBuffer::new(
                &self.device,
                self.config.width,
                self.config.height,
            ));
        }
    }
}

fn layout_entry(binding: u32, kind: BindingKind) -> wgpu::BindGroupLayoutEntry {
    let (visibility, ty) = match kind {
        BindingKind::Uniform => (
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        ),
        BindingKind::Texture => (
            wgpu::ShaderStages::FRAGMENT,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
        ),
        BindingKind::Sampler => (
            wgpu::ShaderStages::FRAGMENT,
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        ),
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty,
        count: None,
    }
}

fn missing(what: &str, handle: impl std::fmt::Debug) -> Error {
    Error::Backend(format!("unknown {what} {handle:?}"))
}

impl Backend for WgpuBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle> {
        self.ensure_alive()?;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents: desc.contents,
                usage: desc.kind.usages(),
            });
        let handle = BufferHandle(self.handles.next());
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        let target = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| missing("buffer", buffer))?;
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
            || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
        {
            return Err(Error::Backend(format!(
                "write of {} bytes at {offset} is not 4-byte aligned",
                data.len()
            )));
        }
        let in_range = offset
            .checked_add(data.len() as u64)
            .is_some_and(|end| end <= target.size());
        if !in_range {
            return Err(Error::Backend(format!(
                "write of {} bytes at {offset} overruns a {} byte buffer",
                data.len(),
                target.size()
            )));
        }
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle> {
        self.ensure_alive()?;
        let texture = self.device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                label: Some(desc.label),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            desc.data,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(desc.label),
            address_mode_u: desc.sampler.address_mode_u,
            address_mode_v: desc.sampler.address_mode_v,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: desc.sampler.mag_filter,
            min_filter: desc.sampler.min_filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let handle = TextureHandle(self.handles.next());
        self.textures.insert(
            handle,
            GpuTexture {
                texture,
                view,
                sampler,
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(texture) = self.textures.remove(&texture) {
            texture.texture.destroy();
        }
    }

    fn create_shader_module(&mut self, label: &str, source: &str) -> Result<ShaderModuleHandle> {
        self.ensure_alive()?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let handle = ShaderModuleHandle(self.handles.next());
        self.shader_modules.insert(handle, module);
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
        let kinds: Vec<BindingKind> = entries.iter().map(BindingResource::kind).collect();
        let layout = self.bind_group_layout(&kinds);

        let mut resolved = Vec::with_capacity(entries.len());
        for (binding, entry) in entries.iter().enumerate() {
            let resource = match entry {
                BindingResource::Uniform(buffer) => self
                    .buffers
                    .get(buffer)
                    .ok_or_else(|| missing("buffer", buffer))?
                    .as_entire_binding(),
                BindingResource::TextureView(texture) => wgpu::BindingResource::TextureView(
                    &self
                        .textures
                        .get(texture)
                        .ok_or_else(|| missing("texture", texture))?
                        .view,
                ),
                BindingResource::Sampler(texture) => wgpu::BindingResource::Sampler(
                    &self
                        .textures
                        .get(texture)
                        .ok_or_else(|| missing("texture", texture))?
                        .sampler,
                ),
            };
            resolved.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource,
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &layout,
            entries: &resolved,
        });
        let handle = BindGroupHandle(self.handles.next());
        self.bind_groups.insert(handle, bind_group);
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
        let layouts: Vec<wgpu::BindGroupLayout> = desc
            .bind_groups
            .iter()
            .map(|kinds| self.bind_group_layout(kinds))
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
        let shader = self
            .shader_modules
            .get(&desc.shader)
            .ok_or_else(|| missing("shader module", desc.shader))?;
        let format = self.config.format;
        let depth = self.depth.is_some();

        let pipeline = {
            let device = &self.device;
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some(VERTEX_ENTRY),
                    buffers: &[INSTANCE_LAYOUT, desc.vertex_layout.buffer_layout()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some(FRAGMENT_ENTRY),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: desc.primitive.topology,
                    front_face: desc.primitive.front_face,
                    cull_mode: desc.primitive.cull_mode,
                    ..Default::default()
                },
                depth_stencil: depth.then(|| wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let handle = PipelineHandle(self.handles.next());
        self.pipelines.insert(handle, pipeline);
        Ok(handle)
    }

    fn destroy_render_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline);
    }

    fn submit(&mut self, frame: &Frame) -> Result<()> {
        self.ensure_alive()?;
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Outdated) => {
                log::warn!("surface outdated, reconfiguring and skipping frame");
                self.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("surface acquire timed out, skipping frame");
                return Ok(());
            }
            Err(wgpu::SurfaceError::Lost) => return Err(Error::SurfaceLost),
            Err(err) => return Err(Error::Backend(err.to_string())),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Frame Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(frame.clear_color.into()),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: self.depth.as_ref().map(|depth| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view: &depth.view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for command in &frame.commands {
                match command {
                    RenderCommand::SetPipeline(pipeline) => {
                        let pipeline = self
                            .pipelines
                            .get(pipeline)
                            .ok_or_else(|| missing("pipeline", pipeline))?;
                        render_pass.set_pipeline(pipeline);
                    }
                    RenderCommand::SetBindGroup { index, bind_group } => {
                        let bind_group = self
                            .bind_groups
                            .get(bind_group)
                            .ok_or_else(|| missing("bind group", bind_group))?;
                        render_pass.set_bind_group(*index, bind_group, &[]);
                    }
                    RenderCommand::SetVertexBuffer { slot, buffer } => {
                        let buffer = self
                            .buffers
                            .get(buffer)
                            .ok_or_else(|| missing("buffer", buffer))?;
                        render_pass.set_vertex_buffer(*slot, buffer.slice(..));
                    }
                    RenderCommand::SetIndexBuffer { buffer, format } => {
                        let buffer = self
                            .buffers
                            .get(buffer)
                            .ok_or_else(|| missing("buffer", buffer))?;
                        render_pass.set_index_buffer(buffer.slice(..), *format);
                    }
                    RenderCommand::Draw {
                        vertices,
                        instances,
                    } => render_pass.draw(vertices.clone(), instances.clone()),
                    RenderCommand::DrawIndexed {
                        indices,
                        base_vertex,
                        instances,
                    } => render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        log::trace!("submitted frame with {} draws", frame.draw_count());
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        // Minimised windows report zero sizes, which wgpu rejects.
        if width > 0 && height > 0 && !self.disposed {
            self.config.width = width;
            self.config.height = height;
            self.reconfigure();
        }
    }

    fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy();
        }
        for (_, texture) in self.textures.drain() {
            texture.texture.destroy();
        }
        self.shader_modules.clear();
        self.bind_groups.clear();
        self.pipelines.clear();
        self.bind_group_layouts.clear();
        if let Some(depth) = self.depth.take() {
            depth.texture.destroy();
        }
        self.device.destroy();
        self.disposed = true;
        log::info!("device destroyed");
    }
}
