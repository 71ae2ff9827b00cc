//! The engine entry point.
//!
//! A [`Renderer`] owns a [`Backend`], every resource created through it, and
//! the shader and pipeline caches. Resources are addressed by typed ids; a
//! model is only drawn while it is registered with [`Renderer::add`].
//!
//! ```ignore
//! let mut renderer = Renderer::create(window.clone(), 800, 600, GpuConfig::default()).await?;
//! let cube = renderer.create_mesh("cube", &Mesh::cube())?;
//! let material = renderer.create_material(MaterialDescriptor::new(BASIC_SHADER))?;
//! let model = renderer.create_model("cubes", cube, material, 16)?;
//! renderer.add(model)?;
//!
//! // every frame
//! renderer.render()?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::Rc;

use glam::Mat4;

use crate::backend::{
    Backend, BindGroupHandle, BindingResource, BufferDescriptor, BufferHandle, BufferKind, Frame,
    RenderCommand, SamplerSettings,
};
use crate::camera::Camera;
use crate::color::Color;
use crate::error::{Error, Result};
use crate::geometry::{Geometry, GeometryId, VertexData};
use crate::gpu::{GpuConfig, WgpuBackend};
use crate::material::{Material, MaterialDescriptor, MaterialId};
use crate::mesh::Mesh;
use crate::model::{Model, ModelId};
use crate::pipeline::{
    MaterialResources, PipelineCache, bind_group_layouts, material_binding_kinds,
};
use crate::shader::{ShaderCache, ShaderVariants};
use crate::texture::{Texture, TextureId};
use crate::uniform::{Uniform, UniformId};

/// Bind group index of the camera uniform.
pub const CAMERA_GROUP: u32 = 0;
/// Bind group index of the material resources.
pub const MATERIAL_GROUP: u32 = 1;
/// Vertex buffer slot of the instance transforms.
pub const INSTANCE_SLOT: u32 = 0;
/// Vertex buffer slot of the geometry's vertices.
pub const VERTEX_SLOT: u32 = 1;

const CAMERA_UNIFORM_SIZE: usize = std::mem::size_of::<[f32; 16]>();

/// Draws registered models with one camera in a single render pass.
pub struct Renderer<B: Backend = WgpuBackend> {
    backend: B,
    clear_color: Color,
    camera: Camera,
    camera_buffer: BufferHandle,
    camera_bind_group: BindGroupHandle,

    geometries: BTreeMap<GeometryId, Geometry>,
    materials: BTreeMap<MaterialId, Material>,
    models: BTreeMap<ModelId, Model>,
    textures: BTreeMap<TextureId, Texture>,
    uniforms: BTreeMap<UniformId, Uniform>,
    registered: BTreeSet<ModelId>,

    shaders: ShaderCache,
    // Variants of each material's current shader, kept alive between frames.
    compiled: BTreeMap<MaterialId, Rc<ShaderVariants>>,
    pipelines: PipelineCache,

    next_id: u64,
    disposed: bool,
}

impl Renderer<WgpuBackend> {
    /// Opens a device on `target` and wraps it in a renderer.
    pub async fn create(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
        config: GpuConfig,
    ) -> Result<Self> {
        let backend = WgpuBackend::new(target, width, height, &config).await?;
        Self::new(backend)
    }

    /// [`create`](Self::create), blocking on the current thread.
    pub fn create_blocking(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
        config: GpuConfig,
    ) -> Result<Self> {
        pollster::block_on(Self::create(target, width, height, config))
    }
}

impl<B: Backend> Renderer<B> {
    /// Wraps `backend`, allocating the camera uniform and its bind group.
    pub fn new(mut backend: B) -> Result<Self> {
        let camera_buffer = backend.create_buffer(&BufferDescriptor {
            label: "camera",
            kind: BufferKind::Uniform,
            contents: &[0; CAMERA_UNIFORM_SIZE],
        })?;
        let camera_bind_group =
            match backend.create_bind_group("camera", &[BindingResource::Uniform(camera_buffer)]) {
                Ok(bind_group) => bind_group,
                Err(err) => {
                    backend.destroy_buffer(camera_buffer);
                    return Err(err);
                }
            };

        let mut camera = Camera::default();
        let (width, height) = backend.size();
        camera.set_aspect_from(width, height);

        Ok(Self {
            backend,
            clear_color: Color::BLACK,
            camera,
            camera_buffer,
            camera_bind_group,
            geometries: BTreeMap::new(),
            materials: BTreeMap::new(),
            models: BTreeMap::new(),
            textures: BTreeMap::new(),
            uniforms: BTreeMap::new(),
            registered: BTreeSet::new(),
            shaders: ShaderCache::new(),
            compiled: BTreeMap::new(),
            pipelines: PipelineCache::new(),
            next_id: 0,
            disposed: false,
        })
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.disposed {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ---- geometry -------------------------------------------------------

    /// Uploads vertex data and optional indices.
    pub fn create_geometry(
        &mut self,
        label: &str,
        data: &VertexData,
        indices: Option<&[u32]>,
    ) -> Result<GeometryId> {
        self.ensure_alive()?;
        let geometry = Geometry::new(&mut self.backend, label, data, indices)?;
        let id = GeometryId(self.next_id());
        self.geometries.insert(id, geometry);
        Ok(id)
    }

    /// Uploads one of the built-in [`Mesh`] primitives.
    pub fn create_mesh(&mut self, label: &str, mesh: &Mesh) -> Result<GeometryId> {
        self.create_geometry(label, &mesh.data, Some(&mesh.indices))
    }

    /// A geometry, if it exists.
    pub fn geometry(&self, id: GeometryId) -> Option<&Geometry> {
        self.geometries.get(&id)
    }

    /// Fails with [`Error::ResourceInUse`] while any model draws it.
    pub fn dispose_geometry(&mut self, id: GeometryId) -> Result<()> {
        self.ensure_alive()?;
        let users = self.models.values().filter(|m| m.geometry() == id).count();
        if users > 0 {
            return Err(Error::ResourceInUse {
                resource: format!("geometry {}", id.0),
                users,
            });
        }
        let geometry = self
            .geometries
            .remove(&id)
            .ok_or_else(|| Error::UnknownResource(format!("geometry {}", id.0)))?;
        geometry.destroy(&mut self.backend);
        Ok(())
    }

    // ---- textures and uniforms -------------------------------------------

    /// Creates a texture from tightly packed RGBA8 pixels.
    pub fn create_texture_rgba(
        &mut self,
        label: &str,
        data: &[u8],
        width: u32,
        height: u32,
        sampler: SamplerSettings,
    ) -> Result<TextureId> {
        self.ensure_alive()?;
        let texture = Texture::from_rgba(&mut self.backend, label, data, width, height, sampler)?;
        Ok(self.insert_texture(texture))
    }

    /// Decodes an encoded image (PNG, JPEG, ...) into a texture.
    pub fn create_texture_from_image(
        &mut self,
        label: &str,
        bytes: &[u8],
        sampler: SamplerSettings,
    ) -> Result<TextureId> {
        self.ensure_alive()?;
        let texture = Texture::from_bytes(&mut self.backend, label, bytes, sampler)?;
        Ok(self.insert_texture(texture))
    }

    /// Loads and decodes an image file into a texture.
    pub fn create_texture_from_file(
        &mut self,
        path: impl AsRef<Path>,
        sampler: SamplerSettings,
    ) -> Result<TextureId> {
        self.ensure_alive()?;
        let texture = Texture::from_file(&mut self.backend, path, sampler)?;
        Ok(self.insert_texture(texture))
    }

    fn insert_texture(&mut self, texture: Texture) -> TextureId {
        let id = TextureId(self.next_id());
        self.textures.insert(id, texture);
        id
    }

    /// A texture, if it exists.
    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(&id)
    }

    /// Fails with [`Error::ResourceInUse`] while any material samples it.
    pub fn dispose_texture(&mut self, id: TextureId) -> Result<()> {
        self.ensure_alive()?;
        let users = self
            .materials
            .values()
            .filter(|m| m.diffuse_texture() == Some(id))
            .count();
        if users > 0 {
            return Err(Error::ResourceInUse {
                resource: format!("texture {}", id.0),
                users,
            });
        }
        let texture = self
            .textures
            .remove(&id)
            .ok_or_else(|| Error::UnknownResource(format!("texture {}", id.0)))?;
        texture.destroy(&mut self.backend);
        Ok(())
    }

    /// Allocates a zeroed uniform buffer of at least `size` bytes.
    pub fn create_uniform(&mut self, label: &str, size: u64) -> Result<UniformId> {
        self.ensure_alive()?;
        let uniform = Uniform::new(&mut self.backend, label, size)?;
        let id = UniformId(self.next_id());
        self.uniforms.insert(id, uniform);
        Ok(id)
    }

    /// Writes `data` at byte `offset` of a uniform. Both must be 4-byte aligned.
    pub fn write_uniform(&mut self, id: UniformId, offset: u64, data: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        let uniform = self
            .uniforms
            .get(&id)
            .ok_or_else(|| Error::UnknownResource(format!("uniform {}", id.0)))?;
        uniform.write(&mut self.backend, offset, data)
    }

    /// A uniform, if it exists.
    pub fn uniform(&self, id: UniformId) -> Option<&Uniform> {
        self.uniforms.get(&id)
    }

    /// Fails with [`Error::ResourceInUse`] while any material binds it.
    pub fn dispose_uniform(&mut self, id: UniformId) -> Result<()> {
        self.ensure_alive()?;
        let users = self
            .materials
            .values()
            .filter(|m| m.uniforms().values().any(|&u| u == id))
            .count();
        if users > 0 {
            return Err(Error::ResourceInUse {
                resource: format!("uniform {}", id.0),
                users,
            });
        }
        let uniform = self
            .uniforms
            .remove(&id)
            .ok_or_else(|| Error::UnknownResource(format!("uniform {}", id.0)))?;
        uniform.destroy(&mut self.backend);
        Ok(())
    }

    // ---- materials -------------------------------------------------------

    /// Creates a material, compiling its shader for every vertex layout.
    ///
    /// Shader errors are reported here rather than on first draw.
    pub fn create_material(&mut self, desc: MaterialDescriptor) -> Result<MaterialId> {
        self.ensure_alive()?;
        if let Some(texture) = desc.diffuse_texture
            && !self.textures.contains_key(&texture)
        {
            return Err(Error::UnknownResource(format!("texture {}", texture.0)));
        }
        if let Some((name, uniform)) = desc
            .uniforms
            .iter()
            .find(|(_, u)| !self.uniforms.contains_key(*u))
        {
            return Err(Error::UnknownResource(format!(
                "uniform {} bound as '{name}'",
                uniform.0
            )));
        }

        let variants = self.shaders.variants_for(&mut self.backend, &desc.shader)?;
        let material_kinds =
            material_binding_kinds(desc.uniforms.len(), desc.diffuse_texture.is_some());
        if let Err(err) = variants.check_bindings(&bind_group_layouts(&material_kinds)) {
            drop(variants);
            self.shaders.prune(&mut self.backend);
            return Err(err);
        }
        let id = MaterialId(self.next_id());
        self.compiled.insert(id, variants);
        self.materials.insert(id, Material::new(id, desc));
        log::debug!("material {}: created", id.0);
        Ok(id)
    }

    /// A material, if it exists.
    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    /// Mutable access to a material's render state.
    ///
    /// Changes take effect on the next [`render`](Self::render), which
    /// rebuilds the material's pipelines. A new shader is compiled then too,
    /// so its errors surface from `render`.
    pub fn material_mut(&mut self, id: MaterialId) -> Result<&mut Material> {
        self.ensure_alive()?;
        self.materials
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownResource(format!("material {}", id.0)))
    }

    /// Fails with [`Error::ResourceInUse`] while any model uses it.
    pub fn dispose_material(&mut self, id: MaterialId) -> Result<()> {
        self.ensure_alive()?;
        let users = self.models.values().filter(|m| m.material() == id).count();
        if users > 0 {
            return Err(Error::ResourceInUse {
                resource: format!("material {}", id.0),
                users,
            });
        }
        if self.materials.remove(&id).is_none() {
            return Err(Error::UnknownResource(format!("material {}", id.0)));
        }
        self.compiled.remove(&id);
        self.pipelines.evict(&mut self.backend, id);
        self.shaders.prune(&mut self.backend);
        Ok(())
    }

    // ---- models ----------------------------------------------------------

    /// Creates a model drawing `geometry` with `material`, `instance_count`
    /// times. Instances start at identity. The model is not drawn until
    /// [`add`](Self::add)ed.
    pub fn create_model(
        &mut self,
        label: &str,
        geometry: GeometryId,
        material: MaterialId,
        instance_count: u32,
    ) -> Result<ModelId> {
        self.ensure_alive()?;
        if !self.geometries.contains_key(&geometry) {
            return Err(Error::UnknownResource(format!("geometry {}", geometry.0)));
        }
        if !self.materials.contains_key(&material) {
            return Err(Error::UnknownResource(format!("material {}", material.0)));
        }
        let model = Model::new(&mut self.backend, label, geometry, material, instance_count)?;
        let id = ModelId(self.next_id());
        self.models.insert(id, model);
        Ok(id)
    }

    /// Sets the transform of one instance. See [`Model::transform`].
    pub fn transform(&mut self, id: ModelId, matrix: Mat4, index: u32) -> Result<()> {
        self.ensure_alive()?;
        let model = self
            .models
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownResource(format!("model {}", id.0)))?;
        model.transform(&mut self.backend, matrix, index)
    }

    /// A model, if it exists.
    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(&id)
    }

    /// Unregisters and destroys a model. Its geometry and material stay.
    pub fn dispose_model(&mut self, id: ModelId) -> Result<()> {
        self.ensure_alive()?;
        let model = self
            .models
            .remove(&id)
            .ok_or_else(|| Error::UnknownResource(format!("model {}", id.0)))?;
        self.registered.remove(&id);
        model.destroy(&mut self.backend);
        Ok(())
    }

    /// Registers a model for drawing. Adding it twice has no effect.
    pub fn add(&mut self, id: ModelId) -> Result<()> {
        self.ensure_alive()?;
        if !self.models.contains_key(&id) {
            return Err(Error::UnknownResource(format!("model {}", id.0)));
        }
        self.registered.insert(id);
        Ok(())
    }

    /// Stops drawing a model. Returns whether it was registered.
    pub fn remove(&mut self, id: ModelId) -> bool {
        self.registered.remove(&id)
    }

    /// Whether a model is drawn by [`render`](Self::render).
    pub fn is_registered(&self, id: ModelId) -> bool {
        self.registered.contains(&id)
    }

    /// Registered models in draw order.
    pub fn registered(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.registered.iter().copied()
    }

    // ---- frame -----------------------------------------------------------

    /// Camera used by the next frame.
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Mutable camera. Changes are uploaded by the next frame.
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Color the frame is cleared to.
    pub fn clear_color(&self) -> Color {
        self.clear_color
    }

    /// Sets the color the next frame is cleared to.
    pub fn set_clear_color(&mut self, color: Color) {
        self.clear_color = color;
    }

    /// Reconfigures the output and updates the camera aspect.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.ensure_alive()?;
        self.backend.resize(width, height);
        self.camera.set_aspect_from(width, height);
        Ok(())
    }

    /// Draws every registered model in ascending id order and submits the
    /// frame.
    pub fn render(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.backend.write_buffer(
            self.camera_buffer,
            0,
            bytemuck::bytes_of(&self.camera.matrix().to_cols_array()),
        )?;

        let mut commands = Vec::with_capacity(self.registered.len() * 7);
        let mut stale_shaders = false;
        for &id in &self.registered {
            let model = self
                .models
                .get(&id)
                .ok_or_else(|| Error::UnknownResource(format!("model {}", id.0)))?;
            let geometry = self.geometries.get(&model.geometry()).ok_or_else(|| {
                Error::UnknownResource(format!("geometry {}", model.geometry().0))
            })?;
            let material = self.materials.get(&model.material()).ok_or_else(|| {
                Error::UnknownResource(format!("material {}", model.material().0))
            })?;

            let uniforms = material
                .uniforms()
                .values()
                .map(|id| {
                    self.uniforms
                        .get(id)
                        .map(Uniform::buffer)
                        .ok_or_else(|| Error::UnknownResource(format!("uniform {}", id.0)))
                })
                .collect::<Result<Vec<_>>>()?;
            let diffuse_texture = material
                .diffuse_texture()
                .map(|id| {
                    self.textures
                        .get(&id)
                        .map(Texture::handle)
                        .ok_or_else(|| Error::UnknownResource(format!("texture {}", id.0)))
                })
                .transpose()?;

            let set = match self.pipelines.pipelines_for(
                &mut self.backend,
                &mut self.shaders,
                material,
                MaterialResources {
                    uniforms: &uniforms,
                    diffuse_texture,
                },
            ) {
                Ok(set) => set,
                Err(err) => {
                    self.shaders.prune(&mut self.backend);
                    return Err(err);
                }
            };
            let previous = self.compiled.insert(material.id(), Rc::clone(set.shaders()));
            stale_shaders |= previous.is_some_and(|old| !Rc::ptr_eq(&old, set.shaders()));

            let instances = 0..model.instance_count();
            commands.push(RenderCommand::SetPipeline(set.get(geometry.layout())));
            commands.push(RenderCommand::SetBindGroup {
                index: CAMERA_GROUP,
                bind_group: self.camera_bind_group,
            });
            commands.push(RenderCommand::SetBindGroup {
                index: MATERIAL_GROUP,
                bind_group: set.bind_group(),
            });
            commands.push(RenderCommand::SetVertexBuffer {
                slot: INSTANCE_SLOT,
                buffer: model.instance_buffer(),
            });
            commands.push(RenderCommand::SetVertexBuffer {
                slot: VERTEX_SLOT,
                buffer: geometry.vertex_buffer(),
            });
            match geometry.index_buffer() {
                Some(buffer) => {
                    commands.push(RenderCommand::SetIndexBuffer {
                        buffer,
                        format: geometry.index_format(),
                    });
                    commands.push(RenderCommand::DrawIndexed {
                        indices: 0..geometry.index_count(),
                        base_vertex: 0,
                        instances,
                    });
                }
                None => commands.push(RenderCommand::Draw {
                    vertices: 0..geometry.vertex_count(),
                    instances,
                }),
            }
        }

        if stale_shaders {
            self.shaders.prune(&mut self.backend);
        }

        let frame = Frame {
            clear_color: self.clear_color,
            commands,
        };
        log::trace!(
            "submitting {} draws for {} registered models",
            frame.draw_count(),
            self.registered.len()
        );
        self.backend.submit(&frame)
    }

    // ---- introspection ---------------------------------------------------

    /// The backend everything is created on.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Pipelines built so far, by material.
    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipelines
    }

    /// Pipeline sets built so far, rebuilds included.
    pub fn pipeline_builds(&self) -> u64 {
        self.pipelines.builds()
    }

    /// Distinct shader bodies currently compiled.
    pub fn shader_variants(&self) -> usize {
        self.shaders.len()
    }

    /// Whether [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Releases every resource and the backend. Every later call fails with
    /// [`Error::Disposed`]; disposing twice is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.registered.clear();
        for (_, model) in std::mem::take(&mut self.models) {
            model.destroy(&mut self.backend);
        }
        for (_, geometry) in std::mem::take(&mut self.geometries) {
            geometry.destroy(&mut self.backend);
        }
        self.materials.clear();
        self.compiled.clear();
        self.pipelines.clear(&mut self.backend);
        self.shaders.clear(&mut self.backend);
        for (_, texture) in std::mem::take(&mut self.textures) {
            texture.destroy(&mut self.backend);
        }
        for (_, uniform) in std::mem::take(&mut self.uniforms) {
            uniform.destroy(&mut self.backend);
        }
        self.backend.destroy_bind_group(self.camera_bind_group);
        self.backend.destroy_buffer(self.camera_buffer);
        self.backend.dispose();
        self.disposed = true;
        log::debug!("renderer disposed");
    }
}

impl<B: Backend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if !self.disposed {
            log::warn!("renderer dropped without dispose(); GPU resources released with the device");
        }
    }
}
