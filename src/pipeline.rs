//! Render pipelines per material, one for every vertex layout.
//!
//! The cache is keyed by [`MaterialId`]. A miss fetches the material's shader
//! variants, allocates its material uniform and group 1 bind group, and builds
//! all seven pipelines at once. Each entry remembers the material version it
//! was built for; a lookup with a newer version evicts and rebuilds.

use std::collections::HashMap;
use std::rc::Rc;

use crate::backend::{
    Backend, BindGroupHandle, BindingKind, BindingResource, BufferDescriptor, BufferHandle,
    BufferKind, PipelineDescriptor, PipelineHandle, PrimitiveSettings, TextureHandle,
};
use crate::error::{Error, Result};
use crate::material::{Material, MaterialId};
use crate::shader::{ShaderCache, ShaderVariants};
use crate::vertex::VertexLayout;

/// Layout of the engine-owned uniform at group 1, binding 0.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniforms {
    pub diffuse_color: [f32; 4],
}

/// Backend resources a material binds, resolved from its ids.
#[derive(Debug, Clone, Copy)]
pub struct MaterialResources<'a> {
    /// Caller uniforms in binding order.
    pub uniforms: &'a [BufferHandle],
    /// Bound as a texture view and a sampler after the uniforms.
    pub diffuse_texture: Option<TextureHandle>,
}

/// Group 1 layout of a material with `uniforms` caller uniforms: the
/// material uniform, the caller uniforms, then texture and sampler when
/// `textured`.
pub fn material_binding_kinds(uniforms: usize, textured: bool) -> Vec<BindingKind> {
    let mut kinds = vec![BindingKind::Uniform; 1 + uniforms];
    if textured {
        kinds.extend([BindingKind::Texture, BindingKind::Sampler]);
    }
    kinds
}

/// Bind group layouts of every pipeline: the camera, then `material_kinds`.
pub fn bind_group_layouts(material_kinds: &[BindingKind]) -> [&[BindingKind]; 2] {
    [&[BindingKind::Uniform], material_kinds]
}

/// Pipelines and bindings built for one material version.
#[derive(Debug)]
pub struct PipelineSet {
    version: u64,
    // Keeps the shader entry alive while pipelines built from it exist.
    shaders: Rc<ShaderVariants>,
    pipelines: [PipelineHandle; 7],
    material_buffer: BufferHandle,
    bind_group: BindGroupHandle,
}

impl PipelineSet {
    /// Pipeline for geometry of `layout`.
    pub fn get(&self, layout: VertexLayout) -> PipelineHandle {
        self.pipelines[layout.index()]
    }

    /// Material version this set was built for.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Shader variants the pipelines were built from.
    pub fn shaders(&self) -> &Rc<ShaderVariants> {
        &self.shaders
    }

    /// Group 1 bind group.
    pub fn bind_group(&self) -> BindGroupHandle {
        self.bind_group
    }

    /// Engine-owned uniform holding the diffuse color.
    pub fn material_buffer(&self) -> BufferHandle {
        self.material_buffer
    }

    fn destroy(self, backend: &mut dyn Backend) {
        for pipeline in self.pipelines {
            backend.destroy_render_pipeline(pipeline);
        }
        backend.destroy_bind_group(self.bind_group);
        backend.destroy_buffer(self.material_buffer);
    }
}

/// Objects created so far by a build, released if a later step fails.
#[derive(Default)]
struct PartialBuild {
    material_buffer: Option<BufferHandle>,
    bind_group: Option<BindGroupHandle>,
    pipelines: Vec<PipelineHandle>,
}

impl PartialBuild {
    fn rollback(self, backend: &mut dyn Backend) {
        for pipeline in self.pipelines {
            backend.destroy_render_pipeline(pipeline);
        }
        if let Some(bind_group) = self.bind_group {
            backend.destroy_bind_group(bind_group);
        }
        if let Some(buffer) = self.material_buffer {
            backend.destroy_buffer(buffer);
        }
    }
}

/// Memoizes [`PipelineSet`]s by material.
#[derive(Debug, Default)]
pub struct PipelineCache {
    entries: HashMap<MaterialId, PipelineSet>,
    builds: u64,
}

impl PipelineCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pipelines for `material`, building them when missing or
    /// built for an older version.
    pub fn pipelines_for(
        &mut self,
        backend: &mut dyn Backend,
        shaders: &mut ShaderCache,
        material: &Material,
        resources: MaterialResources<'_>,
    ) -> Result<&PipelineSet> {
        let id = material.id();
        if self
            .entries
            .get(&id)
            .is_some_and(|set| set.version != material.version())
        {
            log::debug!(
                "material {} changed to version {}, rebuilding pipelines",
                id.0,
                material.version()
            );
            self.evict(backend, id);
        }

        if !self.entries.contains_key(&id) {
            let set = build(backend, shaders, material, resources)?;
            self.builds += 1;
            self.entries.insert(id, set);
        }

        self.entries
            .get(&id)
            .ok_or_else(|| Error::UnknownResource(format!("pipeline set for material {}", id.0)))
    }

    /// Current entry for `id`, without building.
    pub fn get(&self, id: MaterialId) -> Option<&PipelineSet> {
        self.entries.get(&id)
    }

    /// Number of pipeline sets built so far, rebuilds included.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Number of materials with built pipelines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no material has built pipelines.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroys the entry for `id`, if any.
    pub fn evict(&mut self, backend: &mut dyn Backend, id: MaterialId) {
        if let Some(set) = self.entries.remove(&id) {
            set.destroy(backend);
        }
    }

    /// Destroys every entry.
    pub fn clear(&mut self, backend: &mut dyn Backend) {
        for (_, set) in self.entries.drain() {
            set.destroy(backend);
        }
    }
}

fn build(
    backend: &mut dyn Backend,
    shaders: &mut ShaderCache,
    material: &Material,
    resources: MaterialResources<'_>,
) -> Result<PipelineSet> {
    let variants = shaders.variants_for(backend, material.shader())?;
    let material_kinds =
        material_binding_kinds(resources.uniforms.len(), resources.diffuse_texture.is_some());
    variants.check_bindings(&bind_group_layouts(&material_kinds))?;

    let mut partial = PartialBuild::default();
    match build_objects(backend, &variants, material, resources, &mut partial) {
        Ok(pipelines) => {
            log::debug!(
                "built {} pipelines for material {} (version {})",
                pipelines.len(),
                material.id().0,
                material.version()
            );
            Ok(PipelineSet {
                version: material.version(),
                shaders: variants,
                pipelines,
                material_buffer: partial.material_buffer.ok_or_else(|| {
                    Error::Backend("material buffer missing after build".into())
                })?,
                bind_group: partial
                    .bind_group
                    .ok_or_else(|| Error::Backend("bind group missing after build".into()))?,
            })
        }
        Err(err) => {
            partial.rollback(backend);
            Err(err)
        }
    }
}

fn build_objects(
    backend: &mut dyn Backend,
    variants: &ShaderVariants,
    material: &Material,
    resources: MaterialResources<'_>,
    partial: &mut PartialBuild,
) -> Result<[PipelineHandle; 7]> {
    let id = material.id().0;
    let uniforms = MaterialUniforms {
        diffuse_color: material.diffuse_color().to_array(),
    };
    let material_buffer = backend.create_buffer(&BufferDescriptor {
        label: &format!("material {id} uniforms"),
        kind: BufferKind::Uniform,
        contents: bytemuck::bytes_of(&uniforms),
    })?;
    partial.material_buffer = Some(material_buffer);

    let mut entries = vec![BindingResource::Uniform(material_buffer)];
    entries.extend(resources.uniforms.iter().map(|&b| BindingResource::Uniform(b)));
    if let Some(texture) = resources.diffuse_texture {
        entries.push(BindingResource::TextureView(texture));
        entries.push(BindingResource::Sampler(texture));
    }
    partial.bind_group = Some(backend.create_bind_group(&format!("material {id}"), &entries)?);

    let material_kinds: Vec<BindingKind> = entries.iter().map(BindingResource::kind).collect();
    let bind_groups = bind_group_layouts(&material_kinds);
    let primitive = PrimitiveSettings {
        topology: material.topology(),
        front_face: material.front_face(),
        cull_mode: material.cull_mode().to_wgpu(),
    };

    for layout in VertexLayout::ALL {
        let pipeline = backend.create_render_pipeline(&PipelineDescriptor {
            label: &format!("material {id} {layout}"),
            shader: variants.module(layout),
            vertex_layout: layout,
            bind_groups: &bind_groups,
            primitive,
        })?;
        partial.pipelines.push(pipeline);
    }

    let pipelines = std::mem::take(&mut partial.pipelines);
    pipelines
        .try_into()
        .map_err(|_| Error::Backend("pipeline count mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{CullMode, MaterialDescriptor};
    use crate::recording::RecordingBackend;
    use crate::shader::{BASIC_SHADER, TEXTURED_SHADER};

    const NO_RESOURCES: MaterialResources<'static> = MaterialResources {
        uniforms: &[],
        diffuse_texture: None,
    };

    fn material(id: u64) -> Material {
        Material::new(MaterialId(id), MaterialDescriptor::new(BASIC_SHADER))
    }

    #[test]
    fn hit_reuses_pipelines() {
        let mut backend = RecordingBackend::default();
        let mut shaders = ShaderCache::new();
        let mut cache = PipelineCache::new();
        let material = material(1);

        let first = cache
            .pipelines_for(&mut backend, &mut shaders, &material, NO_RESOURCES)
            .unwrap()
            .get(VertexLayout::Position);
        let second = cache
            .pipelines_for(&mut backend, &mut shaders, &material, NO_RESOURCES)
            .unwrap()
            .get(VertexLayout::Position);
        assert_eq!(first, second);
        assert_eq!(cache.builds(), 1);
        assert_eq!(backend.pipelines_created(), 7);
    }

    #[test]
    fn pipelines_carry_layout_and_render_state() {
        let mut backend = RecordingBackend::default();
        let mut shaders = ShaderCache::new();
        let mut cache = PipelineCache::new();
        let mut material = material(1);
        material.set_cull_mode(CullMode::Front);

        let set = cache
            .pipelines_for(&mut backend, &mut shaders, &material, NO_RESOURCES)
            .unwrap();
        for layout in VertexLayout::ALL {
            let recorded = backend.pipeline(set.get(layout)).unwrap();
            assert_eq!(recorded.vertex_layout, layout);
            assert_eq!(recorded.shader, set.shaders().module(layout));
            assert_eq!(recorded.primitive.cull_mode, Some(wgpu::Face::Front));
            assert_eq!(recorded.bind_groups[0], vec![BindingKind::Uniform]);
        }
    }

    #[test]
    fn version_change_evicts_and_rebuilds() {
        let mut backend = RecordingBackend::default();
        let mut shaders = ShaderCache::new();
        let mut cache = PipelineCache::new();
        let mut material = material(1);

        let before = cache
            .pipelines_for(&mut backend, &mut shaders, &material, NO_RESOURCES)
            .unwrap()
            .get(VertexLayout::PositionColor);
        material.set_cull_mode(CullMode::None);
        let after = cache
            .pipelines_for(&mut backend, &mut shaders, &material, NO_RESOURCES)
            .unwrap()
            .get(VertexLayout::PositionColor);

        assert_ne!(before, after);
        assert_eq!(cache.builds(), 2);
        assert!(backend.pipeline(before).is_none());
        assert_eq!(backend.pipeline(after).unwrap().primitive.cull_mode, None);
        assert_eq!(backend.live_objects().pipelines, 7);
        assert_eq!(cache.get(material.id()).unwrap().version(), 1);
    }

    #[test]
    fn bind_group_orders_material_then_uniforms_then_texture() {
        let mut backend = RecordingBackend::default();
        let uniform = backend
            .create_buffer(&BufferDescriptor {
                label: "tint",
                kind: BufferKind::Uniform,
                contents: &[0; 16],
            })
            .unwrap();
        let texture = backend
            .create_texture(&crate::backend::TextureDescriptor {
                label: "white",
                width: 1,
                height: 1,
                data: &[255; 4],
                sampler: Default::default(),
            })
            .unwrap();
        let mut shaders = ShaderCache::new();
        let mut cache = PipelineCache::new();
        let material = Material::new(
            MaterialId(3),
            MaterialDescriptor::new(BASIC_SHADER).diffuse_color(crate::Color::RED),
        );

        let set = cache
            .pipelines_for(
                &mut backend,
                &mut shaders,
                &material,
                MaterialResources {
                    uniforms: &[uniform],
                    diffuse_texture: Some(texture),
                },
            )
            .unwrap();
        assert_eq!(
            backend.bind_group(set.bind_group()).unwrap(),
            &[
                BindingResource::Uniform(set.material_buffer()),
                BindingResource::Uniform(uniform),
                BindingResource::TextureView(texture),
                BindingResource::Sampler(texture),
            ]
        );
        let color = &backend.buffer(set.material_buffer()).unwrap().data;
        assert_eq!(
            color.as_slice(),
            bytemuck::bytes_of(&MaterialUniforms {
                diffuse_color: [1.0, 0.0, 0.0, 1.0]
            })
        );
    }

    #[test]
    fn failed_build_leaves_nothing_behind() {
        let mut backend = RecordingBackend::default();
        let mut shaders = ShaderCache::new();
        let mut cache = PipelineCache::new();
        let missing_uniform = BufferHandle(999);

        let result = cache.pipelines_for(
            &mut backend,
            &mut shaders,
            &material(1),
            MaterialResources {
                uniforms: &[missing_uniform],
                diffuse_texture: None,
            },
        );
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.builds(), 0);
        let live = backend.live_objects();
        assert_eq!((live.buffers, live.bind_groups, live.pipelines), (0, 0, 0));
    }

    #[test]
    fn undeclared_shader_bindings_fail_before_any_object_exists() {
        let mut backend = RecordingBackend::default();
        let mut shaders = ShaderCache::new();
        let mut cache = PipelineCache::new();
        let material = Material::new(MaterialId(1), MaterialDescriptor::new(TEXTURED_SHADER));

        let result = cache.pipelines_for(&mut backend, &mut shaders, &material, NO_RESOURCES);
        assert!(matches!(
            result,
            Err(Error::ShaderCompilation {
                layout: VertexLayout::Position,
                ..
            })
        ));
        assert!(cache.is_empty());
        let live = backend.live_objects();
        assert_eq!((live.buffers, live.bind_groups, live.pipelines), (0, 0, 0));
    }

    #[test]
    fn material_kinds_follow_binding_order() {
        use BindingKind::*;
        assert_eq!(material_binding_kinds(0, false), vec![Uniform]);
        assert_eq!(
            material_binding_kinds(2, true),
            vec![Uniform, Uniform, Uniform, Texture, Sampler]
        );
    }

    #[test]
    fn clear_destroys_everything() {
        let mut backend = RecordingBackend::default();
        let mut shaders = ShaderCache::new();
        let mut cache = PipelineCache::new();
        for id in 1..=2 {
            cache
                .pipelines_for(&mut backend, &mut shaders, &material(id), NO_RESOURCES)
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        // identical source, one shader entry
        assert_eq!(shaders.len(), 1);

        cache.clear(&mut backend);
        shaders.clear(&mut backend);
        assert_eq!(backend.live_objects().total(), 0);
    }
}
