//! Shader variants, one per vertex layout, memoized by source text.
//!
//! A material supplies only a WGSL *body* defining `vertex_main` and
//! `fragment_main`. For every [`VertexLayout`] the cache prepends a generated
//! prelude declaring:
//!
//! - `camera`: the view-projection matrix, `@group(0) @binding(0)`;
//! - `material`: a `MaterialUniforms { diffuse_color: vec4f }`, `@group(1) @binding(0)`;
//! - `InstanceIn`: the per-instance matrix columns at locations 0..=7;
//! - `VertexIn`: the layout's attributes at locations 8..;
//! - `Vertex` and `Instance`: canonical records the body works with;
//! - `transform_vertex(VertexIn) -> Vertex` and
//!   `transform_instance(InstanceIn) -> Instance`.
//!
//! Attributes missing from a layout are zero in `Vertex`, except `color`
//! which defaults to the material's diffuse color. Caller uniforms, and the
//! diffuse texture and sampler, are declared by the body itself in group 1
//! from binding 1 on.
//!
//! Every variant is parsed and validated with naga before any of them is
//! handed to the backend. The resource bindings a variant declares are kept
//! so pipelines are only built against bind groups that provide them.

use std::collections::HashMap;
use std::rc::Rc;

use crate::backend::{Backend, BindingKind, ShaderModuleHandle};
use crate::error::{Error, Result};
use crate::vertex::{Semantic, VertexLayout};

/// Entry point of the vertex stage.
pub const VERTEX_ENTRY: &str = "vertex_main";
/// Entry point of the fragment stage.
pub const FRAGMENT_ENTRY: &str = "fragment_main";

/// Transforms by camera and instance, outputs the vertex color.
pub const BASIC_SHADER: &str = r#"
struct VertexOut {
    @builtin(position) position: vec4f,
    @location(0) color: vec4f,
}

@vertex
fn vertex_main(instance_in: InstanceIn, vertex_in: VertexIn) -> VertexOut {
    let transform = transform_instance(instance_in);
    let v = transform_vertex(vertex_in);
    var output: VertexOut;
    output.position = camera * transform.model * vec4f(v.position, 1.0);
    output.color = v.color;
    return output;
}

@fragment
fn fragment_main(frag: VertexOut) -> @location(0) vec4f {
    return frag.color;
}
"#;

/// Samples the diffuse texture and applies simple directional lighting.
///
/// Expects a material with a diffuse texture and no caller uniforms, so the
/// texture sits at binding 1 and its sampler at binding 2.
pub const TEXTURED_SHADER: &str = r#"
@group(1) @binding(1) var diffuse_texture: texture_2d<f32>;
@group(1) @binding(2) var diffuse_sampler: sampler;

struct VertexOut {
    @builtin(position) position: vec4f,
    @location(0) normal: vec3f,
    @location(1) uv: vec2f,
    @location(2) color: vec4f,
}

@vertex
fn vertex_main(instance_in: InstanceIn, vertex_in: VertexIn) -> VertexOut {
    let transform = transform_instance(instance_in);
    let v = transform_vertex(vertex_in);
    var output: VertexOut;
    output.position = camera * transform.model * vec4f(v.position, 1.0);
    output.normal = (transform.normal * vec4f(v.normal, 0.0)).xyz;
    output.uv = v.uv;
    output.color = v.color;
    return output;
}

@fragment
fn fragment_main(frag: VertexOut) -> @location(0) vec4f {
    let light = normalize(vec3f(0.4, 1.0, 0.6));
    var shade = 1.0;
    if (dot(frag.normal, frag.normal) > 0.0) {
        shade = 0.3 + 0.7 * max(dot(normalize(frag.normal), light), 0.0);
    }
    let texel = textureSample(diffuse_texture, diffuse_sampler, frag.uv);
    return vec4f(texel.rgb * frag.color.rgb * shade, texel.a * frag.color.a);
}
"#;

const PRELUDE_HEAD: &str = r#"@group(0) @binding(0)
var<uniform> camera: mat4x4<f32>;

struct MaterialUniforms {
    diffuse_color: vec4f,
}

@group(1) @binding(0)
var<uniform> material: MaterialUniforms;

struct InstanceIn {
    @location(0) model_matrix_0: vec4f,
    @location(1) model_matrix_1: vec4f,
    @location(2) model_matrix_2: vec4f,
    @location(3) model_matrix_3: vec4f,
    @location(4) normal_matrix_0: vec4f,
    @location(5) normal_matrix_1: vec4f,
    @location(6) normal_matrix_2: vec4f,
    @location(7) normal_matrix_3: vec4f,
}

struct Vertex {
    position: vec3f,
    normal: vec3f,
    tangent: vec3f,
    uv: vec2f,
    color: vec4f,
}

struct Instance {
    model: mat4x4<f32>,
    normal: mat4x4<f32>,
}

fn transform_instance(instance_in: InstanceIn) -> Instance {
    var result: Instance;
    result.model = mat4x4<f32>(
        instance_in.model_matrix_0,
        instance_in.model_matrix_1,
        instance_in.model_matrix_2,
        instance_in.model_matrix_3,
    );
    result.normal = mat4x4<f32>(
        instance_in.normal_matrix_0,
        instance_in.normal_matrix_1,
        instance_in.normal_matrix_2,
        instance_in.normal_matrix_3,
    );
    return result;
}
"#;

/// Full WGSL module for `body` compiled against `layout`.
pub fn synthesize(layout: VertexLayout, body: &str) -> String {
    let default_color = if layout.has(Semantic::Color) {
        ""
    } else {
        "    result.color = material.diffuse_color;\n"
    };
    format!(
        "{PRELUDE_HEAD}\n\
         struct VertexIn {{\n{input}}}\n\n\
         fn transform_vertex(vertex_in: VertexIn) -> Vertex {{\n\
         \x20   var result: Vertex;\n\
         {default_color}{adapter}\
         \x20   return result;\n\
         }}\n\n\
         {body}",
        input = layout.shader_input(),
        adapter = layout.shader_adapter(),
    )
}

/// A resource a shader declares with `@group(g) @binding(b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBinding {
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
}

/// Resource bindings declared by `module`, in declaration order.
///
/// Only the resources a bind group can carry are accepted: uniform buffers,
/// filterable `texture_2d<f32>` and filtering samplers.
pub fn reflect_bindings(module: &naga::Module) -> Result<Vec<ShaderBinding>, String> {
    let mut bindings = Vec::new();
    for (_, global) in module.global_variables.iter() {
        let Some(naga::ResourceBinding { group, binding }) = global.binding else {
            continue;
        };
        let ty = &module.types[global.ty].inner;
        let kind = match (global.space, ty) {
            (naga::AddressSpace::Uniform, _) => BindingKind::Uniform,
            (
                naga::AddressSpace::Handle,
                naga::TypeInner::Image {
                    dim: naga::ImageDimension::D2,
                    arrayed: false,
                    class:
                        naga::ImageClass::Sampled {
                            kind: naga::ScalarKind::Float,
                            multi: false,
                        },
                },
            ) => BindingKind::Texture,
            (naga::AddressSpace::Handle, naga::TypeInner::Sampler { comparison: false }) => {
                BindingKind::Sampler
            }
            _ => {
                let name = global.name.as_deref().unwrap_or("<unnamed>");
                return Err(format!(
                    "'{name}' at group {group} binding {binding} is not a uniform buffer, \
                     texture_2d<f32> or sampler"
                ));
            }
        };
        bindings.push(ShaderBinding {
            group,
            binding,
            kind,
        });
    }
    Ok(bindings)
}

/// Checks every declared binding against the bind group layouts `groups`,
/// indexed by group then binding.
pub fn check_bindings(
    bindings: &[ShaderBinding],
    groups: &[&[BindingKind]],
) -> Result<(), String> {
    for declared in bindings {
        let provided = groups
            .get(declared.group as usize)
            .and_then(|group| group.get(declared.binding as usize));
        match provided {
            Some(&kind) if kind == declared.kind => {}
            Some(kind) => {
                return Err(format!(
                    "shader expects a {:?} at group {} binding {}, but a {kind:?} is bound there",
                    declared.kind, declared.group, declared.binding
                ));
            }
            None => {
                return Err(format!(
                    "shader expects a {:?} at group {} binding {}, but nothing is bound there",
                    declared.kind, declared.group, declared.binding
                ));
            }
        }
    }
    Ok(())
}

/// Parses and validates one variant, checks both entry points exist, and
/// returns the resource bindings it declares.
pub fn validate(layout: VertexLayout, source: &str) -> Result<Vec<ShaderBinding>> {
    let failed = |message: String| Error::ShaderCompilation { layout, message };

    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| failed(e.emit_to_string(source)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    );
    validator
        .validate(&module)
        .map_err(|e| failed(e.emit_to_string(source)))?;

    for (name, stage) in [
        (VERTEX_ENTRY, naga::ShaderStage::Vertex),
        (FRAGMENT_ENTRY, naga::ShaderStage::Fragment),
    ] {
        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == name && ep.stage == stage)
        {
            return Err(failed(format!("missing {stage:?} entry point '{name}'")));
        }
    }
    reflect_bindings(&module).map_err(failed)
}

/// Compiled modules for one shader body, indexed by layout.
#[derive(Debug)]
pub struct ShaderVariants {
    modules: [ShaderModuleHandle; 7],
    sources: [String; 7],
    bindings: [Vec<ShaderBinding>; 7],
}

impl ShaderVariants {
    /// Backend module compiled for `layout`.
    pub fn module(&self, layout: VertexLayout) -> ShaderModuleHandle {
        self.modules[layout.index()]
    }

    /// Resource bindings declared by the variant for `layout`.
    pub fn bindings(&self, layout: VertexLayout) -> &[ShaderBinding] {
        &self.bindings[layout.index()]
    }

    /// Fails with [`Error::ShaderCompilation`] naming the first layout whose
    /// variant declares a binding `groups` does not provide.
    pub fn check_bindings(&self, groups: &[&[BindingKind]]) -> Result<()> {
        for layout in VertexLayout::ALL {
            check_bindings(self.bindings(layout), groups)
                .map_err(|message| Error::ShaderCompilation { layout, message })?;
        }
        Ok(())
    }

    /// Generated WGSL for `layout`.
    pub fn source(&self, layout: VertexLayout) -> &str {
        &self.sources[layout.index()]
    }

    fn destroy(&self, backend: &mut dyn Backend) {
        for module in self.modules {
            backend.destroy_shader_module(module);
        }
    }
}

/// Memoizes [`ShaderVariants`] by exact source text.
#[derive(Debug, Default)]
pub struct ShaderCache {
    entries: HashMap<String, Rc<ShaderVariants>>,
}

impl ShaderCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the variants for `body`, compiling all seven on first use.
    ///
    /// On error nothing is cached and no backend module stays alive.
    pub fn variants_for(
        &mut self,
        backend: &mut dyn Backend,
        body: &str,
    ) -> Result<Rc<ShaderVariants>> {
        if let Some(variants) = self.entries.get(body) {
            return Ok(Rc::clone(variants));
        }

        let sources = VertexLayout::ALL.map(|layout| synthesize(layout, body));
        let mut bindings = Vec::with_capacity(VertexLayout::ALL.len());
        for (layout, source) in VertexLayout::ALL.iter().zip(&sources) {
            bindings.push(validate(*layout, source)?);
        }
        let bindings: [Vec<ShaderBinding>; 7] = bindings
            .try_into()
            .map_err(|_| Error::Backend("shader variant count mismatch".into()))?;

        let mut modules = Vec::with_capacity(VertexLayout::ALL.len());
        for (layout, source) in VertexLayout::ALL.iter().zip(&sources) {
            match backend.create_shader_module(&format!("{layout} shader"), source) {
                Ok(module) => modules.push(module),
                Err(err) => {
                    for module in modules {
                        backend.destroy_shader_module(module);
                    }
                    return Err(err);
                }
            }
        }
        let modules: [ShaderModuleHandle; 7] = modules
            .try_into()
            .map_err(|_| Error::Backend("shader variant count mismatch".into()))?;

        log::debug!("compiled {} shader variants", VertexLayout::ALL.len());
        let variants = Rc::new(ShaderVariants {
            modules,
            sources,
            bindings,
        });
        self.entries.insert(body.to_string(), Rc::clone(&variants));
        Ok(variants)
    }

    /// Cached variants for `body`, without compiling.
    pub fn get(&self, body: &str) -> Option<Rc<ShaderVariants>> {
        self.entries.get(body).cloned()
    }

    /// Number of distinct bodies compiled.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is compiled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroys entries no longer shared with anything outside the cache.
    pub fn prune(&mut self, backend: &mut dyn Backend) {
        self.entries.retain(|_, variants| {
            let keep = Rc::strong_count(variants) > 1;
            if !keep {
                variants.destroy(backend);
            }
            keep
        });
    }

    /// Destroys every cached module.
    pub fn clear(&mut self, backend: &mut dyn Backend) {
        for (_, variants) in self.entries.drain() {
            variants.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingBackend;

    #[test]
    fn built_in_bodies_validate_for_every_layout() {
        for layout in VertexLayout::ALL {
            validate(layout, &synthesize(layout, BASIC_SHADER)).unwrap();
            validate(layout, &synthesize(layout, TEXTURED_SHADER)).unwrap();
        }
    }

    #[test]
    fn generated_input_follows_the_layout() {
        let source = synthesize(VertexLayout::PositionNormalUv, BASIC_SHADER);
        assert!(source.contains("@location(10) uv: vec2f"));
        assert!(source.contains("result.color = material.diffuse_color;"));

        let source = synthesize(VertexLayout::PositionColor, BASIC_SHADER);
        assert!(source.contains("result.color = vertex_in.color;"));
        assert!(!source.contains("result.color = material.diffuse_color;"));
    }

    #[test]
    fn identical_source_shares_one_entry() {
        let mut backend = RecordingBackend::default();
        let mut cache = ShaderCache::new();
        let first = cache.variants_for(&mut backend, BASIC_SHADER).unwrap();
        let second = cache.variants_for(&mut backend, BASIC_SHADER).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(backend.shader_modules_created(), 7);

        let other = cache.variants_for(&mut backend, TEXTURED_SHADER).unwrap();
        assert!(!Rc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);
        assert_eq!(backend.live_objects().shader_modules, 14);
    }

    #[test]
    fn variants_differ_per_layout() {
        let mut backend = RecordingBackend::default();
        let mut cache = ShaderCache::new();
        let variants = cache.variants_for(&mut backend, BASIC_SHADER).unwrap();
        let position = variants.module(VertexLayout::Position);
        let color = variants.module(VertexLayout::PositionColor);
        assert_ne!(position, color);
        assert_eq!(
            backend.shader_module(color).unwrap().source,
            variants.source(VertexLayout::PositionColor)
        );
    }

    #[test]
    fn malformed_body_caches_nothing() {
        let mut backend = RecordingBackend::default();
        let mut cache = ShaderCache::new();
        let err = cache
            .variants_for(&mut backend, "fn vertex_main( {")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ShaderCompilation {
                layout: VertexLayout::Position,
                ..
            }
        ));
        assert!(cache.is_empty());
        assert_eq!(backend.live_objects().shader_modules, 0);
    }

    #[test]
    fn body_using_a_missing_attribute_names_the_layout() {
        // `vertex_in.normal` only exists for layouts carrying normals.
        let body = BASIC_SHADER.replace(
            "output.color = v.color;",
            "output.color = vec4f(vertex_in.normal, 1.0);",
        );
        let mut backend = RecordingBackend::default();
        let mut cache = ShaderCache::new();
        match cache.variants_for(&mut backend, &body) {
            Err(Error::ShaderCompilation { layout, .. }) => {
                assert_eq!(layout, VertexLayout::Position)
            }
            other => panic!("expected compilation error, got {other:?}"),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_entry_point_is_a_compilation_error() {
        let body = BASIC_SHADER.replace("fn fragment_main", "fn fragment_entry");
        match validate(VertexLayout::Position, &synthesize(VertexLayout::Position, &body)) {
            Err(Error::ShaderCompilation { message, .. }) => {
                assert!(message.contains("fragment_main"))
            }
            other => panic!("expected compilation error, got {other:?}"),
        }
    }

    #[test]
    fn declared_bindings_are_reflected() {
        let layout = VertexLayout::PositionNormalUv;
        let bindings = validate(layout, &synthesize(layout, TEXTURED_SHADER)).unwrap();
        let declared: Vec<(u32, u32, BindingKind)> = bindings
            .iter()
            .map(|b| (b.group, b.binding, b.kind))
            .collect();
        assert_eq!(
            declared,
            vec![
                (0, 0, BindingKind::Uniform),
                (1, 0, BindingKind::Uniform),
                (1, 1, BindingKind::Texture),
                (1, 2, BindingKind::Sampler),
            ]
        );
    }

    #[test]
    fn storage_buffers_are_not_bindable() {
        let body = format!(
            "@group(1) @binding(1) var<storage, read> extra: array<f32>;\n{}",
            BASIC_SHADER.replace("return frag.color;", "return frag.color * extra[0];")
        );
        let layout = VertexLayout::Position;
        match validate(layout, &synthesize(layout, &body)) {
            Err(Error::ShaderCompilation { message, .. }) => assert!(message.contains("extra")),
            other => panic!("expected compilation error, got {other:?}"),
        }
    }

    #[test]
    fn bindings_must_match_the_bound_kinds() {
        let mut backend = RecordingBackend::default();
        let mut cache = ShaderCache::new();
        let variants = cache.variants_for(&mut backend, TEXTURED_SHADER).unwrap();
        let camera: &[BindingKind] = &[BindingKind::Uniform];

        let textured = [
            BindingKind::Uniform,
            BindingKind::Texture,
            BindingKind::Sampler,
        ];
        assert!(variants.check_bindings(&[camera, &textured]).is_ok());

        let untextured = [BindingKind::Uniform];
        assert!(matches!(
            variants.check_bindings(&[camera, &untextured]),
            Err(Error::ShaderCompilation {
                layout: VertexLayout::Position,
                ..
            })
        ));

        let shifted = [
            BindingKind::Uniform,
            BindingKind::Uniform,
            BindingKind::Texture,
            BindingKind::Sampler,
        ];
        assert!(variants.check_bindings(&[camera, &shifted]).is_err());
    }

    #[test]
    fn backend_failure_rolls_back_created_modules() {
        let mut backend = RecordingBackend::default();
        backend.fail_shader_modules_after(3);
        let mut cache = ShaderCache::new();
        assert!(cache.variants_for(&mut backend, BASIC_SHADER).is_err());
        assert!(cache.is_empty());
        assert_eq!(backend.shader_modules_created(), 3);
        assert_eq!(backend.live_objects().shader_modules, 0);
    }

    #[test]
    fn prune_and_clear_release_modules() {
        let mut backend = RecordingBackend::default();
        let mut cache = ShaderCache::new();
        let held = cache.variants_for(&mut backend, BASIC_SHADER).unwrap();
        drop(cache.variants_for(&mut backend, TEXTURED_SHADER).unwrap());

        cache.prune(&mut backend);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(BASIC_SHADER).is_some());
        assert_eq!(backend.live_objects().shader_modules, 7);

        drop(held);
        cache.clear(&mut backend);
        assert!(cache.is_empty());
        assert_eq!(backend.live_objects().shader_modules, 0);
    }
}
