//! Shader source plus render state.
//!
//! Materials are plain values. Every setter bumps [`Material::version`]; the
//! pipeline cache remembers the version it built against and rebuilds when
//! the two differ. The material itself never resets the counter.

use std::collections::BTreeMap;

use crate::color::Color;
use crate::shader::BASIC_SHADER;
use crate::texture::TextureId;
use crate::uniform::UniformId;

/// Identifies a material within a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub(crate) u64);

/// Which triangle faces are discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    /// Face culled by the rasterizer, if any.
    pub fn to_wgpu(self) -> Option<wgpu::Face> {
        match self {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        }
    }
}

/// Everything needed to create a [`Material`].
///
/// ```ignore
/// let material = renderer.create_material(
///     MaterialDescriptor::new(BASIC_SHADER)
///         .cull_mode(CullMode::None)
///         .uniform("tint", tint),
/// )?;
/// ```
#[derive(Debug, Clone)]
pub struct MaterialDescriptor {
    pub shader: String,
    /// Bound at group 1 from binding 1, in ascending name order.
    pub uniforms: BTreeMap<String, UniformId>,
    pub diffuse_color: Color,
    pub diffuse_texture: Option<TextureId>,
    pub cull_mode: CullMode,
    pub front_face: wgpu::FrontFace,
    pub topology: wgpu::PrimitiveTopology,
}

impl Default for MaterialDescriptor {
    fn default() -> Self {
        Self::new(BASIC_SHADER)
    }
}

impl MaterialDescriptor {
    /// Descriptor for a WGSL body with default render state.
    pub fn new(shader: impl Into<String>) -> Self {
        Self {
            shader: shader.into(),
            uniforms: BTreeMap::new(),
            diffuse_color: Color::WHITE,
            diffuse_texture: None,
            cull_mode: CullMode::Back,
            front_face: wgpu::FrontFace::Ccw,
            topology: wgpu::PrimitiveTopology::TriangleList,
        }
    }

    /// Binds a caller uniform under `name`. Bindings follow name order.
    pub fn uniform(mut self, name: impl Into<String>, uniform: UniformId) -> Self {
        self.uniforms.insert(name.into(), uniform);
        self
    }

    /// Color used when geometry has no vertex colors.
    pub fn diffuse_color(mut self, color: Color) -> Self {
        self.diffuse_color = color;
        self
    }

    /// Texture bound with its sampler after the uniforms.
    pub fn diffuse_texture(mut self, texture: TextureId) -> Self {
        self.diffuse_texture = Some(texture);
        self
    }

    /// Faces to discard.
    pub fn cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Winding of front faces.
    pub fn front_face(mut self, front_face: wgpu::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    /// Primitive assembly.
    pub fn topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }
}

/// Shader, uniforms and fixed-function state shared by any number of models.
#[derive(Debug, Clone)]
pub struct Material {
    id: MaterialId,
    shader: String,
    uniforms: BTreeMap<String, UniformId>,
    diffuse_color: Color,
    diffuse_texture: Option<TextureId>,
    cull_mode: CullMode,
    front_face: wgpu::FrontFace,
    topology: wgpu::PrimitiveTopology,
    version: u64,
}

impl Material {
    pub(crate) fn new(id: MaterialId, desc: MaterialDescriptor) -> Self {
        Self {
            id,
            shader: desc.shader,
            uniforms: desc.uniforms,
            diffuse_color: desc.diffuse_color,
            diffuse_texture: desc.diffuse_texture,
            cull_mode: desc.cull_mode,
            front_face: desc.front_face,
            topology: desc.topology,
            version: 0,
        }
    }

    /// Id assigned by the renderer.
    pub fn id(&self) -> MaterialId {
        self.id
    }

    /// Incremented by every setter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current WGSL body.
    pub fn shader(&self) -> &str {
        &self.shader
    }

    /// Caller uniforms by name.
    pub fn uniforms(&self) -> &BTreeMap<String, UniformId> {
        &self.uniforms
    }

    /// Color used when geometry has no vertex colors.
    pub fn diffuse_color(&self) -> Color {
        self.diffuse_color
    }

    /// Texture sampled by the shader, if any.
    pub fn diffuse_texture(&self) -> Option<TextureId> {
        self.diffuse_texture
    }

    /// Faces discarded by the rasterizer.
    pub fn cull_mode(&self) -> CullMode {
        self.cull_mode
    }

    /// Winding of front faces.
    pub fn front_face(&self) -> wgpu::FrontFace {
        self.front_face
    }

    /// Primitive assembly.
    pub fn topology(&self) -> wgpu::PrimitiveTopology {
        self.topology
    }

    /// Replaces the WGSL body. Compiled on the next render.
    pub fn set_shader(&mut self, shader: impl Into<String>) {
        self.shader = shader.into();
        self.version += 1;
    }

    /// Changes the color uploaded to the material uniform.
    pub fn set_diffuse_color(&mut self, color: Color) {
        self.diffuse_color = color;
        self.version += 1;
    }

    /// `None` falls back to the diffuse color alone.
    pub fn set_diffuse_texture(&mut self, texture: Option<TextureId>) {
        self.diffuse_texture = texture;
        self.version += 1;
    }

    /// Changes culling.
    pub fn set_cull_mode(&mut self, cull_mode: CullMode) {
        self.cull_mode = cull_mode;
        self.version += 1;
    }

    /// Changes the front face winding.
    pub fn set_front_face(&mut self, front_face: wgpu::FrontFace) {
        self.front_face = front_face;
        self.version += 1;
    }

    /// Changes primitive assembly.
    pub fn set_topology(&mut self, topology: wgpu::PrimitiveTopology) {
        self.topology = topology;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults() {
        let material = Material::new(MaterialId(1), MaterialDescriptor::default());
        assert_eq!(material.shader(), BASIC_SHADER);
        assert_eq!(material.cull_mode(), CullMode::Back);
        assert_eq!(material.front_face(), wgpu::FrontFace::Ccw);
        assert_eq!(material.topology(), wgpu::PrimitiveTopology::TriangleList);
        assert_eq!(material.diffuse_color(), Color::WHITE);
        assert_eq!(material.diffuse_texture(), None);
        assert_eq!(material.version(), 0);
    }

    #[test]
    fn every_setter_bumps_the_version() {
        let mut material = Material::new(MaterialId(1), MaterialDescriptor::default());
        material.set_cull_mode(CullMode::None);
        material.set_front_face(wgpu::FrontFace::Cw);
        material.set_topology(wgpu::PrimitiveTopology::LineList);
        material.set_shader("// other");
        material.set_diffuse_color(Color::RED);
        material.set_diffuse_texture(None);
        assert_eq!(material.version(), 6);
    }

    #[test]
    fn uniforms_iterate_in_name_order() {
        let desc = MaterialDescriptor::default()
            .uniform("zeta", UniformId(1))
            .uniform("alpha", UniformId(2))
            .uniform("mid", UniformId(3));
        let names: Vec<&str> = desc.uniforms.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn cull_mode_maps_to_faces() {
        assert_eq!(CullMode::None.to_wgpu(), None);
        assert_eq!(CullMode::Front.to_wgpu(), Some(wgpu::Face::Front));
        assert_eq!(CullMode::Back.to_wgpu(), Some(wgpu::Face::Back));
    }
}
