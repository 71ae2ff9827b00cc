//! # Phalanx
//!
//! **A small instanced 3D renderer on wgpu.**
//!
//! Describe a scene as geometries, materials and models, register the models,
//! and call [`Renderer::render`] once per frame. Shader variants and render
//! pipelines are generated and cached for you.
//!
//! ## Quick Start
//!
//! ```no_run
//! use phalanx::*;
//!
//! # fn demo(window: std::sync::Arc<winit::window::Window>) -> Result<()> {
//! let mut renderer = Renderer::create_blocking(window, 800, 600, GpuConfig::default())?;
//!
//! let cube = renderer.create_mesh("cube", &Mesh::cube())?;
//! let material = renderer.create_material(
//!     MaterialDescriptor::new(BASIC_SHADER).diffuse_color(Color::RED),
//! )?;
//! let model = renderer.create_model("cubes", cube, material, 2)?;
//! renderer.transform(model, Mat4::from_translation(Vec3::new(1.5, 0.0, 0.0)), 1)?;
//! renderer.add(model)?;
//!
//! *renderer.camera_mut() = Camera::new().at(0.0, 2.0, -5.0).looking_at(0.0, 0.0, 0.0);
//! renderer.render()?;
//! renderer.dispose();
//! # Ok(())
//! # }
//! ```
//!
//! ## Shaders
//!
//! Materials carry a WGSL *body* defining `vertex_main` and `fragment_main`.
//! The engine compiles it once per [`VertexLayout`] against a generated
//! prelude (`VertexIn`, `InstanceIn`, `transform_vertex`,
//! `transform_instance`, `camera`, `material`), so the same body works with
//! any geometry. See [`shader`] for the exact declarations.
//!
//! ## Headless use
//!
//! Everything goes through the [`Backend`] trait. [`RecordingBackend`]
//! implements it without a GPU and records every submitted [`Frame`], which
//! is how the engine is tested.

mod backend;
mod camera;
mod color;
mod error;
mod geometry;
mod gpu;
mod logging;
mod material;
mod mesh;
mod model;
mod pipeline;
mod recording;
mod renderer;
pub mod shader;
mod texture;
mod uniform;
mod vertex;

pub use backend::{
    Backend, BindGroupHandle, BindingKind, BindingResource, BufferDescriptor, BufferHandle,
    BufferKind, Frame, PipelineDescriptor, PipelineHandle, PrimitiveSettings, RenderCommand,
    SamplerSettings, ShaderModuleHandle, TextureDescriptor, TextureHandle,
};
pub use camera::Camera;
pub use color::Color;
pub use error::{Error, GeometryError, Result};
pub use geometry::{
    Geometry, GeometryId, PackedIndices, VertexData, index_format_for, pack_indices,
};
pub use gpu::{GpuConfig, WgpuBackend};
pub use logging::{LoggingConfig, init_logging};
pub use material::{CullMode, Material, MaterialDescriptor, MaterialId};
pub use mesh::{Mesh, Transform, Vertex3d};
pub use model::{InstanceTransform, Model, ModelId};
pub use pipeline::{MaterialResources, MaterialUniforms, PipelineCache, PipelineSet};
pub use recording::{
    LiveObjects, RecordedBuffer, RecordedPipeline, RecordedShaderModule, RecordedTexture,
    RecordingBackend,
};
pub use renderer::{CAMERA_GROUP, INSTANCE_SLOT, MATERIAL_GROUP, Renderer, VERTEX_SLOT};
pub use shader::{BASIC_SHADER, ShaderCache, ShaderVariants, TEXTURED_SHADER};
pub use texture::{Texture, TextureId, checkerboard};
pub use uniform::{Uniform, UniformId};
pub use vertex::{INSTANCE_LAYOUT, INSTANCE_STRIDE, Semantic, VertexLayout};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
