//! Error types shared by every part of the engine.

use thiserror::Error;

use crate::vertex::VertexLayout;

/// Engine error type.
///
/// Construction-time errors are reported to the caller as-is; nothing in the
/// engine retries.
#[derive(Error, Debug)]
pub enum Error {
    /// Geometry input was malformed. Nothing was allocated.
    #[error("invalid geometry: {0}")]
    Validation(#[from] GeometryError),

    /// A shader body failed to compile for one of the vertex layouts.
    #[error("shader failed to compile for {layout:?} layout: {message}")]
    ShaderCompilation {
        layout: VertexLayout,
        message: String,
    },

    /// An instance transform had no inverse, so no normal matrix exists.
    #[error("instance {index} transform is not invertible")]
    SingularMatrix { index: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No graphics adapter satisfied the request.
    #[error("no suitable graphics adapter: {0}")]
    AdapterUnavailable(String),

    /// The adapter refused to create a logical device.
    #[error("graphics device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The drawing surface could not be created for the target.
    #[error("drawing surface unavailable: {0}")]
    SurfaceUnavailable(String),

    /// The surface was lost; recreate the renderer.
    #[error("surface lost")]
    SurfaceLost,

    /// A backend call failed after the device was acquired.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// A handle did not refer to a live resource.
    #[error("unknown {0}")]
    UnknownResource(String),

    /// A shared resource was disposed while models or materials still use it.
    #[error("{resource} is still used by {users} other resource(s)")]
    ResourceInUse { resource: String, users: usize },

    /// The renderer was already disposed.
    #[error("renderer has been disposed")]
    Disposed,
}

/// Reasons geometry input is rejected before any GPU allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("geometry has no vertices")]
    Empty,

    #[error("position array length {0} is not a multiple of 3")]
    PositionLength(usize),

    /// An optional attribute array does not cover every vertex.
    #[error("{attribute} array has {actual} floats, expected {expected}")]
    AttributeLength {
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Interleaved data does not divide into whole vertices.
    #[error("packed data of {actual} floats is not a whole number of {floats_per_vertex}-float vertices")]
    PackedLength {
        floats_per_vertex: usize,
        actual: usize,
    },

    #[error("index array is empty")]
    EmptyIndices,

    #[error("index {index} at position {position} is out of bounds for {vertex_count} vertices")]
    IndexOutOfBounds {
        position: usize,
        index: u32,
        vertex_count: u32,
    },
}

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
