//! Sampled 2D textures.
//!
//! Pixels are always uploaded as RGBA8 (sRGB). Decoding goes through the
//! `image` crate, so anything it can read (PNG, JPEG, ...) can be loaded.

use std::path::Path;

use crate::backend::{Backend, SamplerSettings, TextureDescriptor, TextureHandle};
use crate::color::Color;
use crate::error::{Error, Result};

/// Identifies a texture within a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u64);

/// A GPU texture together with its sampler.
#[derive(Debug)]
pub struct Texture {
    handle: TextureHandle,
    sampler: SamplerSettings,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    /// Create a texture from tightly packed RGBA8 pixels.
    pub fn from_rgba(
        backend: &mut dyn Backend,
        label: &str,
        data: &[u8],
        width: u32,
        height: u32,
        sampler: SamplerSettings,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument(format!(
                "texture '{label}' has zero size {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "texture '{label}' needs {expected} bytes for {width}x{height}, got {}",
                data.len()
            )));
        }

        let handle = backend.create_texture(&TextureDescriptor {
            label,
            width,
            height,
            data,
            sampler,
        })?;
        log::debug!("texture '{label}': {width}x{height}");
        Ok(Self {
            handle,
            sampler,
            width,
            height,
        })
    }

    /// Decode an encoded image held in memory.
    pub fn from_bytes(
        backend: &mut dyn Backend,
        label: &str,
        bytes: &[u8],
        sampler: SamplerSettings,
    ) -> Result<Self> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba(backend, label, &img, width, height, sampler)
    }

    /// Load and decode an image file.
    pub fn from_file(
        backend: &mut dyn Backend,
        path: impl AsRef<Path>,
        sampler: SamplerSettings,
    ) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)?.to_rgba8();
        let (width, height) = img.dimensions();
        let label = path.display().to_string();
        Self::from_rgba(backend, &label, &img, width, height, sampler)
    }

    /// Backend texture, bound as a view and a sampler.
    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    /// Filtering and addressing used when sampling.
    pub fn sampler(&self) -> SamplerSettings {
        self.sampler
    }

    /// Releases the backend texture.
    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_texture(self.handle);
    }
}

/// RGBA8 checkerboard of `size`×`size` pixels with square cells of `cell` pixels.
pub fn checkerboard(size: u32, cell: u32, a: Color, b: Color) -> Vec<u8> {
    let cell = cell.max(1);
    let to_bytes = |c: Color| c.to_array().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8);
    let (a, b) = (to_bytes(a), to_bytes(b));

    let mut data = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let even = (x / cell + y / cell) % 2 == 0;
            data.extend_from_slice(if even { &a } else { &b });
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingBackend;

    #[test]
    fn rgba_size_is_checked() {
        let mut backend = RecordingBackend::default();
        let sampler = SamplerSettings::default();
        assert!(matches!(
            Texture::from_rgba(&mut backend, "short", &[0; 12], 2, 2, sampler),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Texture::from_rgba(&mut backend, "empty", &[], 0, 4, sampler),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(backend.live_objects().textures, 0);

        let texture = Texture::from_rgba(&mut backend, "ok", &[255; 16], 2, 2, sampler).unwrap();
        let recorded = backend.texture(texture.handle()).unwrap();
        assert_eq!((recorded.width, recorded.height), (2, 2));
        assert_eq!(recorded.data.len(), 16);
        texture.destroy(&mut backend);
        assert_eq!(backend.live_objects().textures, 0);
    }

    #[test]
    fn decodes_encoded_images() {
        let mut png = Vec::new();
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let mut backend = RecordingBackend::default();
        let texture =
            Texture::from_bytes(&mut backend, "png", &png, SamplerSettings::default()).unwrap();
        assert_eq!((texture.width, texture.height), (3, 2));
        let recorded = backend.texture(texture.handle()).unwrap();
        assert_eq!(&recorded.data[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn garbage_bytes_are_an_image_error() {
        let mut backend = RecordingBackend::default();
        let result = Texture::from_bytes(
            &mut backend,
            "junk",
            b"not an image",
            SamplerSettings::default(),
        );
        assert!(matches!(result, Err(Error::Image(_))));
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let data = checkerboard(4, 2, Color::WHITE, Color::BLACK);
        assert_eq!(data.len(), 64);
        assert_eq!(&data[0..4], &[255, 255, 255, 255]);
        // (2, 0) starts the second cell
        assert_eq!(&data[8..12], &[0, 0, 0, 255]);
        // (2, 2) is back to the first color
        assert_eq!(&data[(2 * 4 + 2) * 4..(2 * 4 + 2) * 4 + 4], &[255, 255, 255, 255]);
    }
}
