//! Optional image overlay applied to a fragment.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{FragmentDevice, TextureHandle};
use crate::error::DeviceError;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one [`FragmentTexture`] instance.
///
/// Two textures with identical pixels still have different ids; residency
/// decisions compare ids, never contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        Self(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl TextureImage {
    /// Returns `None` if `rgba` is not exactly `width * height * 4` bytes.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * 4;
        (width > 0 && height > 0 && rgba.len() == expected).then_some(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn from_rgba_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            rgba: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn byte_size(&self) -> usize {
        self.rgba.len()
    }
}

/// An image plus per-vertex texture coordinates for one fragment.
///
/// Owns its device texture independently of the fragment's geometry
/// buffers. The device texture is created on first use and must be given
/// back with [`disable`](Self::disable) or [`release`](Self::release).
pub struct FragmentTexture {
    id: TextureId,
    image: TextureImage,
    tex_coords: Vec<[f32; 2]>,
    /// Ground length covered by one pixel.
    resolution: f32,
    device_texture: Option<TextureHandle>,
}

impl FragmentTexture {
    pub fn new(image: TextureImage, tex_coords: Vec<[f32; 2]>, resolution: f32) -> Self {
        Self {
            id: TextureId::next(),
            image,
            tex_coords,
            resolution,
            device_texture: None,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn image(&self) -> &TextureImage {
        &self.image
    }

    pub fn tex_coords(&self) -> &[[f32; 2]] {
        &self.tex_coords
    }

    pub fn tex_coord_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.tex_coords)
    }

    /// Whether the image currently lives on the device.
    pub fn is_on_device(&self) -> bool {
        self.device_texture.is_some()
    }

    /// The device texture if it has been uploaded.
    pub fn device_handle(&self) -> Option<TextureHandle> {
        self.device_texture
    }

    /// The device texture, uploading the image first if needed.
    pub fn device_texture<D: FragmentDevice>(
        &mut self,
        device: &mut D,
    ) -> Result<TextureHandle, DeviceError> {
        if let Some(handle) = self.device_texture {
            return Ok(handle);
        }
        let handle = device.create_texture(&self.image)?;
        tracing::trace!(texture = %self.id, ?handle, "uploaded fragment texture");
        self.device_texture = Some(handle);
        Ok(handle)
    }

    /// Free the device texture, keeping the image in main memory.
    pub fn disable<D: FragmentDevice>(&mut self, device: &mut D) {
        if let Some(handle) = self.device_texture.take() {
            device.delete_texture(handle);
        }
    }

    /// Free both tiers. Returns the main-memory bytes reclaimed.
    pub fn release<D: FragmentDevice>(mut self, device: &mut D) -> usize {
        self.disable(device);
        self.image.byte_size() + self.tex_coord_bytes().len()
    }
}

impl fmt::Debug for FragmentTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentTexture")
            .field("id", &self.id)
            .field("width", &self.image.width)
            .field("height", &self.image.height)
            .field("tex_coords", &self.tex_coords.len())
            .field("resolution", &self.resolution)
            .field("device_texture", &self.device_texture)
            .finish()
    }
}

impl Drop for FragmentTexture {
    fn drop(&mut self) {
        if let Some(handle) = self.device_texture {
            tracing::warn!(texture = %self.id, ?handle, "fragment texture dropped while on device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDevice;

    fn checker(size: u32) -> TextureImage {
        let image = image::RgbaImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        TextureImage::from_rgba_image(image)
    }

    #[test]
    fn test_image_size_validated() {
        assert!(TextureImage::new(2, 2, vec![0; 16]).is_some());
        assert!(TextureImage::new(2, 2, vec![0; 15]).is_none());
        assert!(TextureImage::new(0, 2, Vec::new()).is_none());
    }

    #[test]
    fn test_ids_are_unique_per_instance() {
        let a = FragmentTexture::new(checker(2), vec![[0.0; 2]; 3], 1.0);
        let b = FragmentTexture::new(checker(2), vec![[0.0; 2]; 3], 1.0);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_device_texture_created_once() {
        let mut device = RecordingDevice::new();
        let mut texture = FragmentTexture::new(checker(4), vec![[0.0; 2]; 3], 0.5);

        let first = texture.device_texture(&mut device).unwrap();
        let second = texture.device_texture(&mut device).unwrap();
        assert_eq!(first, second);
        assert_eq!(device.live_texture_count(), 1);

        texture.disable(&mut device);
        assert!(!texture.is_on_device());
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn test_release_frees_device_texture() {
        let mut device = RecordingDevice::new();
        let mut texture = FragmentTexture::new(checker(4), vec![[0.0; 2]; 3], 0.5);
        texture.device_texture(&mut device).unwrap();

        let freed = texture.release(&mut device);
        assert_eq!(freed, 4 * 4 * 4 + 3 * 8);
        assert_eq!(device.live_texture_count(), 0);
    }
}
