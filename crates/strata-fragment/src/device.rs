//! The graphics-device surface consumed by residency transitions.
//!
//! Every call takes `&mut self`, so a device value can only be used from the
//! thread that owns it. [`RenderableFragment`](crate::RenderableFragment)
//! never reaches for an ambient context; the caller passes the device into
//! each device-touching operation.

use crate::data::IndexFormat;
use crate::error::DeviceError;
use crate::texture::TextureImage;

/// Opaque name of a device buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Opaque name of a device texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

/// What a buffer holds; decides the binding target on upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Per-vertex attribute data (positions, normals, texture coordinates).
    Attribute,
    /// Triangle index data.
    Index,
}

/// Expected update frequency of uploaded data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written once, drawn many times.
    Static,
    /// Rewritten frequently.
    Dynamic,
}

/// Vertex attribute slot a buffer is bound to before drawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeSlot {
    Position,
    Normal,
    TexCoord,
}

/// A graphics device able to hold fragment geometry and textures.
pub trait FragmentDevice {
    /// Reserve `count` buffer names. No memory is committed until upload.
    fn allocate_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>, DeviceError>;

    /// Replace the contents of `handle` with `data`.
    fn upload_buffer(
        &mut self,
        handle: BufferHandle,
        kind: BufferKind,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<(), DeviceError>;

    /// Release buffers and their memory. Unknown handles are ignored.
    fn delete_buffers(&mut self, handles: &[BufferHandle]);

    /// Upload an RGBA8 image as a sampled texture.
    fn create_texture(&mut self, image: &TextureImage) -> Result<TextureHandle, DeviceError>;

    /// Release a texture. Unknown handles are ignored.
    fn delete_texture(&mut self, handle: TextureHandle);

    /// Enable texturing with `texture`, or disable texturing with `None`.
    fn bind_texture(&mut self, texture: Option<TextureHandle>);

    /// Bind `handle` as the source of `slot` for the next draw.
    fn bind_attribute(&mut self, slot: AttributeSlot, handle: BufferHandle);

    /// Unbind an attribute slot (e.g. texture coordinates when untextured).
    fn unbind_attribute(&mut self, slot: AttributeSlot);

    /// Draw `index_count` indices from `indices` as a triangle list.
    fn draw_indexed_triangles(&mut self, indices: BufferHandle, format: IndexFormat, index_count: u32);
}
