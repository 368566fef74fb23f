//! Headless [`FragmentDevice`] that records every call.
//!
//! Tracks live buffers, textures and committed bytes so residency
//! transitions can be checked without a GPU. An optional byte capacity makes
//! uploads fail with [`DeviceError::OutOfMemory`] once exceeded.

use rustc_hash::FxHashMap;

use crate::data::IndexFormat;
use crate::device::{AttributeSlot, BufferHandle, BufferKind, BufferUsage, FragmentDevice, TextureHandle};
use crate::error::DeviceError;
use crate::texture::TextureImage;

/// One call made against a [`RecordingDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    AllocateBuffers(Vec<BufferHandle>),
    UploadBuffer {
        handle: BufferHandle,
        kind: BufferKind,
        bytes: usize,
        usage: BufferUsage,
    },
    DeleteBuffers(Vec<BufferHandle>),
    CreateTexture(TextureHandle),
    DeleteTexture(TextureHandle),
    BindTexture(Option<TextureHandle>),
    BindAttribute(AttributeSlot, BufferHandle),
    UnbindAttribute(AttributeSlot),
    DrawIndexedTriangles {
        indices: BufferHandle,
        format: IndexFormat,
        index_count: u32,
    },
}

/// State captured at the moment of a draw call.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub indices: BufferHandle,
    pub format: IndexFormat,
    pub index_count: u32,
    pub texture: Option<TextureHandle>,
    pub positions: Option<BufferHandle>,
    pub normals: Option<BufferHandle>,
    pub tex_coords: Option<BufferHandle>,
}

#[derive(Clone, Copy, Debug)]
struct UploadedBuffer {
    kind: BufferKind,
    bytes: u64,
}

/// Device double for tests and headless runs.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    next_buffer: u32,
    next_texture: u32,
    /// Reserved buffers; `None` until first upload.
    buffers: FxHashMap<BufferHandle, Option<UploadedBuffer>>,
    textures: FxHashMap<TextureHandle, u64>,
    live_bytes: u64,
    capacity: Option<u64>,
    bound_texture: Option<TextureHandle>,
    bound_attributes: FxHashMap<AttributeSlot, BufferHandle>,
    calls: Vec<DeviceCall>,
    draws: Vec<DrawRecord>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that refuses to commit more than `bytes` in total.
    pub fn with_capacity(bytes: u64) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::default()
        }
    }

    pub fn set_capacity(&mut self, capacity: Option<u64>) {
        self.capacity = capacity;
    }

    /// Bytes committed by buffers and textures that have not been deleted.
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn is_buffer_live(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle)
    }

    pub fn is_texture_live(&self, handle: TextureHandle) -> bool {
        self.textures.contains_key(&handle)
    }

    /// Kind of data last uploaded to `handle`, if any.
    pub fn buffer_kind(&self, handle: BufferHandle) -> Option<BufferKind> {
        self.buffers.get(&handle).copied().flatten().map(|b| b.kind)
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Forget recorded calls and draws; live resources are kept.
    pub fn clear_log(&mut self) {
        self.calls.clear();
        self.draws.clear();
    }

    /// Number of `upload_buffer` calls recorded so far.
    pub fn upload_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::UploadBuffer { .. }))
            .count()
    }

    /// Number of `allocate_buffers` calls recorded so far.
    pub fn allocation_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::AllocateBuffers(_)))
            .count()
    }

    /// Textures deleted so far, in call order.
    pub fn deleted_textures(&self) -> Vec<TextureHandle> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::DeleteTexture(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    fn reserve(&mut self, bytes: u64) -> Result<(), DeviceError> {
        if let Some(capacity) = self.capacity
            && self.live_bytes + bytes > capacity
        {
            return Err(DeviceError::OutOfMemory { requested: bytes });
        }
        self.live_bytes += bytes;
        Ok(())
    }
}

impl FragmentDevice for RecordingDevice {
    fn allocate_buffers(&mut self, count: usize) -> Result<Vec<BufferHandle>, DeviceError> {
        let handles: Vec<_> = (0..count)
            .map(|_| {
                self.next_buffer += 1;
                BufferHandle(self.next_buffer)
            })
            .collect();
        for &handle in &handles {
            self.buffers.insert(handle, None);
        }
        self.calls.push(DeviceCall::AllocateBuffers(handles.clone()));
        Ok(handles)
    }

    fn upload_buffer(
        &mut self,
        handle: BufferHandle,
        kind: BufferKind,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<(), DeviceError> {
        let previous = match self.buffers.get(&handle) {
            Some(previous) => *previous,
            None => return Err(DeviceError::UnknownBuffer(handle)),
        };
        let old_bytes = previous.map_or(0, |b| b.bytes);
        self.live_bytes -= old_bytes;
        let bytes = data.len() as u64;
        if let Err(err) = self.reserve(bytes) {
            self.live_bytes += old_bytes;
            return Err(err);
        }
        self.buffers
            .insert(handle, Some(UploadedBuffer { kind, bytes }));
        self.calls.push(DeviceCall::UploadBuffer {
            handle,
            kind,
            bytes: data.len(),
            usage,
        });
        Ok(())
    }

    fn delete_buffers(&mut self, handles: &[BufferHandle]) {
        for handle in handles {
            if let Some(Some(buffer)) = self.buffers.remove(handle) {
                self.live_bytes -= buffer.bytes;
            }
            self.bound_attributes.retain(|_, bound| bound != handle);
        }
        self.calls.push(DeviceCall::DeleteBuffers(handles.to_vec()));
    }

    fn create_texture(&mut self, image: &TextureImage) -> Result<TextureHandle, DeviceError> {
        let bytes = image.byte_size() as u64;
        self.reserve(bytes)?;
        self.next_texture += 1;
        let handle = TextureHandle(self.next_texture);
        self.textures.insert(handle, bytes);
        self.calls.push(DeviceCall::CreateTexture(handle));
        Ok(handle)
    }

    fn delete_texture(&mut self, handle: TextureHandle) {
        if let Some(bytes) = self.textures.remove(&handle) {
            self.live_bytes -= bytes;
        }
        if self.bound_texture == Some(handle) {
            self.bound_texture = None;
        }
        self.calls.push(DeviceCall::DeleteTexture(handle));
    }

    fn bind_texture(&mut self, texture: Option<TextureHandle>) {
        self.bound_texture = texture;
        self.calls.push(DeviceCall::BindTexture(texture));
    }

    fn bind_attribute(&mut self, slot: AttributeSlot, handle: BufferHandle) {
        self.bound_attributes.insert(slot, handle);
        self.calls.push(DeviceCall::BindAttribute(slot, handle));
    }

    fn unbind_attribute(&mut self, slot: AttributeSlot) {
        self.bound_attributes.remove(&slot);
        self.calls.push(DeviceCall::UnbindAttribute(slot));
    }

    fn draw_indexed_triangles(&mut self, indices: BufferHandle, format: IndexFormat, index_count: u32) {
        self.calls.push(DeviceCall::DrawIndexedTriangles {
            indices,
            format,
            index_count,
        });
        self.draws.push(DrawRecord {
            indices,
            format,
            index_count,
            texture: self.bound_texture,
            positions: self.bound_attributes.get(&AttributeSlot::Position).copied(),
            normals: self.bound_attributes.get(&AttributeSlot::Normal).copied(),
            tex_coords: self.bound_attributes.get(&AttributeSlot::TexCoord).copied(),
        });
    }
}
