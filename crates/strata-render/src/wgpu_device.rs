//! [`FragmentDevice`] implementation on top of wgpu.
//!
//! Buffer handles are reserved up front and backed by a `wgpu::Buffer` on
//! upload. Fragments issue draws while no render pass is open, so draws are
//! recorded as [`FragmentDrawCommand`]s and replayed with
//! [`WgpuFragmentDevice::encode`].

use std::collections::HashMap;

use strata_fragment::{
    AttributeSlot, BufferHandle, BufferKind, BufferUsage, DeviceError, FragmentDevice, IndexFormat,
    TextureHandle, TextureImage,
};

/// Vertex buffer slot of positions in the fragment pipeline.
pub const POSITION_SLOT: u32 = 0;
/// Vertex buffer slot of normals.
pub const NORMAL_SLOT: u32 = 1;
/// Vertex buffer slot of texture coordinates.
pub const TEX_COORD_SLOT: u32 = 2;

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    offset: 0,
    shader_location: 0,
    format: wgpu::VertexFormat::Float32x3,
}];
const NORMAL_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    offset: 0,
    shader_location: 1,
    format: wgpu::VertexFormat::Float32x3,
}];
const TEX_COORD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    offset: 0,
    shader_location: 2,
    format: wgpu::VertexFormat::Float32x2,
}];

/// Layouts of the three per-attribute vertex buffers, in slot order.
pub fn fragment_vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 3] {
    [
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &NORMAL_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &TEX_COORD_ATTRIBUTES,
        },
    ]
}

pub fn to_wgpu_index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::U16 => wgpu::IndexFormat::Uint16,
        IndexFormat::U32 => wgpu::IndexFormat::Uint32,
    }
}

/// One recorded draw with the bindings that were current when it was issued.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentDrawCommand {
    pub indices: BufferHandle,
    pub format: wgpu::IndexFormat,
    pub index_count: u32,
    pub positions: Option<BufferHandle>,
    pub normals: Option<BufferHandle>,
    pub tex_coords: Option<BufferHandle>,
    pub texture: Option<TextureHandle>,
}

struct ResolvedDraw<'a> {
    positions: &'a wgpu::Buffer,
    normals: &'a wgpu::Buffer,
    indices: &'a wgpu::Buffer,
    tex_coords: Option<&'a wgpu::Buffer>,
    view: Option<&'a wgpu::TextureView>,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    kind: BufferKind,
    size: u64,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: u64,
}

/// Fragment device backed by a wgpu device and queue.
pub struct WgpuFragmentDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_buffer: u32,
    next_texture: u32,
    /// Reserved handles; `None` until the first upload.
    buffers: HashMap<BufferHandle, Option<GpuBuffer>>,
    textures: HashMap<TextureHandle, GpuTexture>,
    bound_texture: Option<TextureHandle>,
    bound_attributes: HashMap<AttributeSlot, BufferHandle>,
    commands: Vec<FragmentDrawCommand>,
    live_bytes: u64,
    /// Optional cap on committed bytes, below the device's own limits.
    budget: Option<u64>,
}

impl WgpuFragmentDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            next_buffer: 0,
            next_texture: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            bound_texture: None,
            bound_attributes: HashMap::new(),
            commands: Vec::new(),
            live_bytes: 0,
            budget: None,
        }
    }

    /// Refuse uploads that would push committed bytes over `budget`.
    pub fn set_budget(&mut self, budget: Option<u64>) {
        self.budget = budget;
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Bytes held by live buffers and textures.
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers
            .get(&handle)
            .and_then(Option::as_ref)
            .map(|b| &b.buffer)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&handle).map(|t| &t.texture)
    }

    pub fn texture_view(&self, handle: TextureHandle) -> Option<&wgpu::TextureView> {
        self.textures.get(&handle).map(|t| &t.view)
    }

    /// Draws recorded since the last [`clear_commands`](Self::clear_commands).
    pub fn commands(&self) -> &[FragmentDrawCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Look up the GPU objects a recorded draw needs. `None` when any of
    /// them was deleted after the draw was recorded.
    fn resolve(&self, command: &FragmentDrawCommand) -> Option<ResolvedDraw<'_>> {
        let tex_coords = match command.tex_coords {
            Some(handle) => Some(self.buffer(handle)?),
            None => None,
        };
        let view = match command.texture {
            Some(handle) => Some(self.texture_view(handle)?),
            None => None,
        };
        Some(ResolvedDraw {
            positions: self.buffer(command.positions?)?,
            normals: self.buffer(command.normals?)?,
            indices: self.buffer(command.indices)?,
            tex_coords,
            view,
        })
    }

    /// Replay recorded draws into `pass`.
    ///
    /// `bind_texture` is called before every draw with the texture view the
    /// draw expects (or `None` when untextured) so the caller can set its
    /// bind group. Draws whose buffers or texture were deleted after
    /// recording are skipped. Returns the number of draws encoded.
    pub fn encode(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        mut bind_texture: impl FnMut(&mut wgpu::RenderPass<'_>, Option<&wgpu::TextureView>),
    ) -> usize {
        let mut encoded = 0;
        for command in &self.commands {
            let Some(draw) = self.resolve(command) else {
                log::warn!("Skipping draw of {:?}: device resources released", command.indices);
                continue;
            };

            bind_texture(pass, draw.view);
            pass.set_vertex_buffer(POSITION_SLOT, draw.positions.slice(..));
            pass.set_vertex_buffer(NORMAL_SLOT, draw.normals.slice(..));
            if let Some(tex_coords) = draw.tex_coords {
                pass.set_vertex_buffer(TEX_COORD_SLOT, tex_coords.slice(..));
            }
            pass.set_index_buffer(draw.indices.slice(..), command.format);
            pass.draw_indexed(0..command.index_count, 0, 0..1);
            encoded += 1;
        }
        encoded
    }

    fn check_capacity(&self, bytes: u64, freed: u64) -> Result<(), DeviceError> {
        let committed = self.live_bytes - freed + bytes;
        let over_budget = self.budget.is_some_and(|budget| committed > budget);
        if bytes > self.device.limits().max_buffer_size || over_budget {
            return Err(DeviceError::OutOfMemory { requested: bytes });
        }
        Ok(())
    }
}

impl FragmentDevice for WgpuFragmentDevice {
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
        Ok(handles)
    }

    fn upload_buffer(
        &mut self,
        handle: BufferHandle,
        kind: BufferKind,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<(), DeviceError> {
        use wgpu::util::DeviceExt;

        let Some(slot) = self.buffers.get(&handle) else {
            return Err(DeviceError::UnknownBuffer(handle));
        };
        let old_size = slot.as_ref().map_or(0, |b| b.size);
        let size = data.len() as u64;
        self.check_capacity(size, old_size)?;

        let wgpu_usage = match kind {
            BufferKind::Attribute => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            BufferKind::Index => wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        };
        let label = match usage {
            BufferUsage::Static => "fragment-static-buffer",
            BufferUsage::Dynamic => "fragment-dynamic-buffer",
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage: wgpu_usage,
            });

        if let Some(Some(old)) = self.buffers.insert(handle, Some(GpuBuffer { buffer, kind, size })) {
            old.buffer.destroy();
        }
        self.live_bytes = self.live_bytes - old_size + size;
        Ok(())
    }

    fn delete_buffers(&mut self, handles: &[BufferHandle]) {
        for handle in handles {
            if let Some(Some(old)) = self.buffers.remove(handle) {
                self.live_bytes -= old.size;
                old.buffer.destroy();
            }
            self.bound_attributes.retain(|_, bound| bound != handle);
        }
    }

    fn create_texture(&mut self, image: &TextureImage) -> Result<TextureHandle, DeviceError> {
        let size = image.byte_size() as u64;
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        if image.width() > max_dimension || image.height() > max_dimension {
            return Err(DeviceError::OutOfMemory { requested: size });
        }
        self.check_capacity(size, 0)?;

        let extent = wgpu::Extent3d {
            width: image.width(),
            height: image.height(),
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fragment-texture"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.rgba(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(image.width() * 4),
                rows_per_image: None,
            },
            extent,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        self.next_texture += 1;
        let handle = TextureHandle(self.next_texture);
        self.textures.insert(handle, GpuTexture { texture, view, size });
        self.live_bytes += size;
        log::trace!(
            "Created fragment texture {handle:?} ({}x{})",
            image.width(),
            image.height()
        );
        Ok(handle)
    }

    fn delete_texture(&mut self, handle: TextureHandle) {
        if let Some(old) = self.textures.remove(&handle) {
            self.live_bytes -= old.size;
            old.texture.destroy();
        }
        if self.bound_texture == Some(handle) {
            self.bound_texture = None;
        }
    }

    fn bind_texture(&mut self, texture: Option<TextureHandle>) {
        self.bound_texture = texture;
    }

    fn bind_attribute(&mut self, slot: AttributeSlot, handle: BufferHandle) {
        self.bound_attributes.insert(slot, handle);
    }

    fn unbind_attribute(&mut self, slot: AttributeSlot) {
        self.bound_attributes.remove(&slot);
    }

    fn draw_indexed_triangles(&mut self, indices: BufferHandle, format: IndexFormat, index_count: u32) {
        if let Some(Some(buffer)) = self.buffers.get(&indices)
            && buffer.kind != BufferKind::Index
        {
            log::warn!("Draw uses {indices:?} as indices but it holds vertex attributes");
        }
        self.commands.push(FragmentDrawCommand {
            indices,
            format: to_wgpu_index_format(format),
            index_count,
            positions: self.bound_attributes.get(&AttributeSlot::Position).copied(),
            normals: self.bound_attributes.get(&AttributeSlot::Normal).copied(),
            tex_coords: self.bound_attributes.get(&AttributeSlot::TexCoord).copied(),
            texture: self.bound_texture,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_fragment::{
        FragmentDescriptor, FragmentId, FragmentOrdering, FragmentSource, FragmentTexture,
        InMemorySource, RenderableFragment, StoredGeometry,
    };
    use strata_math::{Aabb3, Vec3};

    fn create_test_device() -> Option<WgpuFragmentDevice> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok()?;

            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: None,
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                    experimental_features: Default::default(),
                    ..Default::default()
                })
                .await
                .ok()?;
            Some(WgpuFragmentDevice::new(device, queue))
        })
    }

    fn fragment(source: &Arc<InMemorySource>) -> RenderableFragment {
        source.insert(
            FragmentId(1),
            StoredGeometry {
                positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
                normals: vec![[0.0, 1.0, 0.0]; 4],
                triangles: vec![[0, 1, 2], [0, 2, 3]],
            },
        );
        let descriptor = FragmentDescriptor::new(
            FragmentId(1),
            0,
            Aabb3::new(Vec3::ZERO, Vec3::ONE),
            0.5,
        )
        .unwrap();
        RenderableFragment::new(
            descriptor,
            Arc::clone(source) as Arc<dyn FragmentSource>,
            FragmentOrdering::default(),
        )
    }

    #[test]
    fn test_index_format_mapping() {
        assert_eq!(to_wgpu_index_format(IndexFormat::U16), wgpu::IndexFormat::Uint16);
        assert_eq!(to_wgpu_index_format(IndexFormat::U32), wgpu::IndexFormat::Uint32);
    }

    #[test]
    fn test_vertex_layouts_use_separate_slots() {
        let layouts = fragment_vertex_layouts();
        assert_eq!(layouts[POSITION_SLOT as usize].array_stride, 12);
        assert_eq!(layouts[NORMAL_SLOT as usize].array_stride, 12);
        assert_eq!(layouts[TEX_COORD_SLOT as usize].array_stride, 8);
        assert_eq!(layouts[TEX_COORD_SLOT as usize].attributes[0].shader_location, 2);
    }

    #[test]
    fn test_upload_and_delete_track_bytes() {
        let Some(mut device) = create_test_device() else {
            return;
        };
        let handles = device.allocate_buffers(2).unwrap();
        device
            .upload_buffer(handles[0], BufferKind::Attribute, &[0; 48], BufferUsage::Static)
            .unwrap();
        device
            .upload_buffer(handles[1], BufferKind::Index, &[0; 12], BufferUsage::Static)
            .unwrap();
        assert_eq!(device.live_bytes(), 60);
        assert!(device.buffer(handles[0]).is_some());

        device.delete_buffers(&handles);
        assert_eq!(device.live_bytes(), 0);
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_upload_to_unknown_handle_fails() {
        let Some(mut device) = create_test_device() else {
            return;
        };
        let err = device
            .upload_buffer(BufferHandle(42), BufferKind::Attribute, &[0; 4], BufferUsage::Static)
            .unwrap_err();
        assert_eq!(err, DeviceError::UnknownBuffer(BufferHandle(42)));
    }

    #[test]
    fn test_budget_reports_out_of_memory() {
        let Some(mut device) = create_test_device() else {
            return;
        };
        device.set_budget(Some(32));
        let handle = device.allocate_buffers(1).unwrap()[0];
        let err = device
            .upload_buffer(handle, BufferKind::Attribute, &[0; 64], BufferUsage::Static)
            .unwrap_err();
        assert_eq!(err, DeviceError::OutOfMemory { requested: 64 });
        assert_eq!(device.live_bytes(), 0);
    }

    #[test]
    fn test_fragment_lifecycle_on_gpu() {
        let Some(mut device) = create_test_device() else {
            return;
        };
        let source = Arc::new(InMemorySource::new());
        let mut fragment = fragment(&source);
        let image = TextureImage::new(2, 2, vec![200; 16]).unwrap();
        fragment.set_texture(&mut device, Some(FragmentTexture::new(image, vec![[0.0; 2]; 4], 1.0)));

        fragment.enable(&mut device).unwrap();
        assert_eq!(device.live_texture_count(), 1);
        fragment.render(&mut device);

        let command = &device.commands()[0];
        assert_eq!(command.index_count, 6);
        assert_eq!(command.format, wgpu::IndexFormat::Uint16);
        assert!(command.texture.is_some());
        assert!(command.tex_coords.is_some());

        fragment.unload(&mut device);
        assert_eq!(device.live_bytes(), 0);
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn test_draw_with_released_texture_is_not_replayed() {
        let Some(mut device) = create_test_device() else {
            return;
        };
        let source = Arc::new(InMemorySource::new());
        let mut fragment = fragment(&source);
        let image = TextureImage::new(2, 2, vec![200; 16]).unwrap();
        fragment.set_texture(&mut device, Some(FragmentTexture::new(image, vec![[0.0; 2]; 4], 1.0)));
        fragment.enable(&mut device).unwrap();
        fragment.render(&mut device);

        let command = device.commands()[0].clone();
        assert!(device.resolve(&command).is_some());

        device.delete_texture(command.texture.unwrap());
        assert!(device.resolve(&command).is_none());

        fragment.unload(&mut device);
    }
}
