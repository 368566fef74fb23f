//! A mesh fragment whose data moves between residency tiers.
//!
//! The geometry of a [`RenderableFragment`] is in one of these states:
//!
//! - not loaded
//! - resident in main memory
//! - resident in main memory and on the device (four device buffers)
//! - as above, with the desired texture's coordinates bound
//!
//! Geometry buffers and the texture binding are released independently:
//! [`disable`](RenderableFragment::disable) drops everything on the device
//! while keeping main memory, [`unload`](RenderableFragment::unload) drops
//! both tiers.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use strata_math::Aabb3;

use crate::data::{FragmentData, IndexFormat};
use crate::descriptor::{FragmentDescriptor, FragmentId, FragmentOrdering};
use crate::device::{AttributeSlot, BufferHandle, BufferKind, BufferUsage, FragmentDevice};
use crate::error::{DataLoadError, DeviceError, FragmentError};
use crate::source::FragmentSource;
use crate::texture::{FragmentTexture, TextureId};

/// Number of device buffers held by an enabled fragment.
pub const BUFFERS_PER_FRAGMENT: usize = 4;

const VERTICES: usize = 0;
const NORMALS: usize = 1;
const TRIANGLES: usize = 2;
const TEX_COORDS: usize = 3;

/// Device buffers owned by one enabled fragment.
///
/// Slots: vertex positions, normals, triangle indices, texture coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceBuffers {
    handles: [BufferHandle; BUFFERS_PER_FRAGMENT],
    index_format: IndexFormat,
    index_count: u32,
    geometry_bytes: u64,
    tex_coord_bytes: u64,
}

impl DeviceBuffers {
    pub fn handles(&self) -> &[BufferHandle; BUFFERS_PER_FRAGMENT] {
        &self.handles
    }

    pub fn vertices(&self) -> BufferHandle {
        self.handles[VERTICES]
    }

    pub fn normals(&self) -> BufferHandle {
        self.handles[NORMALS]
    }

    pub fn triangles(&self) -> BufferHandle {
        self.handles[TRIANGLES]
    }

    pub fn tex_coords(&self) -> BufferHandle {
        self.handles[TEX_COORDS]
    }

    pub fn index_format(&self) -> IndexFormat {
        self.index_format
    }

    /// Indices consumed by one draw of the fragment (`triangles * 3`).
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Bytes uploaded into the four buffers.
    pub fn byte_size(&self) -> u64 {
        self.geometry_bytes + self.tex_coord_bytes
    }
}

/// Coarse residency state, mostly for logging and statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Residency {
    Unloaded,
    Resident,
    OnDevice,
    Textured,
}

/// A fragment of a multiresolution mesh that can be drawn on a
/// [`FragmentDevice`].
///
/// Device-touching operations take the device explicitly and must all run on
/// the thread owning that device. Main-memory loading can happen elsewhere
/// and be handed over with [`install_data`](Self::install_data).
pub struct RenderableFragment {
    descriptor: FragmentDescriptor,
    source: Arc<dyn FragmentSource>,
    ordering: FragmentOrdering,
    data: Option<FragmentData>,
    /// Texture the fragment should be drawn with.
    texture: Option<FragmentTexture>,
    buffers: Option<DeviceBuffers>,
    /// Texture whose coordinates currently sit in the tex-coord buffer.
    /// May lag behind `texture` until the next `enable`.
    bound_texture: Option<TextureId>,
}

impl RenderableFragment {
    pub fn new(
        descriptor: FragmentDescriptor,
        source: Arc<dyn FragmentSource>,
        ordering: FragmentOrdering,
    ) -> Self {
        Self {
            descriptor,
            source,
            ordering,
            data: None,
            texture: None,
            buffers: None,
            bound_texture: None,
        }
    }

    pub fn id(&self) -> FragmentId {
        self.descriptor.id()
    }

    pub fn descriptor(&self) -> &FragmentDescriptor {
        &self.descriptor
    }

    pub fn bbox(&self) -> Aabb3 {
        self.descriptor.bbox()
    }

    pub fn geometric_error(&self) -> f32 {
        self.descriptor.geometric_error()
    }

    /// Whether the geometry is in main memory.
    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&FragmentData> {
        self.data.as_ref()
    }

    /// Load the geometry into main memory if it is not there yet.
    ///
    /// On failure the fragment stays unloaded.
    pub fn load(&mut self) -> Result<(), DataLoadError> {
        if self.data.is_none() {
            let data = self.source.load_data(self.id())?;
            tracing::debug!(fragment = %self.id(), bytes = data.byte_size(), "loaded fragment data");
            self.data = Some(data);
        }
        Ok(())
    }

    /// Accept data loaded off-thread.
    ///
    /// Returns `false` and releases `data` if the fragment is already loaded.
    pub fn install_data(&mut self, data: FragmentData) -> bool {
        if self.data.is_some() {
            let freed = data.release();
            tracing::trace!(fragment = %self.id(), freed, "discarded late fragment data");
            return false;
        }
        self.data = Some(data);
        true
    }

    pub fn texture(&self) -> Option<&FragmentTexture> {
        self.texture.as_ref()
    }

    /// Replace the desired texture.
    ///
    /// The previous texture, if any, is released on the spot (device texture
    /// and image), even when its coordinates are still bound. Texture ids are
    /// unique per instance, so the previous texture is never the one passed
    /// in. If it was bound, [`is_enabled`](Self::is_enabled) turns false until
    /// the next [`enable`](Self::enable) binds the new one.
    pub fn set_texture<D: FragmentDevice>(
        &mut self,
        device: &mut D,
        texture: Option<FragmentTexture>,
    ) {
        let previous = std::mem::replace(&mut self.texture, texture);
        if let Some(previous) = previous {
            let previous_id = previous.id();
            let freed = previous.release(device);
            tracing::trace!(fragment = %self.id(), texture = %previous_id, freed, "released replaced texture");
        }
    }

    /// Resolution of the desired texture, or `-1.0` without one.
    pub fn texture_resolution(&self) -> f32 {
        self.texture.as_ref().map_or(-1.0, FragmentTexture::resolution)
    }

    /// Whether [`render`](Self::render) may be called.
    pub fn is_enabled(&self) -> bool {
        self.buffers.is_some()
            && match &self.texture {
                None => true,
                Some(texture) => self.bound_texture == Some(texture.id()),
            }
    }

    pub fn residency(&self) -> Residency {
        if self.data.is_none() {
            Residency::Unloaded
        } else if self.buffers.is_none() {
            Residency::Resident
        } else if self.texture.is_some() && self.is_enabled() {
            Residency::Textured
        } else {
            Residency::OnDevice
        }
    }

    pub fn buffers(&self) -> Option<&DeviceBuffers> {
        self.buffers.as_ref()
    }

    /// Id of the texture whose coordinates are bound.
    pub fn bound_texture(&self) -> Option<TextureId> {
        self.bound_texture
    }

    /// Bytes this fragment currently holds on the device.
    pub fn device_bytes(&self) -> u64 {
        let buffers = self.buffers.as_ref().map_or(0, DeviceBuffers::byte_size);
        let texture = self
            .texture
            .as_ref()
            .filter(|t| t.is_on_device())
            .map_or(0, |t| t.image().byte_size() as u64);
        buffers + texture
    }

    /// Bytes this fragment currently holds in main memory.
    pub fn main_memory_bytes(&self) -> u64 {
        let data = self.data.as_ref().map_or(0, FragmentData::byte_size);
        let texture = self
            .texture
            .as_ref()
            .map_or(0, |t| t.image().byte_size() + t.tex_coord_bytes().len());
        (data + texture) as u64
    }

    /// Make the fragment renderable on `device`.
    ///
    /// Loads the data if needed, uploads the geometry once per residency
    /// cycle and (re)binds the texture coordinates when the desired texture
    /// changed. If the device fails, every device resource created by this
    /// call is released again; data loaded by this call stays in main memory.
    pub fn enable<D: FragmentDevice>(&mut self, device: &mut D) -> Result<(), FragmentError> {
        let data = match self.data.take() {
            Some(data) => data,
            None => {
                let data = self.source.load_data(self.id())?;
                tracing::debug!(fragment = %self.id(), bytes = data.byte_size(), "loaded fragment data");
                data
            }
        };
        let result = self.enable_loaded(&data, device);
        self.data = Some(data);
        result
    }

    fn enable_loaded<D: FragmentDevice>(
        &mut self,
        data: &FragmentData,
        device: &mut D,
    ) -> Result<(), FragmentError> {
        let (mut buffers, created) = match self.buffers.take() {
            Some(buffers) => (buffers, false),
            None => {
                let buffers = upload_geometry(device, data)?;
                tracing::debug!(
                    fragment = %self.id(),
                    bytes = buffers.geometry_bytes,
                    "uploaded fragment geometry"
                );
                (buffers, true)
            }
        };

        let bound = self.bind_texture_coords(data, &mut buffers, device);
        if bound.is_err() && created {
            device.delete_buffers(&buffers.handles);
            return bound;
        }
        self.buffers = Some(buffers);
        bound
    }

    fn bind_texture_coords<D: FragmentDevice>(
        &mut self,
        data: &FragmentData,
        buffers: &mut DeviceBuffers,
        device: &mut D,
    ) -> Result<(), FragmentError> {
        let Some(texture) = self.texture.as_mut() else {
            // Nothing to bind; an older binding stays in place unused.
            return Ok(());
        };
        if self.bound_texture == Some(texture.id()) {
            return Ok(());
        }
        if texture.tex_coords().len() != data.vertex_count() {
            return Err(FragmentError::TexCoordMismatch {
                texture: texture.id(),
                expected: data.vertex_count(),
                found: texture.tex_coords().len(),
            });
        }

        let was_on_device = texture.is_on_device();
        texture.device_texture(device)?;
        let coords = texture.tex_coord_bytes();
        if let Err(err) = device.upload_buffer(
            buffers.tex_coords(),
            BufferKind::Attribute,
            coords,
            BufferUsage::Static,
        ) {
            if !was_on_device {
                texture.disable(device);
            }
            return Err(err.into());
        }

        if let Some(previous) = self.bound_texture.replace(texture.id()) {
            tracing::trace!(fragment = %self.descriptor.id(), texture = %previous, "unbound texture");
        }
        buffers.tex_coord_bytes = coords.len() as u64;
        tracing::trace!(fragment = %self.descriptor.id(), texture = %texture.id(), "bound texture");
        Ok(())
    }

    /// Release everything the fragment holds on the device. Main memory is
    /// left untouched. Calling it again is a no-op.
    pub fn disable<D: FragmentDevice>(&mut self, device: &mut D) {
        if let Some(buffers) = self.buffers.take() {
            device.delete_buffers(&buffers.handles);
            tracing::debug!(fragment = %self.id(), bytes = buffers.byte_size(), "released device buffers");
        }
        self.bound_texture = None;
        if let Some(texture) = self.texture.as_mut() {
            texture.disable(device);
        }
    }

    /// Release both tiers: device resources first, then the texture and the
    /// main-memory data. Calling it on an unloaded fragment is a no-op; a
    /// desired texture set before the first load is kept.
    pub fn unload<D: FragmentDevice>(&mut self, device: &mut D) {
        let on_device = self.buffers.is_some()
            || self.texture.as_ref().is_some_and(FragmentTexture::is_on_device);
        if self.data.is_none() && !on_device {
            return;
        }
        self.disable(device);
        if let Some(texture) = self.texture.take() {
            texture.release(device);
        }
        if let Some(data) = self.data.take() {
            let freed = data.release();
            tracing::debug!(fragment = %self.id(), freed, "unloaded fragment data");
        }
    }

    /// Draw the fragment.
    ///
    /// # Panics
    ///
    /// Panics if the fragment is not enabled. Rendering a fragment that was
    /// never enabled, or was disabled earlier in the frame, is a driver bug.
    pub fn render<D: FragmentDevice>(&self, device: &mut D) {
        let Some(buffers) = self.buffers.as_ref().filter(|_| self.is_enabled()) else {
            panic!("cannot render fragment {}: not enabled", self.id());
        };

        match self.texture.as_ref().and_then(FragmentTexture::device_handle) {
            Some(texture) => {
                device.bind_texture(Some(texture));
                device.bind_attribute(AttributeSlot::TexCoord, buffers.tex_coords());
            }
            None => {
                device.bind_texture(None);
                device.unbind_attribute(AttributeSlot::TexCoord);
            }
        }
        device.bind_attribute(AttributeSlot::Position, buffers.vertices());
        device.bind_attribute(AttributeSlot::Normal, buffers.normals());
        device.draw_indexed_triangles(buffers.triangles(), buffers.index_format, buffers.index_count);
    }

    /// Order relative to another fragment of the same mesh.
    pub fn compare_to(&self, other: &RenderableFragment) -> Ordering {
        self.ordering.compare(&self.descriptor, &other.descriptor)
    }
}

/// Allocate the four buffers and upload positions, normals and indices.
/// Nothing stays allocated on failure.
fn upload_geometry<D: FragmentDevice>(
    device: &mut D,
    data: &FragmentData,
) -> Result<DeviceBuffers, DeviceError> {
    let allocated = device.allocate_buffers(BUFFERS_PER_FRAGMENT)?;
    let handles: [BufferHandle; BUFFERS_PER_FRAGMENT] = match allocated.try_into() {
        Ok(handles) => handles,
        Err(allocated) => {
            let returned = allocated.len();
            device.delete_buffers(&allocated);
            return Err(DeviceError::ShortAllocation {
                requested: BUFFERS_PER_FRAGMENT,
                returned,
            });
        }
    };

    let uploads = [
        (handles[VERTICES], BufferKind::Attribute, data.position_bytes()),
        (handles[NORMALS], BufferKind::Attribute, data.normal_bytes()),
        (handles[TRIANGLES], BufferKind::Index, data.index_bytes()),
    ];
    for (handle, kind, bytes) in uploads {
        if let Err(err) = device.upload_buffer(handle, kind, bytes, BufferUsage::Static) {
            device.delete_buffers(&handles);
            return Err(err);
        }
    }

    Ok(DeviceBuffers {
        handles,
        index_format: data.triangles().format(),
        index_count: data.index_count(),
        geometry_bytes: data.byte_size() as u64,
        tex_coord_bytes: 0,
    })
}

impl PartialEq for RenderableFragment {
    fn eq(&self, other: &Self) -> bool {
        self.compare_to(other) == Ordering::Equal
    }
}

impl Eq for RenderableFragment {}

impl PartialOrd for RenderableFragment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RenderableFragment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_to(other)
    }
}

impl fmt::Debug for RenderableFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderableFragment")
            .field("id", &self.id())
            .field("residency", &self.residency())
            .field("texture", &self.texture.as_ref().map(FragmentTexture::id))
            .field("bound_texture", &self.bound_texture)
            .finish()
    }
}

impl Drop for RenderableFragment {
    fn drop(&mut self) {
        if let Some(buffers) = &self.buffers {
            tracing::warn!(
                fragment = %self.id(),
                buffers = ?buffers.handles,
                "fragment dropped while enabled; device buffers leaked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDevice;
    use crate::source::{InMemorySource, StoredGeometry};
    use crate::texture::TextureImage;
    use strata_math::Vec3;

    /// A 2x2 quad grid: 9 vertices, 8 triangles.
    fn grid_geometry() -> StoredGeometry {
        let mut positions = Vec::new();
        for z in 0..3 {
            for x in 0..3 {
                positions.push([x as f32, 0.0, z as f32]);
            }
        }
        let mut triangles = Vec::new();
        for z in 0..2u32 {
            for x in 0..2u32 {
                let i = z * 3 + x;
                triangles.push([i, i + 3, i + 1]);
                triangles.push([i + 1, i + 3, i + 4]);
            }
        }
        StoredGeometry {
            normals: vec![[0.0, 1.0, 0.0]; positions.len()],
            positions,
            triangles,
        }
    }

    fn setup(id: u32) -> (Arc<InMemorySource>, RenderableFragment) {
        let source = Arc::new(InMemorySource::new());
        source.insert(FragmentId(id), grid_geometry());
        let descriptor = FragmentDescriptor::new(
            FragmentId(id),
            0,
            Aabb3::new(Vec3::ZERO, Vec3::splat(10.0)),
            2.5,
        )
        .unwrap();
        let fragment = RenderableFragment::new(
            descriptor,
            Arc::clone(&source) as Arc<dyn FragmentSource>,
            FragmentOrdering::by_level_then_id(),
        );
        (source, fragment)
    }

    fn texture(resolution: f32) -> FragmentTexture {
        let image = TextureImage::new(2, 2, vec![128; 16]).unwrap();
        FragmentTexture::new(image, vec![[0.5, 0.5]; 9], resolution)
    }

    #[test]
    fn test_accessors_report_descriptor_values() {
        let (_, fragment) = setup(1);
        assert_eq!(fragment.bbox().corners(), [[0.0; 3], [10.0; 3]]);
        assert_eq!(fragment.geometric_error(), 2.5);
    }

    #[test]
    fn test_is_loaded_tracks_data() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        assert_eq!(fragment.is_loaded(), fragment.data().is_some());

        fragment.load().unwrap();
        assert!(fragment.is_loaded());
        assert_eq!(fragment.is_loaded(), fragment.data().is_some());

        fragment.unload(&mut device);
        assert!(!fragment.is_loaded());
        assert_eq!(fragment.is_loaded(), fragment.data().is_some());
    }

    #[test]
    fn test_load_is_idempotent() {
        let (source, mut fragment) = setup(1);
        fragment.load().unwrap();
        fragment.load().unwrap();
        assert_eq!(source.load_count(FragmentId(1)), 1);
        assert_eq!(fragment.residency(), Residency::Resident);
    }

    #[test]
    fn test_failed_load_leaves_fragment_unloaded() {
        let (source, mut fragment) = setup(1);
        source.fail(FragmentId(1));

        let err = fragment.load().unwrap_err();
        assert!(matches!(err, DataLoadError::Io { .. }));
        assert!(!fragment.is_loaded());
    }

    #[test]
    fn test_enable_untextured_allocates_four_buffers_and_draws() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.load().unwrap();

        fragment.enable(&mut device).unwrap();
        assert!(fragment.is_enabled());
        assert_eq!(device.live_buffer_count(), 4);
        assert_eq!(fragment.residency(), Residency::OnDevice);

        fragment.render(&mut device);
        assert_eq!(device.draws().len(), 1);
        let draw = &device.draws()[0];
        assert_eq!(draw.index_count, 8 * 3);
        assert_eq!(draw.format, IndexFormat::U16);
        assert_eq!(draw.texture, None);
        assert_eq!(draw.tex_coords, None);

        fragment.disable(&mut device);
    }

    #[test]
    fn test_enable_loads_on_demand() {
        let (source, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.enable(&mut device).unwrap();
        assert!(fragment.is_loaded());
        assert_eq!(source.load_count(FragmentId(1)), 1);
        fragment.unload(&mut device);
    }

    #[test]
    fn test_enable_with_failing_source_stays_disabled() {
        let (source, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        source.fail(FragmentId(1));

        let err = fragment.enable(&mut device).unwrap_err();
        assert!(matches!(err, FragmentError::Load(_)));
        assert!(!fragment.is_enabled());
        assert!(!fragment.is_loaded());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_second_enable_reuses_handles_without_upload() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.enable(&mut device).unwrap();
        let handles = fragment.buffers().unwrap().clone();
        let uploads = device.upload_count();

        fragment.enable(&mut device).unwrap();
        assert_eq!(fragment.buffers(), Some(&handles));
        assert_eq!(device.upload_count(), uploads);
        assert_eq!(device.allocation_count(), 1);
        fragment.disable(&mut device);
    }

    #[test]
    fn test_disable_keeps_data_and_reenable_skips_loading() {
        let (source, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.enable(&mut device).unwrap();

        fragment.disable(&mut device);
        assert!(!fragment.is_enabled());
        assert!(fragment.is_loaded());
        assert_eq!(device.live_buffer_count(), 0);

        fragment.enable(&mut device).unwrap();
        assert!(fragment.is_enabled());
        assert_eq!(source.load_count(FragmentId(1)), 1);
        fragment.disable(&mut device);
    }

    #[test]
    fn test_disable_twice_is_noop() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.enable(&mut device).unwrap();
        fragment.disable(&mut device);
        let calls = device.calls().len();

        fragment.disable(&mut device);
        assert_eq!(device.calls().len(), calls);
    }

    #[test]
    fn test_unload_never_loaded_is_noop() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.unload(&mut device);
        fragment.unload(&mut device);
        assert!(!fragment.is_loaded());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_unload_never_loaded_keeps_desired_texture() {
        let (source, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.set_texture(&mut device, Some(texture(0.5)));

        fragment.unload(&mut device);
        assert_eq!(fragment.texture_resolution(), 0.5);
        assert!(device.calls().is_empty());
        assert_eq!(source.load_count(FragmentId(1)), 0);

        fragment.enable(&mut device).unwrap();
        assert_eq!(fragment.residency(), Residency::Textured);
        fragment.unload(&mut device);
        assert_eq!(fragment.texture_resolution(), -1.0);
    }

    #[test]
    fn test_unload_cascades_through_disable() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.set_texture(&mut device, Some(texture(1.0)));
        fragment.enable(&mut device).unwrap();
        assert_eq!(fragment.residency(), Residency::Textured);
        assert_eq!(device.live_texture_count(), 1);

        fragment.unload(&mut device);
        assert_eq!(fragment.residency(), Residency::Unloaded);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_texture_count(), 0);
        assert_eq!(device.live_bytes(), 0);
        assert!(fragment.buffers().is_none());
        assert!(fragment.bound_texture().is_none());
        assert_eq!(fragment.texture_resolution(), -1.0);
    }

    #[test]
    fn test_textured_render_binds_texture_and_coords() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.set_texture(&mut device, Some(texture(0.25)));
        assert_eq!(fragment.texture_resolution(), 0.25);
        assert!(!fragment.is_enabled());

        fragment.enable(&mut device).unwrap();
        fragment.render(&mut device);

        let buffers = fragment.buffers().unwrap();
        let draw = &device.draws()[0];
        assert!(draw.texture.is_some());
        assert_eq!(draw.tex_coords, Some(buffers.tex_coords()));
        assert_eq!(draw.positions, Some(buffers.vertices()));
        assert_eq!(draw.normals, Some(buffers.normals()));
        assert_eq!(buffers.byte_size(), device.live_bytes() - 16);
        fragment.unload(&mut device);
    }

    #[test]
    fn test_set_texture_none_releases_previous() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.set_texture(&mut device, Some(texture(0.5)));
        fragment.enable(&mut device).unwrap();
        let handle = fragment.texture().and_then(FragmentTexture::device_handle).unwrap();

        fragment.set_texture(&mut device, None);
        assert_eq!(fragment.texture_resolution(), -1.0);
        assert!(!device.is_texture_live(handle));
        assert_eq!(device.deleted_textures(), vec![handle]);
        // Without a desired texture the stale binding does not block rendering.
        assert!(fragment.is_enabled());
        fragment.render(&mut device);
        assert_eq!(device.draws()[0].texture, None);
        fragment.disable(&mut device);
    }

    #[test]
    fn test_texture_swap_rebinds_on_enable() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        let first = texture(1.0);
        let first_id = first.id();
        fragment.set_texture(&mut device, Some(first));
        fragment.enable(&mut device).unwrap();
        let first_handle = fragment.texture().and_then(FragmentTexture::device_handle).unwrap();
        let geometry = fragment.buffers().unwrap().handles().to_owned();

        let second = texture(0.5);
        let second_id = second.id();
        fragment.set_texture(&mut device, Some(second));
        assert!(!device.is_texture_live(first_handle));
        assert!(!fragment.is_enabled());
        assert_eq!(fragment.bound_texture(), Some(first_id));

        device.clear_log();
        fragment.enable(&mut device).unwrap();
        assert!(fragment.is_enabled());
        assert_eq!(fragment.bound_texture(), Some(second_id));
        assert_eq!(fragment.buffers().unwrap().handles(), &geometry);
        // Only the texture coordinates were uploaded again.
        assert_eq!(device.upload_count(), 1);
        fragment.unload(&mut device);
    }

    #[test]
    #[should_panic(expected = "not enabled")]
    fn test_render_without_enable_panics() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.load().unwrap();
        fragment.render(&mut device);
    }

    #[test]
    #[should_panic(expected = "not enabled")]
    fn test_render_with_stale_texture_panics() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.enable(&mut device).unwrap();
        fragment.set_texture(&mut device, Some(texture(1.0)));
        fragment.render(&mut device);
    }

    #[test]
    fn test_out_of_memory_reverts_to_resident() {
        let (_, mut fragment) = setup(1);
        // Room for the positions only.
        let mut device = RecordingDevice::with_capacity(9 * 12);
        let err = fragment.enable(&mut device).unwrap_err();

        assert!(matches!(
            err,
            FragmentError::Device(DeviceError::OutOfMemory { .. })
        ));
        assert!(!fragment.is_enabled());
        assert!(fragment.is_loaded());
        assert_eq!(fragment.residency(), Residency::Resident);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_bytes(), 0);

        device.set_capacity(None);
        fragment.enable(&mut device).unwrap();
        assert!(fragment.is_enabled());
        fragment.disable(&mut device);
    }

    #[test]
    fn test_texture_failure_on_fresh_enable_releases_geometry() {
        let (_, mut fragment) = setup(1);
        let geometry_bytes = {
            let data = InMemorySource::new();
            data.insert(FragmentId(1), grid_geometry());
            data.load_data(FragmentId(1)).unwrap().byte_size() as u64
        };
        // Geometry fits, the 16-byte texture image does not.
        let mut device = RecordingDevice::with_capacity(geometry_bytes + 8);
        fragment.set_texture(&mut device, Some(texture(1.0)));

        assert!(fragment.enable(&mut device).is_err());
        assert!(fragment.buffers().is_none());
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn test_texture_failure_keeps_existing_geometry() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        fragment.enable(&mut device).unwrap();
        let handles = fragment.buffers().unwrap().clone();

        device.set_capacity(Some(device.live_bytes()));
        fragment.set_texture(&mut device, Some(texture(1.0)));
        assert!(fragment.enable(&mut device).is_err());
        assert_eq!(fragment.buffers(), Some(&handles));
        assert!(fragment.bound_texture().is_none());
        assert!(!fragment.is_enabled());
        fragment.unload(&mut device);
    }

    #[test]
    fn test_mismatched_tex_coords_rejected() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        let image = TextureImage::new(1, 1, vec![0; 4]).unwrap();
        fragment.set_texture(&mut device, Some(FragmentTexture::new(image, vec![[0.0; 2]; 4], 1.0)));

        let err = fragment.enable(&mut device).unwrap_err();
        assert!(matches!(
            err,
            FragmentError::TexCoordMismatch { expected: 9, found: 4, .. }
        ));
        assert_eq!(device.live_buffer_count(), 0);
        fragment.unload(&mut device);
    }

    #[test]
    fn test_install_data_rejects_when_loaded() {
        let (source, mut fragment) = setup(1);
        let data = source.load_data(FragmentId(1)).unwrap();
        assert!(fragment.install_data(data));

        let late = source.load_data(FragmentId(1)).unwrap();
        assert!(!fragment.install_data(late));
        assert!(fragment.is_loaded());
    }

    #[test]
    fn test_compare_to_delegates_to_ordering() {
        let (_, a) = setup(1);
        let (_, b) = setup(2);
        assert_eq!(a.compare_to(&b), Ordering::Less);
        assert_eq!(b.compare_to(&a), Ordering::Greater);
        assert_eq!(a.compare_to(&a), Ordering::Equal);
        assert!(a < b);
    }

    #[test]
    fn test_device_and_main_memory_bytes() {
        let (_, mut fragment) = setup(1);
        let mut device = RecordingDevice::new();
        assert_eq!(fragment.main_memory_bytes(), 0);
        assert_eq!(fragment.device_bytes(), 0);

        fragment.enable(&mut device).unwrap();
        let geometry = fragment.data().unwrap().byte_size() as u64;
        assert_eq!(fragment.main_memory_bytes(), geometry);
        assert_eq!(fragment.device_bytes(), device.live_bytes());

        fragment.disable(&mut device);
        assert_eq!(fragment.device_bytes(), 0);
        assert_eq!(fragment.main_memory_bytes(), geometry);
    }
}
