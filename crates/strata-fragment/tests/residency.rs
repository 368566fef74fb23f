//! End-to-end residency transitions of a single fragment against a
//! recording device.

use std::sync::Arc;

use strata_fragment::{
    Aabb3, DataLoadError, DeviceCall, FragmentDescriptor, FragmentError, FragmentId,
    FragmentOrdering, FragmentSource, FragmentTexture, InMemorySource, RecordingDevice,
    RenderableFragment, Residency, StoredGeometry, TextureImage,
};
use strata_math::Vec3;

const ID: FragmentId = FragmentId(7);

/// A strip of `n` quads along x: `2 * (n + 1)` vertices, `2 * n` triangles.
fn strip(n: u32) -> StoredGeometry {
    let mut positions = Vec::new();
    for i in 0..=n {
        positions.push([i as f32, 0.0, 0.0]);
        positions.push([i as f32, 0.0, 1.0]);
    }
    let triangles = (0..n)
        .flat_map(|i| {
            let a = i * 2;
            [[a, a + 1, a + 2], [a + 2, a + 1, a + 3]]
        })
        .collect();
    StoredGeometry {
        normals: vec![[0.0, 1.0, 0.0]; positions.len()],
        positions,
        triangles,
    }
}

fn fragment(source: &Arc<InMemorySource>) -> RenderableFragment {
    let descriptor = FragmentDescriptor::new(
        ID,
        1,
        Aabb3::new(Vec3::ZERO, Vec3::new(10.0, 10.0, 10.0)),
        2.5,
    )
    .unwrap();
    RenderableFragment::new(
        descriptor,
        Arc::clone(source) as Arc<dyn FragmentSource>,
        FragmentOrdering::default(),
    )
}

fn setup() -> (Arc<InMemorySource>, RenderableFragment, RecordingDevice) {
    let source = Arc::new(InMemorySource::new());
    source.insert(ID, strip(4));
    let fragment = fragment(&source);
    (source, fragment, RecordingDevice::new())
}

fn texture(resolution: f32) -> FragmentTexture {
    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba([90, 140, 60, 255]));
    FragmentTexture::new(TextureImage::from_rgba_image(image), vec![[0.25, 0.75]; 10], resolution)
}

#[test]
fn test_construction_exposes_descriptor_without_loading() {
    let (source, fragment, _) = setup();
    assert_eq!(fragment.bbox().corners(), [[0.0, 0.0, 0.0], [10.0, 10.0, 10.0]]);
    assert_eq!(fragment.geometric_error(), 2.5);
    assert!(!fragment.is_loaded());
    assert!(!fragment.is_enabled());
    assert_eq!(fragment.texture_resolution(), -1.0);
    assert_eq!(source.load_count(ID), 0);
}

#[test]
fn test_io_failure_leaves_fragment_unloaded() {
    let (source, mut fragment, mut device) = setup();
    source.fail(ID);

    let err = fragment.enable(&mut device).unwrap_err();
    assert!(matches!(
        err,
        FragmentError::Load(DataLoadError::Io { id: ID, .. })
    ));
    assert!(!fragment.is_loaded());
    assert!(!fragment.is_enabled());
    assert_eq!(device.live_buffer_count(), 0);

    source.heal(ID);
    fragment.enable(&mut device).unwrap();
    assert!(fragment.is_enabled());
    fragment.unload(&mut device);
}

#[test]
fn test_untextured_enable_and_render() {
    let (_, mut fragment, mut device) = setup();
    fragment.load().unwrap();
    let triangles = fragment.data().unwrap().triangle_count() as u32;

    fragment.enable(&mut device).unwrap();
    let allocations: Vec<_> = device
        .calls()
        .iter()
        .filter_map(|c| match c {
            DeviceCall::AllocateBuffers(handles) => Some(handles.len()),
            _ => None,
        })
        .collect();
    assert_eq!(allocations, vec![4]);

    fragment.render(&mut device);
    assert_eq!(device.draws().len(), 1);
    assert_eq!(device.draws()[0].index_count, triangles * 3);
    assert_eq!(device.draws()[0].texture, None);

    fragment.unload(&mut device);
    assert_eq!(device.live_bytes(), 0);
}

#[test]
fn test_texture_set_before_load_survives_unload() {
    let (source, mut fragment, mut device) = setup();
    fragment.set_texture(&mut device, Some(texture(0.5)));

    fragment.unload(&mut device);
    assert_eq!(fragment.texture_resolution(), 0.5);
    assert_eq!(fragment.residency(), Residency::Unloaded);
    assert!(device.calls().is_empty());
    assert_eq!(source.load_count(ID), 0);

    fragment.enable(&mut device).unwrap();
    assert_eq!(fragment.residency(), Residency::Textured);
    assert_eq!(device.live_texture_count(), 1);
    fragment.unload(&mut device);
}

#[test]
fn test_texture_swap_releases_old_and_binds_new() {
    let (_, mut fragment, mut device) = setup();
    fragment.set_texture(&mut device, Some(texture(1.0)));
    fragment.enable(&mut device).unwrap();
    let first = fragment.texture().and_then(FragmentTexture::device_handle).unwrap();
    let geometry = *fragment.buffers().unwrap().handles();

    fragment.set_texture(&mut device, Some(texture(0.5)));
    assert!(!device.is_texture_live(first));
    assert_eq!(fragment.texture_resolution(), 0.5);

    fragment.enable(&mut device).unwrap();
    assert_eq!(*fragment.buffers().unwrap().handles(), geometry);
    let second = fragment.texture().and_then(FragmentTexture::device_handle).unwrap();
    assert_ne!(first, second);

    device.clear_log();
    fragment.render(&mut device);
    assert_eq!(device.draws()[0].texture, Some(second));
    assert_eq!(
        device.draws()[0].tex_coords,
        Some(fragment.buffers().unwrap().tex_coords())
    );
    fragment.unload(&mut device);
    assert_eq!(device.live_texture_count(), 0);
}

#[test]
fn test_full_release_then_enable_reloads() {
    let (source, mut fragment, mut device) = setup();
    fragment.set_texture(&mut device, Some(texture(1.0)));
    fragment.enable(&mut device).unwrap();

    fragment.disable(&mut device);
    fragment.unload(&mut device);
    assert_eq!(fragment.residency(), Residency::Unloaded);
    assert_eq!(device.live_buffer_count(), 0);
    assert_eq!(device.live_texture_count(), 0);

    fragment.enable(&mut device).unwrap();
    assert_eq!(source.load_count(ID), 2);
    assert_eq!(fragment.residency(), Residency::OnDevice);
    fragment.render(&mut device);
    fragment.unload(&mut device);
}

#[test]
fn test_budgeted_device_recovers_after_out_of_memory() {
    let (_, mut fragment, _) = setup();
    let mut device = RecordingDevice::with_capacity(64);

    assert!(fragment.enable(&mut device).is_err());
    assert_eq!(fragment.residency(), Residency::Resident);
    assert_eq!(device.live_bytes(), 0);

    device.set_capacity(None);
    fragment.enable(&mut device).unwrap();
    fragment.render(&mut device);
    fragment.unload(&mut device);
}
