//! wgpu backend for fragment residency: device buffers and textures live in
//! a `wgpu::Device`, draws are recorded and replayed into a render pass.

mod wgpu_device;

pub use wgpu_device::{
    FragmentDrawCommand, NORMAL_SLOT, POSITION_SLOT, TEX_COORD_SLOT, WgpuFragmentDevice,
    fragment_vertex_layouts, to_wgpu_index_format,
};
