//! Tiered residency for the fragments of a multiresolution terrain mesh.
//!
//! A [`RenderableFragment`] moves its geometry between disk (through a
//! [`FragmentSource`]), main memory and a [`FragmentDevice`], and draws
//! itself once enabled. [`FragmentLoader`] and [`ResidencyTracker`] help a
//! driver keep many fragments within budget.

pub mod data;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod loader;
pub mod recording;
pub mod renderable;
pub mod residency;
pub mod source;
pub mod texture;

pub use data::{FragmentData, IndexFormat, MAX_U16_VERTICES, TriangleIndices};
pub use descriptor::{FragmentDescriptor, FragmentId, FragmentOrdering};
pub use device::{
    AttributeSlot, BufferHandle, BufferKind, BufferUsage, FragmentDevice, TextureHandle,
};
pub use error::{DataLoadError, DeviceError, FragmentError};
pub use loader::{FragmentLoader, LoadedFragment};
pub use recording::{DeviceCall, DrawRecord, RecordingDevice};
pub use renderable::{BUFFERS_PER_FRAGMENT, DeviceBuffers, RenderableFragment, Residency};
pub use residency::{
    Eviction, EvictionKind, FragmentUsage, ResidencyBudget, ResidencyTracker, select_evictions,
};
pub use source::{FragmentSource, InMemorySource, StoredGeometry};
pub use texture::{FragmentTexture, TextureId, TextureImage};

pub use strata_math::Aabb3;
