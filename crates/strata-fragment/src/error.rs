//! Error types for fragment loading and device residency.

use crate::descriptor::FragmentId;
use crate::device::{BufferHandle, TextureHandle};
use crate::texture::TextureId;

/// Failure to produce a fragment's main-memory data.
///
/// Always recoverable: the fragment stays unloaded and the caller may retry
/// or drop it from the working set.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The backing store failed while reading the fragment.
    #[error("I/O error loading fragment {id}: {source}")]
    Io {
        id: FragmentId,
        #[source]
        source: std::io::Error,
    },

    /// The mesh index has no data for this fragment.
    #[error("fragment {0} is not present in the mesh index")]
    Missing(FragmentId),

    /// The loaded geometry violates the data model.
    #[error("fragment {id} has invalid data: {reason}")]
    Invalid { id: FragmentId, reason: String },
}

/// Failure reported by a [`FragmentDevice`](crate::FragmentDevice).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device could not satisfy an allocation.
    #[error("out of device memory ({requested} bytes requested)")]
    OutOfMemory { requested: u64 },

    /// A buffer handle was used that the device does not know.
    #[error("unknown device buffer {0:?}")]
    UnknownBuffer(BufferHandle),

    /// A texture handle was used that the device does not know.
    #[error("unknown device texture {0:?}")]
    UnknownTexture(TextureHandle),

    /// The device handed back a different number of buffers than requested.
    #[error("requested {requested} buffers, device returned {returned}")]
    ShortAllocation { requested: usize, returned: usize },

    /// The device context was lost.
    #[error("device lost")]
    Lost,
}

/// Error returned by [`RenderableFragment::enable`](crate::RenderableFragment::enable).
#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    #[error(transparent)]
    Load(#[from] DataLoadError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The desired texture does not have one coordinate pair per vertex.
    #[error("texture {texture} has {found} coordinates for {expected} vertices")]
    TexCoordMismatch {
        texture: TextureId,
        expected: usize,
        found: usize,
    },
}
