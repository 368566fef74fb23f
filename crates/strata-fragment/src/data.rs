//! Main-memory geometry payload of a fragment.

use crate::descriptor::FragmentId;
use crate::error::DataLoadError;

/// Largest vertex count whose indices still fit in 16 bits.
pub const MAX_U16_VERTICES: usize = u16::MAX as usize + 1;

/// Width of the entries of an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Triangle list with its index width fixed when the data was built.
#[derive(Clone, Debug, PartialEq)]
pub enum TriangleIndices {
    U16(Vec<[u16; 3]>),
    U32(Vec<[u32; 3]>),
}

impl TriangleIndices {
    /// Narrow to 16 bits when every index can be addressed with them.
    fn for_vertex_count(triangles: Vec<[u32; 3]>, vertex_count: usize) -> Self {
        if vertex_count <= MAX_U16_VERTICES {
            TriangleIndices::U16(
                triangles
                    .into_iter()
                    .map(|[a, b, c]| [a as u16, b as u16, c as u16])
                    .collect(),
            )
        } else {
            TriangleIndices::U32(triangles)
        }
    }

    pub fn format(&self) -> IndexFormat {
        match self {
            TriangleIndices::U16(_) => IndexFormat::U16,
            TriangleIndices::U32(_) => IndexFormat::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TriangleIndices::U16(t) => t.len(),
            TriangleIndices::U32(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Triangle `i` widened to u32.
    pub fn get(&self, i: usize) -> Option<[u32; 3]> {
        match self {
            TriangleIndices::U16(t) => t.get(i).map(|&[a, b, c]| [a as u32, b as u32, c as u32]),
            TriangleIndices::U32(t) => t.get(i).copied(),
        }
    }

    /// Raw bytes for upload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TriangleIndices::U16(t) => bytemuck::cast_slice(t),
            TriangleIndices::U32(t) => bytemuck::cast_slice(t),
        }
    }
}

/// Vertex positions, normals and triangles of one fragment.
///
/// A fragment either has all of this or nothing; there is no partially
/// loaded state. Memory is given back through [`FragmentData::release`],
/// which consumes the value so it cannot be used afterwards.
#[derive(Debug, PartialEq)]
pub struct FragmentData {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    triangles: TriangleIndices,
    index_count: u32,
}

/// Index count of a triangle list, if it fits the 32-bit draw count.
fn index_count_for(triangles: usize) -> Option<u32> {
    triangles.checked_mul(3).and_then(|n| u32::try_from(n).ok())
}

impl FragmentData {
    /// Validate and build fragment data.
    ///
    /// Fails if the normal count differs from the vertex count, a triangle
    /// references a vertex that does not exist, or there are more indices
    /// than a single draw can address.
    pub fn new(
        id: FragmentId,
        positions: Vec<[f32; 3]>,
        normals: Vec<[f32; 3]>,
        triangles: Vec<[u32; 3]>,
    ) -> Result<Self, DataLoadError> {
        if normals.len() != positions.len() {
            return Err(DataLoadError::Invalid {
                id,
                reason: format!(
                    "{} normals for {} vertices",
                    normals.len(),
                    positions.len()
                ),
            });
        }
        let Some(index_count) = index_count_for(triangles.len()) else {
            return Err(DataLoadError::Invalid {
                id,
                reason: format!("{} triangles exceed the 32-bit index count", triangles.len()),
            });
        };
        let vertex_count = positions.len();
        if let Some(bad) = triangles
            .iter()
            .flatten()
            .find(|&&i| i as usize >= vertex_count)
        {
            return Err(DataLoadError::Invalid {
                id,
                reason: format!("index {bad} out of range for {vertex_count} vertices"),
            });
        }

        Ok(Self {
            triangles: TriangleIndices::for_vertex_count(triangles, vertex_count),
            index_count,
            positions,
            normals,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Number of indices a draw of the whole fragment consumes.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    pub fn triangles(&self) -> &TriangleIndices {
        &self.triangles
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals)
    }

    pub fn index_bytes(&self) -> &[u8] {
        self.triangles.as_bytes()
    }

    /// Bytes held in main memory (and uploaded to the device when enabled).
    pub fn byte_size(&self) -> usize {
        self.position_bytes().len() + self.normal_bytes().len() + self.index_bytes().len()
    }

    /// Give the buffers back. Returns the number of bytes reclaimed.
    pub fn release(self) -> usize {
        self.byte_size()
    }
}
