//! Where fragment data comes from.

use std::io;

use dashmap::{DashMap, DashSet};

use crate::data::FragmentData;
use crate::descriptor::FragmentId;
use crate::error::DataLoadError;

/// On-demand geometry loading offered by a multiresolution mesh index.
///
/// Implementations do CPU and disk work only and may be called from loader
/// worker threads.
pub trait FragmentSource: Send + Sync {
    fn load_data(&self, id: FragmentId) -> Result<FragmentData, DataLoadError>;
}

/// Raw geometry kept by [`InMemorySource`]; a fresh [`FragmentData`] is built
/// from it on every load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredGeometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

/// A [`FragmentSource`] holding all geometry in memory.
///
/// Counts loads per fragment and can be told to fail specific fragments
/// with an I/O error.
#[derive(Debug, Default)]
pub struct InMemorySource {
    geometry: DashMap<FragmentId, StoredGeometry>,
    failing: DashSet<FragmentId>,
    load_counts: DashMap<FragmentId, usize>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: FragmentId, geometry: StoredGeometry) {
        self.geometry.insert(id, geometry);
    }

    /// Make every following load of `id` fail until [`heal`](Self::heal).
    pub fn fail(&self, id: FragmentId) {
        self.failing.insert(id);
    }

    pub fn heal(&self, id: FragmentId) {
        self.failing.remove(&id);
    }

    /// Number of `load_data` calls made for `id`, failed ones included.
    pub fn load_count(&self, id: FragmentId) -> usize {
        self.load_counts.get(&id).map_or(0, |count| *count)
    }

    pub fn len(&self) -> usize {
        self.geometry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty()
    }
}

impl FragmentSource for InMemorySource {
    fn load_data(&self, id: FragmentId) -> Result<FragmentData, DataLoadError> {
        *self.load_counts.entry(id).or_insert(0) += 1;

        if self.failing.contains(&id) {
            return Err(DataLoadError::Io {
                id,
                source: io::Error::new(io::ErrorKind::UnexpectedEof, "simulated read failure"),
            });
        }
        let geometry = self
            .geometry
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(DataLoadError::Missing(id))?;
        FragmentData::new(id, geometry.positions, geometry.normals, geometry.triangles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> StoredGeometry {
        StoredGeometry {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            normals: vec![[0.0, 1.0, 0.0]; 3],
            triangles: vec![[0, 1, 2]],
        }
    }

    #[test]
    fn test_load_builds_fresh_data() {
        let source = InMemorySource::new();
        source.insert(FragmentId(1), triangle());

        let data = source.load_data(FragmentId(1)).unwrap();
        assert_eq!(data.triangle_count(), 1);
        assert_eq!(source.load_count(FragmentId(1)), 1);
    }

    #[test]
    fn test_missing_fragment_reported() {
        let source = InMemorySource::new();
        let err = source.load_data(FragmentId(3)).unwrap_err();
        assert!(matches!(err, DataLoadError::Missing(FragmentId(3))));
    }

    #[test]
    fn test_injected_failure_and_heal() {
        let source = InMemorySource::new();
        source.insert(FragmentId(2), triangle());
        source.fail(FragmentId(2));
        assert!(matches!(
            source.load_data(FragmentId(2)),
            Err(DataLoadError::Io { .. })
        ));

        source.heal(FragmentId(2));
        assert!(source.load_data(FragmentId(2)).is_ok());
        assert_eq!(source.load_count(FragmentId(2)), 2);
    }
}
