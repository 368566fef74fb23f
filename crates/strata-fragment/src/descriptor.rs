//! Immutable per-fragment metadata and the ordering shared by one mesh.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use strata_math::Aabb3;

/// Identifier of a fragment within its multiresolution mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(pub u32);

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata the mesh index supplies for every fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentDescriptor {
    id: FragmentId,
    /// Hierarchy level, 0 = coarsest.
    level: u8,
    bbox: Aabb3,
    geometric_error: f32,
}

impl FragmentDescriptor {
    /// Create a descriptor.
    ///
    /// Returns `None` if `geometric_error` is negative or NaN.
    pub fn new(id: FragmentId, level: u8, bbox: Aabb3, geometric_error: f32) -> Option<Self> {
        (geometric_error >= 0.0).then_some(Self {
            id,
            level,
            bbox,
            geometric_error,
        })
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn bbox(&self) -> Aabb3 {
        self.bbox
    }

    pub fn geometric_error(&self) -> f32 {
        self.geometric_error
    }
}

type CompareFn = dyn Fn(&FragmentDescriptor, &FragmentDescriptor) -> Ordering + Send + Sync;

/// A strict total order over the fragments of one mesh.
///
/// The order is injected by the mesh index rather than derived from the
/// descriptor fields, so different hierarchies can rank fragments their own
/// way. Every comparator must return `Equal` only for the same fragment id.
#[derive(Clone)]
pub struct FragmentOrdering {
    compare: Arc<CompareFn>,
}

impl FragmentOrdering {
    /// Wrap an arbitrary comparator.
    pub fn new(
        compare: impl Fn(&FragmentDescriptor, &FragmentDescriptor) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        Self {
            compare: Arc::new(compare),
        }
    }

    /// Coarser levels first, ties broken by id.
    pub fn by_level_then_id() -> Self {
        Self::new(|a, b| a.level.cmp(&b.level).then(a.id.cmp(&b.id)))
    }

    /// Larger geometric error first, ties broken by id.
    pub fn by_error_then_id() -> Self {
        Self::new(|a, b| {
            b.geometric_error
                .total_cmp(&a.geometric_error)
                .then(a.id.cmp(&b.id))
        })
    }

    pub fn compare(&self, a: &FragmentDescriptor, b: &FragmentDescriptor) -> Ordering {
        (self.compare)(a, b)
    }
}

impl Default for FragmentOrdering {
    fn default() -> Self {
        Self::by_level_then_id()
    }
}

impl fmt::Debug for FragmentOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentOrdering").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_math::Vec3;

    fn descriptor(id: u32, level: u8, error: f32) -> FragmentDescriptor {
        let bbox = Aabb3::new(Vec3::ZERO, Vec3::ONE);
        FragmentDescriptor::new(FragmentId(id), level, bbox, error).unwrap()
    }

    #[test]
    fn test_negative_error_rejected() {
        let bbox = Aabb3::new(Vec3::ZERO, Vec3::ONE);
        assert!(FragmentDescriptor::new(FragmentId(1), 0, bbox, -0.5).is_none());
        assert!(FragmentDescriptor::new(FragmentId(1), 0, bbox, f32::NAN).is_none());
        assert!(FragmentDescriptor::new(FragmentId(1), 0, bbox, 0.0).is_some());
    }

    #[test]
    fn test_level_ordering_puts_coarse_first() {
        let ordering = FragmentOrdering::by_level_then_id();
        let coarse = descriptor(9, 0, 8.0);
        let fine = descriptor(1, 2, 0.5);
        assert_eq!(ordering.compare(&coarse, &fine), Ordering::Less);
        assert_eq!(ordering.compare(&fine, &coarse), Ordering::Greater);
    }

    #[test]
    fn test_level_ties_broken_by_id() {
        let ordering = FragmentOrdering::by_level_then_id();
        let a = descriptor(1, 1, 1.0);
        let b = descriptor(2, 1, 1.0);
        assert_eq!(ordering.compare(&a, &b), Ordering::Less);
        assert_eq!(ordering.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_error_ordering_puts_large_error_first() {
        let ordering = FragmentOrdering::by_error_then_id();
        let rough = descriptor(5, 0, 4.0);
        let smooth = descriptor(2, 3, 0.25);
        assert_eq!(ordering.compare(&rough, &smooth), Ordering::Less);
    }

    #[test]
    fn test_orderings_are_strict_total_orders() {
        let fragments: Vec<_> = (0..12)
            .map(|i| descriptor(i, (i % 3) as u8, (i % 4) as f32))
            .collect();
        for ordering in [
            FragmentOrdering::by_level_then_id(),
            FragmentOrdering::by_error_then_id(),
        ] {
            for a in &fragments {
                for b in &fragments {
                    let ab = ordering.compare(a, b);
                    assert_eq!(ab, ordering.compare(b, a).reverse());
                    assert_eq!(ab == Ordering::Equal, a.id() == b.id());
                    for c in &fragments {
                        if ab == Ordering::Less && ordering.compare(b, c) == Ordering::Less {
                            assert_eq!(ordering.compare(a, c), Ordering::Less);
                        }
                    }
                }
            }
        }
    }
}
