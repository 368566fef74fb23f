use glam::Vec3;

/// Axis-aligned bounding box in single-precision world space.
///
/// Invariant: `min <= max` on every axis. The constructor enforces this by
/// sorting components, so the two corners may be given in any order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb3 {
    /// Create a box from two opposite corners.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create a box from `[min, max]` corner arrays, the layout fragment
    /// metadata is usually stored in.
    pub fn from_corners(corners: [[f32; 3]; 2]) -> Self {
        Self::new(Vec3::from(corners[0]), Vec3::from(corners[1]))
    }

    /// The two corners as plain arrays: `[min, max]`.
    pub fn corners(&self) -> [[f32; 3]; 2] {
        [self.min.to_array(), self.max.to_array()]
    }

    /// Returns true if the point lies inside or on the boundary.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Returns true if the boxes overlap, touching faces included.
    pub fn intersects(&self, other: &Aabb3) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Smallest box enclosing both boxes.
    pub fn union(&self, other: &Aabb3) -> Aabb3 {
        Aabb3 {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Length of the box diagonal.
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    /// Euclidean distance from `p` to the closest point of the box (0 inside).
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        let clamped = p.clamp(self.min, self.max);
        (p - clamped).length()
    }

    /// Returns true if the box has zero extent on at least one axis.
    pub fn is_degenerate(&self) -> bool {
        self.min.cmpeq(self.max).any()
    }
}
