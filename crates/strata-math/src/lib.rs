//! Bounding volumes and small geometric helpers shared by the Strata crates.

mod aabb;

pub use aabb::Aabb3;
pub use glam::Vec3;
