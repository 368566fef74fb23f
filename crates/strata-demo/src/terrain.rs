//! Synthetic multiresolution terrain: a quadtree of heightfield fragments.
//!
//! Every node covers a square of the terrain with the same grid resolution,
//! so each level down halves the vertex spacing and the geometric error.

use std::sync::Arc;

use noise::{NoiseFn, Simplex};
use strata_fragment::{
    FragmentDescriptor, FragmentId, FragmentTexture, InMemorySource, StoredGeometry, TextureImage,
};
use strata_math::{Aabb3, Vec3};

/// Shape of the generated terrain.
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u64,
    /// Side length of the whole terrain in world units.
    pub extent: f32,
    /// Number of quadtree levels, root included.
    pub levels: u8,
    /// Quads per fragment side.
    pub grid: u32,
    pub octaves: u32,
    pub amplitude: f64,
    pub base_frequency: f64,
    /// Side length of generated fragment textures, 0 for untextured terrain.
    pub texture_size: u32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 7,
            extent: 4096.0,
            levels: 5,
            grid: 32,
            octaves: 6,
            amplitude: 300.0,
            base_frequency: 0.0008,
            texture_size: 32,
        }
    }
}

/// Deepest supported quadtree; level 12 alone holds 16M fragments.
pub const MAX_LEVELS: u8 = 12;

#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("invalid terrain parameter {field}: {reason}")]
    InvalidParams { field: &'static str, reason: String },

    #[error("fragment {id} has invalid geometric error {error}")]
    InvalidError { id: FragmentId, error: f32 },
}

impl TerrainParams {
    pub fn validate(&self) -> Result<(), TerrainError> {
        let invalid = |field: &'static str, reason: String| -> Result<(), TerrainError> {
            Err(TerrainError::InvalidParams { field, reason })
        };
        if !(self.extent.is_finite() && self.extent > 0.0) {
            return invalid("extent", format!("{} is not a positive size", self.extent));
        }
        if !(self.amplitude.is_finite() && self.amplitude >= 0.0) {
            return invalid("amplitude", format!("{} is not a finite height", self.amplitude));
        }
        if !self.base_frequency.is_finite() {
            return invalid("base_frequency", format!("{} is not finite", self.base_frequency));
        }
        if self.levels == 0 || self.levels > MAX_LEVELS {
            return invalid("levels", format!("{} is outside 1..={MAX_LEVELS}", self.levels));
        }
        if self.grid == 0 {
            return invalid("grid", "must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// fBm heightfield over simplex noise.
pub struct HeightField {
    noise: Simplex,
    octaves: u32,
    amplitude: f64,
    base_frequency: f64,
}

impl HeightField {
    pub fn new(params: &TerrainParams) -> Self {
        Self {
            noise: Simplex::new(params.seed as u32),
            octaves: params.octaves,
            amplitude: params.amplitude,
            base_frequency: params.base_frequency,
        }
    }

    pub fn height(&self, x: f32, z: f32) -> f32 {
        let mut total = 0.0;
        let mut frequency = self.base_frequency;
        let mut amplitude = self.amplitude;
        for _ in 0..self.octaves {
            total += self.noise.get([x as f64 * frequency, z as f64 * frequency]) * amplitude;
            frequency *= 2.0;
            amplitude *= 0.5;
        }
        total as f32
    }

    /// Unit normal from central differences with step `d`.
    pub fn normal(&self, x: f32, z: f32, d: f32) -> [f32; 3] {
        let dx = self.height(x - d, z) - self.height(x + d, z);
        let dz = self.height(x, z - d) - self.height(x, z + d);
        Vec3::new(dx, 2.0 * d, dz).try_normalize().unwrap_or(Vec3::Y).to_array()
    }
}

/// One quadtree node.
#[derive(Clone, Debug)]
pub struct TerrainNode {
    pub descriptor: FragmentDescriptor,
    /// Ground-plane origin (x, z) of the covered square.
    pub origin: [f32; 2],
    pub size: f32,
    pub children: Vec<FragmentId>,
}

/// Generated terrain: node metadata plus the geometry store fragments load
/// from.
pub struct SyntheticTerrain {
    params: TerrainParams,
    field: HeightField,
    nodes: Vec<TerrainNode>,
    source: Arc<InMemorySource>,
}

impl SyntheticTerrain {
    pub fn generate(params: TerrainParams) -> Result<Self, TerrainError> {
        params.validate()?;
        let mut terrain = Self {
            field: HeightField::new(&params),
            nodes: Vec::new(),
            source: Arc::new(InMemorySource::new()),
            params,
        };
        let extent = terrain.params.extent;
        terrain.build_node(0, [-extent * 0.5, -extent * 0.5], extent)?;
        tracing::info!(
            fragments = terrain.nodes.len(),
            levels = terrain.params.levels,
            "generated synthetic terrain"
        );
        Ok(terrain)
    }

    fn build_node(
        &mut self,
        level: u8,
        origin: [f32; 2],
        size: f32,
    ) -> Result<FragmentId, TerrainError> {
        let id = FragmentId(self.nodes.len() as u32);
        let geometry = self.fragment_geometry(origin, size);
        let (min_y, max_y) = geometry
            .positions
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p[1]), hi.max(p[1])));
        let bbox = Aabb3::new(
            Vec3::new(origin[0], min_y, origin[1]),
            Vec3::new(origin[0] + size, max_y, origin[1] + size),
        );
        // Leaves are exact at their own resolution.
        let error = if level + 1 >= self.params.levels {
            0.0
        } else {
            self.params.amplitude as f32 / (1u32 << level) as f32
        };
        let descriptor = FragmentDescriptor::new(id, level, bbox, error)
            .ok_or(TerrainError::InvalidError { id, error })?;

        self.source.insert(id, geometry);
        self.nodes.push(TerrainNode {
            descriptor,
            origin,
            size,
            children: Vec::new(),
        });

        if level + 1 < self.params.levels {
            let half = size * 0.5;
            let mut children = Vec::with_capacity(4);
            for (dx, dz) in [(0.0, 0.0), (half, 0.0), (0.0, half), (half, half)] {
                children.push(self.build_node(level + 1, [origin[0] + dx, origin[1] + dz], half)?);
            }
            self.nodes[id.0 as usize].children = children;
        }
        Ok(id)
    }

    fn fragment_geometry(&self, origin: [f32; 2], size: f32) -> StoredGeometry {
        let n = self.params.grid;
        let step = size / n as f32;
        let mut positions = Vec::with_capacity(((n + 1) * (n + 1)) as usize);
        let mut normals = Vec::with_capacity(positions.capacity());
        for j in 0..=n {
            for i in 0..=n {
                let x = origin[0] + i as f32 * step;
                let z = origin[1] + j as f32 * step;
                positions.push([x, self.field.height(x, z), z]);
                normals.push(self.field.normal(x, z, step));
            }
        }

        let row = n + 1;
        let mut triangles = Vec::with_capacity((n * n * 2) as usize);
        for j in 0..n {
            for i in 0..n {
                let a = j * row + i;
                let c = a + row;
                triangles.push([a, c, a + 1]);
                triangles.push([a + 1, c, c + 1]);
            }
        }
        StoredGeometry {
            positions,
            normals,
            triangles,
        }
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    pub fn root(&self) -> FragmentId {
        FragmentId(0)
    }

    pub fn node(&self, id: FragmentId) -> Option<&TerrainNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn nodes(&self) -> &[TerrainNode] {
        &self.nodes
    }

    pub fn source(&self) -> &Arc<InMemorySource> {
        &self.source
    }

    /// Height-tinted texture for `id`, or `None` for untextured terrain.
    pub fn texture_for(&self, id: FragmentId) -> Option<FragmentTexture> {
        let size = self.params.texture_size;
        if size == 0 {
            return None;
        }
        let node = self.node(id)?;
        let amplitude = self.params.amplitude as f32;
        let texel = node.size / size as f32;
        let image = image::RgbaImage::from_fn(size, size, |px, pz| {
            let x = node.origin[0] + (px as f32 + 0.5) * texel;
            let z = node.origin[1] + (pz as f32 + 0.5) * texel;
            let t = (self.field.height(x, z) / amplitude * 0.5 + 0.5).clamp(0.0, 1.0);
            image::Rgba(height_color(t))
        });

        let n = self.params.grid;
        let tex_coords = (0..=n)
            .flat_map(|j| (0..=n).map(move |i| [i as f32 / n as f32, j as f32 / n as f32]))
            .collect();
        Some(FragmentTexture::new(
            TextureImage::from_rgba_image(image),
            tex_coords,
            texel,
        ))
    }
}

/// Water, grass, rock, snow ramp over normalized height.
fn height_color(t: f32) -> [u8; 4] {
    let ramp: [(f32, [f32; 3]); 4] = [
        (0.0, [40.0, 70.0, 140.0]),
        (0.4, [70.0, 130.0, 60.0]),
        (0.7, [120.0, 110.0, 100.0]),
        (1.0, [240.0, 240.0, 245.0]),
    ];
    let upper = ramp.iter().position(|(stop, _)| t <= *stop).unwrap_or(ramp.len() - 1);
    let (hi_t, hi) = ramp[upper];
    let (lo_t, lo) = ramp[upper.saturating_sub(1)];
    let f = if hi_t > lo_t { (t - lo_t) / (hi_t - lo_t) } else { 0.0 };
    let mix = |k: usize| (lo[k] + (hi[k] - lo[k]) * f) as u8;
    [mix(0), mix(1), mix(2), 255]
}
