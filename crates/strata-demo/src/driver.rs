//! Per-frame residency driver for the synthetic terrain.
//!
//! Each frame picks the coarsest fragments whose projected error is within
//! the threshold, requests loads for the ones missing from main memory,
//! enables and renders the loaded ones and evicts unselected fragments when a
//! budget is exceeded.

use std::io;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use strata_config::{Config, SelectionConfig};
use strata_fragment::{
    EvictionKind, FragmentDescriptor, FragmentDevice, FragmentId, FragmentLoader,
    FragmentOrdering, FragmentSource, RenderableFragment, ResidencyBudget, ResidencyTracker,
    select_evictions,
};
use strata_math::Vec3;

use crate::terrain::SyntheticTerrain;

/// What happened during one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub selected: usize,
    pub rendered: usize,
    /// Selected fragments that could not be drawn yet.
    pub missing: usize,
    pub enabled: usize,
    pub load_requests: usize,
    pub load_failures: usize,
    pub evictions: usize,
    pub device_bytes: u64,
    pub main_memory_bytes: u64,
}

pub struct Driver {
    terrain: SyntheticTerrain,
    /// Indexed by fragment id.
    fragments: Vec<RenderableFragment>,
    loader: FragmentLoader,
    tracker: ResidencyTracker,
    ordering: FragmentOrdering,
    selection: SelectionConfig,
    /// Frames between stats log lines, 0 to disable.
    stats_interval: u64,
    frame: u64,
}

impl Driver {
    pub fn new(terrain: SyntheticTerrain, config: &Config) -> io::Result<Self> {
        let source: Arc<dyn FragmentSource> = terrain.source().clone();
        let ordering = FragmentOrdering::by_level_then_id();
        let fragments = terrain
            .nodes()
            .iter()
            .map(|node| {
                RenderableFragment::new(
                    node.descriptor.clone(),
                    Arc::clone(&source),
                    ordering.clone(),
                )
            })
            .collect();
        let loader = FragmentLoader::with_threads(
            source,
            config.residency.loader_threads,
            config.residency.max_in_flight_loads,
        )?;
        let tracker = ResidencyTracker::new(ResidencyBudget {
            device_bytes: config.residency.device_budget_bytes,
            main_memory_bytes: config.residency.main_memory_budget_bytes,
        });

        Ok(Self {
            terrain,
            fragments,
            loader,
            tracker,
            ordering,
            selection: config.selection.clone(),
            stats_interval: u64::from(config.debug.stats_interval_frames),
            frame: 0,
        })
    }

    #[cfg(test)]
    pub fn fragment(&self, id: FragmentId) -> Option<&RenderableFragment> {
        self.fragments.get(id.0 as usize)
    }

    pub fn tracker(&self) -> &ResidencyTracker {
        &self.tracker
    }

    pub fn terrain(&self) -> &SyntheticTerrain {
        &self.terrain
    }

    /// Screen-space error in pixels of drawing `descriptor` seen from `camera`.
    pub fn projected_error(&self, descriptor: &FragmentDescriptor, camera: Vec3) -> f32 {
        let distance = descriptor.bbox().distance_to_point(camera).max(1e-3);
        let half_fov = (self.selection.fov_y_degrees * 0.5).to_radians();
        let pixels_per_unit = self.selection.viewport_height as f32 / (2.0 * half_fov.tan());
        descriptor.geometric_error() * pixels_per_unit / distance
    }

    /// Coarsest cut of the quadtree meeting the error threshold.
    pub fn select(&self, camera: Vec3) -> Vec<FragmentId> {
        let mut selected = Vec::new();
        let mut stack = vec![self.terrain.root()];
        while let Some(id) = stack.pop() {
            let Some(node) = self.terrain.node(id) else {
                continue;
            };
            let error = self.projected_error(&node.descriptor, camera);
            if node.children.is_empty() || error <= self.selection.max_screen_space_error {
                selected.push(id);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        selected
    }

    pub fn frame<D: FragmentDevice>(&mut self, device: &mut D, camera: Vec3) -> FrameStats {
        self.frame += 1;
        let mut stats = FrameStats {
            frame: self.frame,
            ..FrameStats::default()
        };

        self.install_loaded(device, &mut stats);

        let selection = self.select(camera);
        let selected: FxHashSet<FragmentId> = selection.iter().copied().collect();
        stats.selected = selection.len();

        for &id in &selection {
            let Some(fragment) = self.fragments.get_mut(id.0 as usize) else {
                continue;
            };
            if !fragment.is_loaded() {
                if !self.loader.is_pending(id) && self.loader.submit(id).is_ok() {
                    stats.load_requests += 1;
                }
                stats.missing += 1;
                continue;
            }
            if !fragment.is_enabled() {
                if stats.enabled as u32 >= self.selection.max_enables_per_frame {
                    stats.missing += 1;
                    continue;
                }
                if let Err(err) = fragment.enable(device) {
                    tracing::warn!(fragment = %id, error = %err, "enable failed");
                    self.tracker.update(fragment);
                    stats.missing += 1;
                    continue;
                }
                self.tracker.update(fragment);
                stats.enabled += 1;
            }
            fragment.render(device);
            stats.rendered += 1;
        }

        for fragment in &self.fragments {
            let id = fragment.id();
            if !selected.contains(&id) && self.loader.is_pending(id) {
                self.loader.cancel(id);
            }
        }

        stats.evictions = self.evict(device, &selected);
        stats.device_bytes = self.tracker.total_device_bytes();
        stats.main_memory_bytes = self.tracker.total_main_memory_bytes();

        if self.stats_interval > 0 && self.frame % self.stats_interval == 0 {
            tracing::info!(
                frame = stats.frame,
                selected = stats.selected,
                rendered = stats.rendered,
                missing = stats.missing,
                in_flight = self.loader.in_flight_count(),
                device_bytes = stats.device_bytes,
                main_memory_bytes = stats.main_memory_bytes,
                "residency stats"
            );
        }
        stats
    }

    fn install_loaded<D: FragmentDevice>(&mut self, device: &mut D, stats: &mut FrameStats) {
        for loaded in self.loader.drain_results() {
            let Some(fragment) = self.fragments.get_mut(loaded.id.0 as usize) else {
                continue;
            };
            match loaded.result {
                Ok(data) => {
                    if fragment.install_data(data) {
                        if let Some(texture) = self.terrain.texture_for(loaded.id) {
                            fragment.set_texture(device, Some(texture));
                        }
                        tracing::trace!(
                            fragment = %loaded.id,
                            load_time_us = loaded.load_time_us,
                            "installed fragment data"
                        );
                    }
                    self.tracker.update(fragment);
                }
                Err(err) => {
                    tracing::warn!(fragment = %loaded.id, error = %err, "fragment load failed");
                    stats.load_failures += 1;
                }
            }
        }
    }

    fn evict<D: FragmentDevice>(&mut self, device: &mut D, selected: &FxHashSet<FragmentId>) -> usize {
        let candidates = self.fragments.iter().filter(|f| !selected.contains(&f.id()));
        let evictions = select_evictions(&self.tracker, candidates, &self.ordering);
        for eviction in &evictions {
            let Some(fragment) = self.fragments.get_mut(eviction.id.0 as usize) else {
                continue;
            };
            match eviction.kind {
                EvictionKind::Disable => fragment.disable(device),
                EvictionKind::Unload => fragment.unload(device),
            }
            self.tracker.update(fragment);
            tracing::debug!(fragment = %eviction.id, kind = ?eviction.kind, "evicted fragment");
        }
        evictions.len()
    }

    /// Release every fragment from both tiers.
    pub fn shutdown<D: FragmentDevice>(&mut self, device: &mut D) {
        for fragment in &mut self.fragments {
            self.loader.cancel(fragment.id());
            fragment.unload(device);
            self.tracker.remove(fragment.id());
        }
    }
}
