//! Budget bookkeeping for drivers that keep many fragments resident.
//!
//! [`RenderableFragment`] enforces no limit itself. A driver records what each
//! fragment holds in a [`ResidencyTracker`] after every transition and asks
//! [`select_evictions`] which fragments to disable or unload once a budget is
//! exceeded.

use rustc_hash::FxHashMap;

use crate::descriptor::{FragmentId, FragmentOrdering};
use crate::renderable::RenderableFragment;

/// Bytes one fragment holds in each tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentUsage {
    pub device_bytes: u64,
    pub main_memory_bytes: u64,
}

impl FragmentUsage {
    pub fn of(fragment: &RenderableFragment) -> Self {
        Self {
            device_bytes: fragment.device_bytes(),
            main_memory_bytes: fragment.main_memory_bytes(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.device_bytes == 0 && self.main_memory_bytes == 0
    }
}

/// Limits for both residency tiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResidencyBudget {
    pub device_bytes: u64,
    pub main_memory_bytes: u64,
}

impl Default for ResidencyBudget {
    fn default() -> Self {
        Self {
            device_bytes: 256 * 1024 * 1024,
            main_memory_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Running totals of per-fragment usage against a [`ResidencyBudget`].
#[derive(Debug, Default)]
pub struct ResidencyTracker {
    budget: ResidencyBudget,
    usage: FxHashMap<FragmentId, FragmentUsage>,
    total_device_bytes: u64,
    total_main_memory_bytes: u64,
}

impl ResidencyTracker {
    pub fn new(budget: ResidencyBudget) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Record what `fragment` holds right now.
    pub fn update(&mut self, fragment: &RenderableFragment) {
        self.record(fragment.id(), FragmentUsage::of(fragment));
    }

    /// Record usage for `id`, replacing any earlier entry. Empty usage
    /// removes the entry.
    pub fn record(&mut self, id: FragmentId, usage: FragmentUsage) {
        self.remove(id);
        if usage.is_empty() {
            return;
        }
        self.total_device_bytes += usage.device_bytes;
        self.total_main_memory_bytes += usage.main_memory_bytes;
        self.usage.insert(id, usage);
    }

    pub fn remove(&mut self, id: FragmentId) {
        if let Some(old) = self.usage.remove(&id) {
            self.total_device_bytes -= old.device_bytes;
            self.total_main_memory_bytes -= old.main_memory_bytes;
        }
    }

    pub fn is_over_budget(&self) -> bool {
        self.device_overage() > 0 || self.main_memory_overage() > 0
    }

    pub fn device_overage(&self) -> u64 {
        self.total_device_bytes.saturating_sub(self.budget.device_bytes)
    }

    pub fn main_memory_overage(&self) -> u64 {
        self.total_main_memory_bytes
            .saturating_sub(self.budget.main_memory_bytes)
    }

    pub fn total_device_bytes(&self) -> u64 {
        self.total_device_bytes
    }

    pub fn total_main_memory_bytes(&self) -> u64 {
        self.total_main_memory_bytes
    }

    pub fn tracked_count(&self) -> usize {
        self.usage.len()
    }

    pub fn usage(&self, id: FragmentId) -> Option<FragmentUsage> {
        self.usage.get(&id).copied()
    }

    pub fn budget(&self) -> &ResidencyBudget {
        &self.budget
    }

    pub fn set_budget(&mut self, budget: ResidencyBudget) {
        self.budget = budget;
    }
}

/// How far a fragment should be demoted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvictionKind {
    /// Release device resources, keep main memory.
    Disable,
    /// Release both tiers.
    Unload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Eviction {
    pub id: FragmentId,
    pub kind: EvictionKind,
}

/// Pick fragments to demote until both budgets are met again.
///
/// Candidates are visited least important first, i.e. from the end of
/// `ordering`. Main-memory overage is resolved with unloads (which also free
/// device bytes), remaining device overage with disables. Fragments the
/// tracker knows nothing about are skipped. Callers exclude fragments they
/// still need this frame by leaving them out of `fragments`.
pub fn select_evictions<'a>(
    tracker: &ResidencyTracker,
    fragments: impl IntoIterator<Item = &'a RenderableFragment>,
    ordering: &FragmentOrdering,
) -> Vec<Eviction> {
    if !tracker.is_over_budget() {
        return Vec::new();
    }

    let mut candidates: Vec<_> = fragments
        .into_iter()
        .filter_map(|f| tracker.usage(f.id()).map(|usage| (f, usage)))
        .collect();
    candidates.sort_by(|(a, _), (b, _)| ordering.compare(b.descriptor(), a.descriptor()));

    let device_target = tracker.device_overage();
    let main_target = tracker.main_memory_overage();
    let mut freed_device = 0u64;
    let mut freed_main = 0u64;
    let mut evictions = Vec::new();

    for (fragment, usage) in candidates {
        if freed_device >= device_target && freed_main >= main_target {
            break;
        }
        let kind = if freed_main < main_target && usage.main_memory_bytes > 0 {
            EvictionKind::Unload
        } else if freed_device < device_target && usage.device_bytes > 0 {
            EvictionKind::Disable
        } else {
            continue;
        };
        freed_device += usage.device_bytes;
        if kind == EvictionKind::Unload {
            freed_main += usage.main_memory_bytes;
        }
        evictions.push(Eviction {
            id: fragment.id(),
            kind,
        });
    }

    evictions
}
