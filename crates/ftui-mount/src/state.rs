#![forbid(unsafe_code)]

//! The UI-lane-owned half of a session.

use crate::provider::PreallocatedCache;
use crate::registry::InstanceRegistry;
use crate::stats::MountStats;

/// Everything the mounting pipeline mutates: the live tree, the cache of
/// instances built ahead of time, and the counters.
///
/// A session keeps this inside a [`LaneBound`](ftui_lanes::LaneBound) owned
/// by the UI lane.
#[derive(Debug, Default)]
pub struct MountState {
    pub(crate) registry: InstanceRegistry,
    pub(crate) cache: PreallocatedCache,
    pub(crate) stats: MountStats,
}

impl MountState {
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &PreallocatedCache {
        &self.cache
    }

    pub fn stats(&self) -> &MountStats {
        &self.stats
    }
}
