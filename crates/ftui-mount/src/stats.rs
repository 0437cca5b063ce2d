#![forbid(unsafe_code)]

//! Counters kept alongside the mounted tree.

/// Cumulative mounting counters for one session.
///
/// Updated on the UI lane only; read with
/// [`MountSession::stats`](crate::MountSession::stats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountStats {
    /// Batches applied.
    pub transactions: u64,
    /// Batches dropped under [`CoalescePolicy::LatestOnly`](crate::CoalescePolicy::LatestOnly).
    pub batches_superseded: u64,
    pub mutations_applied: u64,
    pub mutations_failed: u64,
    /// Instances built during a transaction (cache miss).
    pub instances_constructed: u64,
    /// Instances built ahead of time by the provider.
    pub preallocated: u64,
    /// `Create`s served from the preallocation cache.
    pub preallocations_claimed: u64,
    /// Preallocation requests skipped because the tag was already mounted
    /// or cached.
    pub preallocations_stale: u64,
    /// Unclaimed cached instances destroyed at the end of a transaction.
    pub preallocations_evicted: u64,
    pub construction_failures: u64,
    /// Finalize calls across all transactions.
    pub finalized: u64,
    /// Frame ticks on which the provider ran out of time with work left.
    pub provider_yields: u64,
}

impl MountStats {
    /// Share of `Create`s served from the cache, in `[0, 1]`.
    pub fn claim_ratio(&self) -> f64 {
        let total = self.preallocations_claimed + self.instances_constructed;
        if total == 0 {
            0.0
        } else {
            self.preallocations_claimed as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_ratio() {
        assert_eq!(MountStats::default().claim_ratio(), 0.0);
        let stats = MountStats {
            preallocations_claimed: 3,
            instances_constructed: 1,
            ..MountStats::default()
        };
        assert_eq!(stats.claim_ratio(), 0.75);
    }
}
