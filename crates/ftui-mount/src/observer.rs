#![forbid(unsafe_code)]

//! Hooks into the transaction lifecycle.

use crate::apply::{FailedMutation, TransactionReport};
use crate::descriptor::Tag;

/// Receives transaction lifecycle events on the UI lane.
///
/// All methods default to no-ops. Implementations may call back into the
/// coordinator (e.g. submit a follow-up batch) but must not expect mount
/// state to be readable from inside `mutation_failed` or
/// `instance_finalized`, which run while the transaction holds it.
pub trait MountObserver: Send + Sync {
    /// A batch is about to be applied.
    fn transaction_started(&self, _revision: u64) {}

    /// A mutation was skipped.
    fn mutation_failed(&self, _revision: u64, _failure: &FailedMutation) {}

    /// `finalize_updates` ran for `tag`.
    fn instance_finalized(&self, _tag: Tag) {}

    /// A batch finished applying, including its finalize pass.
    fn transaction_finished(&self, _report: &TransactionReport) {}
}
