#![forbid(unsafe_code)]

//! Applying one batch to the mounted tree.
//!
//! Runs on the UI lane with exclusive access to [`MountState`]. Each
//! mutation succeeds or fails on its own; a failure is logged, reported to
//! the observer and skipped. After the last mutation every touched instance
//! is finalized once, and preallocated instances nobody claimed are
//! destroyed.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::descriptor::{NodeDescriptor, NodeOrigin, Tag};
use crate::error::MountError;
use crate::host::NativeHost;
use crate::mutation::{Mutation, MutationBatch, MutationKind};
use crate::observer::MountObserver;
use crate::provider::InstanceProvider;
use crate::state::MountState;

/// A mutation that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMutation {
    /// Position in the batch.
    pub index: usize,
    pub kind: MutationKind,
    pub error: MountError,
}

/// Summary of one applied batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionReport {
    pub revision: u64,
    /// Mutations applied successfully.
    pub applied: usize,
    pub failed: Vec<FailedMutation>,
    /// Instances finalized, in first-touch order.
    pub finalized: Vec<Tag>,
    /// Unclaimed preallocated instances destroyed afterwards.
    pub evicted: usize,
    pub duration: Duration,
}

impl TransactionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Instances touched by a batch, deduplicated, in first-touch order.
#[derive(Debug, Default)]
struct TouchedSet {
    order: Vec<Tag>,
    seen: HashSet<Tag>,
}

impl TouchedSet {
    fn touch(&mut self, tag: Tag) {
        if self.seen.insert(tag) {
            self.order.push(tag);
        }
    }
}

struct BatchApplier<'a> {
    provider: &'a InstanceProvider,
    host: &'a dyn NativeHost,
    state: &'a mut MountState,
    touched: TouchedSet,
}

/// Apply `batch` to `state`, finalize, and evict the preallocation cache.
pub(crate) fn apply_batch(
    provider: &InstanceProvider,
    host: &dyn NativeHost,
    observer: Option<&dyn MountObserver>,
    state: &mut MountState,
    batch: &MutationBatch,
) -> TransactionReport {
    let started = Instant::now();
    let mut report = TransactionReport {
        revision: batch.revision,
        ..TransactionReport::default()
    };
    let mut applier = BatchApplier {
        provider,
        host,
        state,
        touched: TouchedSet::default(),
    };

    for (index, mutation) in batch.iter().enumerate() {
        match applier.apply(mutation) {
            Ok(()) => report.applied += 1,
            Err(error) => {
                tracing::warn!(
                    revision = batch.revision,
                    index,
                    mutation = mutation.kind().name(),
                    tag = %mutation.tag(),
                    error = %error,
                    "mutation skipped"
                );
                let failure = FailedMutation {
                    index,
                    kind: mutation.kind(),
                    error,
                };
                if let Some(observer) = observer {
                    observer.mutation_failed(batch.revision, &failure);
                }
                report.failed.push(failure);
            }
        }
    }

    let BatchApplier { state, touched, .. } = applier;
    for tag in touched.order {
        if state.registry.finalize_updates(tag) {
            if let Some(observer) = observer {
                observer.instance_finalized(tag);
            }
            report.finalized.push(tag);
        }
    }
    report.evicted = provider.clear_cache(&mut state.cache);

    let stats = &mut state.stats;
    stats.transactions += 1;
    stats.mutations_applied += report.applied as u64;
    stats.mutations_failed += report.failed.len() as u64;
    stats.finalized += report.finalized.len() as u64;
    stats.preallocations_evicted += report.evicted as u64;

    report.duration = started.elapsed();
    report
}

impl BatchApplier<'_> {
    fn apply(&mut self, mutation: &Mutation) -> Result<(), MountError> {
        match mutation {
            Mutation::Create { node } => self.create(node),
            Mutation::Delete { node } => self.delete(node.tag),
            Mutation::Insert {
                parent,
                child,
                index,
            } => self.insert(*parent, child, *index),
            Mutation::Remove {
                parent,
                child,
                index,
            } => self.remove(*parent, child.tag, *index),
            Mutation::Update { node } => self.update(node),
        }
    }

    /// Build (or claim) an instance for `node`, apply its snapshot and
    /// register it. On failure nothing is registered.
    fn materialize(&mut self, node: &NodeDescriptor) -> Result<(), MountError> {
        let state = &mut *self.state;
        if state.registry.contains(node.tag) {
            return Err(MountError::DuplicateInstance { tag: node.tag });
        }
        let mut instance = self.provider.get_or_claim(
            &mut state.cache,
            &mut state.stats,
            node.tag,
            &node.kind,
            node.identifier.clone(),
        )?;
        instance.apply_snapshot(&node.snapshot);
        state.registry.insert(instance)?;
        self.touched.touch(node.tag);
        Ok(())
    }

    fn create(&mut self, node: &NodeDescriptor) -> Result<(), MountError> {
        self.materialize(node)
    }

    fn delete(&mut self, tag: Tag) -> Result<(), MountError> {
        let registry = &self.state.registry;
        let Some(instance) = registry.get(tag) else {
            return Err(MountError::MissingInstance { tag });
        };
        let node = instance.node();
        if let Some(parent) = instance.parent() {
            tracing::warn!(
                tag = %tag,
                parent = %parent,
                "deleting attached instance, detaching first"
            );
            if let Some(parent_node) = registry.get(parent).map(|p| p.node()) {
                self.host.detach_child(parent_node, node);
            }
        }
        if !instance.children().is_empty() {
            tracing::warn!(
                tag = %tag,
                children = instance.children().len(),
                "deleting instance with children, orphaning them"
            );
            for child in instance.children() {
                if let Some(child_node) = registry.get(*child).map(|c| c.node()) {
                    self.host.detach_child(node, child_node);
                }
            }
        }
        self.state.registry.remove(tag);
        self.host.destroy_node(node);
        Ok(())
    }

    fn insert(
        &mut self,
        parent: Tag,
        child: &NodeDescriptor,
        index: usize,
    ) -> Result<(), MountError> {
        if !self.state.registry.contains(parent) {
            return Err(MountError::MissingInstance { tag: parent });
        }
        if !self.state.registry.contains(child.tag) {
            if child.origin != NodeOrigin::External {
                return Err(MountError::MissingInstance { tag: child.tag });
            }
            tracing::debug!(tag = %child.tag, kind = %child.kind, "bridging external node");
            self.materialize(child)?;
            if let Some(bridge) = self.state.registry.get_mut(child.tag) {
                bridge.mark_bridge();
            }
        }

        let at = self.state.registry.attach(parent, child.tag, index)?;
        let registry = &self.state.registry;
        if let (Some(parent_node), Some(child_node)) = (
            registry.get(parent).map(|p| p.node()),
            registry.get(child.tag).map(|c| c.node()),
        ) {
            self.host.attach_child(parent_node, child_node, at);
        }
        self.touched.touch(parent);
        Ok(())
    }

    fn remove(&mut self, parent: Tag, child: Tag, index: usize) -> Result<(), MountError> {
        self.state.registry.detach(parent, child, index)?;
        let registry = &self.state.registry;
        if let (Some(parent_node), Some(child_node)) = (
            registry.get(parent).map(|p| p.node()),
            registry.get(child).map(|c| c.node()),
        ) {
            self.host.detach_child(parent_node, child_node);
        }
        self.touched.touch(parent);
        Ok(())
    }

    fn update(&mut self, node: &NodeDescriptor) -> Result<(), MountError> {
        let registry = &mut self.state.registry;
        let Some(instance) = registry.get_mut(node.tag) else {
            return Err(MountError::MissingInstance { tag: node.tag });
        };
        if instance.kind() != &node.kind {
            return Err(MountError::KindMismatch {
                tag: node.tag,
                expected: instance.kind().clone(),
                found: node.kind.clone(),
            });
        }
        let layout_changed = instance.apply_snapshot(&node.snapshot);
        if layout_changed {
            registry.mark_dirty(node.tag);
        }
        if node.identifier.is_some() {
            registry.set_identifier(node.tag, node.identifier.clone());
        }
        self.touched.touch(node.tag);
        Ok(())
    }
}
