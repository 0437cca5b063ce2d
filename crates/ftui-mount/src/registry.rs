#![forbid(unsafe_code)]

//! Tag-keyed arena of mounted instances.
//!
//! The `InstanceRegistry` owns every live [`ComponentInstance`] and the tree
//! links between them. Parent and child references are tags, never pointers,
//! so detaching or deleting a node never leaves a dangling reference.
//!
//! # Usage
//!
//! ```
//! use ftui_mount::{ComponentInstance, InstanceRegistry, NodeHandle, Tag};
//!
//! let mut registry = InstanceRegistry::new();
//! registry
//!     .insert(ComponentInstance::new(Tag(1), "View".into(), None, NodeHandle(1), true))
//!     .unwrap();
//! registry
//!     .insert(ComponentInstance::new(Tag(2), "Text".into(), None, NodeHandle(2), true))
//!     .unwrap();
//! registry.attach(Tag(1), Tag(2), 0).unwrap();
//! assert_eq!(registry.get(Tag(2)).unwrap().parent(), Some(Tag(1)));
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::descriptor::Tag;
use crate::error::MountError;
use crate::geometry::Rect;
use crate::instance::ComponentInstance;

/// Registry of mounted instances keyed by tag.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    instances: HashMap<Tag, ComponentInstance>,
    /// Identifier to the tags holding it, in claim order. The first holder
    /// answers lookups; when it leaves, the next one takes over.
    by_identifier: HashMap<String, Vec<Tag>>,
    bounds_recomputations: u64,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.instances.contains_key(&tag)
    }

    pub fn get(&self, tag: Tag) -> Option<&ComponentInstance> {
        self.instances.get(&tag)
    }

    pub(crate) fn get_mut(&mut self, tag: Tag) -> Option<&mut ComponentInstance> {
        self.instances.get_mut(&tag)
    }

    /// All tags in ascending order.
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.instances.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Tags of instances with no parent, ascending.
    pub fn roots(&self) -> Vec<Tag> {
        let mut roots: Vec<Tag> = self
            .instances
            .values()
            .filter(|i| i.parent.is_none())
            .map(ComponentInstance::tag)
            .collect();
        roots.sort_unstable();
        roots
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInstance> {
        self.instances.values()
    }

    /// Look up an instance by its declared identifier.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<&ComponentInstance> {
        self.by_identifier
            .get(identifier)
            .and_then(|holders| holders.first())
            .and_then(|tag| self.instances.get(tag))
    }

    /// Number of bounding boxes computed since creation.
    pub fn bounds_recomputations(&self) -> u64 {
        self.bounds_recomputations
    }

    /// Add an instance. Fails if its tag is taken.
    pub fn insert(&mut self, instance: ComponentInstance) -> Result<(), MountError> {
        let tag = instance.tag();
        if self.instances.contains_key(&tag) {
            return Err(MountError::DuplicateInstance { tag });
        }
        if let Some(id) = instance.identifier() {
            self.index_identifier(tag, id.to_owned());
        }
        self.instances.insert(tag, instance);
        Ok(())
    }

    /// Remove an instance, unlinking it from its parent and children.
    pub fn remove(&mut self, tag: Tag) -> Option<ComponentInstance> {
        let mut instance = self.instances.remove(&tag)?;
        if let Some(id) = instance.identifier() {
            self.unindex_identifier(tag, id);
        }
        if let Some(parent) = instance.parent.take()
            && let Some(p) = self.instances.get_mut(&parent)
        {
            p.children.retain(|c| *c != tag);
            self.mark_dirty(parent);
        }
        for child in instance.children.drain(..) {
            if let Some(c) = self.instances.get_mut(&child) {
                c.parent = None;
            }
        }
        Some(instance)
    }

    /// Change an instance's identifier and keep the lookup in sync.
    pub(crate) fn set_identifier(&mut self, tag: Tag, identifier: Option<String>) {
        let Some(instance) = self.instances.get_mut(&tag) else {
            return;
        };
        if instance.identifier() == identifier.as_deref() {
            return;
        }
        let old = instance.identifier().map(str::to_owned);
        instance.set_identifier(identifier.clone());
        if let Some(old) = old {
            self.unindex_identifier(tag, &old);
        }
        if let Some(id) = identifier {
            self.index_identifier(tag, id);
        }
    }

    fn index_identifier(&mut self, tag: Tag, identifier: String) {
        match self.by_identifier.entry(identifier) {
            Entry::Vacant(slot) => {
                slot.insert(vec![tag]);
            }
            Entry::Occupied(mut slot) => {
                if slot.get().contains(&tag) {
                    return;
                }
                if let Some(owner) = slot.get().first() {
                    tracing::warn!(
                        identifier = %slot.key(),
                        owner = %owner,
                        tag = %tag,
                        "identifier already claimed"
                    );
                }
                slot.get_mut().push(tag);
            }
        }
    }

    fn unindex_identifier(&mut self, tag: Tag, identifier: &str) {
        let Some(holders) = self.by_identifier.get_mut(identifier) else {
            return;
        };
        let was_owner = holders.first() == Some(&tag);
        holders.retain(|t| *t != tag);
        let next = holders.first().copied();
        match next {
            None => {
                self.by_identifier.remove(identifier);
            }
            Some(next) if was_owner => {
                tracing::debug!(identifier, tag = %next, "identifier passed to next holder");
            }
            Some(_) => {}
        }
    }

    /// Attach `child` under `parent`. Indices past the end append.
    ///
    /// Returns the index actually used.
    pub fn attach(&mut self, parent: Tag, child: Tag, index: usize) -> Result<usize, MountError> {
        if parent == child {
            return Err(MountError::TreeConflict {
                parent,
                child,
                reason: "node cannot be its own child",
            });
        }
        let Some(child_instance) = self.instances.get(&child) else {
            return Err(MountError::MissingInstance { tag: child });
        };
        if !self.instances.contains_key(&parent) {
            return Err(MountError::MissingInstance { tag: parent });
        }
        if child_instance.parent.is_some() {
            return Err(MountError::TreeConflict {
                parent,
                child,
                reason: "child is already attached",
            });
        }
        // A leaf cannot be an ancestor of anything.
        if !child_instance.children.is_empty() && self.is_ancestor(child, parent) {
            return Err(MountError::TreeConflict {
                parent,
                child,
                reason: "attaching would create a cycle",
            });
        }

        let Some(p) = self.instances.get_mut(&parent) else {
            return Err(MountError::MissingInstance { tag: parent });
        };
        let at = index.min(p.children.len());
        if at != index {
            tracing::debug!(parent = %parent, child = %child, index, at, "insert index clamped");
        }
        p.children.insert(at, child);
        if let Some(c) = self.instances.get_mut(&child) {
            c.parent = Some(parent);
        }
        self.mark_dirty(parent);
        Ok(at)
    }

    /// Detach `child` from `parent`.
    ///
    /// `index` is the expected position; if the child is elsewhere in the
    /// list it is found by tag. Returns the index it was removed from.
    pub fn detach(&mut self, parent: Tag, child: Tag, index: usize) -> Result<usize, MountError> {
        if !self.instances.contains_key(&child) {
            return Err(MountError::MissingInstance { tag: child });
        }
        let Some(p) = self.instances.get_mut(&parent) else {
            return Err(MountError::MissingInstance { tag: parent });
        };
        let position = if p.children.get(index) == Some(&child) {
            index
        } else {
            match p.children.iter().position(|c| *c == child) {
                Some(found) => {
                    tracing::debug!(
                        parent = %parent,
                        child = %child,
                        index,
                        found,
                        "remove index mismatch"
                    );
                    found
                }
                None => {
                    return Err(MountError::TreeConflict {
                        parent,
                        child,
                        reason: "child is not attached to parent",
                    });
                }
            }
        };
        p.children.remove(position);
        if let Some(c) = self.instances.get_mut(&child) {
            c.parent = None;
        }
        self.mark_dirty(parent);
        Ok(position)
    }

    fn is_ancestor(&self, candidate: Tag, of: Tag) -> bool {
        let mut cursor = Some(of);
        while let Some(tag) = cursor {
            if tag == candidate {
                return true;
            }
            cursor = self.instances.get(&tag).and_then(|i| i.parent);
        }
        false
    }

    /// Invalidate cached bounds of `tag` and its ancestors.
    ///
    /// Propagation stops below the first ancestor that clips, since a
    /// clipping box is its own frame regardless of descendants. It also
    /// stops at an ancestor that is already dirty: everything above it up to
    /// the next clip is dirty too.
    pub fn mark_dirty(&mut self, tag: Tag) {
        let mut cursor = Some(tag);
        while let Some(current) = cursor {
            let Some(instance) = self.instances.get_mut(&current) else {
                break;
            };
            instance.bounds_dirty = true;
            cursor = instance.parent;
            if let Some(parent) = cursor
                && self
                    .instances
                    .get(&parent)
                    .is_none_or(|p| p.layout().clips() || p.bounds_dirty)
            {
                break;
            }
        }
    }

    /// Union of the instance's frame and its descendants' bounding boxes,
    /// in the parent's coordinate space. Cached until marked dirty.
    ///
    /// Walks the stale part of the subtree post-order with an explicit stack,
    /// so tree depth is bounded by memory rather than the lane's call stack.
    pub fn bounding_box(&mut self, tag: Tag) -> Option<Rect> {
        let instance = self.instances.get(&tag)?;
        if let Some(cached) = instance.cached_bounds() {
            return Some(cached);
        }

        // (tag, children already pushed)
        let mut stack: Vec<(Tag, bool)> = vec![(tag, false)];
        while let Some((current, expanded)) = stack.pop() {
            let Some(instance) = self.instances.get(&current) else {
                continue;
            };
            let frame = instance.layout().frame;
            let clips = instance.layout().clips();

            if !expanded {
                if instance.cached_bounds().is_some() {
                    continue;
                }
                stack.push((current, true));
                if !clips {
                    stack.extend(instance.children.iter().rev().map(|child| (*child, false)));
                }
                continue;
            }

            let mut bounds = frame;
            if !clips {
                for child in &instance.children {
                    if let Some(child_bounds) = self
                        .instances
                        .get(child)
                        .and_then(ComponentInstance::cached_bounds)
                    {
                        bounds = bounds.union(&child_bounds.translate(frame.x, frame.y));
                    }
                }
            }
            self.bounds_recomputations += 1;
            if let Some(instance) = self.instances.get_mut(&current) {
                instance.bounds = Some(bounds);
                instance.bounds_dirty = false;
            }
        }

        self.instances
            .get(&tag)
            .and_then(ComponentInstance::cached_bounds)
    }

    /// Bring derived state of `tag` up to date after a transaction touched it.
    ///
    /// Idempotent: a second call with nothing changed in between does no
    /// recomputation. Returns `false` if the tag is unknown.
    pub fn finalize_updates(&mut self, tag: Tag) -> bool {
        let Some(instance) = self.instances.get_mut(&tag) else {
            return false;
        };
        instance.finalize_count += 1;
        self.bounding_box(tag);
        true
    }

    /// Remove every instance.
    pub(crate) fn drain(&mut self) -> Vec<ComponentInstance> {
        self.by_identifier.clear();
        self.instances.drain().map(|(_, instance)| instance).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{LayoutMetrics, NodeSnapshot, Overflow};
    use crate::host::NodeHandle;

    fn inst(tag: i32) -> ComponentInstance {
        ComponentInstance::new(Tag(tag), "View".into(), None, NodeHandle(tag as u64), true)
    }

    fn with_frame(registry: &mut InstanceRegistry, tag: i32, frame: Rect, overflow: Overflow) {
        let snapshot = NodeSnapshot {
            layout: LayoutMetrics::new(frame).with_overflow(overflow),
            ..NodeSnapshot::default()
        };
        if registry.get_mut(Tag(tag)).unwrap().apply_snapshot(&snapshot) {
            registry.mark_dirty(Tag(tag));
        }
    }

    fn tree(tags: &[i32]) -> InstanceRegistry {
        let mut registry = InstanceRegistry::new();
        for &t in tags {
            registry.insert(inst(t)).unwrap();
        }
        registry
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut registry = tree(&[1]);
        assert_eq!(
            registry.insert(inst(1)),
            Err(MountError::DuplicateInstance { tag: Tag(1) })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn attach_clamps_and_detach_finds_by_tag() {
        let mut registry = tree(&[1, 2, 3]);
        assert_eq!(registry.attach(Tag(1), Tag(2), 9), Ok(0));
        assert_eq!(registry.attach(Tag(1), Tag(3), 0), Ok(0));
        assert_eq!(registry.get(Tag(1)).unwrap().children(), &[Tag(3), Tag(2)]);

        // Wrong index: still removes by tag.
        assert_eq!(registry.detach(Tag(1), Tag(2), 0), Ok(1));
        assert_eq!(registry.get(Tag(1)).unwrap().children(), &[Tag(3)]);
        assert_eq!(registry.get(Tag(2)).unwrap().parent(), None);
    }

    #[test]
    fn tree_conflicts() {
        let mut registry = tree(&[1, 2, 3]);
        registry.attach(Tag(1), Tag(2), 0).unwrap();
        registry.attach(Tag(2), Tag(3), 0).unwrap();

        assert!(matches!(
            registry.attach(Tag(3), Tag(3), 0),
            Err(MountError::TreeConflict { .. })
        ));
        assert!(matches!(
            registry.attach(Tag(3), Tag(1), 0),
            Err(MountError::TreeConflict { reason: "attaching would create a cycle", .. })
        ));
        assert!(matches!(
            registry.attach(Tag(1), Tag(3), 0),
            Err(MountError::TreeConflict { reason: "child is already attached", .. })
        ));
        assert!(matches!(
            registry.detach(Tag(1), Tag(3), 0),
            Err(MountError::TreeConflict { .. })
        ));
        assert_eq!(
            registry.attach(Tag(1), Tag(9), 0),
            Err(MountError::MissingInstance { tag: Tag(9) })
        );
    }

    #[test]
    fn remove_unlinks_both_directions() {
        let mut registry = tree(&[1, 2, 3]);
        registry.attach(Tag(1), Tag(2), 0).unwrap();
        registry.attach(Tag(2), Tag(3), 0).unwrap();
        let removed = registry.remove(Tag(2)).unwrap();
        assert_eq!(removed.parent(), None);
        assert!(removed.children().is_empty());
        assert!(registry.get(Tag(1)).unwrap().children().is_empty());
        assert_eq!(registry.get(Tag(3)).unwrap().parent(), None);
        assert_eq!(registry.roots(), vec![Tag(1), Tag(3)]);
    }

    #[test]
    fn identifier_lookup_first_writer_wins() {
        let mut registry = InstanceRegistry::new();
        registry
            .insert(ComponentInstance::new(Tag(1), "View".into(), Some("a".into()), NodeHandle(1), true))
            .unwrap();
        registry
            .insert(ComponentInstance::new(Tag(2), "View".into(), Some("a".into()), NodeHandle(2), true))
            .unwrap();
        assert_eq!(registry.find_by_identifier("a").map(ComponentInstance::tag), Some(Tag(1)));

        registry.set_identifier(Tag(2), Some("b".into()));
        assert_eq!(registry.find_by_identifier("b").map(ComponentInstance::tag), Some(Tag(2)));
        assert_eq!(registry.find_by_identifier("a").map(ComponentInstance::tag), Some(Tag(1)));
    }

    #[test]
    fn identifier_passes_to_next_holder_on_remove() {
        let mut registry = InstanceRegistry::new();
        for tag in [1, 2, 3] {
            registry
                .insert(ComponentInstance::new(
                    Tag(tag),
                    "View".into(),
                    Some("a".into()),
                    NodeHandle(tag as u64),
                    true,
                ))
                .unwrap();
        }
        assert_eq!(registry.find_by_identifier("a").map(ComponentInstance::tag), Some(Tag(1)));

        // A non-owner leaving does not change the owner.
        registry.remove(Tag(2));
        assert_eq!(registry.find_by_identifier("a").map(ComponentInstance::tag), Some(Tag(1)));

        registry.remove(Tag(1));
        assert_eq!(registry.find_by_identifier("a").map(ComponentInstance::tag), Some(Tag(3)));

        registry.set_identifier(Tag(3), None);
        assert!(registry.find_by_identifier("a").is_none());
    }

    #[test]
    fn bounding_box_of_deep_chain_does_not_recurse() {
        const DEPTH: i32 = 50_000;
        let mut registry = InstanceRegistry::new();
        for tag in 0..DEPTH {
            let mut node = inst(tag);
            node.apply_snapshot(&NodeSnapshot {
                layout: LayoutMetrics::new(Rect::new(1.0, 0.0, 1.0, 1.0)),
                ..NodeSnapshot::default()
            });
            registry.insert(node).unwrap();
            if tag > 0 {
                registry.attach(Tag(tag - 1), Tag(tag), 0).unwrap();
            }
        }

        // Each level shifts one unit right: the leaf lands at x = DEPTH.
        assert_eq!(
            registry.bounding_box(Tag(0)),
            Some(Rect::new(1.0, 0.0, DEPTH as f32, 1.0))
        );
        assert_eq!(registry.bounds_recomputations(), DEPTH as u64);

        // Touching the leaf invalidates the whole chain, and only it.
        with_frame(&mut registry, DEPTH - 1, Rect::new(1.0, 0.0, 2.0, 1.0), Overflow::Visible);
        assert_eq!(
            registry.bounding_box(Tag(0)),
            Some(Rect::new(1.0, 0.0, DEPTH as f32 + 1.0, 1.0))
        );
        assert_eq!(registry.bounds_recomputations(), 2 * DEPTH as u64);
    }

    #[test]
    fn dirty_marking_stops_at_dirty_ancestor() {
        let mut registry = tree(&[1, 2, 3]);
        registry.attach(Tag(1), Tag(2), 0).unwrap();
        registry.attach(Tag(2), Tag(3), 0).unwrap();
        registry.bounding_box(Tag(1));
        assert!(registry.get(Tag(1)).unwrap().cached_bounds().is_some());

        // Dirtying the middle node reaches the root.
        registry.mark_dirty(Tag(2));
        assert!(registry.get(Tag(1)).unwrap().cached_bounds().is_none());
        assert!(registry.get(Tag(3)).unwrap().cached_bounds().is_some());

        // The leaf stops at its dirty parent; the root is still dirty.
        registry.mark_dirty(Tag(3));
        assert!(registry.get(Tag(3)).unwrap().cached_bounds().is_none());
        assert!(registry.get(Tag(1)).unwrap().cached_bounds().is_none());
        assert_eq!(registry.bounding_box(Tag(1)), Some(Rect::ZERO));
    }

    #[test]
    fn bounding_box_unions_descendants() {
        let mut registry = tree(&[1, 2, 3]);
        registry.attach(Tag(1), Tag(2), 0).unwrap();
        registry.attach(Tag(2), Tag(3), 0).unwrap();
        with_frame(&mut registry, 1, Rect::new(10.0, 10.0, 10.0, 10.0), Overflow::Visible);
        with_frame(&mut registry, 2, Rect::new(5.0, 5.0, 10.0, 10.0), Overflow::Visible);
        with_frame(&mut registry, 3, Rect::new(0.0, 20.0, 2.0, 2.0), Overflow::Visible);

        // Node 3 in node 2's space: (5,25)..(7,27); in node 1's parent space: +10.
        assert_eq!(
            registry.bounding_box(Tag(1)),
            Some(Rect::new(10.0, 10.0, 15.0, 27.0))
        );
    }

    #[test]
    fn bounding_box_is_cached_until_dirty() {
        let mut registry = tree(&[1, 2]);
        registry.attach(Tag(1), Tag(2), 0).unwrap();
        with_frame(&mut registry, 1, Rect::from_size(4.0, 4.0), Overflow::Visible);
        with_frame(&mut registry, 2, Rect::from_size(8.0, 1.0), Overflow::Visible);

        registry.bounding_box(Tag(1));
        let after_first = registry.bounds_recomputations();
        assert_eq!(after_first, 2);
        registry.bounding_box(Tag(1));
        assert_eq!(registry.bounds_recomputations(), after_first);

        with_frame(&mut registry, 2, Rect::from_size(9.0, 1.0), Overflow::Visible);
        assert_eq!(registry.bounding_box(Tag(1)), Some(Rect::from_size(9.0, 4.0)));
        assert_eq!(registry.bounds_recomputations(), after_first + 2);
    }

    #[test]
    fn clipping_ancestor_stops_invalidation() {
        let mut registry = tree(&[1, 2, 3]);
        registry.attach(Tag(1), Tag(2), 0).unwrap();
        registry.attach(Tag(2), Tag(3), 0).unwrap();
        with_frame(&mut registry, 1, Rect::from_size(100.0, 100.0), Overflow::Visible);
        with_frame(&mut registry, 2, Rect::from_size(10.0, 10.0), Overflow::Hidden);
        with_frame(&mut registry, 3, Rect::from_size(50.0, 50.0), Overflow::Visible);

        assert_eq!(registry.bounding_box(Tag(2)), Some(Rect::from_size(10.0, 10.0)));
        registry.bounding_box(Tag(1));
        let before = registry.bounds_recomputations();

        with_frame(&mut registry, 3, Rect::from_size(60.0, 60.0), Overflow::Visible);
        assert!(registry.get(Tag(1)).unwrap().cached_bounds().is_some());
        assert!(registry.get(Tag(2)).unwrap().cached_bounds().is_some());
        registry.bounding_box(Tag(1));
        assert_eq!(registry.bounds_recomputations(), before);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut registry = tree(&[1, 2]);
        registry.attach(Tag(1), Tag(2), 0).unwrap();
        assert!(registry.finalize_updates(Tag(1)));
        let once = registry.bounds_recomputations();
        assert!(registry.finalize_updates(Tag(1)));
        assert_eq!(registry.bounds_recomputations(), once);
        assert_eq!(registry.get(Tag(1)).unwrap().finalize_count(), 2);
        assert!(!registry.finalize_updates(Tag(42)));
    }
}
