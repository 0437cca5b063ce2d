#![forbid(unsafe_code)]

//! A mounted component instance.

use crate::descriptor::{
    ComponentKind, EventSink, LayoutMetrics, NodeSnapshot, Props, StateSnapshot, Tag,
};
use crate::geometry::Rect;
use crate::host::NodeHandle;

/// Live counterpart of a node: its native handle, tree links and the most
/// recently applied snapshot.
///
/// Instances live in an [`InstanceRegistry`](crate::InstanceRegistry) or in
/// the preallocation cache and are only touched on the UI lane.
#[derive(Debug, Clone)]
pub struct ComponentInstance {
    tag: Tag,
    kind: ComponentKind,
    identifier: Option<String>,
    node: NodeHandle,
    pub(crate) parent: Option<Tag>,
    pub(crate) children: Vec<Tag>,
    props: Props,
    state: Option<StateSnapshot>,
    events: Option<EventSink>,
    layout: LayoutMetrics,
    revealed: bool,
    bridge: bool,
    preallocated: bool,
    pub(crate) bounds: Option<Rect>,
    pub(crate) bounds_dirty: bool,
    pub(crate) finalize_count: u64,
}

impl ComponentInstance {
    /// Wrap a freshly built native node.
    ///
    /// `revealed` is the initial visibility; unlaid instances normally start
    /// hidden and reveal on their first non-empty frame.
    pub fn new(
        tag: Tag,
        kind: ComponentKind,
        identifier: Option<String>,
        node: NodeHandle,
        revealed: bool,
    ) -> Self {
        Self {
            tag,
            kind,
            identifier,
            node,
            parent: None,
            children: Vec::new(),
            props: Props::default(),
            state: None,
            events: None,
            layout: LayoutMetrics::default(),
            revealed,
            bridge: false,
            preallocated: false,
            bounds: None,
            bounds_dirty: true,
            finalize_count: 0,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn node(&self) -> NodeHandle {
        self.node
    }

    pub fn parent(&self) -> Option<Tag> {
        self.parent
    }

    pub fn children(&self) -> &[Tag] {
        &self.children
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn state(&self) -> Option<&StateSnapshot> {
        self.state.as_ref()
    }

    pub fn events(&self) -> Option<&EventSink> {
        self.events.as_ref()
    }

    pub fn layout(&self) -> &LayoutMetrics {
        &self.layout
    }

    /// Whether the native node is shown. False until the first non-empty
    /// frame when unlaid instances are suppressed.
    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    /// Whether this instance wraps a host-owned node.
    pub fn is_bridge(&self) -> bool {
        self.bridge
    }

    /// Whether this instance was built ahead of its `Create`.
    pub fn was_preallocated(&self) -> bool {
        self.preallocated
    }

    /// Number of finalize passes run on this instance.
    pub fn finalize_count(&self) -> u64 {
        self.finalize_count
    }

    /// Bounding box from the last computation, if still valid.
    pub fn cached_bounds(&self) -> Option<Rect> {
        if self.bounds_dirty { None } else { self.bounds }
    }

    pub(crate) fn mark_bridge(&mut self) {
        self.bridge = true;
    }

    pub(crate) fn mark_preallocated(&mut self) {
        self.preallocated = true;
    }

    pub(crate) fn set_identifier(&mut self, identifier: Option<String>) {
        self.identifier = identifier;
    }

    /// Restart the reveal rule from `revealed`.
    pub(crate) fn reset_reveal(&mut self, revealed: bool) {
        self.revealed = revealed;
    }

    /// Replace props, state and events wholesale and take the new layout.
    ///
    /// Returns `true` if the layout changed.
    pub fn apply_snapshot(&mut self, snapshot: &NodeSnapshot) -> bool {
        self.props = snapshot.props.clone();
        self.state = snapshot.state.clone();
        self.events = snapshot.events.clone();
        let layout_changed = self.layout != snapshot.layout;
        if layout_changed {
            self.layout = snapshot.layout;
            self.bounds_dirty = true;
        }
        if !self.revealed && !self.layout.frame.is_empty() {
            self.revealed = true;
        }
        layout_changed
    }
}
