#![forbid(unsafe_code)]

//! Immutable node descriptions produced by the render core.
//!
//! A [`NodeDescriptor`] carries everything the mounting layer needs to build
//! or refresh one component instance: its [`Tag`], [`ComponentKind`], an
//! optional identifier, and a [`NodeSnapshot`] of props, state, event sink
//! and layout. Snapshots are cheap to clone; payloads sit behind `Arc`.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::geometry::Rect;

/// Identifies one node across the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub i32);

impl From<i32> for Tag {
    fn from(value: i32) -> Self {
        Tag(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name of a component type, e.g. `"View"` or `"Text"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKind(Arc<str>);

impl ComponentKind {
    /// Create a kind from its name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// The kind's name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ComponentKind {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Component properties. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Props(Arc<Value>);

impl Props {
    /// Wrap a JSON value.
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// The underlying value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Look up a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Identifier declared in props under `nativeID` or `id`.
    pub fn identifier(&self) -> Option<&str> {
        self.get("nativeID")
            .or_else(|| self.get("id"))
            .and_then(Value::as_str)
    }

    /// Whether both handles point at the same payload.
    pub fn ptr_eq(&self, other: &Props) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Value> for Props {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Component-local state owned by the render core.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot(Arc<Value>);

impl StateSnapshot {
    /// Wrap a JSON value.
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// The underlying value.
    pub fn value(&self) -> &Value {
        &self.0
    }
}

type EmitFn = dyn Fn(&str, &Value) + Send + Sync;

/// Channel through which a mounted instance reports events back.
///
/// Equality is identity: two sinks are equal only if they share a callback.
#[derive(Clone)]
pub struct EventSink(Arc<EmitFn>);

impl EventSink {
    /// Create a sink that forwards to `emit`.
    pub fn new(emit: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(emit))
    }

    /// Dispatch an event.
    pub fn emit(&self, name: &str, payload: &Value) {
        (self.0)(name, payload);
    }
}

impl PartialEq for EventSink {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// How a node treats descendants that extend past its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Descendants contribute to the bounding box.
    #[default]
    Visible,
    /// Descendants are clipped; the bounding box is the frame itself.
    Hidden,
}

/// Computed layout for one node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutMetrics {
    /// Frame relative to the parent.
    pub frame: Rect,
    /// Overflow behaviour.
    pub overflow: Overflow,
}

impl LayoutMetrics {
    /// Layout with the given frame and visible overflow.
    pub fn new(frame: Rect) -> Self {
        Self {
            frame,
            overflow: Overflow::Visible,
        }
    }

    /// Set the overflow behaviour.
    #[must_use]
    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// Whether descendants are clipped to the frame.
    #[inline]
    pub fn clips(&self) -> bool {
        self.overflow == Overflow::Hidden
    }
}

/// Snapshot of props, state, events and layout for one node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeSnapshot {
    pub props: Props,
    pub state: Option<StateSnapshot>,
    pub events: Option<EventSink>,
    pub layout: LayoutMetrics,
}

/// Where the node's native view comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeOrigin {
    /// Created by the mounting layer from a `Create` mutation.
    #[default]
    Native,
    /// Owned by the embedding host; bridged into the tree on first `Insert`.
    External,
}

/// Immutable description of one node at one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    pub tag: Tag,
    pub kind: ComponentKind,
    pub identifier: Option<String>,
    pub origin: NodeOrigin,
    pub snapshot: NodeSnapshot,
}

impl NodeDescriptor {
    /// Describe a native node with empty props and zero layout.
    pub fn new(tag: impl Into<Tag>, kind: impl Into<ComponentKind>) -> Self {
        Self {
            tag: tag.into(),
            kind: kind.into(),
            identifier: None,
            origin: NodeOrigin::Native,
            snapshot: NodeSnapshot::default(),
        }
    }

    /// Replace props. Picks up `nativeID`/`id` as the identifier unless one
    /// was set explicitly.
    #[must_use]
    pub fn with_props(mut self, props: impl Into<Props>) -> Self {
        let props = props.into();
        if self.identifier.is_none() {
            self.identifier = props.identifier().map(str::to_owned);
        }
        self.snapshot.props = props;
        self
    }

    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.snapshot.state = Some(StateSnapshot::new(state));
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.snapshot.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: LayoutMetrics) -> Self {
        self.snapshot.layout = layout;
        self
    }

    /// Shorthand for a visible-overflow layout with `frame`.
    #[must_use]
    pub fn with_frame(self, frame: Rect) -> Self {
        self.with_layout(LayoutMetrics::new(frame))
    }

    /// Mark the node as host-owned.
    #[must_use]
    pub fn external(mut self) -> Self {
        self.origin = NodeOrigin::External;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn identifier_comes_from_props() {
        let node = NodeDescriptor::new(3, "View").with_props(json!({ "nativeID": "header" }));
        assert_eq!(node.identifier.as_deref(), Some("header"));

        let node = NodeDescriptor::new(4, "View").with_props(json!({ "id": "footer" }));
        assert_eq!(node.identifier.as_deref(), Some("footer"));
    }

    #[test]
    fn explicit_identifier_wins() {
        let node = NodeDescriptor::new(3, "View")
            .with_identifier("explicit")
            .with_props(json!({ "nativeID": "header" }));
        assert_eq!(node.identifier.as_deref(), Some("explicit"));
    }

    #[test]
    fn non_string_identifier_is_ignored() {
        let props = Props::new(json!({ "id": 7 }));
        assert_eq!(props.identifier(), None);
    }

    #[test]
    fn event_sink_equality_is_identity() {
        let a = EventSink::new(|_, _| {});
        let b = EventSink::new(|_, _| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn event_sink_forwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = EventSink::new(move |name, payload| {
            sink_seen.lock().unwrap().push((name.to_owned(), payload.clone()));
        });
        sink.emit("press", &json!({ "x": 1 }));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("press".to_owned(), json!({ "x": 1 }))]
        );
    }

    #[test]
    fn hidden_overflow_clips() {
        let layout = LayoutMetrics::new(Rect::from_size(1.0, 1.0)).with_overflow(Overflow::Hidden);
        assert!(layout.clips());
        assert!(!LayoutMetrics::default().clips());
    }

    #[test]
    fn tag_display() {
        assert_eq!(Tag(11).to_string(), "#11");
        assert_eq!(ComponentKind::from("Text").to_string(), "Text");
    }
}
