#![forbid(unsafe_code)]

//! Queue of instances to build ahead of their `Create` mutation.
//!
//! The render core pushes requests from whatever lane it runs on; the
//! [`InstanceProvider`](crate::InstanceProvider) pops them on the UI lane
//! during frame idle time. After each push the queue notifies its delegate
//! so the provider can start listening for frames.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::descriptor::{ComponentKind, NodeDescriptor, NodeSnapshot, Tag};

/// Request to build one instance early.
#[derive(Debug, Clone, PartialEq)]
pub struct PreallocationRequest {
    pub tag: Tag,
    pub kind: ComponentKind,
    pub identifier: Option<String>,
    /// Initial props/state/layout to apply after construction.
    pub snapshot: Option<NodeSnapshot>,
}

impl PreallocationRequest {
    pub fn new(
        tag: impl Into<Tag>,
        kind: impl Into<ComponentKind>,
        identifier: Option<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            kind: kind.into(),
            identifier,
            snapshot: None,
        }
    }

    #[must_use]
    pub fn with_snapshot(mut self, snapshot: NodeSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

impl From<&NodeDescriptor> for PreallocationRequest {
    fn from(node: &NodeDescriptor) -> Self {
        Self {
            tag: node.tag,
            kind: node.kind.clone(),
            identifier: node.identifier.clone(),
            snapshot: Some(node.snapshot.clone()),
        }
    }
}

type Delegate = Arc<dyn Fn() + Send + Sync>;

/// Thread-safe FIFO of [`PreallocationRequest`]s.
#[derive(Default)]
pub struct PreallocationQueue {
    requests: Mutex<VecDeque<PreallocationRequest>>,
    delegate: RwLock<Option<Delegate>>,
}

impl PreallocationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PreallocationRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Call `delegate` after every push, outside the queue lock.
    pub fn set_delegate(&self, delegate: impl Fn() + Send + Sync + 'static) {
        *self.delegate.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(delegate));
    }

    pub fn clear_delegate(&self) {
        *self.delegate.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Append a request. Callable from any thread.
    pub fn push(&self, request: PreallocationRequest) {
        self.lock().push_back(request);
        let delegate = self
            .delegate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(delegate) = delegate {
            delegate();
        }
    }

    /// Take the oldest request.
    pub(crate) fn pop(&self) -> Option<PreallocationRequest> {
        self.lock().pop_front()
    }

    /// Drop every pending request. Returns how many were dropped.
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<_> = self.lock().drain(..).collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Debug for PreallocationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreallocationQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
