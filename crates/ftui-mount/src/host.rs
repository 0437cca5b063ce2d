#![forbid(unsafe_code)]

//! The native view layer behind mounted instances.
//!
//! [`NativeHost`] is the seam between the mounting pipeline and whatever
//! actually draws: a widget toolkit, a terminal surface, or the in-memory
//! [`MemoryHost`] used by tests and benchmarks. Hosts are only ever called
//! from the UI lane, but must be `Send + Sync` so sessions can be shared.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::descriptor::ComponentKind;

/// Opaque handle to a native node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub u64);

/// A native node could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub kind: ComponentKind,
    pub reason: String,
}

impl HostError {
    pub fn new(kind: ComponentKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host cannot build {}: {}", self.kind, self.reason)
    }
}

impl std::error::Error for HostError {}

/// Native view operations used by the mounting pipeline.
pub trait NativeHost: Send + Sync {
    /// Build a fresh native node of `kind`. May be expensive.
    fn create_node(&self, kind: &ComponentKind) -> Result<NodeHandle, HostError>;

    /// Release a native node. Unknown handles are ignored.
    fn destroy_node(&self, handle: NodeHandle);

    /// Attach `child` under `parent` at `index`, re-parenting if needed.
    fn attach_child(&self, parent: NodeHandle, child: NodeHandle, index: usize);

    /// Detach `child` from `parent`. No-op if it is not attached there.
    fn detach_child(&self, parent: NodeHandle, child: NodeHandle);
}

/// One recorded host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    Create {
        handle: NodeHandle,
        kind: ComponentKind,
    },
    Destroy {
        handle: NodeHandle,
    },
    Attach {
        parent: NodeHandle,
        child: NodeHandle,
        index: usize,
    },
    Detach {
        parent: NodeHandle,
        child: NodeHandle,
    },
}

#[derive(Debug)]
struct MemoryNode {
    kind: ComponentKind,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
}

#[derive(Debug, Default)]
struct MemoryHostState {
    nodes: HashMap<NodeHandle, MemoryNode>,
    ops: Vec<HostOp>,
    refused: HashSet<ComponentKind>,
    created: u64,
}

impl MemoryHostState {
    fn unlink(&mut self, child: NodeHandle) {
        let Some(parent) = self.nodes.get_mut(&child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
    }
}

type CreateHook = Box<dyn Fn(&ComponentKind) + Send + Sync>;

/// In-memory host for testing.
///
/// Keeps a real node tree, records every call, and can refuse kinds or run a
/// hook on each construction (e.g. advancing a manual clock to model cost).
#[derive(Default)]
pub struct MemoryHost {
    state: Mutex<MemoryHostState>,
    next_handle: AtomicU64,
    on_create: Option<CreateHook>,
}

impl MemoryHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` after every successful construction.
    #[must_use]
    pub fn with_create_hook(
        mut self,
        hook: impl Fn(&ComponentKind) + Send + Sync + 'static,
    ) -> Self {
        self.on_create = Some(Box::new(hook));
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryHostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `create_node` fail for `kind`.
    pub fn refuse_kind(&self, kind: impl Into<ComponentKind>) {
        self.lock().refused.insert(kind.into());
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Number of successful constructions so far.
    pub fn created_count(&self) -> u64 {
        self.lock().created
    }

    /// Whether `handle` refers to a live node.
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.lock().nodes.contains_key(&handle)
    }

    pub fn kind_of(&self, handle: NodeHandle) -> Option<ComponentKind> {
        self.lock().nodes.get(&handle).map(|n| n.kind.clone())
    }

    pub fn parent_of(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.lock().nodes.get(&handle).and_then(|n| n.parent)
    }

    pub fn children_of(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.lock()
            .nodes
            .get(&handle)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Every call recorded so far.
    pub fn ops(&self) -> Vec<HostOp> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }
}

impl NativeHost for MemoryHost {
    fn create_node(&self, kind: &ComponentKind) -> Result<NodeHandle, HostError> {
        let handle = {
            let mut state = self.lock();
            if state.refused.contains(kind) {
                return Err(HostError::new(kind.clone(), "kind refused by host"));
            }
            let handle = NodeHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
            state.nodes.insert(
                handle,
                MemoryNode {
                    kind: kind.clone(),
                    parent: None,
                    children: Vec::new(),
                },
            );
            state.ops.push(HostOp::Create {
                handle,
                kind: kind.clone(),
            });
            state.created += 1;
            handle
        };
        if let Some(hook) = &self.on_create {
            hook(kind);
        }
        Ok(handle)
    }

    fn destroy_node(&self, handle: NodeHandle) {
        let mut state = self.lock();
        state.unlink(handle);
        let Some(node) = state.nodes.remove(&handle) else {
            return;
        };
        for child in node.children {
            if let Some(c) = state.nodes.get_mut(&child) {
                c.parent = None;
            }
        }
        state.ops.push(HostOp::Destroy { handle });
    }

    fn attach_child(&self, parent: NodeHandle, child: NodeHandle, index: usize) {
        let mut state = self.lock();
        if !state.nodes.contains_key(&parent) || !state.nodes.contains_key(&child) {
            return;
        }
        state.unlink(child);
        if let Some(p) = state.nodes.get_mut(&parent) {
            let at = index.min(p.children.len());
            p.children.insert(at, child);
        }
        if let Some(c) = state.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
        state.ops.push(HostOp::Attach {
            parent,
            child,
            index,
        });
    }

    fn detach_child(&self, parent: NodeHandle, child: NodeHandle) {
        let mut state = self.lock();
        let attached_here = state
            .nodes
            .get(&child)
            .is_some_and(|c| c.parent == Some(parent));
        if attached_here {
            state.unlink(child);
        }
        state.ops.push(HostOp::Detach { parent, child });
    }
}

impl fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHost")
            .field("nodes", &self.node_count())
            .finish_non_exhaustive()
    }
}
