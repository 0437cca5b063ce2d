#![forbid(unsafe_code)]

//! Mutation instructions and the batches that carry them.

use crate::descriptor::{NodeDescriptor, Tag};

/// One instruction for transforming the mounted tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Materialize a new instance.
    Create { node: NodeDescriptor },
    /// Destroy an instance.
    Delete { node: NodeDescriptor },
    /// Attach `child` under `parent` at `index`.
    Insert {
        parent: Tag,
        child: NodeDescriptor,
        index: usize,
    },
    /// Detach `child` from `parent`; `index` is the expected position.
    Remove {
        parent: Tag,
        child: NodeDescriptor,
        index: usize,
    },
    /// Replace an existing instance's snapshot.
    Update { node: NodeDescriptor },
}

/// Discriminant of a [`Mutation`], for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Delete,
    Insert,
    Remove,
    Update,
}

impl MutationKind {
    pub const fn name(self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Delete => "delete",
            MutationKind::Insert => "insert",
            MutationKind::Remove => "remove",
            MutationKind::Update => "update",
        }
    }
}

impl Mutation {
    pub fn create(node: NodeDescriptor) -> Self {
        Mutation::Create { node }
    }

    pub fn delete(node: NodeDescriptor) -> Self {
        Mutation::Delete { node }
    }

    pub fn insert(parent: impl Into<Tag>, child: NodeDescriptor, index: usize) -> Self {
        Mutation::Insert {
            parent: parent.into(),
            child,
            index,
        }
    }

    pub fn remove(parent: impl Into<Tag>, child: NodeDescriptor, index: usize) -> Self {
        Mutation::Remove {
            parent: parent.into(),
            child,
            index,
        }
    }

    pub fn update(node: NodeDescriptor) -> Self {
        Mutation::Update { node }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create { .. } => MutationKind::Create,
            Mutation::Delete { .. } => MutationKind::Delete,
            Mutation::Insert { .. } => MutationKind::Insert,
            Mutation::Remove { .. } => MutationKind::Remove,
            Mutation::Update { .. } => MutationKind::Update,
        }
    }

    /// Tag of the node the mutation is about (the child for tree edits).
    pub fn tag(&self) -> Tag {
        match self {
            Mutation::Create { node } | Mutation::Delete { node } | Mutation::Update { node } => {
                node.tag
            }
            Mutation::Insert { child, .. } | Mutation::Remove { child, .. } => child.tag,
        }
    }
}

/// An ordered list of mutations produced by one render-core revision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationBatch {
    /// Revision number assigned by the producer.
    pub revision: u64,
    /// Mutations, applied in order.
    pub mutations: Vec<Mutation>,
}

impl MutationBatch {
    /// Empty batch for `revision`.
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            mutations: Vec::new(),
        }
    }

    /// Append a mutation.
    #[must_use]
    pub fn with(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mutation> {
        self.mutations.iter()
    }
}

impl FromIterator<Mutation> for MutationBatch {
    fn from_iter<I: IntoIterator<Item = Mutation>>(iter: I) -> Self {
        Self {
            revision: 0,
            mutations: iter.into_iter().collect(),
        }
    }
}
