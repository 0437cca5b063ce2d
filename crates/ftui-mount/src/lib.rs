#![forbid(unsafe_code)]

//! FrankenTUI Mount
//!
//! Turns batches of declarative tree mutations from a render core into live
//! component instances, applied whole and in order on the UI lane, while
//! building expensive instances ahead of time in idle frame time.
//!
//! # Key Components
//!
//! - [`MountSession`] - entry point; owns one tree and its pipeline
//! - [`MountingCoordinator`] - serializes batches into UI-lane transactions
//! - [`InstanceProvider`] / [`PreallocationQueue`] - frame-budgeted
//!   construction ahead of `Create`
//! - [`InstanceRegistry`] - tag-keyed arena holding the live tree
//! - [`NativeHost`] - the four-call seam to the drawing layer
//!
//! Lanes, the executor and the frame clock come from `ftui-lanes`.

pub mod apply;
pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod geometry;
pub mod host;
pub mod instance;
pub mod mutation;
pub mod observer;
pub mod preallocation;
pub mod provider;
pub mod registry;
pub mod session;
pub mod state;
pub mod stats;

pub use apply::{FailedMutation, TransactionReport};
pub use config::{CoalescePolicy, DEFAULT_MIN_REMAINING_FRACTION, MountConfig, PreallocationConfig};
pub use coordinator::{MountingCoordinator, TransactionPhase, TransactionState};
pub use descriptor::{
    ComponentKind, EventSink, LayoutMetrics, NodeDescriptor, NodeOrigin, NodeSnapshot, Overflow,
    Props, StateSnapshot, Tag,
};
pub use error::{MountError, SessionError};
pub use geometry::Rect;
pub use host::{HostError, HostOp, MemoryHost, NativeHost, NodeHandle};
pub use instance::ComponentInstance;
pub use mutation::{Mutation, MutationBatch, MutationKind};
pub use observer::MountObserver;
pub use preallocation::{PreallocationQueue, PreallocationRequest};
pub use provider::{DrainReport, InstanceProvider, PreallocatedCache};
pub use registry::InstanceRegistry;
pub use session::{MountSession, MountSessionBuilder};
pub use state::MountState;
pub use stats::MountStats;

pub use ftui_lanes::{
    ConfinementError, ExecutorError, FrameClock, FrameClockConfig, FrameTime, Lane,
    ManualMonotonic, ManualVsync, Monotonic, TaskExecutor, VsyncSource,
};
