#![forbid(unsafe_code)]

//! FrankenTUI Lanes
//!
//! Threading substrate for the mounting pipeline: a fixed set of logical
//! lanes, each backed by exactly one runner thread, and a vsync-driven frame
//! clock that ticks on the UI lane.
//!
//! # Key Components
//!
//! - [`TaskExecutor`] - one runner per [`Lane`]; async, sync (with deadlock
//!   detection) and delayed/periodic submission
//! - [`LaneBound`] - state that only one lane may touch
//! - [`FrameClock`] - per-vsync ticks with one-shots and auto re-arming
//! - [`Monotonic`] - injectable time source for frame budgets
//!
//! # Role in FrankenTUI
//! `ftui-mount` builds its transaction loop and preallocation budget on top of
//! these primitives. Nothing here knows about component trees.

pub mod debug_trace;
pub mod executor;
pub mod frame_clock;
pub mod lane;
pub mod lane_bound;
pub mod time;

mod wait_graph;

pub use executor::{
    ExceptionHandler, ExecutorConfig, ExecutorError, TaskExecutor, TaskPanic, TimerHandle,
};
pub use frame_clock::{
    DEFAULT_REFRESH_RATE_HZ, FrameClock, FrameClockConfig, FrameTime, ManualVsync,
    SubscriptionToken, TimerVsync, VsyncCallback, VsyncSource,
};
pub use lane::{LANE_COUNT, Lane, current_lane};
pub use lane_bound::{ConfinementError, LaneBound};
pub use time::{ManualMonotonic, Monotonic, SystemMonotonic};
