#![forbid(unsafe_code)]

//! Logical lanes of execution.
//!
//! A lane is one owning thread with its own task queue. Runner threads mark
//! themselves with [`enter_lane`] so that any code can ask which lane it is
//! running on via [`current_lane`].

use std::cell::Cell;
use std::fmt;

/// Number of lanes an executor owns.
pub const LANE_COUNT: usize = 4;

/// A single logical thread of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    /// Sole writer of the live component tree.
    Ui,
    /// Render core commits.
    Render,
    /// Long-running background work.
    Background,
    /// General purpose worker.
    Worker,
}

impl Lane {
    /// All lanes, in index order.
    pub const ALL: [Lane; LANE_COUNT] = [Lane::Ui, Lane::Render, Lane::Background, Lane::Worker];

    /// Stable index in `0..LANE_COUNT`.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Lane::Ui => 0,
            Lane::Render => 1,
            Lane::Background => 2,
            Lane::Worker => 3,
        }
    }

    /// Short lowercase name, used for thread names and log fields.
    pub const fn name(self) -> &'static str {
        match self {
            Lane::Ui => "ui",
            Lane::Render => "render",
            Lane::Background => "background",
            Lane::Worker => "worker",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

thread_local! {
    static CURRENT_LANE: Cell<Option<Lane>> = const { Cell::new(None) };
}

/// The lane the calling thread runs, if it is a lane runner.
#[inline]
pub fn current_lane() -> Option<Lane> {
    CURRENT_LANE.with(Cell::get)
}

/// Mark the calling thread as the runner of `lane`.
///
/// Restores the previous marking when the guard drops.
pub(crate) fn enter_lane(lane: Lane) -> LaneGuard {
    let previous = CURRENT_LANE.with(|cell| cell.replace(Some(lane)));
    LaneGuard { previous }
}

pub(crate) struct LaneGuard {
    previous: Option<Lane>,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        CURRENT_LANE.with(|cell| cell.set(self.previous));
    }
}
