#![forbid(unsafe_code)]

//! State owned by a single lane.
//!
//! [`LaneBound`] holds a value that only the runner thread of one lane may
//! touch. The inner mutex is never contended in correct use; it exists so the
//! wrapper is `Sync` and can be shared with code that hops onto the lane.
//! Access from any other thread, or a nested access from the owning lane,
//! returns a [`ConfinementError`] instead of racing or self-deadlocking.

use std::fmt;
use std::sync::{Mutex, PoisonError, TryLockError};
use std::thread::ThreadId;

use crate::executor::TaskExecutor;
use crate::lane::{Lane, current_lane};

/// Errors returned when lane-confined state is touched incorrectly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfinementError {
    /// Accessed from a thread other than the owning lane's runner.
    WrongLane {
        /// Lane that owns the state.
        owner: Lane,
        /// Lane of the calling thread, if it is a lane runner.
        current: Option<Lane>,
    },
    /// Accessed again while an access on the owning lane is in progress.
    Reentrant {
        /// Lane that owns the state.
        owner: Lane,
    },
}

impl fmt::Display for ConfinementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfinementError::WrongLane {
                owner,
                current: Some(current),
            } => write!(f, "state owned by lane {owner} accessed from lane {current}"),
            ConfinementError::WrongLane {
                owner,
                current: None,
            } => write!(f, "state owned by lane {owner} accessed from a non-lane thread"),
            ConfinementError::Reentrant { owner } => {
                write!(f, "re-entrant access to state owned by lane {owner}")
            }
        }
    }
}

impl std::error::Error for ConfinementError {}

/// A value confined to one lane of one executor.
pub struct LaneBound<T> {
    owner: Lane,
    thread: ThreadId,
    value: Mutex<T>,
}

impl<T> LaneBound<T> {
    /// Confine `value` to `lane` of `executor`.
    pub fn new(executor: &TaskExecutor, lane: Lane, value: T) -> Self {
        Self {
            owner: lane,
            thread: executor.thread_id(lane),
            value: Mutex::new(value),
        }
    }

    /// Lane that owns the value.
    pub fn owner(&self) -> Lane {
        self.owner
    }

    /// Whether the calling thread may access the value.
    pub fn is_accessible(&self) -> bool {
        std::thread::current().id() == self.thread
    }

    /// Run `f` with exclusive access to the value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, ConfinementError> {
        if !self.is_accessible() {
            return Err(ConfinementError::WrongLane {
                owner: self.owner,
                current: current_lane(),
            });
        }
        let mut guard = match self.value.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(ConfinementError::Reentrant { owner: self.owner });
            }
        };
        Ok(f(&mut guard))
    }

    /// Consume the wrapper and return the value, from any thread.
    pub fn into_inner(self) -> T {
        self.value.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for LaneBound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneBound")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn access_from_owner_lane_succeeds() {
        let exec = TaskExecutor::with_defaults().unwrap();
        let bound = Arc::new(LaneBound::new(&exec, Lane::Ui, 0u32));
        let shared = Arc::clone(&bound);
        let result = exec
            .run_sync(Lane::Ui, move || {
                shared.with(|v| {
                    *v += 1;
                    *v
                })
            })
            .unwrap();
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn access_from_other_thread_is_rejected() {
        let exec = TaskExecutor::with_defaults().unwrap();
        let bound = LaneBound::new(&exec, Lane::Ui, 0u32);
        assert_eq!(
            bound.with(|v| *v),
            Err(ConfinementError::WrongLane {
                owner: Lane::Ui,
                current: None
            })
        );

        let bound = Arc::new(bound);
        let shared = Arc::clone(&bound);
        let result = exec
            .run_sync(Lane::Render, move || shared.with(|v| *v))
            .unwrap();
        assert_eq!(
            result,
            Err(ConfinementError::WrongLane {
                owner: Lane::Ui,
                current: Some(Lane::Render)
            })
        );
    }

    #[test]
    fn nested_access_is_reentrant_error() {
        let exec = TaskExecutor::with_defaults().unwrap();
        let bound = Arc::new(LaneBound::new(&exec, Lane::Ui, 0u32));
        let shared = Arc::clone(&bound);
        let result = exec
            .run_sync(Lane::Ui, move || shared.with(|_| shared.with(|v| *v)))
            .unwrap();
        assert_eq!(result, Ok(Err(ConfinementError::Reentrant { owner: Lane::Ui })));
    }

    #[test]
    fn into_inner_returns_value() {
        let exec = TaskExecutor::with_defaults().unwrap();
        let bound = LaneBound::new(&exec, Lane::Worker, vec![1, 2, 3]);
        assert_eq!(bound.into_inner(), vec![1, 2, 3]);
    }
}
