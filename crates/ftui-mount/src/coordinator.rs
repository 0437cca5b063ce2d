#![forbid(unsafe_code)]

//! Serializes mutation batches onto the UI lane.
//!
//! `submit` may be called from any lane. The batch is queued and the
//! coordinator hops to the UI lane, where a small state machine guarantees
//! one transaction at a time:
//!
//! ```text
//!   Idle ──submit──▶ Applying{follow_up: false} ──drained──▶ Idle
//!                      │   ▲
//!            submit    │   │  pass ends with follow_up set:
//!   (re-entrant or     ▼   │  drain the queue again
//!    queued behind) Applying{follow_up: true}
//! ```
//!
//! A submit that lands while a transaction is running only raises the
//! follow-up flag; the running loop picks up whatever is pending when the
//! current pass ends. Every queued batch is applied whole, so batches never
//! interleave.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ftui_lanes::{ConfinementError, ExecutorError, Lane, LaneBound, TaskExecutor, debug_trace};

use crate::apply::apply_batch;
use crate::config::CoalescePolicy;
use crate::host::NativeHost;
use crate::mutation::MutationBatch;
use crate::observer::MountObserver;
use crate::provider::InstanceProvider;
use crate::state::MountState;

/// Phase of the transaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPhase {
    /// No transaction running.
    #[default]
    Idle,
    /// A transaction is running.
    Applying {
        /// Another submit arrived during this pass.
        follow_up: bool,
    },
}

impl TransactionPhase {
    pub fn is_idle(self) -> bool {
        self == TransactionPhase::Idle
    }
}

/// UI-lane state of the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionState {
    pub phase: TransactionPhase,
    /// Submits that arrived while applying.
    pub follow_ups: u64,
    /// Passes of the apply loop.
    pub passes: u64,
}

struct CoordinatorInner {
    executor: TaskExecutor,
    host: Arc<dyn NativeHost>,
    provider: Arc<InstanceProvider>,
    state: Arc<LaneBound<MountState>>,
    transaction: LaneBound<TransactionState>,
    pending: Mutex<VecDeque<MutationBatch>>,
    policy: CoalescePolicy,
    observer: Option<Arc<dyn MountObserver>>,
}

/// Applies mutation batches on the UI lane, one transaction at a time.
#[derive(Clone)]
pub struct MountingCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl MountingCoordinator {
    pub fn new(
        executor: TaskExecutor,
        host: Arc<dyn NativeHost>,
        provider: Arc<InstanceProvider>,
        state: Arc<LaneBound<MountState>>,
        policy: CoalescePolicy,
        observer: Option<Arc<dyn MountObserver>>,
    ) -> Self {
        let transaction = LaneBound::new(&executor, Lane::Ui, TransactionState::default());
        Self {
            inner: Arc::new(CoordinatorInner {
                executor,
                host,
                provider,
                state,
                transaction,
                pending: Mutex::new(VecDeque::new()),
                policy,
                observer,
            }),
        }
    }

    /// Queue `batch` and schedule a transaction on the UI lane.
    ///
    /// On the UI lane itself the transaction runs before this returns, unless
    /// one is already running, in which case the batch is picked up by the
    /// running loop.
    ///
    /// Under [`CoalescePolicy::ApplyAll`] nothing is dropped, so a render
    /// core that outpaces the UI lane grows the pending queue without bound.
    /// [`CoalescePolicy::LatestOnly`] caps what a pass applies at one batch.
    pub fn submit(&self, batch: MutationBatch) -> Result<(), ExecutorError> {
        tracing::trace!(revision = batch.revision, mutations = batch.len(), "batch submitted");
        self.inner.pending().push_back(batch);
        if self.inner.executor.is_current(Lane::Ui) {
            self.inner.run();
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        self.inner.executor.run_async(Lane::Ui, move || inner.run())
    }

    /// Current phase. UI lane only.
    pub fn phase(&self) -> Result<TransactionPhase, ConfinementError> {
        self.inner.transaction.with(|t| t.phase)
    }

    /// Phase plus counters. UI lane only.
    pub fn transaction_state(&self) -> Result<TransactionState, ConfinementError> {
        self.inner.transaction.with(|t| *t)
    }

    /// Batches queued but not yet picked up.
    pub fn pending(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn policy(&self) -> CoalescePolicy {
        self.inner.policy
    }
}

impl CoordinatorInner {
    fn pending(&self) -> MutexGuard<'_, VecDeque<MutationBatch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry point on the UI lane.
    fn run(&self) {
        let entered = self.transaction.with(|t| match t.phase {
            TransactionPhase::Applying { .. } => {
                t.phase = TransactionPhase::Applying { follow_up: true };
                t.follow_ups += 1;
                false
            }
            TransactionPhase::Idle => {
                t.phase = TransactionPhase::Applying { follow_up: false };
                true
            }
        });
        match entered {
            Ok(true) => {}
            Ok(false) => {
                debug_trace!("submit coalesced into running transaction");
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "transaction state unavailable");
                return;
            }
        }

        loop {
            let _ = self.transaction.with(|t| {
                t.phase = TransactionPhase::Applying { follow_up: false };
                t.passes += 1;
            });
            let (batches, superseded) = self.take_pending();
            if superseded > 0 {
                tracing::debug!(superseded, "older batches superseded");
                let _ = self
                    .state
                    .with(|state| state.stats.batches_superseded += superseded as u64);
            }
            for batch in &batches {
                self.apply(batch);
            }
            let again = self
                .transaction
                .with(|t| matches!(t.phase, TransactionPhase::Applying { follow_up: true }))
                .unwrap_or(false);
            if !again && self.pending().is_empty() {
                break;
            }
        }

        let _ = self
            .transaction
            .with(|t| t.phase = TransactionPhase::Idle);
    }

    /// Batches to apply this pass, and how many were dropped.
    fn take_pending(&self) -> (Vec<MutationBatch>, usize) {
        let mut pending = self.pending();
        match self.policy {
            CoalescePolicy::ApplyAll => (pending.drain(..).collect(), 0),
            CoalescePolicy::LatestOnly => {
                let superseded = pending.len().saturating_sub(1);
                let latest = pending.pop_back();
                pending.clear();
                (latest.into_iter().collect(), superseded)
            }
        }
    }

    fn apply(&self, batch: &MutationBatch) {
        let span = tracing::debug_span!(
            "mount_transaction",
            revision = batch.revision,
            mutations = batch.len()
        );
        let _guard = span.enter();

        if let Some(observer) = &self.observer {
            observer.transaction_started(batch.revision);
        }
        let observer = self.observer.as_deref();
        let result = self.state.with(|state| {
            apply_batch(&self.provider, self.host.as_ref(), observer, state, batch)
        });
        match result {
            Ok(report) => {
                tracing::debug!(
                    applied = report.applied,
                    failed = report.failed.len(),
                    finalized = report.finalized.len(),
                    evicted = report.evicted,
                    duration_us = report.duration.as_micros() as u64,
                    "transaction applied"
                );
                if let Some(observer) = &self.observer {
                    observer.transaction_finished(&report);
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "transaction dropped, mount state unavailable");
            }
        }
    }
}

impl fmt::Debug for MountingCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountingCoordinator")
            .field("policy", &self.inner.policy)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
