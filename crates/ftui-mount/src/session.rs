#![forbid(unsafe_code)]

//! One mounting session: executor, frame clock, provider, registry and
//! coordinator wired together.
//!
//! The render core talks to a session through two calls:
//! [`MountSession::deliver_mutation_batch`] and
//! [`MountSession::request_preliminary_allocation`]. Everything else here is
//! for hosts and tests: reading the tree, waiting for pending work, and
//! tearing down.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ftui_mount::{MemoryHost, MountSession, Mutation, MutationBatch, NodeDescriptor, Tag};
//!
//! let host = Arc::new(MemoryHost::new());
//! let session = MountSession::new(host).unwrap();
//! session
//!     .deliver_mutation_batch(
//!         MutationBatch::new(1)
//!             .with(Mutation::create(NodeDescriptor::new(10, "View")))
//!             .with(Mutation::create(NodeDescriptor::new(11, "Text")))
//!             .with(Mutation::insert(10, NodeDescriptor::new(11, "Text"), 0)),
//!     )
//!     .unwrap();
//! session.flush().unwrap();
//! let children = session
//!     .read(|state| state.registry().get(Tag(10)).map(|i| i.children().to_vec()))
//!     .unwrap();
//! assert_eq!(children, Some(vec![Tag(11)]));
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use ftui_lanes::{
    ExecutorConfig, ExecutorError, FrameClock, Lane, LaneBound, Monotonic, SystemMonotonic,
    TaskExecutor, VsyncSource,
};

use crate::config::MountConfig;
use crate::coordinator::MountingCoordinator;
use crate::descriptor::{ComponentKind, Tag};
use crate::error::SessionError;
use crate::geometry::Rect;
use crate::host::NativeHost;
use crate::mutation::MutationBatch;
use crate::observer::MountObserver;
use crate::preallocation::{PreallocationQueue, PreallocationRequest};
use crate::provider::InstanceProvider;
use crate::state::MountState;
use crate::stats::MountStats;

/// Builder for [`MountSession`].
pub struct MountSessionBuilder {
    host: Arc<dyn NativeHost>,
    config: MountConfig,
    executor: Option<TaskExecutor>,
    vsync: Option<Arc<dyn VsyncSource>>,
    monotonic: Option<Arc<dyn Monotonic>>,
    observer: Option<Arc<dyn MountObserver>>,
}

impl MountSessionBuilder {
    #[must_use]
    pub fn with_config(mut self, config: MountConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing executor instead of spawning one.
    #[must_use]
    pub fn with_executor(mut self, executor: TaskExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Drive the frame clock from `vsync` instead of a software timer.
    #[must_use]
    pub fn with_vsync(mut self, vsync: Arc<dyn VsyncSource>) -> Self {
        self.vsync = Some(vsync);
        self
    }

    /// Time source for frame budgets.
    #[must_use]
    pub fn with_monotonic(mut self, monotonic: Arc<dyn Monotonic>) -> Self {
        self.monotonic = Some(monotonic);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn MountObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Spawn lanes (if needed) and wire the pipeline.
    pub fn build(self) -> io::Result<MountSession> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => TaskExecutor::new(ExecutorConfig::default())?,
        };
        let monotonic = self
            .monotonic
            .unwrap_or_else(|| Arc::new(SystemMonotonic::new()));
        let clock = match self.vsync {
            Some(vsync) => FrameClock::new(executor.clone(), vsync, self.config.frame_clock),
            None => FrameClock::with_timer(
                executor.clone(),
                self.config.frame_clock,
                Arc::clone(&monotonic),
            ),
        };
        let state = Arc::new(LaneBound::new(&executor, Lane::Ui, MountState::default()));
        let queue = Arc::new(PreallocationQueue::new());
        let provider = InstanceProvider::new(
            Arc::clone(&self.host),
            Arc::clone(&queue),
            clock.clone(),
            monotonic,
            self.config.preallocation,
            Arc::clone(&state),
        );
        let coordinator = MountingCoordinator::new(
            executor.clone(),
            Arc::clone(&self.host),
            Arc::clone(&provider),
            Arc::clone(&state),
            self.config.coalesce,
            self.observer,
        );
        tracing::debug!(
            refresh_hz = self.config.frame_clock.refresh_rate_hz,
            preallocation = self.config.preallocation.enabled,
            coalesce = ?self.config.coalesce,
            "mount session started"
        );
        Ok(MountSession {
            executor,
            clock,
            host: self.host,
            queue,
            provider,
            coordinator,
            state,
            config: self.config,
        })
    }
}

/// A live mounting pipeline for one component tree.
pub struct MountSession {
    executor: TaskExecutor,
    clock: FrameClock,
    host: Arc<dyn NativeHost>,
    queue: Arc<PreallocationQueue>,
    provider: Arc<InstanceProvider>,
    coordinator: MountingCoordinator,
    state: Arc<LaneBound<MountState>>,
    config: MountConfig,
}

impl MountSession {
    pub fn builder(host: Arc<dyn NativeHost>) -> MountSessionBuilder {
        MountSessionBuilder {
            host,
            config: MountConfig::default(),
            executor: None,
            vsync: None,
            monotonic: None,
            observer: None,
        }
    }

    /// Session with default configuration and its own executor.
    pub fn new(host: Arc<dyn NativeHost>) -> io::Result<Self> {
        Self::builder(host).build()
    }

    /// Hand a batch to the coordinator. Returns once it is queued.
    pub fn deliver_mutation_batch(&self, batch: MutationBatch) -> Result<(), ExecutorError> {
        self.coordinator.submit(batch)
    }

    /// Ask for an instance to be built during idle frame time.
    pub fn request_preliminary_allocation(
        &self,
        tag: impl Into<Tag>,
        kind: impl Into<ComponentKind>,
        identifier: Option<String>,
    ) {
        self.request_preallocation(PreallocationRequest::new(tag, kind, identifier));
    }

    /// Queue a preallocation request, optionally carrying an initial snapshot.
    pub fn request_preallocation(&self, request: PreallocationRequest) {
        if !self.config.preallocation.enabled {
            tracing::trace!(tag = %request.tag, "preallocation disabled, request dropped");
            return;
        }
        self.queue.push(request);
    }

    /// Run `f` against the mount state on the UI lane and return its result.
    pub fn read<R, F>(&self, f: F) -> Result<R, SessionError>
    where
        F: FnOnce(&MountState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        Ok(self
            .executor
            .run_sync(Lane::Ui, move || state.with(|s| f(s)))??)
    }

    /// Bounding box of `tag`, computing and caching it if needed.
    pub fn bounding_box(&self, tag: impl Into<Tag>) -> Result<Option<Rect>, SessionError> {
        let tag = tag.into();
        let state = Arc::clone(&self.state);
        Ok(self
            .executor
            .run_sync(Lane::Ui, move || state.with(|s| s.registry.bounding_box(tag)))??)
    }

    pub fn stats(&self) -> Result<MountStats, SessionError> {
        self.read(|state| state.stats)
    }

    /// Wait until everything queued on the UI lane before this call has run.
    pub fn flush(&self) -> Result<(), ExecutorError> {
        self.executor.drain(Lane::Ui)
    }

    /// Destroy every native node and empty the registry and cache.
    ///
    /// Also stops preallocation. Returns the number of nodes destroyed.
    pub fn teardown(&self) -> Result<usize, SessionError> {
        let dropped = self.provider.stop();
        let state = Arc::clone(&self.state);
        let host = Arc::clone(&self.host);
        let destroyed = self.executor.run_sync(Lane::Ui, move || {
            state.with(|s| {
                let instances = s.registry.drain().into_iter().chain(s.cache.drain());
                let mut destroyed = 0;
                for instance in instances {
                    host.destroy_node(instance.node());
                    destroyed += 1;
                }
                destroyed
            })
        })??;
        tracing::info!(destroyed, dropped_requests = dropped, "mount session torn down");
        Ok(destroyed)
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn coordinator(&self) -> &MountingCoordinator {
        &self.coordinator
    }

    pub fn provider(&self) -> &Arc<InstanceProvider> {
        &self.provider
    }

    pub fn queue(&self) -> &PreallocationQueue {
        &self.queue
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }
}

impl fmt::Debug for MountSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountSession")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}
