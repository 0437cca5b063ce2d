#![forbid(unsafe_code)]

//! Instance construction, ahead of time and on demand.
//!
//! The [`InstanceProvider`] listens to the frame clock while the
//! [`PreallocationQueue`] has work. On each tick it builds queued instances
//! into a cache until the time left before the next frame deadline drops
//! below a configured share of the frame period, then yields. Transactions
//! claim cached instances by tag via [`InstanceProvider::get_or_claim`] and
//! fall back to building synchronously.
//!
//! The provider only subscribes while the queue is non-empty; the clock in
//! turn only requests vsync while it has subscribers, so an idle session
//! schedules no frames at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ftui_lanes::{FrameClock, FrameTime, LaneBound, Monotonic, SubscriptionToken, debug_trace};

use crate::config::PreallocationConfig;
use crate::descriptor::{ComponentKind, Tag};
use crate::error::MountError;
use crate::host::NativeHost;
use crate::instance::ComponentInstance;
use crate::preallocation::PreallocationQueue;
use crate::state::MountState;
use crate::stats::MountStats;

/// Instances built ahead of their `Create`, keyed by tag.
#[derive(Debug, Default)]
pub struct PreallocatedCache {
    instances: HashMap<Tag, ComponentInstance>,
}

impl PreallocatedCache {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.instances.contains_key(&tag)
    }

    pub fn get(&self, tag: Tag) -> Option<&ComponentInstance> {
        self.instances.get(&tag)
    }

    pub(crate) fn insert(&mut self, instance: ComponentInstance) {
        self.instances.insert(instance.tag(), instance);
    }

    pub(crate) fn take(&mut self, tag: Tag) -> Option<ComponentInstance> {
        self.instances.remove(&tag)
    }

    pub(crate) fn drain(&mut self) -> Vec<ComponentInstance> {
        self.instances.drain().map(|(_, instance)| instance).collect()
    }
}

/// Outcome of one frame's preallocation work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Instances built and cached.
    pub constructed: usize,
    /// Requests discarded because the tag was already mounted or cached.
    pub stale: usize,
    /// Requests the host refused.
    pub failed: usize,
    /// Work was left in the queue when the budget ran out.
    pub yielded: bool,
}

/// Builds component instances for the mounting pipeline.
pub struct InstanceProvider {
    host: Arc<dyn NativeHost>,
    queue: Arc<PreallocationQueue>,
    clock: FrameClock,
    monotonic: Arc<dyn Monotonic>,
    config: PreallocationConfig,
    state: Arc<LaneBound<MountState>>,
    subscription: Mutex<Option<SubscriptionToken>>,
}

impl InstanceProvider {
    /// Create a provider and register it as `queue`'s delegate.
    pub fn new(
        host: Arc<dyn NativeHost>,
        queue: Arc<PreallocationQueue>,
        clock: FrameClock,
        monotonic: Arc<dyn Monotonic>,
        config: PreallocationConfig,
        state: Arc<LaneBound<MountState>>,
    ) -> Arc<Self> {
        let provider = Arc::new(Self {
            host,
            queue: Arc::clone(&queue),
            clock,
            monotonic,
            config,
            state,
            subscription: Mutex::new(None),
        });
        let weak = Arc::downgrade(&provider);
        queue.set_delegate(move || {
            if let Some(provider) = weak.upgrade() {
                provider.ensure_subscribed();
            }
        });
        provider
    }

    pub fn config(&self) -> PreallocationConfig {
        self.config
    }

    fn subscription(&self) -> MutexGuard<'_, Option<SubscriptionToken>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the provider is currently listening for frames.
    pub fn is_subscribed(&self) -> bool {
        self.subscription().is_some()
    }

    /// Start listening for frames if not already.
    pub fn ensure_subscribed(self: &Arc<Self>) {
        let mut subscription = self.subscription();
        if subscription.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let token = self.clock.subscribe(move |frame| {
            if let Some(provider) = weak.upgrade() {
                provider.on_frame(frame);
            }
        });
        *subscription = Some(token);
        tracing::trace!(pending = self.queue.len(), "preallocation subscribed to frame clock");
    }

    /// Stop listening if the queue has drained.
    ///
    /// Checked under the subscription lock so a concurrent push either sees
    /// the old token or subscribes afresh after this returns.
    fn unsubscribe_if_idle(&self) {
        let mut subscription = self.subscription();
        if !self.queue.is_empty() {
            return;
        }
        if let Some(token) = subscription.take() {
            self.clock.unsubscribe(token);
            tracing::trace!("preallocation idle, unsubscribed from frame clock");
        }
    }

    /// Stop listening for frames and drop pending requests.
    pub fn stop(&self) -> usize {
        let mut subscription = self.subscription();
        if let Some(token) = subscription.take() {
            self.clock.unsubscribe(token);
        }
        self.queue.clear()
    }

    /// Frame-clock callback. Runs on the UI lane.
    pub fn on_frame(&self, frame: FrameTime) {
        if self.queue.is_empty() {
            self.unsubscribe_if_idle();
            return;
        }
        if !self.config.enabled {
            let dropped = self.stop();
            tracing::debug!(dropped, "preallocation disabled, dropping requests");
            return;
        }
        match self.state.with(|state| self.drain_for_frame(state, frame)) {
            Ok(report) => {
                debug_trace!(
                    "prealloc frame={} built={} stale={} yielded={}",
                    frame.frame_index,
                    report.constructed,
                    report.stale,
                    report.yielded
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "preallocation skipped, mount state unavailable");
            }
        }
        self.unsubscribe_if_idle();
    }

    /// Build queued instances until the frame budget runs out.
    ///
    /// Stops before popping once less than `min_remaining_fraction` of the
    /// nominal period remains before `frame`'s deadline. A request already
    /// popped always completes.
    pub fn drain_for_frame(&self, state: &mut MountState, frame: FrameTime) -> DrainReport {
        let period = self.clock.nominal_period();
        let deadline = frame.deadline(period);
        let min_remaining = self.config.min_remaining(period);
        let mut report = DrainReport::default();

        loop {
            let remaining = deadline.saturating_sub(self.monotonic.now());
            if remaining < min_remaining {
                report.yielded = !self.queue.is_empty();
                tracing::trace!(
                    remaining_us = remaining.as_micros() as u64,
                    built = report.constructed,
                    pending = self.queue.len(),
                    "frame budget spent"
                );
                break;
            }
            let Some(request) = self.queue.pop() else {
                break;
            };
            if state.registry.contains(request.tag) || state.cache.contains(request.tag) {
                tracing::trace!(tag = %request.tag, "stale preallocation request");
                report.stale += 1;
                continue;
            }
            match self.construct(request.tag, &request.kind, request.identifier.clone()) {
                Ok(mut instance) => {
                    instance.mark_preallocated();
                    if let Some(snapshot) = &request.snapshot {
                        instance.apply_snapshot(snapshot);
                    }
                    state.cache.insert(instance);
                    report.constructed += 1;
                }
                Err(err) => {
                    tracing::warn!(tag = %request.tag, error = %err, "preallocation failed");
                    report.failed += 1;
                }
            }
        }

        let stats = &mut state.stats;
        stats.preallocated += report.constructed as u64;
        stats.preallocations_stale += report.stale as u64;
        stats.construction_failures += report.failed as u64;
        if report.yielded {
            stats.provider_yields += 1;
        }
        report
    }

    /// Build a fresh instance. Nothing is registered on failure.
    pub fn construct(
        &self,
        tag: Tag,
        kind: &ComponentKind,
        identifier: Option<String>,
    ) -> Result<ComponentInstance, MountError> {
        let node = self
            .host
            .create_node(kind)
            .map_err(|err| MountError::ConstructionFailure {
                tag,
                kind: kind.clone(),
                reason: err.reason,
            })?;
        let revealed = !self.config.suppress_unlaid_instances;
        Ok(ComponentInstance::new(tag, kind.clone(), identifier, node, revealed))
    }

    /// Take the cached instance for `tag`, or build one now.
    ///
    /// A cached instance of a different kind is destroyed and rebuilt. A
    /// claimed instance starts hidden again (when unlaid instances are
    /// suppressed), exactly like a fresh one, so visibility follows the
    /// layout the caller applies next rather than the speculative one.
    pub fn get_or_claim(
        &self,
        cache: &mut PreallocatedCache,
        stats: &mut MountStats,
        tag: Tag,
        kind: &ComponentKind,
        identifier: Option<String>,
    ) -> Result<ComponentInstance, MountError> {
        if let Some(mut cached) = cache.take(tag) {
            if cached.kind() == kind {
                cached.set_identifier(identifier);
                cached.reset_reveal(!self.config.suppress_unlaid_instances);
                stats.preallocations_claimed += 1;
                return Ok(cached);
            }
            tracing::debug!(
                tag = %tag,
                cached = %cached.kind(),
                wanted = %kind,
                "preallocated kind mismatch, rebuilding"
            );
            self.host.destroy_node(cached.node());
        }
        match self.construct(tag, kind, identifier) {
            Ok(instance) => {
                stats.instances_constructed += 1;
                Ok(instance)
            }
            Err(err) => {
                stats.construction_failures += 1;
                Err(err)
            }
        }
    }

    /// Destroy every unclaimed cached instance. Returns how many.
    pub fn clear_cache(&self, cache: &mut PreallocatedCache) -> usize {
        let evicted = cache.drain();
        for instance in &evicted {
            self.host.destroy_node(instance.node());
        }
        evicted.len()
    }
}

impl fmt::Debug for InstanceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceProvider")
            .field("config", &self.config)
            .field("pending", &self.queue.len())
            .field("subscribed", &self.is_subscribed())
            .finish_non_exhaustive()
    }
}
