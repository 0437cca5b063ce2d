#![forbid(unsafe_code)]

//! Per-vsync frame clock.
//!
//! The clock delivers one tick per vsync to its subscribers, always on the UI
//! lane. It only asks its [`VsyncSource`] for the next vsync while someone is
//! listening: subscribing to an idle clock arms it, every tick re-arms it
//! while subscribers or one-shots remain, and it goes quiet once the set is
//! empty.
//!
//! # Tick order
//!
//! 1. One-shot callbacks queued with [`FrameClock::enqueue_one_shot`] run once
//!    and are discarded.
//! 2. Subscribers run in subscription order over a snapshot taken at tick
//!    start. A subscriber removed during the tick is skipped for the rest of
//!    it; one added during the tick first runs on the next tick.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::executor::TaskExecutor;
use crate::lane::Lane;
use crate::time::Monotonic;

/// Default display refresh rate.
pub const DEFAULT_REFRESH_RATE_HZ: f64 = 120.0;

/// Frame clock configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClockConfig {
    /// Nominal display refresh rate in Hz.
    pub refresh_rate_hz: f64,
}

impl Default for FrameClockConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
        }
    }
}

impl FrameClockConfig {
    /// Set the nominal refresh rate.
    pub fn with_refresh_rate(mut self, hz: f64) -> Self {
        self.refresh_rate_hz = hz;
        self
    }

    /// Duration of one nominal frame. Invalid rates fall back to the default.
    pub fn nominal_period(&self) -> Duration {
        let hz = if self.refresh_rate_hz.is_finite() && self.refresh_rate_hz > 0.0 {
            self.refresh_rate_hz
        } else {
            DEFAULT_REFRESH_RATE_HZ
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}

/// Timing of one delivered tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTime {
    /// Vsync timestamp; non-decreasing across ticks.
    pub timestamp: Duration,
    /// 1-based tick counter.
    pub frame_index: u64,
}

impl FrameTime {
    /// Expected deadline of the next frame.
    #[inline]
    pub fn deadline(&self, period: Duration) -> Duration {
        self.timestamp + period
    }
}

/// Identifies a subscription for [`FrameClock::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

/// Callback handed to a [`VsyncSource`]; call it once with the vsync timestamp.
pub type VsyncCallback = Box<dyn FnOnce(Duration) + Send + 'static>;

/// Delivers the next vsync.
pub trait VsyncSource: Send + Sync {
    /// Arrange for `on_vsync` to be called once at the next vsync.
    ///
    /// May be invoked from any thread. The callback may also be invoked from
    /// any thread; the clock moves the tick onto the UI lane itself.
    fn request_vsync(&self, on_vsync: VsyncCallback);
}

/// Software vsync aligned to multiples of the nominal period.
pub struct TimerVsync {
    executor: TaskExecutor,
    period: Duration,
    monotonic: Arc<dyn Monotonic>,
}

impl TimerVsync {
    /// Fire every `period` on the UI lane of `executor`.
    pub fn new(executor: TaskExecutor, period: Duration, monotonic: Arc<dyn Monotonic>) -> Self {
        Self {
            executor,
            period: period.max(Duration::from_micros(100)),
            monotonic,
        }
    }
}

impl VsyncSource for TimerVsync {
    fn request_vsync(&self, on_vsync: VsyncCallback) {
        let now = self.monotonic.now();
        let period_ns = self.period.as_nanos().max(1);
        let next_ns = (now.as_nanos() / period_ns + 1) * period_ns;
        let next = Duration::from_nanos(u64::try_from(next_ns).unwrap_or(u64::MAX));
        let mut callback = Some(on_vsync);
        let scheduled = self.executor.run_delayed(
            Lane::Ui,
            move || {
                if let Some(callback) = callback.take() {
                    callback(next);
                }
            },
            next.saturating_sub(now),
            None,
        );
        if let Err(err) = scheduled {
            tracing::debug!(error = %err, "vsync request dropped");
        }
    }
}

impl fmt::Debug for TimerVsync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerVsync")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

/// Hand-driven vsync for tests.
#[derive(Default)]
pub struct ManualVsync {
    pending: Mutex<Option<VsyncCallback>>,
    requests: AtomicU64,
}

impl ManualVsync {
    /// Create a source with no pending request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a vsync has been requested and not yet fired.
    pub fn is_requested(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Total number of requests received.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Acquire)
    }

    /// Deliver the pending vsync with `timestamp`. Returns `false` if none was
    /// requested.
    pub fn fire(&self, timestamp: Duration) -> bool {
        let callback = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(callback) => {
                callback(timestamp);
                true
            }
            None => false,
        }
    }
}

impl VsyncSource for ManualVsync {
    fn request_vsync(&self, on_vsync: VsyncCallback) {
        self.requests.fetch_add(1, Ordering::AcqRel);
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(on_vsync);
    }
}

impl fmt::Debug for ManualVsync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualVsync")
            .field("requested", &self.is_requested())
            .field("request_count", &self.request_count())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

type FrameCallback = Arc<dyn Fn(FrameTime) + Send + Sync + 'static>;
type OneShot = Box<dyn FnOnce(FrameTime) + Send + 'static>;

#[derive(Default)]
struct ClockState {
    subscribers: Vec<(SubscriptionToken, FrameCallback)>,
    one_shots: Vec<OneShot>,
    armed: bool,
    frame_index: u64,
    last_timestamp: Option<Duration>,
}

impl ClockState {
    fn wants_ticks(&self) -> bool {
        !self.subscribers.is_empty() || !self.one_shots.is_empty()
    }

    fn is_subscribed(&self, token: SubscriptionToken) -> bool {
        self.subscribers.iter().any(|(t, _)| *t == token)
    }
}

struct ClockInner {
    executor: TaskExecutor,
    source: Arc<dyn VsyncSource>,
    config: FrameClockConfig,
    state: Mutex<ClockState>,
    next_token: AtomicU64,
}

impl ClockInner {
    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_if_needed(inner: &Arc<Self>, mut state: MutexGuard<'_, ClockState>) {
        if state.armed || !state.wants_ticks() {
            return;
        }
        state.armed = true;
        drop(state);

        let weak: Weak<Self> = Arc::downgrade(inner);
        inner.source.request_vsync(Box::new(move |timestamp| {
            if let Some(inner) = weak.upgrade() {
                Self::deliver(&inner, timestamp);
            }
        }));
    }

    fn deliver(inner: &Arc<Self>, timestamp: Duration) {
        if inner.executor.is_current(Lane::Ui) {
            Self::tick(inner, timestamp);
            return;
        }
        let hop = Arc::clone(inner);
        if let Err(err) = inner
            .executor
            .run_async(Lane::Ui, move || Self::tick(&hop, timestamp))
        {
            tracing::debug!(error = %err, "frame tick dropped");
            inner.lock().armed = false;
        }
    }

    fn tick(inner: &Arc<Self>, timestamp: Duration) {
        let (frame, one_shots, subscribers) = {
            let mut state = inner.lock();
            state.armed = false;
            let timestamp = state
                .last_timestamp
                .map_or(timestamp, |last| last.max(timestamp));
            state.last_timestamp = Some(timestamp);
            state.frame_index += 1;
            let frame = FrameTime {
                timestamp,
                frame_index: state.frame_index,
            };
            let one_shots = std::mem::take(&mut state.one_shots);
            let subscribers: Vec<(SubscriptionToken, FrameCallback)> = state
                .subscribers
                .iter()
                .map(|(token, callback)| (*token, Arc::clone(callback)))
                .collect();
            (frame, one_shots, subscribers)
        };

        crate::debug_trace!(
            "frame {} at {:?}: {} one-shots, {} subscribers",
            frame.frame_index,
            frame.timestamp,
            one_shots.len(),
            subscribers.len()
        );

        for one_shot in one_shots {
            if panic::catch_unwind(AssertUnwindSafe(|| one_shot(frame))).is_err() {
                tracing::error!(frame = frame.frame_index, "frame one-shot panicked");
            }
        }
        for (token, callback) in subscribers {
            if !inner.lock().is_subscribed(token) {
                continue;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| callback(frame))).is_err() {
                tracing::error!(
                    frame = frame.frame_index,
                    token = token.0,
                    "frame subscriber panicked"
                );
            }
        }

        let state = inner.lock();
        Self::arm_if_needed(inner, state);
    }
}

/// Delivers vsync ticks to subscribers on the UI lane.
#[derive(Clone)]
pub struct FrameClock {
    inner: Arc<ClockInner>,
}

impl fmt::Debug for FrameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("FrameClock")
            .field("config", &self.inner.config)
            .field("subscribers", &state.subscribers.len())
            .field("one_shots", &state.one_shots.len())
            .field("armed", &state.armed)
            .field("frame_index", &state.frame_index)
            .finish()
    }
}

impl FrameClock {
    /// Create a clock fed by `source`, ticking on the UI lane of `executor`.
    pub fn new(
        executor: TaskExecutor,
        source: Arc<dyn VsyncSource>,
        config: FrameClockConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                executor,
                source,
                config,
                state: Mutex::new(ClockState::default()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Create a clock fed by a [`TimerVsync`] at the configured rate.
    pub fn with_timer(
        executor: TaskExecutor,
        config: FrameClockConfig,
        monotonic: Arc<dyn Monotonic>,
    ) -> Self {
        let source = Arc::new(TimerVsync::new(
            executor.clone(),
            config.nominal_period(),
            monotonic,
        ));
        Self::new(executor, source, config)
    }

    /// Clock configuration.
    pub fn config(&self) -> FrameClockConfig {
        self.inner.config
    }

    /// Duration of one nominal frame.
    pub fn nominal_period(&self) -> Duration {
        self.inner.config.nominal_period()
    }

    /// Call `callback` once per tick until unsubscribed.
    pub fn subscribe(
        &self,
        callback: impl Fn(FrameTime) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        let token = SubscriptionToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let mut state = self.inner.lock();
        state.subscribers.push((token, Arc::new(callback)));
        ClockInner::arm_if_needed(&self.inner, state);
        token
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut state = self.inner.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(t, _)| *t != token);
        before != state.subscribers.len()
    }

    /// Run `f` once on the next tick, ahead of subscribers.
    pub fn enqueue_one_shot(&self, f: impl FnOnce(FrameTime) + Send + 'static) {
        let mut state = self.inner.lock();
        state.one_shots.push(Box::new(f));
        ClockInner::arm_if_needed(&self.inner, state);
    }

    /// Deliver a tick on the calling thread.
    ///
    /// Vsync sources go through the UI lane; this entry point exists for
    /// hosts that already run on it.
    pub fn tick(&self, timestamp: Duration) {
        ClockInner::tick(&self.inner, timestamp);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Whether a vsync request is outstanding.
    pub fn is_armed(&self) -> bool {
        self.inner.lock().armed
    }

    /// Number of ticks delivered so far.
    pub fn frame_index(&self) -> u64 {
        self.inner.lock().frame_index
    }
}
