#![forbid(unsafe_code)]

//! Multi-lane task executor.
//!
//! The executor owns one runner thread per [`Lane`]. Each runner drains its
//! own queue; nothing else ever runs on that thread, which is what makes
//! lane confinement (see [`crate::LaneBound`]) a sound discipline.
//!
//! # Submission
//!
//! | Call | Blocks caller | Queue position |
//! |------|---------------|----------------|
//! | [`TaskExecutor::run_async`] | no | back of the async FIFO |
//! | [`TaskExecutor::run_sync`] | yes | ahead of queued async tasks |
//! | [`TaskExecutor::drain`] | yes | back of the async FIFO |
//! | [`TaskExecutor::run_delayed`] | no | timer heap, runs when due |
//!
//! # Deadlock detection
//!
//! Before a lane blocks on another lane it records a *waits-on* edge. If that
//! edge would close a cycle the call fails with [`ExecutorError::Deadlock`]
//! instead of blocking. The edge is removed when the call returns.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | async/timer task panics | exception handler invoked, lane keeps running |
//! | sync task panics | [`ExecutorError::Panicked`] returned to the caller |
//! | lane shut down | [`ExecutorError::ShutDown`] |

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::lane::{self, LANE_COUNT, Lane};
use crate::wait_graph::WaitGraph;

type Job = Box<dyn FnOnce() + Send + 'static>;
type TimerTask = Box<dyn FnMut() + Send + 'static>;

/// Shortest interval a periodic task may repeat at.
const MIN_REPEAT: Duration = Duration::from_millis(1);

/// Handler invoked with every panic that escapes an async or timer task.
pub type ExceptionHandler = Arc<dyn Fn(&TaskPanic) + Send + Sync + 'static>;

/// A panic that escaped a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanic {
    /// Lane the task ran on.
    pub lane: Lane,
    /// Panic payload rendered as text.
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors returned by executor submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Blocking would close a cycle in the waits-on graph.
    Deadlock {
        /// Lane that attempted to block.
        caller: Lane,
        /// Lane it wanted to wait on.
        target: Lane,
    },
    /// The synchronous task panicked on its lane.
    Panicked {
        /// Lane the task ran on.
        lane: Lane,
        /// Panic payload rendered as text.
        message: String,
    },
    /// The lane no longer accepts work.
    ShutDown {
        /// Lane that rejected the task.
        lane: Lane,
    },
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::Deadlock { caller, target } => write!(
                f,
                "deadlock: lane {caller} cannot wait on lane {target}, which already waits on it"
            ),
            ExecutorError::Panicked { lane, message } => {
                write!(f, "task on lane {lane} panicked: {message}")
            }
            ExecutorError::ShutDown { lane } => write!(f, "lane {lane} has shut down"),
        }
    }
}

impl std::error::Error for ExecutorError {}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Executor thread configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Runner threads are named `<prefix>-<lane>`.
    pub thread_name_prefix: String,
    /// Stack size for runner threads. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "ftui-lane".to_owned(),
            stack_size: None,
        }
    }
}

impl ExecutorConfig {
    /// Set the runner thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the runner thread stack size.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timers
// ─────────────────────────────────────────────────────────────────────────────

/// Cancellation handle for a delayed or periodic task.
///
/// Cancelling is idempotent and may happen from any thread. A task already
/// dequeued for execution still runs to completion.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    lane: Lane,
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Unique id within the executor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Lane the task runs on.
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

struct TimerEntry {
    due: Instant,
    seq: u64,
    task: TimerTask,
    repeat: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl TimerEntry {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

// BinaryHeap is a max-heap; invert so the earliest deadline sits on top.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimerEntry {}

// ─────────────────────────────────────────────────────────────────────────────
// Lane runner
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    Sync,
    Async,
}

#[derive(Default)]
struct LaneQueue {
    sync: VecDeque<Job>,
    jobs: VecDeque<Job>,
    timers: BinaryHeap<TimerEntry>,
    shutdown: bool,
}

impl LaneQueue {
    fn len(&self) -> usize {
        self.sync.len() + self.jobs.len() + self.timers.len()
    }
}

enum Work {
    Job(Job),
    Timer(TimerEntry),
}

struct LaneShared {
    lane: Lane,
    queue: Mutex<LaneQueue>,
    ready: Condvar,
    handler: Arc<RwLock<Option<ExceptionHandler>>>,
}

impl LaneShared {
    fn new(lane: Lane, handler: Arc<RwLock<Option<ExceptionHandler>>>) -> Self {
        Self {
            lane,
            queue: Mutex::new(LaneQueue::default()),
            ready: Condvar::new(),
            handler,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LaneQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, job: Job, priority: Priority) -> Result<(), ExecutorError> {
        let mut queue = self.lock();
        if queue.shutdown {
            return Err(ExecutorError::ShutDown { lane: self.lane });
        }
        match priority {
            Priority::Sync => queue.sync.push_back(job),
            Priority::Async => queue.jobs.push_back(job),
        }
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    fn schedule(&self, entry: TimerEntry) -> Result<(), TimerEntry> {
        let mut queue = self.lock();
        if queue.shutdown {
            return Err(entry);
        }
        queue.timers.push(entry);
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    fn shut_down(&self) {
        let mut queue = self.lock();
        queue.shutdown = true;
        let sync = std::mem::take(&mut queue.sync);
        let jobs = std::mem::take(&mut queue.jobs);
        let timers = std::mem::take(&mut queue.timers);
        drop(queue);
        self.ready.notify_all();
        // Dropped outside the lock: closures may own executor handles.
        drop((sync, jobs, timers));
    }

    fn next_work(&self) -> Option<Work> {
        let mut discarded: Vec<TimerEntry> = Vec::new();
        let mut queue = self.lock();
        loop {
            if queue.shutdown {
                return None;
            }
            if let Some(job) = queue.sync.pop_front() {
                return Some(Work::Job(job));
            }
            while queue.timers.peek().is_some_and(TimerEntry::is_cancelled) {
                if let Some(entry) = queue.timers.pop() {
                    discarded.push(entry);
                }
            }
            let now = Instant::now();
            let next_due = queue.timers.peek().map(|entry| entry.due);
            if next_due.is_some_and(|due| due <= now) {
                if let Some(entry) = queue.timers.pop() {
                    return Some(Work::Timer(entry));
                }
            }
            if let Some(job) = queue.jobs.pop_front() {
                return Some(Work::Job(job));
            }
            queue = match next_due {
                Some(due) => {
                    self.ready
                        .wait_timeout(queue, due.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .ready
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn report_panic(&self, payload: Box<dyn Any + Send>) {
        let panic = TaskPanic {
            lane: self.lane,
            message: panic_message(payload.as_ref()),
        };
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(&panic))).is_err() {
                    tracing::error!(lane = %panic.lane, "exception handler panicked");
                }
            }
            None => {
                tracing::error!(lane = %panic.lane, message = %panic.message, "lane task panicked");
            }
        }
    }

    fn run(&self, work: Work) {
        match work {
            Work::Job(job) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    self.report_panic(payload);
                }
            }
            Work::Timer(mut entry) => {
                if entry.is_cancelled() {
                    return;
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&mut entry.task)) {
                    self.report_panic(payload);
                }
                let Some(repeat) = entry.repeat else {
                    return;
                };
                if entry.is_cancelled() {
                    return;
                }
                let now = Instant::now();
                entry.due += repeat;
                if entry.due < now {
                    entry.due = now + repeat;
                }
                // A rejected entry means the lane is shutting down.
                let _ = self.schedule(entry);
            }
        }
    }
}

fn run_lane(shared: Arc<LaneShared>) {
    let _lane = lane::enter_lane(shared.lane);
    crate::debug_trace!("lane {} runner started", shared.lane);
    while let Some(work) = shared.next_work() {
        shared.run(work);
    }
    crate::debug_trace!("lane {} runner stopped", shared.lane);
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

struct ExecutorInner {
    lanes: [Arc<LaneShared>; LANE_COUNT],
    thread_ids: [ThreadId; LANE_COUNT],
    threads: Mutex<Vec<JoinHandle<()>>>,
    graph: WaitGraph,
    handler: Arc<RwLock<Option<ExceptionHandler>>>,
    next_timer_id: AtomicU64,
}

impl ExecutorInner {
    fn lane(&self, lane: Lane) -> &LaneShared {
        &self.lanes[lane.index()]
    }

    fn shutdown(&self) {
        for shared in &self.lanes {
            shared.shut_down();
        }
        let handles = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        let me = thread::current().id();
        for handle in handles {
            // The last handle may be dropped by a task running on a lane.
            if handle.thread().id() == me {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Owns one runner thread per lane.
///
/// Cloning is cheap; all clones share the same lanes. The runners stop when
/// [`TaskExecutor::shutdown`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("thread_ids", &self.inner.thread_ids)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// Spawn the lane runners.
    pub fn new(config: ExecutorConfig) -> io::Result<Self> {
        let handler: Arc<RwLock<Option<ExceptionHandler>>> = Arc::new(RwLock::new(None));
        let lanes = Lane::ALL.map(|lane| Arc::new(LaneShared::new(lane, Arc::clone(&handler))));

        let mut threads = Vec::with_capacity(LANE_COUNT);
        for shared in &lanes {
            let runner = Arc::clone(shared);
            let mut builder = thread::Builder::new().name(format!(
                "{}-{}",
                config.thread_name_prefix,
                shared.lane.name()
            ));
            if let Some(bytes) = config.stack_size {
                builder = builder.stack_size(bytes);
            }
            match builder.spawn(move || run_lane(runner)) {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    for shared in &lanes {
                        shared.shut_down();
                    }
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }

        let ids: Vec<ThreadId> = threads.iter().map(|h| h.thread().id()).collect();
        let thread_ids = [ids[0], ids[1], ids[2], ids[3]];
        tracing::debug!(
            prefix = %config.thread_name_prefix,
            lanes = LANE_COUNT,
            "task executor started"
        );

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                lanes,
                thread_ids,
                threads: Mutex::new(threads),
                graph: WaitGraph::new(),
                handler,
                next_timer_id: AtomicU64::new(1),
            }),
        })
    }

    /// Spawn the lane runners with [`ExecutorConfig::default`].
    pub fn with_defaults() -> io::Result<Self> {
        Self::new(ExecutorConfig::default())
    }

    /// Thread id of the runner for `lane`.
    #[inline]
    pub fn thread_id(&self, lane: Lane) -> ThreadId {
        self.inner.thread_ids[lane.index()]
    }

    /// The lane of this executor the calling thread runs, if any.
    pub fn current_lane(&self) -> Option<Lane> {
        let me = thread::current().id();
        Lane::ALL
            .into_iter()
            .find(|lane| self.inner.thread_ids[lane.index()] == me)
    }

    /// Whether the calling thread is the runner for `lane`.
    #[inline]
    pub fn is_current(&self, lane: Lane) -> bool {
        thread::current().id() == self.thread_id(lane)
    }

    /// Enqueue `task` at the back of `lane`'s FIFO and return immediately.
    pub fn run_async(
        &self,
        lane: Lane,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), ExecutorError> {
        self.inner.lane(lane).push(Box::new(task), Priority::Async)
    }

    /// Run `task` on `lane` and block until it returns.
    ///
    /// The task runs ahead of async tasks already queued on `lane`. Called on
    /// `lane` itself, the task runs inline.
    pub fn run_sync<T, F>(&self, lane: Lane, task: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.block_on(lane, task, Priority::Sync)
    }

    /// Block until every async task queued on `lane` before this call has run.
    ///
    /// Returns immediately when called on `lane` itself.
    pub fn drain(&self, lane: Lane) -> Result<(), ExecutorError> {
        self.block_on(lane, || (), Priority::Async)
    }

    fn block_on<T, F>(&self, lane: Lane, task: F, priority: Priority) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let caller = self.current_lane();
        if caller == Some(lane) {
            return panic::catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                ExecutorError::Panicked {
                    lane,
                    message: panic_message(payload.as_ref()),
                }
            });
        }

        let _edge = match caller {
            Some(caller) => match self.inner.graph.register(caller, lane) {
                Some(edge) => Some(edge),
                None => {
                    tracing::warn!(caller = %caller, target = %lane, "cross-lane wait would deadlock");
                    return Err(ExecutorError::Deadlock {
                        caller,
                        target: lane,
                    });
                }
            },
            None => None,
        };

        let (tx, rx) = mpsc::sync_channel(1);
        self.inner.lane(lane).push(
            Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(task));
                let _ = tx.send(outcome);
            }),
            priority,
        )?;

        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(ExecutorError::Panicked {
                lane,
                message: panic_message(payload.as_ref()),
            }),
            Err(_) => Err(ExecutorError::ShutDown { lane }),
        }
    }

    /// Run `task` on `lane` after `delay`, then every `repeat` if given.
    ///
    /// Repeat intervals shorter than one millisecond are clamped.
    pub fn run_delayed(
        &self,
        lane: Lane,
        task: impl FnMut() + Send + 'static,
        delay: Duration,
        repeat: Option<Duration>,
    ) -> Result<TimerHandle, ExecutorError> {
        let id = self.inner.next_timer_id.fetch_add(1, AtomicOrdering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = TimerEntry {
            due: Instant::now() + delay,
            seq: id,
            task: Box::new(task),
            repeat: repeat.map(|interval| interval.max(MIN_REPEAT)),
            cancelled: Arc::clone(&cancelled),
        };
        if self.inner.lane(lane).schedule(entry).is_err() {
            return Err(ExecutorError::ShutDown { lane });
        }
        Ok(TimerHandle {
            id,
            lane,
            cancelled,
        })
    }

    /// Cancel a delayed or periodic task. Idempotent.
    pub fn cancel(&self, handle: &TimerHandle) {
        handle.cancel();
    }

    /// Install the handler for panics escaping async and timer tasks.
    pub fn set_exception_handler(&self, handler: impl Fn(&TaskPanic) + Send + Sync + 'static) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Restore the default handler, which logs the panic.
    pub fn clear_exception_handler(&self) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The lane `lane` is currently blocked on, if any.
    pub fn waiting_on(&self, lane: Lane) -> Option<Lane> {
        self.inner.graph.waiting_on(lane)
    }

    /// Number of tasks (sync, async and timers) queued on `lane`.
    pub fn pending(&self, lane: Lane) -> usize {
        self.inner.lane(lane).lock().len()
    }

    /// Stop all lanes and join their runners.
    ///
    /// Queued tasks are dropped; blocked callers receive
    /// [`ExecutorError::ShutDown`].
    pub fn shutdown(&self) {
        tracing::debug!("task executor shutting down");
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn executor() -> TaskExecutor {
        TaskExecutor::new(ExecutorConfig::default().with_thread_name_prefix("test-lane")).unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn run_async_preserves_fifo_order() {
        let exec = executor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = Arc::clone(&seen);
            exec.run_async(Lane::Worker, move || seen.lock().unwrap().push(i))
                .unwrap();
        }
        exec.drain(Lane::Worker).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn run_sync_returns_value_from_target_lane() {
        let exec = executor();
        let handle = exec.clone();
        let lane = exec
            .run_sync(Lane::Render, move || handle.current_lane())
            .unwrap();
        assert_eq!(lane, Some(Lane::Render));
    }

    #[test]
    fn run_sync_on_own_lane_runs_inline() {
        let exec = executor();
        let inner = exec.clone();
        let result = exec
            .run_sync(Lane::Ui, move || inner.run_sync(Lane::Ui, || 5))
            .unwrap();
        assert_eq!(result, Ok(5));
    }

    #[test]
    fn run_sync_surfaces_panic_to_caller() {
        let exec = executor();
        let err = exec
            .run_sync(Lane::Background, || -> u32 { panic!("boom") })
            .unwrap_err();
        assert_eq!(
            err,
            ExecutorError::Panicked {
                lane: Lane::Background,
                message: "boom".to_owned()
            }
        );
        // The lane is still alive.
        assert_eq!(exec.run_sync(Lane::Background, || 7), Ok(7));
    }

    #[test]
    fn async_panic_reaches_handler_and_lane_continues() {
        let exec = executor();
        let panics = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&panics);
        exec.set_exception_handler(move |panic| sink.lock().unwrap().push(panic.clone()));

        exec.run_async(Lane::Worker, || panic!("bad task")).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        exec.run_async(Lane::Worker, move || flag.store(true, AtomicOrdering::SeqCst))
            .unwrap();
        exec.drain(Lane::Worker).unwrap();

        assert!(ran.load(AtomicOrdering::SeqCst));
        let panics = panics.lock().unwrap();
        assert_eq!(panics.len(), 1);
        assert_eq!(panics[0].lane, Lane::Worker);
        assert_eq!(panics[0].message, "bad task");
    }

    #[test]
    fn sync_task_runs_ahead_of_queued_async_tasks() {
        let exec = executor();
        let order = Arc::new(Mutex::new(Vec::new()));

        let ex = exec.clone();
        let log = Arc::clone(&order);
        let (done_tx, done_rx) = mpsc::channel();
        exec.run_async(Lane::Worker, move || {
            let async_log = Arc::clone(&log);
            ex.run_async(Lane::Worker, move || async_log.lock().unwrap().push("async"))
                .unwrap();
            let sync_ex = ex.clone();
            let sync_log = Arc::clone(&log);
            let waiter = thread::spawn(move || {
                sync_ex
                    .run_sync(Lane::Worker, move || sync_log.lock().unwrap().push("sync"))
                    .unwrap();
            });
            assert!(wait_until(|| ex.pending(Lane::Worker) == 2));
            done_tx.send(waiter).unwrap();
        })
        .unwrap();

        let waiter = done_rx.recv().unwrap();
        waiter.join().unwrap();
        exec.drain(Lane::Worker).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["sync", "async"]);
    }

    #[test]
    fn nested_cycle_fails_with_deadlock() {
        let exec = executor();
        let outer = exec.clone();
        let result = exec
            .run_sync(Lane::Render, move || {
                let inner = outer.clone();
                outer.run_sync(Lane::Background, move || {
                    inner.run_sync(Lane::Render, || 1)
                })
            })
            .unwrap()
            .unwrap();
        assert_eq!(
            result,
            Err(ExecutorError::Deadlock {
                caller: Lane::Background,
                target: Lane::Render
            })
        );
        assert_eq!(exec.waiting_on(Lane::Render), None);
        assert_eq!(exec.waiting_on(Lane::Background), None);
    }

    #[test]
    fn non_cyclic_chain_succeeds() {
        let exec = executor();
        let outer = exec.clone();
        let result = exec
            .run_sync(Lane::Render, move || {
                let inner = outer.clone();
                outer.run_sync(Lane::Background, move || inner.run_sync(Lane::Ui, || 3))
            })
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn delayed_task_fires_once() {
        let exec = executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        exec.run_delayed(
            Lane::Worker,
            move || {
                c.fetch_add(1, AtomicOrdering::SeqCst);
            },
            Duration::from_millis(5),
            None,
        )
        .unwrap();
        assert!(wait_until(|| count.load(AtomicOrdering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn periodic_task_repeats_until_cancelled() {
        let exec = executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = exec
            .run_delayed(
                Lane::Background,
                move || {
                    c.fetch_add(1, AtomicOrdering::SeqCst);
                },
                Duration::from_millis(1),
                Some(Duration::from_millis(2)),
            )
            .unwrap();
        assert!(wait_until(|| count.load(AtomicOrdering::SeqCst) >= 3));
        exec.cancel(&handle);
        exec.cancel(&handle);
        assert!(handle.is_cancelled());
        // One in-flight firing may still land after cancel.
        thread::sleep(Duration::from_millis(10));
        let settled = count.load(AtomicOrdering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(AtomicOrdering::SeqCst), settled);
    }

    #[test]
    fn cancelled_before_due_never_runs() {
        let exec = executor();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = exec
            .run_delayed(
                Lane::Worker,
                move || flag.store(true, AtomicOrdering::SeqCst),
                Duration::from_millis(20),
                None,
            )
            .unwrap();
        handle.cancel();
        thread::sleep(Duration::from_millis(50));
        assert!(!ran.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let exec = executor();
        exec.shutdown();
        assert_eq!(
            exec.run_async(Lane::Ui, || {}),
            Err(ExecutorError::ShutDown { lane: Lane::Ui })
        );
        assert_eq!(
            exec.run_sync(Lane::Render, || 1),
            Err(ExecutorError::ShutDown { lane: Lane::Render })
        );
        assert!(
            exec.run_delayed(Lane::Worker, || {}, Duration::ZERO, None)
                .is_err()
        );
    }

    #[test]
    fn is_current_matches_runner_thread() {
        let exec = executor();
        assert!(!exec.is_current(Lane::Ui));
        assert_eq!(exec.current_lane(), None);
        let handle = exec.clone();
        let flags = exec
            .run_sync(Lane::Ui, move || {
                (handle.is_current(Lane::Ui), handle.is_current(Lane::Render))
            })
            .unwrap();
        assert_eq!(flags, (true, false));
    }

    #[test]
    fn error_display_names_lanes() {
        let err = ExecutorError::Deadlock {
            caller: Lane::Ui,
            target: Lane::Render,
        };
        let text = err.to_string();
        assert!(text.contains("ui"));
        assert!(text.contains("render"));
    }
}
