//! Transaction Serialization Tests
//!
//! Exercises the coordinator's Idle/Applying state machine across lanes.
//!
//! # Running Tests
//!
//! ```sh
//! cargo test -p ftui-mount --test transactions
//! ```
//!
//! # Invariants
//!
//! 1. **No interleaving**: batches submitted concurrently apply one at a time
//! 2. **Re-entrancy**: a submit during a transaction becomes a follow-up pass
//! 3. **Confinement**: transaction state is only readable on the UI lane
//! 4. **Coalescing**: `LatestOnly` applies the newest pending batch only

#![cfg(test)]

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use ftui_mount::{
    CoalescePolicy, ConfinementError, Lane, ManualVsync, MemoryHost, MountConfig, MountObserver,
    MountSession, MountingCoordinator, Mutation, MutationBatch, NodeDescriptor, Tag,
    TransactionPhase, TransactionReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Started(u64),
    Finished(u64),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    phases: Mutex<Vec<Result<TransactionPhase, ConfinementError>>>,
    coordinator: Mutex<Option<MountingCoordinator>>,
    follow_up: Mutex<Option<MutationBatch>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn coordinator(&self) -> Option<MountingCoordinator> {
        self.coordinator.lock().unwrap().clone()
    }
}

impl MountObserver for Recorder {
    fn transaction_started(&self, revision: u64) {
        self.events.lock().unwrap().push(Event::Started(revision));
        if let Some(coordinator) = self.coordinator() {
            self.phases.lock().unwrap().push(coordinator.phase());
        }
    }

    fn transaction_finished(&self, report: &TransactionReport) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Finished(report.revision));
        let follow_up = self.follow_up.lock().unwrap().take();
        if let (Some(batch), Some(coordinator)) = (follow_up, self.coordinator()) {
            coordinator.submit(batch).unwrap();
        }
    }
}

fn session(policy: CoalescePolicy, recorder: &Arc<Recorder>) -> MountSession {
    let session = MountSession::builder(Arc::new(MemoryHost::new()))
        .with_config(MountConfig::default().with_coalesce(policy))
        .with_vsync(Arc::new(ManualVsync::new()))
        .with_observer(recorder.clone())
        .build()
        .unwrap();
    *recorder.coordinator.lock().unwrap() = Some(session.coordinator().clone());
    session
}

/// Drop the observer's coordinator handle so the session can shut down.
fn release(recorder: &Recorder) {
    recorder.coordinator.lock().unwrap().take();
}

fn create_batch(revision: u64, tags: impl IntoIterator<Item = i32>) -> MutationBatch {
    tags.into_iter().fold(MutationBatch::new(revision), |batch, tag| {
        batch.with(Mutation::create(NodeDescriptor::new(tag, "View")))
    })
}

/// Every `Started(r)` is immediately followed by `Finished(r)`.
fn assert_not_interleaved(events: &[Event]) {
    assert_eq!(events.len() % 2, 0, "unbalanced events: {events:?}");
    for pair in events.chunks(2) {
        match pair {
            [Event::Started(a), Event::Finished(b)] => assert_eq!(a, b, "{events:?}"),
            other => panic!("interleaved transactions: {other:?}"),
        }
    }
}

#[test]
fn concurrent_submits_from_lanes_never_interleave() {
    let recorder = Arc::new(Recorder::default());
    let session = session(CoalescePolicy::ApplyAll, &recorder);
    let exec = session.executor().clone();

    let lanes = [Lane::Render, Lane::Background, Lane::Worker];
    for (n, lane) in lanes.into_iter().enumerate() {
        for i in 0..20u64 {
            let coordinator = session.coordinator().clone();
            let revision = (n as u64) * 100 + i;
            let base = (revision as i32) * 10;
            exec.run_async(lane, move || {
                coordinator
                    .submit(create_batch(revision, base..base + 5))
                    .unwrap();
            })
            .unwrap();
        }
    }
    for lane in lanes {
        exec.drain(lane).unwrap();
    }
    session.flush().unwrap();

    let events = recorder.events();
    assert_eq!(events.len(), 2 * 60);
    assert_not_interleaved(&events);
    let mounted = session.read(|state| state.registry().len()).unwrap();
    assert_eq!(mounted, 300);
    release(&recorder);
}

#[test]
fn concurrent_submits_from_foreign_threads_never_interleave() {
    let recorder = Arc::new(Recorder::default());
    let session = Arc::new(session(CoalescePolicy::ApplyAll, &recorder));

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for i in 0..10u64 {
                    let revision = t * 100 + i;
                    let base = (revision as i32) * 10;
                    session
                        .deliver_mutation_batch(create_batch(revision, base..base + 3))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    session.flush().unwrap();

    assert_not_interleaved(&recorder.events());
    let stats = session.stats().unwrap();
    assert_eq!(stats.transactions, 40);
    assert_eq!(stats.mutations_applied, 120);
    release(&recorder);
}

#[test]
fn phase_is_applying_inside_and_idle_outside() {
    let recorder = Arc::new(Recorder::default());
    let session = session(CoalescePolicy::ApplyAll, &recorder);
    session
        .deliver_mutation_batch(create_batch(1, [1]))
        .unwrap();
    session.flush().unwrap();

    assert_eq!(
        *recorder.phases.lock().unwrap(),
        vec![Ok(TransactionPhase::Applying { follow_up: false })]
    );

    let coordinator = session.coordinator().clone();
    let phase = session
        .executor()
        .run_sync(Lane::Ui, move || coordinator.phase())
        .unwrap();
    assert_eq!(phase, Ok(TransactionPhase::Idle));

    assert_eq!(
        session.coordinator().phase(),
        Err(ConfinementError::WrongLane {
            owner: Lane::Ui,
            current: None
        })
    );
    release(&recorder);
}

#[test]
fn reentrant_submit_runs_as_follow_up_pass() {
    let recorder = Arc::new(Recorder::default());
    let session = session(CoalescePolicy::ApplyAll, &recorder);
    *recorder.follow_up.lock().unwrap() = Some(create_batch(2, [20]));

    session
        .deliver_mutation_batch(create_batch(1, [10]))
        .unwrap();
    session.flush().unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            Event::Started(1),
            Event::Finished(1),
            Event::Started(2),
            Event::Finished(2)
        ]
    );
    // The second pass starts with the follow-up flag cleared again.
    assert_eq!(
        recorder.phases.lock().unwrap()[1],
        Ok(TransactionPhase::Applying { follow_up: false })
    );

    let coordinator = session.coordinator().clone();
    let state = session
        .executor()
        .run_sync(Lane::Ui, move || coordinator.transaction_state())
        .unwrap()
        .unwrap();
    assert_eq!(state.phase, TransactionPhase::Idle);
    assert_eq!(state.follow_ups, 1);
    assert_eq!(state.passes, 2);

    let tags = session.read(|state| state.registry().tags()).unwrap();
    assert_eq!(tags, vec![Tag(10), Tag(20)]);
    release(&recorder);
}

/// Hold the UI lane until the returned sender is dropped or signalled.
fn block_ui(session: &MountSession) -> mpsc::Sender<()> {
    let (tx, rx) = mpsc::channel::<()>();
    session
        .executor()
        .run_async(Lane::Ui, move || {
            let _ = rx.recv();
        })
        .unwrap();
    tx
}

#[test]
fn latest_only_applies_newest_pending_batch() {
    let recorder = Arc::new(Recorder::default());
    let session = session(CoalescePolicy::LatestOnly, &recorder);

    let gate = block_ui(&session);
    for revision in 1..=3u64 {
        session
            .deliver_mutation_batch(create_batch(revision, [revision as i32]))
            .unwrap();
    }
    assert_eq!(session.coordinator().pending(), 3);
    drop(gate);
    session.flush().unwrap();

    assert_eq!(recorder.events(), vec![Event::Started(3), Event::Finished(3)]);
    let stats = session.stats().unwrap();
    assert_eq!(stats.transactions, 1);
    assert_eq!(stats.batches_superseded, 2);
    let tags = session.read(|state| state.registry().tags()).unwrap();
    assert_eq!(tags, vec![Tag(3)]);
    release(&recorder);
}

#[test]
fn apply_all_drains_pending_batches_in_one_pass() {
    let recorder = Arc::new(Recorder::default());
    let session = session(CoalescePolicy::ApplyAll, &recorder);

    let gate = block_ui(&session);
    for revision in 1..=3u64 {
        session
            .deliver_mutation_batch(create_batch(revision, [revision as i32]))
            .unwrap();
    }
    drop(gate);
    session.flush().unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            Event::Started(1),
            Event::Finished(1),
            Event::Started(2),
            Event::Finished(2),
            Event::Started(3),
            Event::Finished(3),
        ]
    );
    assert_eq!(session.coordinator().pending(), 0);
    let stats = session.stats().unwrap();
    assert_eq!(stats.transactions, 3);
    assert_eq!(stats.batches_superseded, 0);
    release(&recorder);
}

#[test]
fn stalled_ui_lane_policies_bound_work_differently() {
    const BACKLOG: u64 = 64;
    for policy in [CoalescePolicy::ApplyAll, CoalescePolicy::LatestOnly] {
        let recorder = Arc::new(Recorder::default());
        let session = session(policy, &recorder);

        let gate = block_ui(&session);
        for revision in 1..=BACKLOG {
            session
                .deliver_mutation_batch(create_batch(revision, [revision as i32]))
                .unwrap();
        }
        // Both policies queue everything until the UI lane runs.
        assert_eq!(session.coordinator().pending(), BACKLOG as usize);
        drop(gate);
        session.flush().unwrap();
        assert_eq!(session.coordinator().pending(), 0);

        let stats = session.stats().unwrap();
        match policy {
            CoalescePolicy::ApplyAll => {
                assert_eq!(stats.transactions, BACKLOG);
                assert_eq!(stats.batches_superseded, 0);
            }
            CoalescePolicy::LatestOnly => {
                assert_eq!(stats.transactions, 1);
                assert_eq!(stats.batches_superseded, BACKLOG - 1);
            }
        }
        release(&recorder);
    }
}

#[test]
fn submit_on_ui_lane_applies_before_returning() {
    let recorder = Arc::new(Recorder::default());
    let session = session(CoalescePolicy::ApplyAll, &recorder);
    let coordinator = session.coordinator().clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer = Arc::clone(&recorder);
    session
        .executor()
        .run_sync(Lane::Ui, move || {
            coordinator.submit(create_batch(1, [1])).unwrap();
            sink.lock().unwrap().extend(observer.events());
        })
        .unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Event::Started(1), Event::Finished(1)]
    );
    release(&recorder);
}
