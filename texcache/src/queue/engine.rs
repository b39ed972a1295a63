//! Priority work queue engine.
//!
//! Requests are held in a [`RequestRegistry`] and ordered for execution in a
//! `BTreeSet` keyed by `(Reverse(priority), seq)`, so the first element is
//! always the highest-priority, oldest request. Worker threads idle on a
//! condition variable and claim requests under the single queue lock; the
//! work itself always runs outside the lock.
//!
//! With `worker_threads = 0` no threads are spawned and requests run on the
//! caller's stack inside [`PriorityWorkQueue::pump`] and
//! [`PriorityWorkQueue::wait_for_result`]. Both modes share the same claim
//! and post paths.

use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::config::QueueConfig;
use super::error::QueueError;
use super::handle::{RequestHandle, RequestStatus};
use super::registry::{Lookup, RequestRegistry};
use super::request::{Completion, Outcome, RequestFlags, Work, WorkContext};

/// Upper bound on a single idle wait, so workers re-check the quit flag.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Delay between `wait_for_result` polls.
const WAIT_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Delay before the secondary pool re-runs a request that is still pending.
const ASYNC_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Ordering key of a queued request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<u32>,
    seq: u64,
    handle: RequestHandle,
}

struct RequestEntry<W: Work> {
    work: Option<W>,
    priority: u32,
    seq: u64,
    status: RequestStatus,
    flags: RequestFlags,
    abort: Arc<AtomicBool>,
    attempts: u32,
    started_at: Option<Instant>,
    /// Forced to `Aborted` by the stale-request sweep.
    timed_out: bool,
    output: Option<W::Output>,
}

impl<W: Work> RequestEntry<W> {
    fn key(&self, handle: RequestHandle) -> QueueKey {
        QueueKey {
            priority: Reverse(self.priority),
            seq: self.seq,
            handle,
        }
    }

    fn abort_requested(&self) -> bool {
        self.flags.contains(RequestFlags::ABORT) || self.abort.load(Ordering::Relaxed)
    }
}

/// A request taken off the ready set, owned by whichever thread runs it.
struct Claimed<W> {
    handle: RequestHandle,
    work: W,
    abort: Arc<AtomicBool>,
    attempt: u32,
}

/// What happened to a request after one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Disposition {
    Finished,
    Requeued,
    HandedOff,
    Discarded,
}

struct QueueState<W: Work> {
    registry: RequestRegistry<RequestEntry<W>>,
    ready: BTreeSet<QueueKey>,
    next_seq: u64,
    in_flight: usize,
}

impl<W: Work> QueueState<W> {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Secondary pool for requests flagged `ASYNC` that reported `Pending`.
struct AsyncLane<W> {
    pending: Mutex<VecDeque<Claimed<W>>>,
    available: Condvar,
}

#[derive(Default)]
struct QueueCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicU64,
    retried: AtomicU64,
    handed_off: AtomicU64,
    stale: AtomicU64,
}

/// Point-in-time queue statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Requests accepted by `submit()`.
    pub submitted: u64,
    /// Requests finished as `Complete`.
    pub completed: u64,
    /// Requests finished as `Aborted`.
    pub aborted: u64,
    /// Demoted re-runs after a failure.
    pub retried: u64,
    /// Hand-offs to the secondary pool.
    pub handed_off: u64,
    /// Requests forced by the stale-request sweep.
    pub stale: u64,
    /// Requests waiting for a worker.
    pub queued: usize,
    /// Requests currently claimed.
    pub in_flight: usize,
    /// Registry entries not yet reaped.
    pub live: usize,
}

struct Shared<W: Work> {
    config: QueueConfig,
    state: Mutex<QueueState<W>>,
    available: Condvar,
    quitting: AtomicBool,
    lane: Option<AsyncLane<W>>,
    counters: QueueCounters,
}

impl<W: Work> Shared<W> {
    fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Acquire)
    }

    /// Pops the next runnable request, finishing aborted ones on the way.
    fn claim_next(&self) -> Option<Claimed<W>> {
        let mut state = self.state.lock();
        loop {
            let key = state.ready.pop_first()?;
            let quitting = self.is_quitting();

            let skip = match state.registry.get(key.handle) {
                Some(entry) if entry.status == RequestStatus::Queued => {
                    quitting || entry.abort_requested()
                }
                _ => continue,
            };
            if skip {
                self.finish(&mut state, key.handle, RequestStatus::Aborted, None);
                continue;
            }

            let Some(entry) = state.registry.get_mut(key.handle) else {
                continue;
            };
            let Some(work) = entry.work.take() else {
                error!(handle = %key.handle, "Queued request has no work attached");
                continue;
            };
            entry.status = RequestStatus::InProgress;
            entry.started_at = Some(Instant::now());
            let claimed = Claimed {
                handle: key.handle,
                work,
                abort: Arc::clone(&entry.abort),
                attempt: entry.attempts,
            };
            state.in_flight += 1;
            return Some(claimed);
        }
    }

    /// Runs one step of a claimed request and posts its outcome.
    fn execute(&self, mut claimed: Claimed<W>) -> Disposition {
        let result = {
            let cx = WorkContext {
                handle: claimed.handle,
                attempt: claimed.attempt,
                abort: &claimed.abort,
                quitting: &self.quitting,
            };
            let work = &mut claimed.work;
            catch_unwind(AssertUnwindSafe(|| work.run(&cx)))
        };

        match result {
            Ok(outcome) => self.post(claimed, outcome),
            Err(_) => {
                warn!(
                    handle = %claimed.handle,
                    request = claimed.work.name(),
                    "Request panicked; marking aborted"
                );
                self.post_panic(claimed.handle)
            }
        }
    }

    fn post_panic(&self, handle: RequestHandle) -> Disposition {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        match state.registry.get(handle) {
            Some(entry) if entry.status == RequestStatus::InProgress => {
                self.finish(&mut state, handle, RequestStatus::Aborted, None);
                Disposition::Finished
            }
            _ => Disposition::Discarded,
        }
    }

    fn post(&self, claimed: Claimed<W>, outcome: Outcome<W::Output>) -> Disposition {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        let handle = claimed.handle;
        let (flags, attempts) = match state.registry.get(handle) {
            Some(entry) if entry.status == RequestStatus::InProgress => {
                (entry.flags, entry.attempts)
            }
            _ => {
                // Reaped, or forced by the watchdog while running.
                debug!(handle = %handle, "Discarding result of inactive request");
                return Disposition::Discarded;
            }
        };
        let aborted = claimed.abort.load(Ordering::Relaxed)
            || flags.contains(RequestFlags::ABORT)
            || self.is_quitting();

        match outcome {
            Outcome::Complete(output) => {
                self.finish(&mut state, handle, RequestStatus::Complete, Some(output));
                Disposition::Finished
            }
            Outcome::Failed(output) => {
                let retry = flags.contains(RequestFlags::RETRY)
                    && !flags.contains(RequestFlags::ASYNC)
                    && attempts < self.config.max_retries;
                if aborted {
                    self.finish(&mut state, handle, RequestStatus::Aborted, None);
                    Disposition::Finished
                } else if retry {
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    self.requeue(&mut state, claimed, true);
                    Disposition::Requeued
                } else {
                    self.finish(&mut state, handle, RequestStatus::Complete, Some(output));
                    Disposition::Finished
                }
            }
            Outcome::Pending if aborted => {
                self.finish(&mut state, handle, RequestStatus::Aborted, None);
                Disposition::Finished
            }
            Outcome::Pending => match &self.lane {
                Some(lane) if flags.contains(RequestFlags::ASYNC) => {
                    // Lock order is state then lane; lane threads never take
                    // the state lock while holding the lane.
                    state.in_flight += 1;
                    drop(state);
                    self.counters.handed_off.fetch_add(1, Ordering::Relaxed);
                    lane.pending.lock().push_back(claimed);
                    lane.available.notify_one();
                    Disposition::HandedOff
                }
                _ => {
                    self.requeue(&mut state, claimed, false);
                    Disposition::Requeued
                }
            },
        }
    }

    fn requeue(&self, state: &mut QueueState<W>, claimed: Claimed<W>, demote: bool) {
        let seq = state.next_seq();
        let Some(entry) = state.registry.get_mut(claimed.handle) else {
            return;
        };
        if demote {
            entry.priority = entry.priority.saturating_sub(1);
            entry.attempts += 1;
        }
        entry.seq = seq;
        entry.status = RequestStatus::Queued;
        entry.started_at = None;
        entry.work = Some(claimed.work);
        let key = entry.key(claimed.handle);
        state.ready.insert(key);
        self.available.notify_one();
    }

    /// Sets the terminal status exactly once and reaps `AUTO_COMPLETE` entries.
    fn finish(
        &self,
        state: &mut QueueState<W>,
        handle: RequestHandle,
        status: RequestStatus,
        output: Option<W::Output>,
    ) {
        let Some(entry) = state.registry.get_mut(handle) else {
            return;
        };
        debug_assert!(status.is_terminal());
        debug_assert!(entry.status.rank() < status.rank());

        entry.status = status;
        entry.output = output;
        entry.work = None;
        entry.started_at = None;
        let auto_complete = entry.flags.contains(RequestFlags::AUTO_COMPLETE);

        match status {
            RequestStatus::Complete => self.counters.completed.fetch_add(1, Ordering::Relaxed),
            _ => self.counters.aborted.fetch_add(1, Ordering::Relaxed),
        };

        if auto_complete {
            Self::reap_entry(state, handle);
        }
    }

    /// Removes a finished entry from the registry.
    fn reap_entry(state: &mut QueueState<W>, handle: RequestHandle) -> Option<RequestEntry<W>> {
        let entry = state.registry.get_mut(handle)?;
        if entry.status == RequestStatus::InProgress {
            debug_assert!(false, "attempted to delete in-progress request {}", handle);
            error!(handle = %handle, "Refusing to delete in-progress request");
            return None;
        }
        if entry.status == RequestStatus::Queued {
            let key = entry.key(handle);
            state.ready.remove(&key);
        }
        entry.status = RequestStatus::PendingDelete;
        state.registry.remove(handle)
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            if let Some(claimed) = self.claim_next() {
                self.execute(claimed);
                continue;
            }

            let mut state = self.state.lock();
            if self.is_quitting() {
                break;
            }
            if state.ready.is_empty() {
                self.available.wait_for(&mut state, IDLE_WAIT);
            }
        }
        debug!(queue = %self.config.name, "Worker thread exiting");
    }

    fn async_loop(self: Arc<Self>) {
        let Some(lane) = self.lane.as_ref() else {
            return;
        };
        loop {
            let next = {
                let mut pending = lane.pending.lock();
                if pending.is_empty() {
                    if self.is_quitting() {
                        break;
                    }
                    lane.available.wait_for(&mut pending, IDLE_WAIT);
                }
                pending.pop_front()
            };
            let Some(claimed) = next else {
                continue;
            };

            if self.execute(claimed) == Disposition::HandedOff {
                thread::sleep(ASYNC_RETRY_DELAY);
            }
        }
        debug!(queue = %self.config.name, "Async thread exiting");
    }
}

/// Generic priority work queue.
///
/// See the [module documentation](self) for the execution model.
pub struct PriorityWorkQueue<W: Work> {
    shared: Arc<Shared<W>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    cooperative: bool,
}

impl<W: Work> PriorityWorkQueue<W> {
    /// Creates the queue and starts its threads.
    pub fn new(config: QueueConfig) -> Self {
        let lane = (config.async_threads > 0 && !config.is_cooperative()).then(|| AsyncLane {
            pending: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        });
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(QueueState {
                registry: RequestRegistry::new(),
                ready: BTreeSet::new(),
                next_seq: 0,
                in_flight: 0,
            }),
            available: Condvar::new(),
            quitting: AtomicBool::new(false),
            lane,
            counters: QueueCounters::default(),
        });

        let mut threads = Vec::new();
        let name = shared.config.name.clone();
        for i in 0..shared.config.worker_threads {
            let worker = Arc::clone(&shared);
            match thread::Builder::new()
                .name(format!("{}-worker-{}", name, i))
                .spawn(move || worker.worker_loop())
            {
                Ok(handle) => threads.push(handle),
                Err(e) => error!(queue = %name, error = %e, "Failed to spawn worker thread"),
            }
        }
        let workers = threads.len();
        if shared.lane.is_some() {
            for i in 0..shared.config.async_threads {
                let worker = Arc::clone(&shared);
                match thread::Builder::new()
                    .name(format!("{}-async-{}", name, i))
                    .spawn(move || worker.async_loop())
                {
                    Ok(handle) => threads.push(handle),
                    Err(e) => error!(queue = %name, error = %e, "Failed to spawn async thread"),
                }
            }
        }

        let cooperative = workers == 0;
        info!(
            queue = %name,
            workers,
            async_threads = threads.len() - workers,
            cooperative,
            "Work queue started"
        );

        Self {
            shared,
            threads: Mutex::new(threads),
            cooperative,
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Returns true when requests only run inside `pump()`.
    pub fn is_cooperative(&self) -> bool {
        self.cooperative
    }

    /// Returns true once `shutdown()` has started.
    pub fn is_quitting(&self) -> bool {
        self.shared.is_quitting()
    }

    /// Enqueues a request and wakes a worker.
    pub fn submit(
        &self,
        work: W,
        priority: u32,
        flags: RequestFlags,
    ) -> Result<RequestHandle, QueueError> {
        if self.shared.is_quitting() {
            return Err(QueueError::ShuttingDown);
        }

        let mut state = self.shared.state.lock();
        // Re-check under the lock so shutdown's final sweep sees every entry.
        if self.shared.is_quitting() {
            return Err(QueueError::ShuttingDown);
        }
        let seq = state.next_seq();
        let entry = RequestEntry {
            work: Some(work),
            priority,
            seq,
            status: RequestStatus::Queued,
            flags: flags.difference(RequestFlags::ABORT),
            abort: Arc::new(AtomicBool::new(false)),
            attempts: 0,
            started_at: None,
            timed_out: false,
            output: None,
        };
        let handle = state.registry.insert(entry);
        state.ready.insert(QueueKey {
            priority: Reverse(priority),
            seq,
            handle,
        });
        drop(state);

        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();
        debug!(handle = %handle, priority, "Request submitted");
        Ok(handle)
    }

    /// Current status of a request. Never blocks on work.
    pub fn poll_status(&self, handle: RequestHandle) -> RequestStatus {
        let state = self.shared.state.lock();
        match state.registry.lookup(handle) {
            Lookup::Found(entry) => entry.status,
            Lookup::Expired => RequestStatus::Expired,
            Lookup::Unknown => RequestStatus::Unknown,
        }
    }

    /// Requests cooperative cancellation.
    ///
    /// A queued request is finished as `Aborted` immediately. A running one
    /// completes its current step first. With `auto_reap`, the entry is
    /// removed once terminal. Returns false if the handle is not live.
    pub fn abort(&self, handle: RequestHandle, auto_reap: bool) -> bool {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.registry.get_mut(handle) else {
            return false;
        };
        entry.flags |= RequestFlags::ABORT;
        entry.abort.store(true, Ordering::Relaxed);
        if auto_reap {
            entry.flags |= RequestFlags::AUTO_COMPLETE;
        }

        match entry.status {
            RequestStatus::Queued => {
                let key = entry.key(handle);
                state.ready.remove(&key);
                self.shared
                    .finish(&mut state, handle, RequestStatus::Aborted, None);
            }
            status if status.is_terminal() && auto_reap => {
                Shared::reap_entry(&mut state, handle);
            }
            _ => {}
        }
        debug!(handle = %handle, auto_reap, "Abort requested");
        true
    }

    /// Changes the priority of a live request.
    ///
    /// Queued requests are removed and reinserted so the ordered set stays
    /// consistent; running requests only record the new value.
    pub fn reprioritize(&self, handle: RequestHandle, priority: u32) -> bool {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.registry.get_mut(handle) else {
            return false;
        };
        match entry.status {
            RequestStatus::Queued => {
                let old_key = entry.key(handle);
                entry.priority = priority;
                let new_key = entry.key(handle);
                state.ready.remove(&old_key);
                state.ready.insert(new_key);
                true
            }
            RequestStatus::InProgress => {
                entry.priority = priority;
                true
            }
            _ => false,
        }
    }

    /// Takes the result of a finished request without blocking.
    ///
    /// Returns `None` while the request is still active or if the handle is
    /// not live. The output is moved out on the first call; with `auto_reap`
    /// the entry is removed as well.
    pub fn complete(
        &self,
        handle: RequestHandle,
        auto_reap: bool,
    ) -> Option<Completion<W::Output>> {
        let mut state = self.shared.state.lock();
        let entry = state.registry.get_mut(handle)?;
        if !entry.status.is_terminal() {
            return None;
        }
        let completion = Completion {
            status: entry.status,
            timed_out: entry.timed_out,
            output: entry.output.take(),
        };
        if auto_reap {
            Shared::reap_entry(&mut state, handle);
        }
        Some(completion)
    }

    /// Removes a finished request from the registry.
    pub fn reap(&self, handle: RequestHandle) -> bool {
        let mut state = self.shared.state.lock();
        match state.registry.get(handle) {
            Some(entry) if entry.status.is_terminal() => {
                Shared::reap_entry(&mut state, handle).is_some()
            }
            _ => false,
        }
    }

    /// Blocks the caller until the request finishes.
    ///
    /// Busy-polls with a short sleep; in cooperative mode each poll also
    /// pumps the queue. Returns `None` if the handle vanished.
    pub fn wait_for_result(
        &self,
        handle: RequestHandle,
        auto_reap: bool,
    ) -> Option<Completion<W::Output>> {
        loop {
            let status = self.poll_status(handle);
            if status.is_missing() || status == RequestStatus::PendingDelete {
                return None;
            }
            if status.is_terminal() {
                return self.complete(handle, auto_reap);
            }
            if self.cooperative && self.pump() {
                continue;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Runs at most one queued request on the calling thread.
    ///
    /// Returns true if a request was claimed.
    pub fn pump(&self) -> bool {
        match self.shared.claim_next() {
            Some(claimed) => {
                self.shared.execute(claimed);
                true
            }
            None => false,
        }
    }

    /// Forces requests running longer than `ceiling` to `Aborted`.
    ///
    /// The work itself keeps running; its eventual result is discarded.
    /// Returns the number of requests forced.
    pub fn sweep_stale(&self, ceiling: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        let stale: Vec<(RequestHandle, Duration)> = state
            .registry
            .iter()
            .filter_map(|(handle, entry)| {
                let started = entry.started_at?;
                let age = crate::time::elapsed_since(started, now);
                (entry.status == RequestStatus::InProgress && age > ceiling)
                    .then_some((handle, age))
            })
            .collect();

        for (handle, age) in &stale {
            warn!(
                handle = %handle,
                age_secs = age.as_secs(),
                ceiling_secs = ceiling.as_secs(),
                "Stale request exceeded ceiling; forcing abort"
            );
            if let Some(entry) = state.registry.get_mut(*handle) {
                entry.abort.store(true, Ordering::Relaxed);
                entry.timed_out = true;
            }
            self.shared
                .finish(&mut state, *handle, RequestStatus::Aborted, None);
            self.shared.counters.stale.fetch_add(1, Ordering::Relaxed);
        }
        stale.len()
    }

    /// Number of requests waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().ready.len()
    }

    /// Returns true if nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.ready.is_empty() && state.in_flight == 0
    }

    /// Snapshot of queue counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        let c = &self.shared.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            handed_off: c.handed_off.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            queued: state.ready.len(),
            in_flight: state.in_flight,
            live: state.registry.len(),
        }
    }

    /// Stops the queue.
    ///
    /// Rejects further submissions, wakes every thread and waits up to the
    /// configured timeout for them to drain. Requests still queued or running
    /// afterwards are marked `Aborted` and reaped. Idempotent.
    pub fn shutdown(&self) {
        let already = self.shared.quitting.swap(true, Ordering::AcqRel);
        let mut threads = std::mem::take(&mut *self.threads.lock());
        if already && threads.is_empty() {
            return;
        }

        self.shared.available.notify_all();
        if let Some(lane) = &self.shared.lane {
            lane.available.notify_all();
        }

        let deadline = Instant::now() + self.shared.config.shutdown_timeout;
        while threads.iter().any(|t| !t.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        let mut detached = 0;
        for handle in threads {
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!(queue = %self.shared.config.name, "Worker thread panicked");
                }
            } else {
                detached += 1;
            }
        }

        let mut state = self.shared.state.lock();
        let active: Vec<RequestHandle> = state
            .registry
            .iter()
            .filter(|(_, entry)| entry.status.is_active())
            .map(|(handle, _)| handle)
            .collect();
        for handle in &active {
            if let Some(entry) = state.registry.get_mut(*handle) {
                entry.abort.store(true, Ordering::Relaxed);
            }
            self.shared
                .finish(&mut state, *handle, RequestStatus::Aborted, None);
            Shared::reap_entry(&mut state, *handle);
        }
        state.ready.clear();
        drop(state);

        if !active.is_empty() || detached > 0 {
            warn!(
                queue = %self.shared.config.name,
                active = active.len(),
                detached_threads = detached,
                "Work queue shut down with requests still active"
            );
        } else {
            info!(queue = %self.shared.config.name, "Work queue shut down");
        }
    }
}

impl<W: Work> Drop for PriorityWorkQueue<W> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<W: Work> super::watchdog::SweepStale for PriorityWorkQueue<W> {
    fn sweep_stale(&self, ceiling: Duration) -> usize {
        PriorityWorkQueue::sweep_stale(self, ceiling)
    }
}
