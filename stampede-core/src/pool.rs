use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ThinkTime;
use crate::executor::Executor;
use crate::metrics::BuiltinMetrics;
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

#[derive(Debug, Default)]
struct VuShared {
    state: AtomicU8,
    iterations: AtomicU64,
}

impl VuShared {
    fn state(&self) -> VuState {
        VuState::from_repr(self.state.load(Ordering::Acquire)).unwrap_or(VuState::Stopped)
    }

    fn set_state(&self, state: VuState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Moves `from` to `to`; a no-op if the state already moved on.
    fn transition(&self, from: VuState, to: VuState) {
        let _ = self.state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

#[derive(Debug)]
struct Worker {
    id: u64,
    shared: Arc<VuShared>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn request_stop(&self) {
        self.shared.transition(VuState::Idle, VuState::Stopping);
        self.shared.transition(VuState::Running, VuState::Stopping);
        self.cancel.cancel();
    }
}

// Keeps the `vus` gauge and the worker state honest even when the task is aborted.
struct RunningGuard<'a> {
    metrics: &'a BuiltinMetrics,
    shared: &'a VuShared,
}

impl<'a> RunningGuard<'a> {
    fn enter(metrics: &'a BuiltinMetrics, shared: &'a VuShared) -> Self {
        shared.transition(VuState::Idle, VuState::Running);
        metrics.vu_started();
        Self { metrics, shared }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.shared.set_state(VuState::Stopped);
        self.metrics.vu_stopped();
    }
}

async fn worker_loop<S: Scenario>(
    id: u64,
    scenario: Arc<S>,
    executor: Executor,
    think_time: ThinkTime,
    shared: Arc<VuShared>,
    cancel: CancellationToken,
) {
    if cancel.is_cancelled() {
        shared.set_state(VuState::Stopped);
        return;
    }
    let _guard = RunningGuard::enter(executor.builtin(), &shared);

    let mut iteration: u64 = 0;
    while !cancel.is_cancelled() && shared.state() == VuState::Running {
        let ctx = executor.context(id, iteration);
        executor.run_iteration(scenario.as_ref(), ctx).await;
        shared.iterations.fetch_add(1, Ordering::Relaxed);
        iteration = iteration.saturating_add(1);

        let pause = think_time.sample();
        if pause.is_zero() {
            // Scenarios without await points would otherwise starve the runtime.
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub idle: u64,
    pub running: u64,
    pub stopping: u64,
    pub stopped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that stopped on their own within the grace period.
    pub graceful: u64,
    /// Workers aborted mid-iteration at the grace deadline.
    pub forced: u64,
    /// Iterations completed by every worker the pool ever started.
    pub iterations: u64,
}

/// Owns the virtual users of a run and adjusts their number to a target.
///
/// Workers are spawned in id order; shrinking stops the most recently started ones
/// first. A stopping worker finishes its in-flight iteration before it exits.
#[derive(Debug)]
pub struct VirtualUserPool<S> {
    scenario: Arc<S>,
    executor: Executor,
    think_time: ThinkTime,
    cancel: CancellationToken,
    next_id: u64,
    active: Vec<Worker>,
    stopping: Vec<Worker>,
    retired_iterations: u64,
    spawned: u64,
}

impl<S: Scenario> VirtualUserPool<S> {
    /// Worker tokens are children of `cancel`: cancelling it stops every worker.
    pub fn new(
        scenario: Arc<S>,
        executor: Executor,
        think_time: ThinkTime,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scenario,
            executor,
            think_time,
            cancel,
            next_id: 1,
            active: Vec::new(),
            stopping: Vec::new(),
            retired_iterations: 0,
            spawned: 0,
        }
    }

    /// Workers not asked to stop.
    pub fn active(&self) -> u64 {
        self.active.len() as u64
    }

    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for w in self.active.iter().chain(&self.stopping) {
            match w.shared.state() {
                VuState::Idle => counts.idle += 1,
                VuState::Running => counts.running += 1,
                VuState::Stopping => counts.stopping += 1,
                VuState::Stopped => counts.stopped += 1,
            }
        }
        counts
    }

    /// Iterations completed so far by all workers, live and retired.
    pub fn iterations(&self) -> u64 {
        self.active
            .iter()
            .chain(&self.stopping)
            .map(|w| w.shared.iterations.load(Ordering::Relaxed))
            .fold(self.retired_iterations, u64::saturating_add)
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);

        let shared = Arc::new(VuShared::default());
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(worker_loop(
            id,
            self.scenario.clone(),
            self.executor.clone(),
            self.think_time,
            shared.clone(),
            cancel.clone(),
        ));

        self.spawned = self.spawned.saturating_add(1);
        self.active.push(Worker {
            id,
            shared,
            cancel,
            handle,
        });
    }

    fn retire(&mut self, workers: Vec<Worker>) {
        for w in workers {
            self.retired_iterations = self
                .retired_iterations
                .saturating_add(w.shared.iterations.load(Ordering::Relaxed));
        }
    }

    fn reap(&mut self) {
        let (done, still): (Vec<_>, Vec<_>) = std::mem::take(&mut self.stopping)
            .into_iter()
            .partition(|w| w.handle.is_finished());
        self.stopping = still;
        self.retire(done);

        // An active worker only finishes on parent cancellation or when its task died.
        let (dead, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|w| w.handle.is_finished());
        self.active = alive;
        if !dead.is_empty() && !self.cancel.is_cancelled() {
            tracing::warn!(
                ids = ?dead.iter().map(|w| w.id).collect::<Vec<_>>(),
                "virtual users exited unexpectedly, replacing them"
            );
        }
        self.retire(dead);
    }

    /// Grows or shrinks the set of active workers to `target`. Workers whose task
    /// ended unexpectedly are replaced.
    pub fn reconcile(&mut self, target: u64) {
        self.reap();
        if self.cancel.is_cancelled() {
            return;
        }

        let active = self.active();
        if target > active {
            for _ in active..target {
                self.spawn_worker();
            }
            tracing::debug!(from = active, to = target, "pool grown");
        } else if target < active {
            let keep = usize::try_from(target).unwrap_or(usize::MAX);
            let excess: Vec<Worker> = self.active.drain(keep..).rev().collect();
            for w in &excess {
                w.request_stop();
            }
            tracing::debug!(
                from = active,
                to = target,
                stopped_ids = ?excess.iter().map(|w| w.id).collect::<Vec<_>>(),
                "pool shrunk"
            );
            self.stopping.extend(excess);
        }
    }

    /// Moves every worker to stopping.
    pub fn stop_all(&mut self) {
        let all: Vec<Worker> = self.active.drain(..).rev().collect();
        for w in &all {
            w.request_stop();
        }
        self.stopping.extend(all);
    }

    /// Stops every worker and waits for them until `grace` has elapsed; workers still
    /// running at the deadline are aborted.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        self.stop_all();
        let deadline = Instant::now() + grace;

        let mut report = ShutdownReport {
            iterations: self.retired_iterations,
            ..ShutdownReport::default()
        };
        for mut w in self.stopping.drain(..) {
            match tokio::time::timeout_at(deadline, &mut w.handle).await {
                Ok(_) => report.graceful += 1,
                Err(_) => {
                    w.handle.abort();
                    let _ = (&mut w.handle).await;
                    report.forced += 1;
                }
            }
            report.iterations = report
                .iterations
                .saturating_add(w.shared.iterations.load(Ordering::Relaxed));
        }

        if report.forced > 0 {
            tracing::warn!(
                forced = report.forced,
                ?grace,
                "virtual users did not stop within the grace period and were aborted"
            );
        }
        report
    }
}

impl<S> Drop for VirtualUserPool<S> {
    fn drop(&mut self) {
        for w in self.active.iter().chain(&self.stopping) {
            w.cancel.cancel();
        }
    }
}
