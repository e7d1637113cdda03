//! # Worker Pool Module
//!
//! Priority-scheduled, bounded-concurrency task runner driving the
//! scanner, the feature extractor, and the grouping engine.
//!
//! ## Scheduling rules
//! - At most `thread_cap` tasks execute at once; the cap can change at
//!   runtime and is observed within one scheduling quantum.
//! - Strict priority: an eligible higher-priority task starts before any
//!   eligible lower-priority task. FIFO within a priority.
//! - Per I/O category, task starts are spaced at least
//!   `1 / io_throttle_ops_per_sec` apart.
//! - While user interaction exceeds the configured rate, NORMAL and LOW
//!   task starts are delayed by the back-off duration. CRITICAL and HIGH
//!   are never delayed by back-off.
//!
//! A panicking or erroring task is caught and recorded as failed; it
//! never poisons the pool.

mod monitor;
mod throttle;

pub use monitor::InteractionMonitor;
pub use throttle::IoThrottle;

use crate::error::PoolError;
use crate::events::{Event, EventSender, PoolEvent};
use crate::settings::ConcurrencySettings;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

/// One scheduling quantum: how often blocked workers recheck state,
/// queue contents, and the thread cap.
const SCHED_QUANTUM: Duration = Duration::from_millis(25);

/// Task priority, strict across levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Back-off only delays the lower half.
    fn delayed_by_back_off(self) -> bool {
        matches!(self, Priority::Normal | Priority::Low)
    }
}

/// Pool lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Stopped,
    Running,
    Paused,
    Stopping,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Stopped => "stopped",
            PoolState::Running => "running",
            PoolState::Paused => "paused",
            PoolState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    /// The task was still queued when the pool stopped
    Dropped,
}

/// Handle returned by [`WorkerPool::submit`].
pub struct TaskHandle {
    id: String,
    done: Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(&self) -> TaskOutcome {
        self.done.recv().unwrap_or(TaskOutcome::Dropped)
    }

    /// Non-blocking check; None while the task is queued or executing.
    pub fn try_wait(&self) -> Option<TaskOutcome> {
        self.done.try_recv().ok()
    }
}

/// Snapshot returned by [`WorkerPool::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub state: PoolState,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Tasks executing right now
    pub active_workers: usize,
    /// Queue depth per priority, CRITICAL first
    pub queued: [usize; 4],
    pub throttle_deferrals: u64,
    pub back_off_deferrals: u64,
    pub state_transitions: u64,
}

impl PoolStats {
    pub fn queue_depth(&self) -> usize {
        self.queued.iter().sum()
    }
}

/// Pool construction parameters, extracted from the settings snapshot.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub thread_cap: usize,
    pub io_throttle_ops_per_sec: f64,
    pub back_off_enabled: bool,
    pub interaction_threshold: u32,
    pub interaction_window: Duration,
    pub back_off_duration: Duration,
}

impl PoolConfig {
    pub fn from_settings(settings: &ConcurrencySettings) -> Self {
        Self {
            thread_cap: settings.thread_cap.max(1),
            io_throttle_ops_per_sec: settings.io_throttle_ops_per_sec,
            back_off_enabled: settings.back_off_enabled,
            interaction_threshold: settings.interaction_threshold_events_per_sec,
            interaction_window: Duration::from_secs_f64(settings.interaction_window_seconds),
            back_off_duration: Duration::from_secs_f64(settings.back_off_duration_seconds),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_settings(&ConcurrencySettings::default())
    }
}

type TaskFn = Box<dyn FnOnce() -> Result<(), String> + Send + 'static>;

struct QueuedTask {
    id: String,
    category: String,
    priority: Priority,
    work: TaskFn,
    done: Sender<TaskOutcome>,
}

/// Everything a worker needs to pick its next task, under one lock.
struct Sched {
    state: PoolState,
    queues: [VecDeque<QueuedTask>; 4],
    running: usize,
}

impl Sched {
    fn pop_next(&mut self) -> Option<QueuedTask> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }
}

struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    throttle_deferrals: AtomicU64,
    back_off_deferrals: AtomicU64,
    state_transitions: AtomicU64,
}

struct PoolInner {
    sched: Mutex<Sched>,
    cv: Condvar,
    thread_cap: AtomicUsize,
    throttle: IoThrottle,
    monitor: InteractionMonitor,
    back_off_enabled: bool,
    back_off_duration: Duration,
    pending_ids: Mutex<HashSet<String>>,
    counters: Counters,
    events: EventSender,
}

impl PoolInner {
    /// Transition under the sched lock, emitting the observable event.
    fn set_state(&self, sched: &mut Sched, to: PoolState) {
        let from = sched.state;
        if from == to {
            return;
        }
        sched.state = to;
        self.counters.state_transitions.fetch_add(1, Ordering::SeqCst);
        self.events.send(Event::Pool(PoolEvent::StateChanged {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        }));
    }

    /// Sleep out back-off and throttle obligations before a task starts.
    fn pace(&self, task: &QueuedTask) {
        if self.back_off_enabled
            && task.priority.delayed_by_back_off()
            && self.monitor.is_backing_off()
        {
            self.counters.back_off_deferrals.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.back_off_duration);
        }

        let delay = self.throttle.reserve(&task.category);
        if !delay.is_zero() {
            self.counters.throttle_deferrals.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
        }
    }

    /// Run one task, isolating panics and recording the outcome.
    fn execute(&self, task: QueuedTask) {
        let work = task.work;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(())) => {
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                TaskOutcome::Completed
            }
            Ok(Err(message)) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(task = %task.id, %message, "task failed");
                TaskOutcome::Failed(message)
            }
            Err(payload) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                let message = panic_message(payload);
                warn!(task = %task.id, %message, "task panicked");
                TaskOutcome::Failed(message)
            }
        };

        if let Ok(mut ids) = self.pending_ids.lock() {
            ids.remove(&task.id);
        }
        let _ = task.done.send(outcome);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    let Ok(mut sched) = inner.sched.lock() else {
        return;
    };
    loop {
        match sched.state {
            PoolState::Stopping | PoolState::Stopped => return,
            PoolState::Paused => {
                let Ok(guard) = inner.cv.wait(sched) else {
                    return;
                };
                sched = guard;
                continue;
            }
            PoolState::Running => {}
        }

        if sched.running >= inner.thread_cap.load(Ordering::SeqCst) {
            let Ok((guard, _)) = inner.cv.wait_timeout(sched, SCHED_QUANTUM) else {
                return;
            };
            sched = guard;
            continue;
        }

        let Some(task) = sched.pop_next() else {
            let Ok((guard, _)) = inner.cv.wait_timeout(sched, SCHED_QUANTUM) else {
                return;
            };
            sched = guard;
            continue;
        };

        sched.running += 1;
        drop(sched);

        inner.pace(&task);
        inner.execute(task);

        let Ok(guard) = inner.sched.lock() else {
            return;
        };
        sched = guard;
        sched.running -= 1;
        inner.cv.notify_all();
    }
}

/// The shared task runner. See the module docs for scheduling rules.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn workers and transition Stopped -> Running.
    pub fn start(config: PoolConfig, events: EventSender) -> Self {
        let inner = Arc::new(PoolInner {
            sched: Mutex::new(Sched {
                state: PoolState::Stopped,
                queues: Default::default(),
                running: 0,
            }),
            cv: Condvar::new(),
            thread_cap: AtomicUsize::new(config.thread_cap),
            throttle: IoThrottle::new(config.io_throttle_ops_per_sec),
            monitor: InteractionMonitor::new(
                config.interaction_window,
                config.interaction_threshold,
            ),
            back_off_enabled: config.back_off_enabled,
            back_off_duration: config.back_off_duration,
            pending_ids: Mutex::new(HashSet::new()),
            counters: Counters {
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                throttle_deferrals: AtomicU64::new(0),
                back_off_deferrals: AtomicU64::new(0),
                state_transitions: AtomicU64::new(0),
            },
            events,
        });

        if let Ok(mut sched) = inner.sched.lock() {
            inner.set_state(&mut sched, PoolState::Running);
        }

        let pool = Self {
            inner,
            workers: Mutex::new(Vec::new()),
        };
        pool.spawn_workers(config.thread_cap);
        pool
    }

    fn spawn_workers(&self, target: usize) {
        let Ok(mut workers) = self.workers.lock() else {
            return;
        };
        while workers.len() < target {
            let inner = Arc::clone(&self.inner);
            workers.push(thread::spawn(move || worker_loop(inner)));
        }
    }

    /// Enqueue work. Returns immediately; the handle resolves when the
    /// task reaches a terminal state. A task id may be reused once its
    /// task has completed.
    pub fn submit<F>(
        &self,
        task_id: impl Into<String>,
        priority: Priority,
        category: &str,
        work: F,
    ) -> Result<TaskHandle, PoolError>
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        let id = task_id.into();

        {
            let mut ids = self.inner.pending_ids.lock().map_err(|_| {
                PoolError::NotAccepting {
                    state: "poisoned".to_string(),
                }
            })?;
            if !ids.insert(id.clone()) {
                return Err(PoolError::DuplicateTask { id });
            }
        }

        let mut sched = self.inner.sched.lock().map_err(|_| PoolError::NotAccepting {
            state: "poisoned".to_string(),
        })?;
        if matches!(sched.state, PoolState::Stopped | PoolState::Stopping) {
            let state = sched.state;
            drop(sched);
            if let Ok(mut ids) = self.inner.pending_ids.lock() {
                ids.remove(&id);
            }
            return Err(PoolError::NotAccepting {
                state: state.as_str().to_string(),
            });
        }

        let (done_tx, done_rx) = bounded(1);
        sched.queues[priority.index()].push_back(QueuedTask {
            id: id.clone(),
            category: category.to_string(),
            priority,
            work: Box::new(work),
            done: done_tx,
        });
        self.inner.counters.submitted.fetch_add(1, Ordering::SeqCst);
        drop(sched);
        self.inner.cv.notify_all();

        Ok(TaskHandle { id, done: done_rx })
    }

    /// Running -> Paused. Executing tasks finish; queued tasks stay
    /// queued; submissions still succeed but nothing new starts.
    pub fn pause(&self) {
        if let Ok(mut sched) = self.inner.sched.lock() {
            if sched.state == PoolState::Running {
                self.inner.set_state(&mut sched, PoolState::Paused);
                self.inner.cv.notify_all();
            }
        }
    }

    /// Paused -> Running; queued tasks become eligible again.
    pub fn resume(&self) {
        if let Ok(mut sched) = self.inner.sched.lock() {
            if sched.state == PoolState::Paused {
                self.inner.set_state(&mut sched, PoolState::Running);
                self.inner.cv.notify_all();
            }
        }
    }

    /// Drain and shut down. Queued tasks are dropped, in-flight tasks get
    /// up to `timeout` to finish, stragglers are abandoned. Returns true
    /// when every in-flight task finished inside the timeout.
    pub fn stop(&self, timeout: Duration) -> bool {
        let Ok(mut sched) = self.inner.sched.lock() else {
            return false;
        };
        if sched.state == PoolState::Stopped {
            return true;
        }

        self.inner.set_state(&mut sched, PoolState::Stopping);

        // Drop everything still queued
        for queue in sched.queues.iter_mut() {
            while let Some(task) = queue.pop_front() {
                if let Ok(mut ids) = self.inner.pending_ids.lock() {
                    ids.remove(&task.id);
                }
                let _ = task.done.send(TaskOutcome::Dropped);
            }
        }
        self.inner.cv.notify_all();

        let deadline = Instant::now() + timeout;
        while sched.running > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Ok((guard, _)) = self.inner.cv.wait_timeout(sched, remaining) else {
                return false;
            };
            sched = guard;
        }

        let drained = sched.running == 0;
        self.inner.set_state(&mut sched, PoolState::Stopped);
        self.inner.cv.notify_all();
        drained
    }

    /// Change the concurrency cap at runtime; takes effect within one
    /// scheduling quantum. Raising the cap spawns additional workers.
    pub fn set_thread_cap(&self, cap: usize) {
        let cap = cap.max(1);
        self.inner.thread_cap.store(cap, Ordering::SeqCst);
        self.spawn_workers(cap);
        self.inner.cv.notify_all();
    }

    /// Report one external interaction event to the back-off monitor.
    pub fn note_interaction(&self) {
        self.inner.monitor.record();
    }

    /// True while the interaction rate is above the back-off threshold.
    pub fn is_backing_off(&self) -> bool {
        self.inner.back_off_enabled && self.inner.monitor.is_backing_off()
    }

    pub fn state(&self) -> PoolState {
        self.inner
            .sched
            .lock()
            .map(|sched| sched.state)
            .unwrap_or(PoolState::Stopped)
    }

    pub fn stats(&self) -> PoolStats {
        let (state, running, queued) = self
            .inner
            .sched
            .lock()
            .map(|sched| {
                let queued = [
                    sched.queues[0].len(),
                    sched.queues[1].len(),
                    sched.queues[2].len(),
                    sched.queues[3].len(),
                ];
                (sched.state, sched.running, queued)
            })
            .unwrap_or((PoolState::Stopped, 0, [0; 4]));

        let c = &self.inner.counters;
        PoolStats {
            state,
            submitted: c.submitted.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            active_workers: running,
            queued,
            throttle_deferrals: c.throttle_deferrals.load(Ordering::SeqCst),
            back_off_deferrals: c.back_off_deferrals.load(Ordering::SeqCst),
            state_transitions: c.state_transitions.load(Ordering::SeqCst),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.state() != PoolState::Stopped {
            self.stop(Duration::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{channel, null_sender};
    use std::sync::atomic::AtomicBool;

    fn quick_config(thread_cap: usize) -> PoolConfig {
        PoolConfig {
            thread_cap,
            io_throttle_ops_per_sec: 0.0,
            back_off_enabled: false,
            interaction_threshold: 3,
            interaction_window: Duration::from_secs(1),
            back_off_duration: Duration::from_millis(50),
        }
    }

    #[test]
    fn submitted_task_completes() {
        let pool = WorkerPool::start(quick_config(2), null_sender());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let handle = pool
            .submit("t1", Priority::Normal, "test", move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert_eq!(handle.wait(), TaskOutcome::Completed);
        assert!(ran.load(Ordering::SeqCst));
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn duplicate_task_id_is_rejected() {
        let pool = WorkerPool::start(quick_config(1), null_sender());
        pool.pause();

        pool.submit("same", Priority::Normal, "test", || Ok(()))
            .unwrap();
        let second = pool.submit("same", Priority::Normal, "test", || Ok(()));
        assert!(matches!(second, Err(PoolError::DuplicateTask { .. })));
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn erroring_task_is_recorded_failed() {
        let pool = WorkerPool::start(quick_config(1), null_sender());
        let handle = pool
            .submit("bad", Priority::Normal, "test", || {
                Err("could not read file".to_string())
            })
            .unwrap();

        assert!(matches!(handle.wait(), TaskOutcome::Failed(_)));
        assert_eq!(pool.stats().failed, 1);
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn panicking_task_does_not_poison_the_pool() {
        let pool = WorkerPool::start(quick_config(1), null_sender());

        let panicking = pool
            .submit("boom", Priority::Normal, "test", || panic!("boom"))
            .unwrap();
        assert!(matches!(panicking.wait(), TaskOutcome::Failed(_)));

        let follow_up = pool
            .submit("after", Priority::Normal, "test", || Ok(()))
            .unwrap();
        assert_eq!(follow_up.wait(), TaskOutcome::Completed);
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn strict_priority_orders_starts() {
        let pool = WorkerPool::start(quick_config(1), null_sender());
        pool.pause();

        let order = Arc::new(Mutex::new(Vec::new()));
        for (id, priority) in [
            ("low", Priority::Low),
            ("critical", Priority::Critical),
            ("normal", Priority::Normal),
            ("high", Priority::High),
        ] {
            let order = order.clone();
            pool.submit(id, priority, "test", move || {
                order.lock().unwrap().push(id);
                Ok(())
            })
            .unwrap();
        }

        pool.resume();
        while pool.stats().completed < 4 {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            *order.lock().unwrap(),
            vec!["critical", "high", "normal", "low"]
        );
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn paused_pool_queues_without_starting() {
        let pool = WorkerPool::start(quick_config(2), null_sender());
        pool.pause();

        let handle = pool
            .submit("queued", Priority::Normal, "test", || Ok(()))
            .unwrap();
        thread::sleep(Duration::from_millis(60));
        assert!(handle.try_wait().is_none());
        assert_eq!(pool.stats().queue_depth(), 1);

        pool.resume();
        assert_eq!(handle.wait(), TaskOutcome::Completed);
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn stop_drops_queued_tasks() {
        let pool = WorkerPool::start(quick_config(1), null_sender());
        pool.pause();

        let queued = pool
            .submit("queued", Priority::Low, "test", || Ok(()))
            .unwrap();
        assert!(pool.stop(Duration::from_secs(1)));
        assert_eq!(queued.wait(), TaskOutcome::Dropped);

        let late = pool.submit("late", Priority::Normal, "test", || Ok(()));
        assert!(matches!(late, Err(PoolError::NotAccepting { .. })));
    }

    #[test]
    fn stop_waits_for_in_flight_work() {
        let pool = WorkerPool::start(quick_config(1), null_sender());
        let handle = pool
            .submit("slow", Priority::Normal, "test", || {
                thread::sleep(Duration::from_millis(80));
                Ok(())
            })
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(pool.stop(Duration::from_secs(2)));
        assert_eq!(handle.wait(), TaskOutcome::Completed);
    }

    #[test]
    fn state_transitions_emit_events() {
        let (sender, receiver) = channel();
        let pool = WorkerPool::start(quick_config(1), sender);
        pool.pause();
        pool.resume();
        pool.stop(Duration::from_secs(1));

        let transitions: Vec<(String, String)> = receiver
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                Event::Pool(PoolEvent::StateChanged { from, to }) => Some((from, to)),
                _ => None,
            })
            .collect();
        let expected: Vec<(String, String)> = [
            ("stopped", "running"),
            ("running", "paused"),
            ("paused", "running"),
            ("running", "stopping"),
            ("stopping", "stopped"),
        ]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
        assert_eq!(transitions, expected);
        assert_eq!(pool.stats().state_transitions, 5);
    }

    #[test]
    fn back_off_delays_normal_but_not_critical() {
        let config = PoolConfig {
            back_off_enabled: true,
            interaction_threshold: 3,
            interaction_window: Duration::from_secs(5),
            back_off_duration: Duration::from_millis(120),
            ..quick_config(2)
        };
        let pool = WorkerPool::start(config, null_sender());

        for _ in 0..5 {
            pool.note_interaction();
        }
        assert!(pool.is_backing_off());

        let started = Instant::now();
        let critical = pool
            .submit("critical", Priority::Critical, "ui", || Ok(()))
            .unwrap();
        assert_eq!(critical.wait(), TaskOutcome::Completed);
        assert!(started.elapsed() < Duration::from_millis(100));

        let normal = pool
            .submit("normal", Priority::Normal, "hash", || Ok(()))
            .unwrap();
        assert_eq!(normal.wait(), TaskOutcome::Completed);
        assert!(pool.stats().back_off_deferrals > 0);
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn throttle_deferrals_are_counted() {
        let config = PoolConfig {
            io_throttle_ops_per_sec: 20.0,
            ..quick_config(2)
        };
        let pool = WorkerPool::start(config, null_sender());

        let handles: Vec<_> = (0..3)
            .map(|i| {
                pool.submit(format!("t{}", i), Priority::Normal, "scan", || Ok(()))
                    .unwrap()
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.wait(), TaskOutcome::Completed);
        }
        assert!(pool.stats().throttle_deferrals > 0);
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn raising_thread_cap_takes_effect() {
        let pool = WorkerPool::start(quick_config(1), null_sender());
        pool.set_thread_cap(4);

        let barrier = Arc::new(std::sync::Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let barrier = barrier.clone();
                pool.submit(format!("par{}", i), Priority::Normal, "test", move || {
                    // Deadlocks unless four tasks really run at once
                    barrier.wait();
                    Ok(())
                })
                .unwrap()
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.wait(), TaskOutcome::Completed);
        }
        pool.stop(Duration::from_secs(1));
    }

    #[test]
    fn stats_snapshot_counts_submissions() {
        let pool = WorkerPool::start(quick_config(2), null_sender());
        let handle = pool
            .submit("one", Priority::High, "test", || Ok(()))
            .unwrap();
        handle.wait();

        let stats = pool.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        pool.stop(Duration::from_secs(1));
    }
}
