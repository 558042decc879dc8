//! Two-level priority scheduler for fetch work.
//!
//! User-triggered work is queued as [`Priority::High`], speculative work as
//! [`Priority::Low`]. A single driver runs one task at a time, always
//! preferring the high queue. Low tasks are never interrupted mid-flight; a
//! self-resuming batch yields a continuation at each chunk boundary, and that
//! continuation is parked while high-priority work is waiting.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

pub type TaskFuture = BoxFuture<'static, anyhow::Result<TaskStep>>;
pub type TaskFn = Box<dyn FnOnce() -> TaskFuture + Send>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// User-triggered; must complete promptly
    High,
    /// Speculative/background; may be deferred
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// What a task is working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPayload {
    Run(String),
    Batch(Vec<String>),
}

impl std::fmt::Display for TaskPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPayload::Run(id) => write!(f, "run {id}"),
            TaskPayload::Batch(ids) => write!(f, "batch of {} runs", ids.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued(Priority),
    Running,
    /// A low-priority continuation parked behind pending high-priority work
    Paused,
    Completed,
    Failed,
    /// Dropped by [`Scheduler::clear`] at a chunk boundary
    Cancelled,
}

impl TaskState {
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::{Cancelled, Completed, Failed, Paused, Queued, Running};
        matches!(
            (self, next),
            (Queued(_), Running)
                | (Running, Completed | Failed | Cancelled | Paused | Queued(_))
                | (Paused, Queued(Priority::Low))
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Result of running one step of a task.
pub enum TaskStep {
    Done,
    /// More work remains; the scheduler re-queues (or parks) the continuation.
    Continue { payload: TaskPayload, work: TaskFn },
}

impl TaskStep {
    pub fn continue_with<F, Fut>(payload: TaskPayload, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<TaskStep>> + Send + 'static,
    {
        TaskStep::Continue {
            payload,
            work: Box::new(move || work().boxed()),
        }
    }
}

impl std::fmt::Debug for TaskStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStep::Done => write!(f, "Done"),
            TaskStep::Continue { payload, .. } => {
                f.debug_struct("Continue").field("payload", payload).finish()
            }
        }
    }
}

pub struct Task {
    id: TaskId,
    priority: Priority,
    payload: TaskPayload,
    state: TaskState,
    work: Option<TaskFn>,
    /// Value of the clear epoch when this task last started running
    epoch: u64,
}

impl Task {
    pub fn new<F, Fut>(priority: Priority, payload: TaskPayload, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<TaskStep>> + Send + 'static,
    {
        Self {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            priority,
            payload,
            state: TaskState::Queued(priority),
            work: Some(Box::new(move || work().boxed())),
            epoch: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    fn transition(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition for {}: {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        trace!(task = %self.id, from = ?self.state, to = ?next, "Task transition");
        self.state = next;
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("payload", &self.payload)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Queue depths at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub high: usize,
    pub low: usize,
    pub paused: usize,
    pub running: Option<Priority>,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl SchedulerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.high == 0 && self.low == 0 && self.paused == 0
    }
}

#[derive(Default)]
struct Queues {
    high: VecDeque<Task>,
    low: VecDeque<Task>,
    paused_low: VecDeque<Task>,
    running: Option<Priority>,
    driver_active: bool,
    /// Bumped by every `clear`; continuations of tasks started earlier are dropped
    epoch: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

impl Queues {
    /// Move parked continuations back to the front of the low queue once no
    /// high-priority work is waiting, preserving their order.
    fn resume_paused(&mut self) {
        if !self.high.is_empty() || self.paused_low.is_empty() {
            return;
        }
        debug!(count = self.paused_low.len(), "Resuming paused background work");
        while let Some(mut task) = self.paused_low.pop_back() {
            task.transition(TaskState::Queued(Priority::Low));
            self.low.push_front(task);
        }
    }

    fn next_task(&mut self) -> Option<Task> {
        self.resume_paused();
        self.high.pop_front().or_else(|| self.low.pop_front())
    }
}

/// Cheap to clone; clones share the same queues.
#[derive(Clone, Default)]
pub struct Scheduler {
    queues: Arc<Mutex<Queues>>,
    idle: Arc<Notify>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task, starting the driver if it is not already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, task: Task) -> TaskId {
        let id = task.id;
        let start_driver = {
            let mut queues = self.lock();
            debug!(task = %id, priority = %task.priority, payload = %task.payload, "Task queued");
            match task.priority {
                Priority::High => queues.high.push_back(task),
                Priority::Low => queues.low.push_back(task),
            }
            !std::mem::replace(&mut queues.driver_active, true)
        };

        if start_driver {
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.drive().await });
        }
        id
    }

    pub fn has_pending_high(&self) -> bool {
        !self.lock().high.is_empty()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let queues = self.lock();
        SchedulerSnapshot {
            high: queues.high.len(),
            low: queues.low.len(),
            paused: queues.paused_low.len(),
            running: queues.running,
            completed: queues.completed,
            failed: queues.failed,
            cancelled: queues.cancelled,
        }
    }

    /// Drop every queued and paused task. The running task finishes its
    /// current step, but any continuation it returns is dropped too.
    ///
    /// Returns the number of queued tasks dropped; a continuation dropped
    /// later is counted in [`SchedulerSnapshot::cancelled`] only.
    pub fn clear(&self) -> usize {
        let dropped: Vec<Task> = {
            let mut guard = self.lock();
            let queues = &mut *guard;
            queues.epoch += 1;
            queues
                .high
                .drain(..)
                .chain(queues.low.drain(..))
                .chain(queues.paused_low.drain(..))
                .collect()
        };
        let count = dropped.len();
        if count > 0 {
            warn!(count, "Dropped queued tasks");
        }
        count
    }

    /// Wait until no task is queued, paused or running.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if !self.lock().driver_active {
                return;
            }
            notified.await;
        }
    }

    async fn drive(self) {
        trace!("Scheduler driver started");
        while let Some(mut task) = self.take_next() {
            let outcome = match task.work.take() {
                // Each body runs in its own task so a panic only fails that task
                Some(work) => match tokio::spawn(work()).await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(anyhow::anyhow!("task aborted: {e}")),
                },
                None => Ok(TaskStep::Done),
            };
            self.finish(task, outcome);
        }
        trace!("Scheduler driver idle");
        self.idle.notify_waiters();
    }

    fn take_next(&self) -> Option<Task> {
        let mut queues = self.lock();
        if let Some(mut task) = queues.next_task() {
            task.transition(TaskState::Running);
            task.epoch = queues.epoch;
            queues.running = Some(task.priority);
            debug!(task = %task.id, priority = %task.priority, payload = %task.payload, "Task started");
            Some(task)
        } else {
            queues.running = None;
            queues.driver_active = false;
            None
        }
    }

    fn finish(&self, mut task: Task, outcome: anyhow::Result<TaskStep>) {
        let mut queues = self.lock();
        queues.running = None;

        match outcome {
            Ok(TaskStep::Done) => {
                task.transition(TaskState::Completed);
                queues.completed += 1;
                debug!(task = %task.id, payload = %task.payload, "Task completed");
            }
            Ok(TaskStep::Continue { payload, .. }) if task.epoch != queues.epoch => {
                // Dropping the continuation drops whatever it owns, e.g. a batch's result sender
                task.transition(TaskState::Cancelled);
                queues.cancelled += 1;
                warn!(task = %task.id, payload = %payload, "Dropped continuation of cleared task");
            }
            Ok(TaskStep::Continue { payload, work }) => {
                task.payload = payload;
                task.work = Some(work);
                match task.priority {
                    Priority::High => {
                        task.transition(TaskState::Queued(Priority::High));
                        queues.high.push_front(task);
                    }
                    Priority::Low if !queues.high.is_empty() => {
                        debug!(task = %task.id, payload = %task.payload, "Pausing background task for high-priority work");
                        task.transition(TaskState::Paused);
                        queues.paused_low.push_back(task);
                    }
                    Priority::Low => {
                        task.transition(TaskState::Queued(Priority::Low));
                        queues.low.push_front(task);
                    }
                }
            }
            Err(e) => {
                task.transition(TaskState::Failed);
                queues.failed += 1;
                warn!(task = %task.id, payload = %task.payload, error = %format!("{e:#}"), "Task failed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
