//! Services: independent execution contexts with FIFO task queues.
//!
//! A service owns an unbounded lock-free queue of tasks and a small state
//! machine. The scheduler admits a service to a worker thread with a CAS
//! from `Queued` to `Running`, which is what guarantees that at most one
//! thread executes a given service's tasks at any instant — the service's
//! own payload (its provider) therefore needs no locking of its own.
//!
//! State machine:
//!
//! ```text
//! Uninitialized -> Startup -> Queued <-> Running -> Shutdown -> Stopped
//! ```
//!
//! `Queued <-> Running` cycles once per admission batch. The stop task
//! moves `Running -> Shutdown`; the worker parks the service `Stopped`
//! after the batch. `Stopped` is terminal.

pub mod provider;
pub mod task;

pub use provider::Provider;
pub use task::TaskId;

pub(crate) use task::{Task, TaskKind};

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::pool::BlockPool;
use crate::queue::UnboundedQueue;
use crate::scheduler::Application;

/// Observable lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionState {
    Uninitialized = 0,
    /// Created; provider-construction task posted, not yet registered.
    Startup = 1,
    /// Registered and admissible.
    Queued = 2,
    /// Admitted: exactly one worker is draining this service.
    Running = 3,
    /// Stop task has executed; the current batch is winding down.
    Shutdown = 4,
    /// Terminal.
    Stopped = 5,
}

impl ExecutionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ExecutionState::Uninitialized,
            1 => ExecutionState::Startup,
            2 => ExecutionState::Queued,
            3 => ExecutionState::Running,
            4 => ExecutionState::Shutdown,
            5 => ExecutionState::Stopped,
            _ => unreachable!("invalid execution state"),
        }
    }
}

/// Explicit execution context handed to every task closure.
///
/// Replaces ambient thread-local state: a task reaches its own service (to
/// post continuations) and the owning application (to create services or
/// stop the world) only through this handle.
pub struct TaskContext<'a> {
    service: &'a Arc<Service>,
    app: &'a Application,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(service: &'a Arc<Service>, app: &'a Application) -> Self {
        Self { service, app }
    }

    /// The service this task is running on.
    pub fn service(&self) -> &Arc<Service> {
        self.service
    }

    /// The application that owns the worker pool.
    pub fn app(&self) -> &Application {
        self.app
    }
}

impl std::fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("service", &self.service.name())
            .finish()
    }
}

/// An independent execution context.
pub struct Service {
    name: String,
    state: AtomicU8,
    queue: UnboundedQueue<Task>,
    provider: Mutex<Option<Box<dyn Provider>>>,
    stop_posted: AtomicBool,
    stop_lock: Mutex<()>,
    stop_cond: Condvar,
}

impl Service {
    pub(crate) fn new(pool: Arc<BlockPool>, segment_capacity: usize, name: String) -> Self {
        Self {
            name,
            state: AtomicU8::new(ExecutionState::Uninitialized as u8),
            queue: UnboundedQueue::new(pool, segment_capacity),
            provider: Mutex::new(None),
            stop_posted: AtomicBool::new(false),
            stop_lock: Mutex::new(()),
            stop_cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state. Informational: it may change concurrently.
    pub fn state(&self) -> ExecutionState {
        ExecutionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Enqueue a task. Always succeeds; tasks posted to the same service
    /// run in post order. Posting to a stopped service enqueues into a
    /// logically dead queue — the closure is dropped, never run.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce(&TaskContext<'_>) + Send + 'static,
    {
        self.queue.enqueue(Task::run(f));
    }

    /// Request this service stop: a stop task is posted (once) that marks
    /// the service `Shutdown` and unregisters it. Tasks enqueued after the
    /// stop task never execute.
    ///
    /// With `block = true` the caller waits until the service is parked
    /// `Stopped`. Must not be called blocking from the service's own tasks,
    /// and only completes while the application is running.
    pub fn stop(&self, block: bool) {
        if !self.stop_posted.swap(true, Ordering::AcqRel) {
            self.post(|ctx| {
                let service = ctx.service();
                service
                    .state
                    .store(ExecutionState::Shutdown as u8, Ordering::Release);
                ctx.app().unregister(service);
            });
        }

        if block {
            let mut guard = self.stop_lock.lock();
            while self.state() != ExecutionState::Stopped {
                self.stop_cond.wait(&mut guard);
            }
        }
    }

    /// Run `f` against the typed provider payload. `None` if no provider is
    /// installed yet or `P` is not its concrete type.
    pub fn with_provider<P, R>(&self, f: impl FnOnce(&mut P) -> R) -> Option<R>
    where
        P: Provider,
    {
        let mut guard = self.provider.lock();
        let provider = guard.as_mut()?;
        let provider = provider.as_any_mut().downcast_mut::<P>()?;
        Some(f(provider))
    }

    pub fn has_provider(&self) -> bool {
        self.provider.lock().is_some()
    }

    pub(crate) fn install_provider(&self, provider: Box<dyn Provider>) {
        *self.provider.lock() = Some(provider);
    }

    /// Admission CAS: `Queued -> Running`. The winning worker is the only
    /// thread executing this service until it releases it.
    pub(crate) fn try_admit(&self) -> bool {
        self.state
            .compare_exchange(
                ExecutionState::Queued as u8,
                ExecutionState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Hand the service back after a batch: `Running -> Queued`.
    pub(crate) fn requeue(&self) {
        let _ = self.state.compare_exchange(
            ExecutionState::Running as u8,
            ExecutionState::Queued as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Park the service after its stop task ran: `Shutdown -> Stopped`.
    pub(crate) fn retire(&self) {
        let _guard = self.stop_lock.lock();
        self.state
            .store(ExecutionState::Stopped as u8, Ordering::Release);
        self.stop_cond.notify_all();
    }

    pub(crate) fn set_startup(&self) {
        self.state
            .store(ExecutionState::Startup as u8, Ordering::Release);
    }

    pub(crate) fn set_queued(&self) {
        self.state
            .store(ExecutionState::Queued as u8, Ordering::Release);
    }

    pub(crate) fn dequeue_task(&self) -> Option<Task> {
        self.queue.dequeue()
    }

    pub(crate) fn post_reschedule(&self) {
        self.queue.enqueue(Task::reschedule());
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
