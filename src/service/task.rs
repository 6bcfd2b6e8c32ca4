//! Task representation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::TaskContext;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) type TaskFn = Box<dyn FnOnce(&TaskContext<'_>) + Send + 'static>;

pub(crate) enum TaskKind {
    /// A user closure, invoked with the current service handle.
    Run(TaskFn),
    /// The scheduler's continuation marker: ends the current admission
    /// batch so sibling services get a turn.
    Reschedule,
}

pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) spawned: Instant,
    pub(crate) kind: TaskKind,
}

impl Task {
    pub fn run<F>(f: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) + Send + 'static,
    {
        Task {
            id: TaskId::next(),
            spawned: Instant::now(),
            kind: TaskKind::Run(Box::new(f)),
        }
    }

    pub fn reschedule() -> Self {
        Task {
            id: TaskId::next(),
            spawned: Instant::now(),
            kind: TaskKind::Reschedule,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TaskKind::Run(_) => "run",
            TaskKind::Reschedule => "reschedule",
        };
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("spawned", &self.spawned)
            .finish()
    }
}
