//! Worker thread loop.
//!
//! Each worker repeatedly selects a service, drains one admission batch,
//! and releases it. The batch is bounded by the scheduler's continuation
//! marker posted at admission time: tasks that re-post themselves land
//! behind the marker, so a busy service cannot monopolize a worker while
//! siblings starve.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::scheduler::{AppInner, Application};
use crate::service::{ExecutionState, Service, TaskContext, TaskKind};
use crate::util::Backoff;

#[cfg(target_os = "linux")]
pub(crate) fn pin_thread_to_core(core_id: usize) {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id % num_cpus::get(), &mut cpuset);
        let result = libc::sched_setaffinity(
            0, // current thread
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset,
        );
        if result != 0 {
            eprintln!(
                "rondo: failed to pin thread {} to core {}",
                std::thread::current().name().unwrap_or("unknown"),
                core_id
            );
        }
    }
}

pub(crate) fn run(inner: &Arc<AppInner>, _worker_id: usize) {
    let app = Application::from_inner(inner.clone());
    let mut backoff = Backoff::new();

    loop {
        if inner.live_services() == 0 {
            break;
        }
        match inner.select_service() {
            Some(service) => {
                let executed = drain_batch(inner, &app, &service);
                if executed > 0 {
                    backoff.reset();
                } else {
                    backoff.snooze();
                }
            }
            None => backoff.snooze(),
        }
    }
}

/// Execute one admission batch on `service`, then release it.
///
/// Returns the number of user tasks executed.
#[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
fn drain_batch(inner: &Arc<AppInner>, app: &Application, service: &Arc<Service>) -> usize {
    debug_assert_eq!(service.state(), ExecutionState::Running);

    if service.queue_is_empty() {
        release(service);
        return 0;
    }

    // Bound this admission: everything ahead of the marker is ours, what
    // lands behind it belongs to the next admission.
    service.post_reschedule();

    let mut executed = 0;
    while service.state() == ExecutionState::Running {
        let Some(task) = service.dequeue_task() else {
            break;
        };
        match task.kind {
            TaskKind::Run(f) => {
                #[cfg(feature = "telemetry")]
                let queue_wait_ns = task.spawned.elapsed().as_nanos() as u64;

                let ctx = TaskContext::new(service, app);
                let result = catch_unwind(AssertUnwindSafe(|| f(&ctx)));
                executed += 1;

                match result {
                    Ok(()) => {
                        #[cfg(feature = "telemetry")]
                        inner.metrics.record_task_execution(queue_wait_ns);
                    }
                    Err(_) => {
                        eprintln!(
                            "rondo: task {:?} panicked on {}",
                            task.id,
                            service.name()
                        );
                        #[cfg(feature = "telemetry")]
                        inner.metrics.record_task_panic();
                    }
                }
            }
            TaskKind::Reschedule => {
                #[cfg(feature = "telemetry")]
                inner.metrics.record_reschedule();
                break;
            }
        }
    }

    release(service);
    executed
}

/// Hand the service back to the scheduler, or park it if its stop task ran.
fn release(service: &Arc<Service>) {
    match service.state() {
        ExecutionState::Running => service.requeue(),
        ExecutionState::Shutdown => service.retire(),
        _ => {}
    }
}
