//! The application-level scheduler.
//!
//! An [`Application`] owns the service registry, the shared block pool, and
//! the worker thread pool. Workers admit services round-robin (CAS
//! `Queued -> Running`), drain one bounded batch of tasks, release the
//! service, and move on. The batch bound is the scheduler's own
//! continuation task riding the service's queue — scheduling decisions are
//! interleaved with user tasks on the same worker loop rather than made by
//! a separate blocking scheduler thread.

pub(crate) mod worker;

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::Result;
use crate::pool::BlockPool;
use crate::service::{Provider, Service, TaskContext};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::{Metrics, MetricsSnapshot};

/// `run` was called with no registered services.
pub const EXIT_NO_SERVICES: i32 = -1;

/// `run` was called while the application was already running.
pub const EXIT_ALREADY_RUNNING: i32 = -2;

/// Handle to the runtime. Cheap to clone; all clones share one scheduler.
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

pub(crate) struct AppInner {
    pub(crate) config: Config,
    pub(crate) pool: Arc<BlockPool>,
    registry: RwLock<Vec<Weak<Service>>>,
    cursor: AtomicUsize,
    running: AtomicBool,
    exit_code: AtomicI32,
    service_seq: AtomicUsize,
    #[cfg(feature = "telemetry")]
    pub(crate) metrics: Arc<Metrics>,
}

impl Application {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(BlockPool::with_capacity(config.initial_blocks));
        Ok(Self {
            inner: Arc::new(AppInner {
                config,
                pool,
                registry: RwLock::new(Vec::new()),
                cursor: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                exit_code: AtomicI32::new(0),
                service_seq: AtomicUsize::new(0),
                #[cfg(feature = "telemetry")]
                metrics: Arc::new(Metrics::new()),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<AppInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Create and register a service. The provider is constructed by `init`
    /// on a worker thread, as the service's first task — never on the
    /// calling thread.
    pub fn create_service<P, F>(&self, init: F) -> Arc<Service>
    where
        P: Provider,
        F: FnOnce(&TaskContext<'_>) -> P + Send + 'static,
    {
        let seq = self.inner.service_seq.fetch_add(1, Ordering::Relaxed);
        let service = Arc::new(Service::new(
            self.inner.pool.clone(),
            self.inner.config.segment_capacity,
            format!("service-{seq}"),
        ));

        service.set_startup();
        service.post(move |ctx| {
            let provider = init(ctx);
            ctx.service().install_provider(Box::new(provider));
        });

        self.inner.registry.write().push(Arc::downgrade(&service));
        service.set_queued();
        service
    }

    /// Run the scheduling loop until every service has stopped.
    ///
    /// Spawns `thread_count - 1` workers (0 = hardware concurrency) and
    /// participates with the calling thread; blocks until all work drains
    /// and every service is retired. Returns the code last passed to
    /// [`stop`](Application::stop), 0 if services simply drained out, or a
    /// negative sentinel when preconditions fail.
    pub fn run(&self, thread_count: usize) -> i32 {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return EXIT_ALREADY_RUNNING;
        }
        if self.inner.live_services() == 0 {
            self.inner.running.store(false, Ordering::Release);
            return EXIT_NO_SERVICES;
        }

        let threads = if thread_count == 0 {
            self.inner.config.worker_threads()
        } else {
            thread_count
        };

        let mut handles = Vec::with_capacity(threads.saturating_sub(1));
        for id in 1..threads {
            let inner = self.inner.clone();
            let mut builder = thread::Builder::new()
                .name(format!("{}-{}", self.inner.config.thread_name_prefix, id));
            if let Some(stack_size) = self.inner.config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let pin = self.inner.config.pin_workers;
            match builder.spawn(move || {
                #[cfg(target_os = "linux")]
                if pin {
                    worker::pin_thread_to_core(id);
                }
                worker::run(&inner, id);
            }) {
                Ok(handle) => handles.push(handle),
                Err(e) => eprintln!("rondo: failed to spawn worker {id}: {e}"),
            }
        }

        #[cfg(target_os = "linux")]
        if self.inner.config.pin_workers {
            worker::pin_thread_to_core(0);
        }
        worker::run(&self.inner, 0);

        for handle in handles {
            let _ = handle.join();
        }

        self.inner.running.store(false, Ordering::Release);
        self.inner.exit_code.load(Ordering::Acquire)
    }

    /// Record `exit_code` (last call wins) and ask every registered service
    /// to stop. `run` returns once the resulting stop tasks have drained.
    pub fn stop(&self, exit_code: i32) {
        self.inner.exit_code.store(exit_code, Ordering::Release);
        let services: Vec<Arc<Service>> = self
            .inner
            .registry
            .read()
            .iter()
            .filter_map(|w| w.upgrade())
            .collect();
        for service in services {
            service.stop(false);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Number of registered, still-alive services.
    pub fn num_services(&self) -> usize {
        self.inner.live_services()
    }

    /// Remove `service` from the registry; it will not be scheduled again.
    pub(crate) fn unregister(&self, service: &Arc<Service>) {
        let mut registry = self.inner.registry.write();
        registry.retain(|w| match w.upgrade() {
            Some(s) => !Arc::ptr_eq(&s, service),
            None => false,
        });
    }

    #[cfg(feature = "telemetry")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("services", &self.num_services())
            .field("running", &self.is_running())
            .finish()
    }
}

impl AppInner {
    pub(crate) fn live_services(&self) -> usize {
        self.registry
            .read()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Round-robin admission: advance the shared cursor and try to admit
    /// the indexed service; one full cycle without a win means nothing is
    /// admissible right now.
    pub(crate) fn select_service(&self) -> Option<Arc<Service>> {
        let registry = self.registry.read();
        let len = registry.len();
        if len == 0 {
            return None;
        }

        let mut saw_expired = false;
        for _ in 0..len {
            let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            match registry[slot].upgrade() {
                Some(service) => {
                    if service.try_admit() {
                        #[cfg(feature = "telemetry")]
                        self.metrics.record_admission();
                        return Some(service);
                    }
                }
                None => saw_expired = true,
            }
        }
        drop(registry);

        // lazy pruning of expired entries; skipped under contention
        if saw_expired {
            if let Some(mut registry) = self.registry.try_write() {
                registry.retain(|w| w.strong_count() > 0);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ExecutionState;

    #[test]
    fn test_run_without_services() {
        let app = Application::new(Config::default()).unwrap();
        assert_eq!(app.run(1), EXIT_NO_SERVICES);
        assert!(!app.is_running());
    }

    #[test]
    fn test_create_service_registers_queued() {
        let app = Application::new(Config::default()).unwrap();
        let svc = app.create_service(|_| ());
        assert_eq!(svc.state(), ExecutionState::Queued);
        assert_eq!(app.num_services(), 1);
        // provider task is pending, not run: construction happens on a
        // worker thread only
        assert!(!svc.has_provider());
    }

    #[test]
    fn test_select_service_round_robin() {
        let app = Application::new(Config::default()).unwrap();
        let a = app.create_service(|_| ());
        let b = app.create_service(|_| ());

        let first = app.inner.select_service().unwrap();
        let second = app.inner.select_service().unwrap();
        assert!(Arc::ptr_eq(&first, &a) || Arc::ptr_eq(&first, &b));
        assert!(!Arc::ptr_eq(&first, &second));

        // both admitted: nothing left
        assert!(app.inner.select_service().is_none());

        first.requeue();
        let third = app.inner.select_service().unwrap();
        assert!(Arc::ptr_eq(&third, &first));
    }

    #[test]
    fn test_expired_services_pruned() {
        let app = Application::new(Config::default()).unwrap();
        let svc = app.create_service(|_| ());
        assert_eq!(app.num_services(), 1);

        drop(svc);
        assert_eq!(app.num_services(), 0);

        // a full selection sweep prunes the dead weak entry
        assert!(app.inner.select_service().is_none());
        assert_eq!(app.inner.registry.read().len(), 0);
    }
}
