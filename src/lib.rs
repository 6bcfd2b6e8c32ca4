//! RONDO - cooperative multi-threaded service runtime
//!
//! Independent units of work ("services") receive closures ("tasks"); a
//! fixed pool of worker threads drains them through lock-free queues under
//! a round-robin admission scheme. At most one thread executes a given
//! service's tasks at any instant, so a service's own state needs no
//! locking; tasks posted to the same service run in FIFO order.
//!
//! # Quick Start
//!
//! ```no_run
//! use rondo::{Application, Config};
//!
//! let app = Application::new(Config::default()).unwrap();
//!
//! struct Counter { count: u32 }
//!
//! let service = app.create_service(|_ctx| Counter { count: 0 });
//!
//! service.post(|ctx| {
//!     ctx.service().with_provider::<Counter, _>(|c| c.count += 1);
//!     ctx.app().stop(0);
//! });
//!
//! let code = app.run(0); // 0 = hardware concurrency
//! assert_eq!(code, 0);
//! ```
//!
//! # Architecture
//!
//! - **Block Pool**: fixed-size-block allocator over a lock-free free list;
//!   supplies storage for queue segments
//! - **Ring Buffer**: bounded lock-free MPMC buffer, the unit of storage
//!   inside a queue segment
//! - **Atomic List**: lock-free intrusive list; the free list and the
//!   segment chain are both instances
//! - **Unbounded Queue**: logically infinite FIFO of chained ring segments
//! - **Service**: execution context with its own task queue and state
//!   machine
//! - **Application**: service registry, round-robin admission, worker pool

// Lint configuration
#![warn(missing_debug_implementations)]
#![allow(dead_code)] // During development

pub mod config;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod telemetry;
pub mod util;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use scheduler::{Application, EXIT_ALREADY_RUNNING, EXIT_NO_SERVICES};
pub use service::{ExecutionState, Provider, Service, TaskContext};
