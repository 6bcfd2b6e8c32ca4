pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::pool::BlockPool;
pub use crate::queue::{RingBuffer, UnboundedQueue};
pub use crate::scheduler::{Application, EXIT_ALREADY_RUNNING, EXIT_NO_SERVICES};
pub use crate::service::{ExecutionState, Provider, Service, TaskContext, TaskId};

#[cfg(feature = "telemetry")]
pub use crate::telemetry::{Metrics, MetricsSnapshot};
