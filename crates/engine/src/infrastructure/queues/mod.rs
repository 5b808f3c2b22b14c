//! Task queue adapters.
//!
//! Two named queues carry the pipeline: `orchestrator` (whole-job runs) and
//! `env` (environment generation and batch submission).

use std::time::Duration;

mod memory_queue;
mod notifier;
mod sqlite_queue;

pub use memory_queue::InMemoryQueue;
pub use notifier::InProcessNotifier;
pub use sqlite_queue::SqliteQueue;

pub const ORCHESTRATOR_QUEUE: &str = "orchestrator";
pub const ENV_QUEUE: &str = "env";

/// Attempts allowed per queue item before it is marked failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How long a dequeued item stays claimed before it may be redelivered.
///
/// Longer than the environment stage timeout so a live worker keeps its item.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(15 * 60);

/// Error recorded on an item whose last attempt never reported back.
pub const LEASE_EXHAUSTED: &str = "lease expired on final attempt";
