//! Port traits for infrastructure boundaries.
//!
//! These are the only abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - Planner providers (OpenAI, Anthropic, Together, test fakes)
//! - Job status storage (SQLite, in-memory)
//! - Object storage and task queues
//! - Generation providers and the remote batch service
//! - Clock (for testing)

mod error;
mod external;
mod testing;
mod types;

// =============================================================================
// Errors
// =============================================================================
pub use error::{
    BatchJobError, GenerationError, PlannerError, QueueError, StatusStoreError, StorageError,
};

// =============================================================================
// External Service Ports
// =============================================================================
pub use external::{
    BatchJobPort, GenerationProviderPort, GeneratorRegistryPort, ObjectStorePort,
    PlannerProviderPort, QueueNotificationPort, QueuePort, StatusStorePort,
};

// =============================================================================
// Types
// =============================================================================
pub use types::{
    BatchJobRequest, BatchJobState, BatchSubmitTask, EnvQueueTask, EnvTask, GenerationRequest,
    PipelineTask, QueueItem, QueueItemId, QueueItemStatus, WaitResult,
};

// =============================================================================
// Test-Only Mocks (only available during test builds)
// =============================================================================
#[cfg(test)]
pub use external::{
    MockBatchJobPort, MockObjectStorePort, MockPlannerProviderPort, MockStatusStorePort,
};

#[cfg(test)]
pub use testing::MockClockPort;

// =============================================================================
// Testing Ports
// =============================================================================
pub use testing::ClockPort;
