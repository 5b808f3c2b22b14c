//! Fusion Engine library.
//!
//! Turns text prompts into validated scene plans and drives each job through
//! planning, environment generation and artifact publication.
//!
//! ## Structure
//!
//! - `use_cases/` - planning, the job pipeline, dispatch and artifact lookup
//! - `infrastructure/` - ports and their adapters (planners, SQLite, storage, batch service)
//! - `api/` - HTTP entry points
//! - `workers` - queue consumers
//! - `processing` - the batch job entrypoint
//! - `app` - Application composition

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod processing;
pub mod use_cases;
pub mod workers;

/// Shared in-memory application for tests.
#[cfg(test)]
pub mod test_fixtures;


pub use app::App;
