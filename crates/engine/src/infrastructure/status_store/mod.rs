//! Job status store adapters.
//!
//! Both adapters enforce the same rule: a write lands only if the job is not
//! terminal and the new status does not rank below the stored one.

mod memory;
mod sqlite;

pub use memory::InMemoryStatusStore;
pub use sqlite::SqliteStatusStore;
