//! Runs, jobs and their storage.
//!
//! A run is a batch of channel references; each distinct reference becomes a
//! job. A run is FINISHED exactly when all of its jobs are terminal, and it
//! is finalized exactly once no matter how many workers complete jobs
//! concurrently.

mod aggregator;
mod memory;
mod sqlite;
mod store;
mod types;

pub use aggregator::RunAggregator;
pub use memory::MemoryRunStore;
pub use sqlite::SqliteRunStore;
pub use store::RunStore;
pub use types::*;
