//! Testing utilities and mock implementations.
//!
//! Provides a scriptable [`MockChannelApi`] so runs can be driven end to end
//! without network access, a [`RecordingDispatcher`] for asserting what
//! the job processor queues, and a [`FlakyRunStore`] for store outages.
//!
//! # Example
//!
//! ```rust,ignore
//! use tubeid_core::testing::{fixtures, MockChannelApi};
//!
//! let api = Arc::new(MockChannelApi::new());
//! api.add_handle("MrBeast", fixtures::MRBEAST_CHANNEL_ID);
//!
//! let orchestrator = RunOrchestrator::from_config(&fixtures::config(&["k1", "k2"]), api)?;
//! orchestrator.start().await?;
//! ```

mod flaky_run_store;
mod mock_channel_api;
mod recording_dispatcher;

pub use flaky_run_store::FlakyRunStore;

pub use mock_channel_api::{MockChannelApi, RecordedLookup};
pub use recording_dispatcher::RecordingDispatcher;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::config::{Config, StoreBackend};

    pub const MRBEAST_CHANNEL_ID: &str = "UCX6OQ3DkcsbYNE6H8uQQuVA";

    /// In-memory configuration with the given keys and fast retries.
    pub fn config(keys: &[&str]) -> Config {
        let mut config = Config::default();
        config.database.backend = StoreBackend::Memory;
        config.youtube.api_credentials = keys.iter().map(|k| k.to_string()).collect();
        config.resolver.backoff_base_ms = 1;
        config.resolver.backoff_max_ms = 10;
        config.resolver.owner_requests_per_second = 1000;
        config.jobs.workers = 2;
        config
    }

    /// A syntactically valid channel ID derived from `n`.
    pub fn channel_id(n: u32) -> String {
        format!("UC{:0>22}", n)
    }

    /// Owned input list.
    pub fn inputs(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }
}
