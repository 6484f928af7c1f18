//! Mock YouTube channel API for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::youtube::{ApiError, ChannelApi, ChannelLookup, ChannelQuery};

/// A recorded lookup for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedLookup {
    pub api_key: String,
    pub query: ChannelQuery,
    pub timestamp: Instant,
}

#[derive(Default)]
struct MockState {
    channels: HashMap<(&'static str, String), ChannelLookup>,
    exhausted_keys: HashSet<String>,
    scripted_errors: VecDeque<ApiError>,
    calls: Vec<RecordedLookup>,
    delay: Option<Duration>,
}

/// Mock implementation of the ChannelApi trait.
///
/// Provides controllable behavior for testing:
/// - Register handles and usernames with the channel IDs they resolve to
/// - Mark individual keys as out of quota
/// - Script transient failures and delays
/// - Record every lookup for assertions
///
/// Lookups are checked in this order: scripted errors, exhausted keys,
/// registered channels. Unregistered queries return `NotFound`.
///
/// # Example
///
/// ```rust,ignore
/// use tubeid_core::testing::MockChannelApi;
///
/// let api = MockChannelApi::new();
/// api.add_handle("MrBeast", "UCX6OQ3DkcsbYNE6H8uQQuVA");
/// api.exhaust_key("key-1");
///
/// // ... resolve "@MrBeast" through a pool holding key-1 and key-2 ...
///
/// assert_eq!(api.keys_used(), vec!["key-1", "key-2"]);
/// ```
#[derive(Default)]
pub struct MockChannelApi {
    state: Mutex<MockState>,
}

impl MockChannelApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(query: &ChannelQuery) -> (&'static str, String) {
        (query.param(), query.value().to_lowercase())
    }

    /// Resolve `@handle` (with or without the `@`) to `channel_id`.
    pub fn add_handle(&self, handle: &str, channel_id: &str) {
        let query = ChannelQuery::Handle(handle.trim_start_matches('@').to_string());
        self.state().channels.insert(
            Self::key(&query),
            ChannelLookup::Found(channel_id.to_string()),
        );
    }

    /// Make a handle match several channels.
    pub fn add_ambiguous_handle(&self, handle: &str, channel_ids: &[&str]) {
        let query = ChannelQuery::Handle(handle.trim_start_matches('@').to_string());
        self.state().channels.insert(
            Self::key(&query),
            ChannelLookup::Ambiguous(channel_ids.iter().map(|s| s.to_string()).collect()),
        );
    }

    /// Resolve a legacy username to `channel_id`.
    pub fn add_username(&self, username: &str, channel_id: &str) {
        let query = ChannelQuery::Username(username.to_string());
        self.state().channels.insert(
            Self::key(&query),
            ChannelLookup::Found(channel_id.to_string()),
        );
    }

    /// Every lookup made with `api_key` fails with a quota error.
    pub fn exhaust_key(&self, api_key: &str) {
        self.state().exhausted_keys.insert(api_key.to_string());
    }

    /// The next `count` lookups fail with `error`, whatever the key.
    pub fn fail_next(&self, count: usize, error: ApiError) {
        let mut state = self.state();
        for _ in 0..count {
            state.scripted_errors.push_back(error.clone());
        }
    }

    /// Delay every lookup by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Keys used, in call order.
    pub fn keys_used(&self) -> Vec<String> {
        self.state().calls.iter().map(|c| c.api_key.clone()).collect()
    }

    pub fn recorded_lookups(&self) -> Vec<RecordedLookup> {
        self.state().calls.clone()
    }
}

#[async_trait]
impl ChannelApi for MockChannelApi {
    fn name(&self) -> &str {
        "mock"
    }

    async fn lookup(&self, api_key: &str, query: &ChannelQuery) -> Result<ChannelLookup, ApiError> {
        let delay = {
            let mut state = self.state();
            state.calls.push(RecordedLookup {
                api_key: api_key.to_string(),
                query: query.clone(),
                timestamp: Instant::now(),
            });
            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(error) = state.scripted_errors.pop_front() {
            return Err(error);
        }
        if state.exhausted_keys.contains(api_key) {
            return Err(ApiError::Quota {
                reason: "quotaExceeded".to_string(),
            });
        }
        Ok(state
            .channels
            .get(&Self::key(query))
            .cloned()
            .unwrap_or(ChannelLookup::NotFound))
    }
}
