//! Dispatcher that records tasks instead of executing them.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::dispatch::{DispatchError, Dispatcher, JobTask};

#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<JobTask>>,
    delayed: Mutex<Vec<(JobTask, Duration)>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks passed to `dispatch`.
    pub fn dispatched(&self) -> Vec<JobTask> {
        self.dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Tasks passed to `dispatch_after`, with their delay.
    pub fn delayed(&self) -> Vec<(JobTask, Duration)> {
        self.delayed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: JobTask) -> Result<(), DispatchError> {
        self.dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
        Ok(())
    }

    async fn dispatch_after(&self, task: JobTask, delay: Duration) -> Result<(), DispatchError> {
        self.delayed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((task, delay));
        Ok(())
    }
}
