//! In-process job queue.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{DispatchError, Dispatcher, JobTask};

/// Create a local queue: the dispatcher side and the receiver a
/// [`WorkerPool`](super::WorkerPool) consumes.
pub fn local_queue() -> (LocalDispatcher, mpsc::UnboundedReceiver<JobTask>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LocalDispatcher { tx }, rx)
}

/// Dispatcher backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    tx: mpsc::UnboundedSender<JobTask>,
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    async fn dispatch(&self, task: JobTask) -> Result<(), DispatchError> {
        self.tx.send(task).map_err(|_| DispatchError::Closed)
    }

    async fn dispatch_after(&self, task: JobTask, delay: Duration) -> Result<(), DispatchError> {
        if self.tx.is_closed() {
            return Err(DispatchError::Closed);
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tx.send(task) {
                // The job stays PENDING in the store and is picked up on restart.
                debug!(job_id = %e.0.job_id, "Queue closed before delayed dispatch");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_delivers_in_order() {
        let (dispatcher, mut rx) = local_queue();
        dispatcher.dispatch(JobTask::new("r", "a")).await.unwrap();
        dispatcher.dispatch(JobTask::new("r", "b")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().job_id, "a");
        assert_eq!(rx.recv().await.unwrap().job_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_after_waits() {
        let (dispatcher, mut rx) = local_queue();
        dispatcher
            .dispatch_after(JobTask::new("r", "a"), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv().unwrap().job_id, "a");
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (dispatcher, rx) = local_queue();
        drop(rx);
        assert!(matches!(
            dispatcher.dispatch(JobTask::new("r", "a")).await,
            Err(DispatchError::Closed)
        ));
        assert!(matches!(
            dispatcher
                .dispatch_after(JobTask::new("r", "a"), Duration::from_millis(1))
                .await,
            Err(DispatchError::Closed)
        ));
    }
}
