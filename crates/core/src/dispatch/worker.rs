//! Local worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::JobTask;
use crate::job::JobProcessor;

/// Fixed set of tasks pulling jobs off a local queue.
///
/// Each worker finishes the job it is executing before honouring shutdown.
/// Jobs still queued at shutdown remain PENDING in the store and are
/// re-dispatched by recovery on the next start.
pub struct WorkerPool {
    workers: usize,
    processor: Arc<JobProcessor>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<JobTask>>>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        processor: Arc<JobProcessor>,
        receiver: mpsc::UnboundedReceiver<JobTask>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            workers: workers.max(1),
            processor,
            receiver: Arc::new(Mutex::new(receiver)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Spawn the workers.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return;
        }

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.workers {
            handles.push(self.spawn_worker(worker_id));
        }
        info!(workers = self.workers, "Worker pool started");
    }

    /// Signal shutdown and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Worker pool not running");
            return;
        }

        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }

    fn spawn_worker(&self, worker_id: usize) -> JoinHandle<()> {
        let processor = Arc::clone(&self.processor);
        let receiver = Arc::clone(&self.receiver);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(worker_id, "Worker started");
            loop {
                let task = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    task = async { receiver.lock().await.recv().await } => task,
                };
                let Some(task) = task else {
                    debug!(worker_id, "Job queue closed");
                    break;
                };
                if !running.load(Ordering::Relaxed) {
                    break;
                }

                match processor.execute(&task).await {
                    Ok(execution) => debug!(
                        worker_id,
                        run_id = %task.run_id,
                        job_id = %task.job_id,
                        ?execution,
                        "Job executed"
                    ),
                    Err(e) => warn!(
                        worker_id,
                        run_id = %task.run_id,
                        job_id = %task.job_id,
                        "Job execution failed: {}", e
                    ),
                }
            }
            debug!(worker_id, "Worker stopped");
        })
    }
}
