use super::protocol::{ReplicatePayload, ENDPOINT_REPLICATE};
use crate::cluster::types::NodeInfo;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Fixed pause between delivery attempts for the same task.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// One pending replicated write, bound for a single successor node.
#[derive(Debug, Clone)]
pub struct ReplicationTask {
    pub dest: NodeInfo,
    pub tenant: String,
    pub key: String,
    pub value: Vec<u8>,
    pub ttl_secs: i64,
    pub timestamp: i64,
    pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("replication queue full")]
    QueueFull,
    #[error("replication pipeline stopped")]
    Stopped,
}

/// Best-effort asynchronous replication.
///
/// Producers enqueue without ever blocking; when the bounded queue is full
/// the task is dropped with a warning. A fixed pool of workers drains the
/// queue, POSTing each task to its destination with a per-attempt deadline
/// and retrying a bounded number of times. Failures are never surfaced to
/// the client that triggered the write.
pub struct ReplicationPipeline {
    tx: mpsc::Sender<ReplicationTask>,
    rx: Mutex<mpsc::Receiver<ReplicationTask>>,
    client: reqwest::Client,
    workers: usize,
    max_retries: u32,
    timeout: Duration,
    stop_tx: watch::Sender<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ReplicationPipeline {
    pub fn new(
        workers: usize,
        queue_size: usize,
        timeout: Duration,
        max_retries: u32,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            client: reqwest::Client::new(),
            workers: workers.max(1),
            max_retries,
            timeout,
            stop_tx,
            handles: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Spawns the worker pool.
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock();
        for worker_id in 0..self.workers {
            let pipeline = self.clone();
            handles.push(tokio::spawn(async move {
                pipeline.worker_loop(worker_id).await;
            }));
        }
        tracing::info!("Replication pipeline started with {} workers", self.workers);
    }

    /// Hands a task to the worker pool without blocking. A full queue drops
    /// the task; the error exists for observability and callers routinely
    /// ignore it.
    pub fn enqueue(&self, task: ReplicationTask) -> Result<(), EnqueueError> {
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                tracing::warn!(
                    "Replication queue full; dropping {}/{} -> {}",
                    task.tenant,
                    task.key,
                    task.dest.addr
                );
                Err(EnqueueError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                tracing::warn!(
                    "Replication pipeline stopped; dropping {}/{} -> {}",
                    task.tenant,
                    task.key,
                    task.dest.addr
                );
                Err(EnqueueError::Stopped)
            }
        }
    }

    /// Signals workers to stop and waits until they drain or the deadline
    /// elapses; a task in flight at the deadline is abandoned.
    pub async fn stop(&self, deadline: Duration) {
        let _ = self.stop_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            tracing::warn!("Replication workers did not drain before deadline");
        }
    }

    async fn worker_loop(&self, worker_id: usize) {
        let mut stop = self.stop_tx.subscribe();
        tracing::debug!("Replication worker {} started", worker_id);

        loop {
            let task = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    _ = stop.changed() => return,
                    task = rx.recv() => match task {
                        Some(task) => task,
                        None => return,
                    },
                }
            };
            self.process(task, &mut stop).await;
        }
    }

    async fn process(&self, mut task: ReplicationTask, stop: &mut watch::Receiver<bool>) {
        loop {
            if task.attempt > self.max_retries {
                tracing::warn!(
                    "Giving up replicating {}/{} -> {} after {} attempts",
                    task.tenant,
                    task.key,
                    task.dest.addr,
                    task.attempt
                );
                return;
            }

            match self.deliver(&task).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::debug!(
                        "Replication attempt {} for {}/{} -> {} failed: {}",
                        task.attempt,
                        task.tenant,
                        task.key,
                        task.dest.addr,
                        e
                    );
                    task.attempt += 1;
                    tokio::select! {
                        _ = stop.changed() => return,
                        _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                    }
                }
            }
        }
    }

    async fn deliver(&self, task: &ReplicationTask) -> anyhow::Result<()> {
        let payload = ReplicatePayload {
            user_id: task.tenant.clone(),
            key: task.key.clone(),
            value: task.value.clone(),
            ttl_secs: task.ttl_secs,
            timestamp: task.timestamp,
        };

        let url = format!("http://{}{}", task.dest.addr, ENDPOINT_REPLICATE);
        let response = self
            .client
            .post(url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            anyhow::bail!("replicate returned status {}", response.status());
        }
        Ok(())
    }
}
