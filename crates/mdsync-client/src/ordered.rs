//! Per-key ordered task execution.
//!
//! Jobs submitted under the same key run one after another in submission
//! order; jobs under different keys run concurrently. A key's worker task
//! exists only while it has queued jobs.
//!
//! A job submitted under several keys holds every one of those queues: it
//! starts once each queue reached it and later jobs under any of the keys
//! wait until it finished.

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Queue {
    jobs: mpsc::UnboundedSender<Job>,
    worker: AbortHandle,
}

type Queues<K> = Arc<Mutex<HashMap<K, Queue>>>;

/// Runs jobs in order per key.
pub(crate) struct OrderedExecutor<K> {
    queues: Queues<K>,
}

impl<K> OrderedExecutor<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub(crate) fn new() -> Self {
        Self { queues: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Queue `job` behind every job already submitted under `key`.
    pub(crate) fn submit(&self, key: K, job: impl Future<Output = ()> + Send + 'static) {
        let mut job: Job = Box::pin(job);
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(queue) = queues.get(&key) {
            match queue.jobs.send(job) {
                Ok(()) => return,
                // Worker was aborted; start a new one
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(drain(key.clone(), job, rx, Arc::clone(&self.queues)));
        queues.insert(key, Queue { jobs: tx, worker: worker.abort_handle() });
    }
}

impl<K> OrderedExecutor<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Queue `job` behind every job already submitted under any of `keys`.
    ///
    /// The job runs on the worker of the first key. Every other key gets a
    /// gate that reports when its queue reached the job and then holds the
    /// queue until the job finished. Jobs only ever wait on gates submitted
    /// together with them, and each queue sees submissions in the same
    /// order, so two multi-key jobs cannot wait on each other.
    pub(crate) fn submit_all(&self, keys: Vec<K>, job: impl Future<Output = ()> + Send + 'static) {
        let mut unique: Vec<K> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        let mut unique = unique.into_iter();
        let Some(first) = unique.next() else {
            tokio::spawn(job);
            return;
        };

        let mut arrivals = Vec::new();
        let mut releases = Vec::new();
        for key in unique {
            let (arrived_tx, arrived_rx) = oneshot::channel::<()>();
            let (release_tx, release_rx) = oneshot::channel::<()>();
            self.submit(key, async move {
                if arrived_tx.send(()).is_ok() {
                    // Released when the job finished or was dropped
                    let _released = release_rx.await;
                }
            });
            arrivals.push(arrived_rx);
            releases.push(release_tx);
        }

        self.submit(first, async move {
            for arrived in arrivals {
                // Gate aborted by shutdown
                if arrived.await.is_err() {
                    return;
                }
            }
            job.await;
            drop(releases);
        });
    }
}

impl<K> OrderedExecutor<K> {
    /// Abort every worker and drop queued jobs.
    pub(crate) fn shutdown(&self) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, queue) in queues.drain() {
            queue.worker.abort();
        }
    }

    /// Keys with a live worker.
    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<K> Drop for OrderedExecutor<K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drain<K: Eq + Hash>(
    key: K,
    first: Job,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    queues: Queues<K>,
) {
    first.await;

    loop {
        let next = match jobs.try_recv() {
            Ok(job) => Some(job),
            Err(_) => {
                // Submitters send under the lock, so an empty channel seen
                // under the lock stays empty until the entry is removed.
                let mut queues = queues.lock().unwrap_or_else(PoisonError::into_inner);
                match jobs.try_recv() {
                    Ok(job) => Some(job),
                    Err(_) => {
                        queues.remove(&key);
                        None
                    },
                }
            },
        };

        let Some(job) = next else {
            return;
        };
        job.await;
    }
}
