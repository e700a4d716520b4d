//! Delta accumulation for outbound contact and group sync.
//!
//! Local changes are recorded field by field while the user edits. A later
//! `sync()` turns the pending deltas into chunked transactions and removes
//! exactly the deltas that were synced, so edits recorded during a sync stay
//! pending for the next one.

pub mod contacts;
pub mod groups;

use std::future::Future;

use mdsync_core::Environment;
use tokio::task::JoinSet;

use crate::{config::DeltaSyncConfig, error::SyncError};

/// Change to a picture, resolved to bytes only when syncing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PictureMarker {
    /// No change
    #[default]
    Unchanged,
    /// Picture removed
    Removed,
    /// Picture replaced; the bytes are read from the store at sync time
    Updated,
}

/// What a contact delta reflects as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncAction {
    /// Full record. Sticky: once added, later edits do not demote it.
    Create,
    /// Changed fields only
    #[default]
    Update,
}

/// Run `work` once per chunk of `items`, concurrently, and wait for all of
/// them or `chunk_timeout × chunks`, whichever comes first.
///
/// Succeeds only if every chunk succeeded. The first chunk error is
/// returned after the remaining chunks finished.
pub(crate) async fn run_chunks<E, T, F, Fut>(
    env: &E,
    config: DeltaSyncConfig,
    items: &[T],
    work: F,
) -> Result<(), SyncError>
where
    E: Environment,
    T: Clone,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for chunk in items.chunks(config.chunk_size.max(1)) {
        tasks.spawn(work(chunk.to_vec()));
    }

    let chunks = tasks.len();
    let deadline = config.chunk_timeout.saturating_mul(u32::try_from(chunks).unwrap_or(u32::MAX));
    tracing::debug!(items = items.len(), chunks, ?deadline, "delta sync started");

    let all = async {
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "sync chunk task failed");
                Err(SyncError::LinkClosed)
            });
            if let Err(e) = result {
                tracing::error!(error = %e, "sync chunk failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    };

    tokio::select! {
        result = all => result,
        () = env.sleep(deadline) => {
            tracing::error!(?deadline, chunks, "delta sync timed out");
            Err(SyncError::Timeout { elapsed: deadline })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    };

    use super::*;

    #[derive(Clone)]
    struct TokioEnv;

    impl Environment for TokioEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn wall_clock_millis(&self) -> u64 {
            0
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }
    }

    fn config() -> DeltaSyncConfig {
        DeltaSyncConfig { chunk_size: 100, chunk_timeout: Duration::from_secs(300) }
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_of_one_hundred() {
        let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let items: Vec<u32> = (0..250).collect();

        let recorded = Arc::clone(&sizes);
        run_chunks(&TokioEnv, config(), &items, move |chunk| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(chunk.len());
                Ok(())
            }
        })
        .await
        .unwrap();

        let mut sizes = sizes.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![50, 100, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_chunk_fails_sync() {
        let items: Vec<u32> = (0..250).collect();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&finished);
        let result = run_chunks(&TokioEnv, config(), &items, move |chunk| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if chunk.len() == 50 { Err(SyncError::NotEstablished) } else { Ok(()) }
            }
        })
        .await;

        assert_eq!(result, Err(SyncError::NotEstablished));
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_scales_with_chunks() {
        let items: Vec<u32> = (0..150).collect();
        let result = run_chunks(&TokioEnv, config(), &items, |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(SyncError::Timeout { elapsed: Duration::from_secs(600) }));
    }
}
