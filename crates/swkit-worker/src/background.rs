//! Detached background jobs.
//!
//! Cache refreshes and revalidations outlive the request that started them.
//! A job's error is logged at debug level and dropped; jobs are never aborted,
//! including when the owning worker is superseded or dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use crate::ServiceWorkerError;

#[derive(Debug, Clone, Default)]
pub struct BackgroundJobs {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a job on the current tokio runtime.
    pub fn spawn<F>(&self, label: &'static str, job: F)
    where
        F: Future<Output = Result<(), ServiceWorkerError>> + Send + 'static,
    {
        let span = tracing::debug_span!("background", job = label);
        let handle = tokio::spawn(
            async move {
                if let Err(e) = job.await {
                    debug!(error = %e, "Background job failed");
                }
            }
            .instrument(span),
        );

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Jobs spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait until every job, including jobs spawned while waiting, has finished.
    pub async fn drain(&self) {
        loop {
            let batch = std::mem::take(
                &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background job panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_jobs() {
        let jobs = BackgroundJobs::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            jobs.spawn("count", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        jobs.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(jobs.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let jobs = BackgroundJobs::new();
        jobs.spawn("fail", async {
            Err(ServiceWorkerError::NetworkUnavailable("offline".into()))
        });
        jobs.drain().await;
        assert_eq!(jobs.pending(), 0);
    }

    #[tokio::test]
    async fn test_drain_picks_up_nested_jobs() {
        let jobs = BackgroundJobs::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_jobs = jobs.clone();
        let inner_done = done.clone();
        jobs.spawn("outer", async move {
            inner_jobs.spawn("inner", async move {
                inner_done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        jobs.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
