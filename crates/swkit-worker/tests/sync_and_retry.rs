//! Background sync dispatch and install retries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use swkit_net::{Fetcher, NetError, Request, Response, StubFetcher};
use swkit_worker::{
    InstallConfig, MemoryCacheStore, ServiceWorkerContainer, ServiceWorkerError, SyncEvent,
    SyncHandler, SyncOutcome, WorkerConfig,
};
use url::Url;

/// Fails the first `failures` requests, then defers to the stub.
struct Flaky {
    failures: usize,
    seen: AtomicUsize,
    inner: StubFetcher,
}

#[async_trait]
impl Fetcher for Flaky {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(NetError::RequestFailed("connection reset".into()));
        }
        self.inner.fetch(request).await
    }
}

fn flaky(failures: usize) -> Arc<Flaky> {
    let inner = StubFetcher::new();
    inner.respond("https://planner.example/index.html", "<html>");
    Arc::new(Flaky {
        failures,
        seen: AtomicUsize::new(0),
        inner,
    })
}

fn config(max_attempts: u32) -> WorkerConfig {
    WorkerConfig {
        static_assets: vec!["/index.html".to_string()],
        install: InstallConfig { max_attempts },
        ..Default::default()
    }
}

fn scope() -> Url {
    Url::parse("https://planner.example/").unwrap()
}

#[tokio::test]
async fn install_retries_transient_failures() {
    let fetcher = flaky(2);
    let store = Arc::new(MemoryCacheStore::new());
    let (container, _events) = ServiceWorkerContainer::new(scope(), fetcher.clone(), store.clone());

    container.register(config(3)).await.unwrap();

    assert_eq!(fetcher.seen.load(Ordering::SeqCst), 3);
    assert_eq!(store.entry_count("planner-app-cache-v1").await, Some(1));
}

#[tokio::test]
async fn install_without_retry_fails_on_first_error() {
    let fetcher = flaky(1);
    let store = Arc::new(MemoryCacheStore::new());
    let (container, _events) = ServiceWorkerContainer::new(scope(), fetcher.clone(), store);

    let err = container.register(config(1)).await.unwrap_err();

    assert!(matches!(err, ServiceWorkerError::InstallSeed { .. }));
    assert_eq!(fetcher.seen.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct Outbox {
    flushed: AtomicUsize,
}

#[async_trait]
impl SyncHandler for Outbox {
    async fn sync(&self, _event: &SyncEvent) -> swkit_worker::Result<()> {
        self.flushed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn sync_runs_handler_for_configured_tag_only() {
    let fetcher = flaky(0);
    let store = Arc::new(MemoryCacheStore::new());
    let outbox = Arc::new(Outbox::default());
    let (container, _events) = ServiceWorkerContainer::new(scope(), fetcher, store);
    let container = container.with_sync_handler(outbox.clone());

    let config = WorkerConfig {
        sync_tag: "sync-outbox".to_string(),
        ..config(1)
    };
    container.register(config).await.unwrap();

    assert_eq!(
        container.handle_sync(SyncEvent::new("sync-outbox")).await,
        Ok(SyncOutcome::Completed)
    );
    assert_eq!(
        container.handle_sync(SyncEvent::new("sync-data")).await,
        Ok(SyncOutcome::Ignored)
    );
    assert_eq!(outbox.flushed.load(Ordering::SeqCst), 1);
}
