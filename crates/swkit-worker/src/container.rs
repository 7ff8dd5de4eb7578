//! The service worker as seen from the page: registration, fetch and sync
//! dispatch, clients, and the event channel.

use std::sync::Arc;

use swkit_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::clients::{Client, ClientMatchOptions, Clients};
use crate::lifecycle::{
    evict_stale_generations, seed_generation, Registration, ServiceWorkerState, StateChanges,
    WorkerId, WorkerVersion,
};
use crate::strategy::{self, StrategyContext};
use crate::sync::{NoopSyncHandler, SyncEvent, SyncHandler, SyncManager, SyncOutcome};
use crate::{BackgroundJobs, Result, ServiceWorkerError, WorkerConfig};

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Client that issued the request, if known.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }

    pub fn from_client(request: Request, client_id: impl Into<String>) -> Self {
        Self {
            request,
            client_id: Some(client_id.into()),
        }
    }
}

/// Service worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: WorkerId,
        new_state: ServiceWorkerState,
    },
    /// Install aborted; the worker is redundant.
    InstallFailed { worker_id: WorkerId, reason: String },
    /// A superseded cache generation was deleted.
    CacheEvicted { generation: String },
    /// Clients now controlled by a newly activated worker.
    ClientsClaimed {
        worker_id: WorkerId,
        client_ids: Vec<String>,
    },
}

/// Service worker container for one scope.
pub struct ServiceWorkerContainer {
    registration: Arc<RwLock<Registration>>,

    /// Held for the whole of every install and activate step.
    transition: Mutex<()>,

    /// Clients.
    pub clients: Arc<RwLock<Clients>>,

    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn CacheStore>,
    jobs: BackgroundJobs,
    sync_handler: Arc<dyn SyncHandler>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a container for `scope`.
    pub fn new(
        scope: Url,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn CacheStore>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: Arc::new(RwLock::new(Registration::new(scope))),
                transition: Mutex::new(()),
                clients: Arc::new(RwLock::new(Clients::new())),
                fetcher,
                store,
                jobs: BackgroundJobs::new(),
                sync_handler: Arc::new(NoopSyncHandler),
                event_tx,
            },
            event_rx,
        )
    }

    /// Replace the background sync handler.
    pub fn with_sync_handler(mut self, handler: Arc<dyn SyncHandler>) -> Self {
        self.sync_handler = handler;
        self
    }

    pub async fn scope(&self) -> Url {
        self.registration.read().await.scope.clone()
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        self.store.clone()
    }

    pub fn jobs(&self) -> &BackgroundJobs {
        &self.jobs
    }

    /// Install, then activate straight away if the config asks to skip waiting.
    /// Overlapping registrations run one after the other.
    pub async fn register(&self, config: WorkerConfig) -> Result<WorkerId> {
        let skip_waiting = config.skip_waiting;
        let _transition = self.transition.lock().await;
        let id = self.install_locked(config).await?;
        if skip_waiting {
            self.activate_locked().await?;
        }
        Ok(id)
    }

    /// Install a new worker version: seed its cache generation and move it to
    /// waiting. On failure the version is redundant and the active worker,
    /// if any, keeps control.
    pub async fn install(&self, config: WorkerConfig) -> Result<WorkerId> {
        let _transition = self.transition.lock().await;
        self.install_locked(config).await
    }

    /// Activate the waiting worker: delete every other cache generation,
    /// promote it, and claim all clients.
    pub async fn activate(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        self.activate_locked().await
    }

    async fn install_locked(&self, config: WorkerConfig) -> Result<WorkerId> {
        config.validate()?;
        let version = WorkerVersion::new(config);
        let id = version.id;
        let config = version.config.clone();

        let scope = {
            let mut registration = self.registration.write().await;
            let changes = registration.begin_install(version);
            self.emit_changes(changes);
            registration.scope.clone()
        };

        info!(worker = %id, generation = %config.cache_name, "Installing service worker");

        match seed_generation(self.fetcher.as_ref(), self.store.as_ref(), &config, &scope).await {
            Ok(count) => {
                let changes = self.registration.write().await.install_complete(id)?;
                self.emit_changes(changes);
                info!(worker = %id, assets = count, "Service worker installed");
                Ok(id)
            }
            Err(e) => {
                let changes = self.registration.write().await.install_failed(id)?;
                self.emit_changes(changes);
                warn!(worker = %id, error = %e, "Service worker install failed");
                let _ = self.event_tx.send(ServiceWorkerEvent::InstallFailed {
                    worker_id: id,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn activate_locked(&self) -> Result<()> {
        let (id, current) = {
            let registration = self.registration.read().await;
            let waiting = registration.waiting.as_ref().ok_or_else(|| {
                ServiceWorkerError::InvalidState("no worker is waiting to activate".to_string())
            })?;
            (waiting.id, waiting.cache_name().to_string())
        };

        for generation in evict_stale_generations(self.store.as_ref(), &current).await {
            let _ = self
                .event_tx
                .send(ServiceWorkerEvent::CacheEvicted { generation });
        }

        let changes = self.registration.write().await.activate(id)?;
        self.emit_changes(changes);

        let claimed = self.clients.write().await.claim(id);
        info!(worker = %id, generation = %current, clients = claimed.len(), "Service worker activated");
        if !claimed.is_empty() {
            let _ = self.event_tx.send(ServiceWorkerEvent::ClientsClaimed {
                worker_id: id,
                client_ids: claimed,
            });
        }
        Ok(())
    }

    /// Answer an intercepted request through the active worker's router.
    /// Without an active worker the request goes straight to the network.
    pub async fn handle_fetch(&self, event: FetchEvent) -> Result<Response> {
        let active = self.registration.read().await.active.clone();
        let FetchEvent { request, client_id } = event;

        let Some(version) = active else {
            debug!(url = %request.url, "No active worker, passing through");
            return self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| ServiceWorkerError::network(&request.url, &e));
        };

        let route = version.router.classify(&request);
        debug!(
            url = %request.url,
            route = %route,
            client = client_id.as_deref().unwrap_or("-"),
            "Handling fetch"
        );

        strategy::respond(&self.context(&version), route, request).await
    }

    /// Dispatch a background sync event to the sync handler.
    pub async fn handle_sync(&self, event: SyncEvent) -> Result<SyncOutcome> {
        let tag = self
            .registration
            .read()
            .await
            .get_active()
            .map(|active| active.config.sync_tag.clone())
            .ok_or_else(|| ServiceWorkerError::InvalidState("no active worker".to_string()))?;

        SyncManager::new(tag, self.sync_handler.clone())
            .dispatch(&event)
            .await
    }

    /// Wait for every background refresh and revalidation to finish.
    pub async fn wait_for_background(&self) {
        self.jobs.drain().await;
    }

    pub async fn add_client(&self, client: Client) {
        self.clients.write().await.add(client);
    }

    /// Snapshot of the clients matching `options`, sorted by ID.
    pub async fn match_clients(&self, options: &ClientMatchOptions) -> Vec<Client> {
        self.clients
            .read()
            .await
            .match_all(options)
            .into_iter()
            .cloned()
            .collect()
    }

    /// ID and state of the active worker.
    pub async fn active_worker(&self) -> Option<(WorkerId, ServiceWorkerState)> {
        self.registration
            .read()
            .await
            .get_active()
            .map(|active| (active.id, active.state))
    }

    /// Cache generation of the active worker.
    pub async fn active_cache_name(&self) -> Option<String> {
        self.registration
            .read()
            .await
            .get_active()
            .map(|active| active.cache_name().to_string())
    }

    /// ID of the worker waiting to activate.
    pub async fn waiting_worker(&self) -> Option<WorkerId> {
        self.registration.read().await.waiting.as_ref().map(|w| w.id)
    }

    fn context(&self, version: &WorkerVersion) -> StrategyContext {
        StrategyContext {
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            generation: Arc::from(version.cache_name()),
            offline_page: Arc::from(version.config.offline_page.as_str()),
            network_timeout: version.config.network_timeout(),
            jobs: self.jobs.clone(),
        }
    }

    fn emit_changes(&self, changes: StateChanges) {
        for (worker_id, new_state) in changes {
            debug!(worker = %worker_id, state = ?new_state, "Worker state changed");
            let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
                worker_id,
                new_state,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCacheStore;
    use swkit_net::StubFetcher;

    fn setup() -> (
        ServiceWorkerContainer,
        mpsc::UnboundedReceiver<ServiceWorkerEvent>,
        Arc<StubFetcher>,
        Arc<MemoryCacheStore>,
    ) {
        let stub = Arc::new(StubFetcher::new());
        let store = Arc::new(MemoryCacheStore::new());
        let (container, rx) = ServiceWorkerContainer::new(
            Url::parse("https://app.example/").unwrap(),
            stub.clone(),
            store.clone(),
        );
        (container, rx, stub, store)
    }

    fn small_config(cache_name: &str) -> WorkerConfig {
        WorkerConfig {
            cache_name: cache_name.to_string(),
            static_assets: vec!["/".to_string(), "/offline.html".to_string()],
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_register_installs_and_activates() {
        let (container, mut rx, stub, store) = setup();
        stub.respond("https://app.example/", "<html>")
            .respond("https://app.example/offline.html", "offline");

        let id = container.register(small_config("v1")).await.unwrap();

        assert_eq!(
            container.active_worker().await,
            Some((id, ServiceWorkerState::Activated))
        );
        assert_eq!(store.entry_count("v1").await, Some(2));

        let states: Vec<ServiceWorkerState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServiceWorkerEvent::StateChange { worker_id, new_state } if worker_id == id => {
                    Some(new_state)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_without_skip_waiting_worker_waits() {
        let (container, _rx, stub, _store) = setup();
        stub.respond("https://app.example/", "<html>")
            .respond("https://app.example/offline.html", "offline");

        let config = WorkerConfig {
            skip_waiting: false,
            ..small_config("v1")
        };
        let id = container.register(config).await.unwrap();

        assert_eq!(container.waiting_worker().await, Some(id));
        assert!(container.active_worker().await.is_none());

        container.activate().await.unwrap();
        assert_eq!(container.active_cache_name().await.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_activate_without_waiting_worker_fails() {
        let (container, _rx, _stub, _store) = setup();
        assert!(matches!(
            container.activate().await,
            Err(ServiceWorkerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_install() {
        let (container, mut rx, _stub, _store) = setup();
        let config = WorkerConfig {
            offline_page: "offline.html".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            container.install(config).await,
            Err(ServiceWorkerError::Config(_))
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_activate_claims_clients() {
        let (container, mut rx, stub, _store) = setup();
        stub.respond("https://app.example/", "<html>")
            .respond("https://app.example/offline.html", "offline");

        let client = Client::window(Url::parse("https://app.example/dashboard").unwrap());
        let client_id = client.id.clone();
        container.add_client(client).await;

        let id = container.register(small_config("v1")).await.unwrap();

        let controlled = container
            .match_clients(&ClientMatchOptions::default())
            .await;
        assert_eq!(controlled.len(), 1);
        assert_eq!(controlled[0].id, client_id);
        assert_eq!(controlled[0].controller, Some(id));
        assert!(drain(&mut rx).contains(&ServiceWorkerEvent::ClientsClaimed {
            worker_id: id,
            client_ids: vec![client_id],
        }));
    }

    #[tokio::test]
    async fn test_fetch_without_active_worker_passes_through() {
        let (container, _rx, stub, store) = setup();
        stub.respond("https://app.example/app.css", "body{}");

        let request = Request::get(Url::parse("https://app.example/app.css").unwrap());
        let response = container.handle_fetch(FetchEvent::new(request)).await.unwrap();

        assert_eq!(response.text().unwrap(), "body{}");
        assert!(store.generations().await.is_empty());
    }

    #[tokio::test]
    async fn test_sync_dispatch_needs_active_worker() {
        let (container, _rx, stub, _store) = setup();
        assert!(container.handle_sync(SyncEvent::new("sync-data")).await.is_err());

        stub.respond("https://app.example/", "<html>")
            .respond("https://app.example/offline.html", "offline");
        container.register(small_config("v1")).await.unwrap();

        assert_eq!(
            container.handle_sync(SyncEvent::new("sync-data")).await,
            Ok(SyncOutcome::Completed)
        );
        assert_eq!(
            container.handle_sync(SyncEvent::new("other")).await,
            Ok(SyncOutcome::Ignored)
        );
    }
}
