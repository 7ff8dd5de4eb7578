//! Worker versions, the registration slots, and the install/activate steps
//! that touch the cache store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use swkit_common::{retry_with_backoff, RetryConfig};
use swkit_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStore, RequestKey};
use crate::{Result, Router, ServiceWorkerError, WorkerConfig};

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Seeding its cache generation.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Evicting old generations.
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One version of the worker: a config and the router built from it.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: WorkerId,
    pub config: Arc<WorkerConfig>,
    pub router: Arc<Router>,
    pub state: ServiceWorkerState,
    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            id: WorkerId::new(),
            router: Arc::new(Router::from_config(&config)),
            config: Arc::new(config),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }
}

/// State changes produced by one registration step, in order.
pub type StateChanges = Vec<(WorkerId, ServiceWorkerState)>;

/// The installing / waiting / active slots for one scope.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn get_active(&self) -> Option<&WorkerVersion> {
        self.active.as_ref()
    }

    /// Put `version` in the installing slot. A version already installing is
    /// made redundant.
    pub fn begin_install(&mut self, mut version: WorkerVersion) -> StateChanges {
        let mut changes = Vec::new();
        if let Some(mut previous) = self.installing.take() {
            previous.set_state(ServiceWorkerState::Redundant);
            changes.push((previous.id, previous.state));
        }
        version.set_state(ServiceWorkerState::Installing);
        changes.push((version.id, version.state));
        self.installing = Some(version);
        changes
    }

    /// The installing version `id` failed; the active one stays in control.
    pub fn install_failed(&mut self, id: WorkerId) -> Result<StateChanges> {
        let mut failed = take_slot(&mut self.installing, id, "installing")?;
        failed.set_state(ServiceWorkerState::Redundant);
        Ok(vec![(failed.id, failed.state)])
    }

    /// Move installing version `id` to waiting, replacing any waiting one.
    pub fn install_complete(&mut self, id: WorkerId) -> Result<StateChanges> {
        let mut worker = take_slot(&mut self.installing, id, "installing")?;

        let mut changes = Vec::new();
        if let Some(mut stale) = self.waiting.take() {
            stale.set_state(ServiceWorkerState::Redundant);
            changes.push((stale.id, stale.state));
        }
        worker.set_state(ServiceWorkerState::Installed);
        changes.push((worker.id, worker.state));
        self.waiting = Some(worker);
        Ok(changes)
    }

    /// Promote waiting version `id`; the previous active one becomes redundant.
    pub fn activate(&mut self, id: WorkerId) -> Result<StateChanges> {
        let mut worker = take_slot(&mut self.waiting, id, "waiting")?;

        let mut changes = Vec::new();
        worker.set_state(ServiceWorkerState::Activating);
        changes.push((worker.id, worker.state));

        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
            changes.push((old.id, old.state));
        }

        worker.set_state(ServiceWorkerState::Activated);
        changes.push((worker.id, worker.state));
        self.active = Some(worker);
        Ok(changes)
    }
}

/// Take the version out of `slot` only if it is `id`.
fn take_slot(slot: &mut Option<WorkerVersion>, id: WorkerId, name: &str) -> Result<WorkerVersion> {
    match slot.as_ref().map(|version| version.id) {
        Some(current) if current == id => {}
        Some(current) => {
            return Err(ServiceWorkerError::InvalidState(format!(
                "{id} is not {name}; {current} is"
            )))
        }
        None => {}
    }
    slot.take()
        .ok_or_else(|| ServiceWorkerError::InvalidState(format!("no worker is {name}")))
}

/// Pre-cache every static asset of `config` into its generation.
///
/// All assets are fetched concurrently and written only when every fetch
/// returned a 2xx response. On failure the generation is deleted again if
/// this call created it. Returns the number of entries written.
pub async fn seed_generation(
    fetcher: &dyn Fetcher,
    store: &dyn CacheStore,
    config: &WorkerConfig,
    scope: &Url,
) -> Result<usize> {
    let generation = config.cache_name.as_str();
    let created = store.open(generation).await;

    let seeded = match fetch_manifest(fetcher, config, scope).await {
        Ok(entries) => {
            let count = entries.len();
            store.store_all(generation, entries).await.map(|()| count)
        }
        Err(e) => Err(e),
    };

    if let Err(ref e) = seeded {
        warn!(generation, error = %e, "Install seeding failed");
        if created {
            store.delete_generation(generation).await;
        }
    }
    seeded
}

async fn fetch_manifest(
    fetcher: &dyn Fetcher,
    config: &WorkerConfig,
    scope: &Url,
) -> Result<Vec<(RequestKey, Response)>> {
    let retry = config.install_retry();
    let urls = config
        .static_assets
        .iter()
        .map(|asset| {
            scope.join(asset).map_err(|e| {
                ServiceWorkerError::Config(format!("static asset '{asset}': {e}"))
            })
        })
        .collect::<Result<Vec<Url>>>()?;

    try_join_all(urls.into_iter().map(|url| fetch_asset(fetcher, url, &retry))).await
}

async fn fetch_asset(
    fetcher: &dyn Fetcher,
    url: Url,
    retry: &RetryConfig,
) -> Result<(RequestKey, Response)> {
    let request = &Request::get(url);
    let response = retry_with_backoff(retry, || async move {
        let response = fetcher
            .fetch(request)
            .await
            .map_err(|e| ServiceWorkerError::InstallSeed {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.ok() {
            return Err(ServiceWorkerError::InstallSeed {
                url: request.url.to_string(),
                reason: format!("status {}", response.status),
            });
        }
        Ok::<_, ServiceWorkerError>(response)
    })
    .await?;

    debug!(url = %request.url, bytes = response.body_len(), "Seeded asset");
    Ok((RequestKey::from_request(request), response))
}

/// Delete every generation except `current`. Returns the deleted names.
pub async fn evict_stale_generations(store: &dyn CacheStore, current: &str) -> Vec<String> {
    let mut evicted = Vec::new();
    for name in store.generations().await {
        if name != current && store.delete_generation(&name).await {
            info!(generation = %name, "Deleting old cache");
            evicted.push(name);
        }
    }
    evicted
}
