//! Caching strategies.
//!
//! Each strategy turns a request into a response using the network and the
//! current cache generation. Cache writes are best-effort: a refused write is
//! logged and never changes what the caller receives.

use std::sync::Arc;
use std::time::Duration;

use swkit_common::with_timeout;
use swkit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::{CacheStore, RequestKey};
use crate::router::Route;
use crate::{BackgroundJobs, Result, ServiceWorkerError};

/// Everything a strategy needs. Cheap to clone into background jobs.
#[derive(Clone)]
pub struct StrategyContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub store: Arc<dyn CacheStore>,
    /// Current cache generation.
    pub generation: Arc<str>,
    /// Root-relative offline page served to failed navigations.
    pub offline_page: Arc<str>,
    /// Budget for network-first fetches.
    pub network_timeout: Option<Duration>,
    pub jobs: BackgroundJobs,
}

impl StrategyContext {
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetError> {
        self.fetcher.fetch(request).await
    }

    async fn fetch_within_budget(&self, request: &Request) -> std::result::Result<Response, NetError> {
        match self.network_timeout {
            Some(budget) => with_timeout(budget, || self.fetcher.fetch(request))
                .await
                .map_err(|_| NetError::Timeout(budget))?,
            None => self.fetch(request).await,
        }
    }

    async fn lookup(&self, key: &RequestKey) -> Option<Response> {
        self.store.lookup(&self.generation, key).await
    }

    /// Store a response, logging and dropping a refused write.
    async fn put(&self, key: RequestKey, response: Response) {
        if let Err(e) = self.store.store(&self.generation, key.clone(), response).await {
            warn!(key = %key, error = %e, "Cache write ignored");
        }
    }
}

/// Fulfil `request` with the strategy `route` selects.
pub async fn respond(ctx: &StrategyContext, route: Route, request: Request) -> Result<Response> {
    match route {
        Route::CacheFirst => cache_first(ctx, request).await,
        Route::NetworkFirst => network_first(ctx, &request).await,
        Route::StaleWhileRevalidate => stale_while_revalidate(ctx, request).await,
        Route::NetworkFallback => network_with_cache_fallback(ctx, &request).await,
    }
}

/// Serve from cache and refresh in the background; fetch and store on a miss.
pub async fn cache_first(ctx: &StrategyContext, request: Request) -> Result<Response> {
    let key = RequestKey::from_request(&request);

    if let Some(cached) = ctx.lookup(&key).await {
        debug!(key = %key, "cache-first hit, refreshing in background");
        let refresh = ctx.clone();
        ctx.jobs.spawn("cache-first-refresh", async move {
            let fresh = refresh
                .fetch(&request)
                .await
                .map_err(|e| ServiceWorkerError::network(&request.url, &e))?;
            refresh.store.store(&refresh.generation, key, fresh).await
        });
        return Ok(cached);
    }

    debug!(key = %key, "cache-first miss");
    let response = ctx
        .fetch(&request)
        .await
        .map_err(|e| ServiceWorkerError::network(&request.url, &e))?;
    ctx.put(key, response.duplicate()).await;
    Ok(response)
}

/// Fetch and store; serve the cached copy only when the network fails.
pub async fn network_first(ctx: &StrategyContext, request: &Request) -> Result<Response> {
    let key = RequestKey::from_request(request);

    match ctx.fetch_within_budget(request).await {
        Ok(response) => {
            ctx.put(key, response.duplicate()).await;
            Ok(response)
        }
        Err(e) => {
            debug!(key = %key, error = %e, "network-first fetch failed, trying cache");
            ctx.lookup(&key)
                .await
                .ok_or_else(|| ServiceWorkerError::NoContentAvailable(request.url.to_string()))
        }
    }
}

/// Serve the cached copy at once while a background fetch refreshes it.
///
/// Without a cached copy the caller waits for the fetch. A failed fetch on a
/// navigation falls back to the offline page.
pub async fn stale_while_revalidate(ctx: &StrategyContext, request: Request) -> Result<Response> {
    let key = RequestKey::from_request(&request);
    let cached = ctx.lookup(&key).await;

    let (tx, rx) = oneshot::channel();
    let revalidate = ctx.clone();
    let job_request = request.clone();
    let job_key = key.clone();
    ctx.jobs.spawn("revalidate", async move {
        let outcome = revalidate.fetch(&job_request).await;
        let failure = match &outcome {
            Ok(response) => {
                revalidate.put(job_key, response.duplicate()).await;
                None
            }
            Err(e) => Some(ServiceWorkerError::network(&job_request.url, e)),
        };
        // Nobody is listening when the cached copy was already served.
        let _ = tx.send(outcome);
        failure.map_or(Ok(()), Err)
    });

    if let Some(cached) = cached {
        debug!(key = %key, "serving stale copy while revalidating");
        return Ok(cached);
    }

    match rx.await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) if request.is_navigation() => {
            warn!(url = %request.url, error = %e, "Navigation failed, trying offline page");
            offline_fallback(ctx, &request).await
        }
        Ok(Err(e)) => Err(ServiceWorkerError::network(&request.url, &e)),
        Err(_) => Err(ServiceWorkerError::NetworkUnavailable(format!(
            "{}: revalidation task ended without a result",
            request.url
        ))),
    }
}

async fn offline_fallback(ctx: &StrategyContext, request: &Request) -> Result<Response> {
    let offline = request
        .url
        .join(&ctx.offline_page)
        .map_err(|e| ServiceWorkerError::Config(format!("offline page: {e}")))?;

    ctx.lookup(&RequestKey::get(&offline))
        .await
        .ok_or_else(|| ServiceWorkerError::NoContentAvailable(request.url.to_string()))
}

/// Plain network fetch with a cache lookup as the safety net. Stores nothing.
pub async fn network_with_cache_fallback(ctx: &StrategyContext, request: &Request) -> Result<Response> {
    match ctx.fetch(request).await {
        Ok(response) => Ok(response),
        Err(e) => {
            debug!(url = %request.url, error = %e, "fetch failed, trying cache");
            ctx.lookup(&RequestKey::from_request(request))
                .await
                .ok_or_else(|| ServiceWorkerError::NoContentAvailable(request.url.to_string()))
        }
    }
}
