//! Request classification.

use std::fmt;

use swkit_net::{Destination, Request};

use crate::WorkerConfig;

/// Strategy governing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Remote API calls: freshness over latency.
    NetworkFirst,
    /// Static assets.
    CacheFirst,
    /// Page navigations.
    StaleWhileRevalidate,
    /// Everything else: network, then cache, nothing stored.
    NetworkFallback,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Route::NetworkFirst => "network-first",
            Route::CacheFirst => "cache-first",
            Route::StaleWhileRevalidate => "stale-while-revalidate",
            Route::NetworkFallback => "network-fallback",
        })
    }
}

/// Ordered classification rules; first match wins. Performs no I/O.
#[derive(Debug, Clone)]
pub struct Router {
    api_hosts: Vec<String>,
    api_path_marker: String,
    static_destinations: Vec<Destination>,
    static_extensions: Vec<String>,
}

impl Router {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            api_hosts: config
                .api_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            api_path_marker: config.api_path_marker.clone(),
            static_destinations: config.cache_first_destinations.clone(),
            static_extensions: config.cache_first_extensions.clone(),
        }
    }

    pub fn classify(&self, request: &Request) -> Route {
        if self.is_api(request) {
            Route::NetworkFirst
        } else if self.is_static_asset(request) {
            Route::CacheFirst
        } else if request.is_navigation() || request.destination == Destination::Document {
            Route::StaleWhileRevalidate
        } else {
            Route::NetworkFallback
        }
    }

    fn is_api(&self, request: &Request) -> bool {
        let host_match = request.url.host_str().is_some_and(|host| {
            self.api_hosts.iter().any(|api| {
                host == api
                    || host
                        .strip_suffix(api.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
        });

        host_match
            || (!self.api_path_marker.is_empty()
                && request.url.path().contains(&self.api_path_marker))
    }

    fn is_static_asset(&self, request: &Request) -> bool {
        let path = request.url.path();
        self.static_destinations.contains(&request.destination)
            || self
                .static_extensions
                .iter()
                .any(|ext| path.ends_with(ext.as_str()))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}
