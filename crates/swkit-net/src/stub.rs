//! Scripted in-memory [`Fetcher`] for tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::{Fetcher, NetError, Request, Response};

/// What the stub does for a URL.
#[derive(Debug, Clone)]
pub enum StubRoute {
    /// Answer with this status and body.
    Respond { status: StatusCode, body: Bytes },
    /// Fail as if the network were down.
    Fail,
    /// Never resolve.
    Hang,
    /// Wait, then behave like the inner route.
    Delay(Duration, Box<StubRoute>),
}

/// Fetcher answering from a URL → [`StubRoute`] table and recording every call.
///
/// Unscripted URLs fail.
#[derive(Debug, Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, StubRoute>>,
    calls: Mutex<Vec<(Method, Url)>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a route, replacing any previous one for `url`.
    pub fn route(&self, url: &str, route: StubRoute) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), route);
        self
    }

    /// Answer `url` with `200 OK` and `body`.
    pub fn respond(&self, url: &str, body: impl Into<Bytes>) -> &Self {
        self.respond_with(url, StatusCode::OK, body)
    }

    pub fn respond_with(&self, url: &str, status: StatusCode, body: impl Into<Bytes>) -> &Self {
        self.route(
            url,
            StubRoute::Respond {
                status,
                body: body.into(),
            },
        )
    }

    pub fn fail(&self, url: &str) -> &Self {
        self.route(url, StubRoute::Fail)
    }

    pub fn hang(&self, url: &str) -> &Self {
        self.route(url, StubRoute::Hang)
    }

    /// Every request seen so far, in order.
    pub fn calls(&self) -> Vec<(Method, Url)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests seen for `url`.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, u)| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((request.method.clone(), request.url.clone()));

        let mut route = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request.url.as_str())
            .cloned()
            .unwrap_or(StubRoute::Fail);

        loop {
            match route {
                StubRoute::Respond { status, body } => {
                    return Ok(Response::new(
                        request.url.clone(),
                        status,
                        HeaderMap::new(),
                        body,
                    ))
                }
                StubRoute::Fail => {
                    return Err(NetError::RequestFailed(format!(
                        "network unreachable: {}",
                        request.url
                    )))
                }
                StubRoute::Hang => {
                    return futures::future::pending::<Result<Response, NetError>>().await
                }
                StubRoute::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    route = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_routes_and_records() {
        let stub = StubFetcher::new();
        stub.respond("https://example.com/a.js", "console.log(1)")
            .fail("https://example.com/b.js");

        let ok = stub
            .fetch(&Request::get(Url::parse("https://example.com/a.js").unwrap()))
            .await
            .unwrap();
        assert_eq!(ok.text().unwrap(), "console.log(1)");

        let err = stub
            .fetch(&Request::get(Url::parse("https://example.com/b.js").unwrap()))
            .await;
        assert!(err.is_err());

        let unscripted = stub
            .fetch(&Request::get(Url::parse("https://example.com/c.js").unwrap()))
            .await;
        assert!(unscripted.is_err());

        assert_eq!(stub.calls().len(), 3);
        assert_eq!(stub.call_count("https://example.com/a.js"), 1);
    }

    #[tokio::test]
    async fn test_stub_delay_then_respond() {
        let stub = StubFetcher::new();
        stub.route(
            "https://example.com/slow",
            StubRoute::Delay(
                Duration::from_millis(5),
                Box::new(StubRoute::Respond {
                    status: StatusCode::ACCEPTED,
                    body: Bytes::from_static(b"late"),
                }),
            ),
        );

        let response = stub
            .fetch(&Request::get(Url::parse("https://example.com/slow").unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::ACCEPTED);
    }
}
