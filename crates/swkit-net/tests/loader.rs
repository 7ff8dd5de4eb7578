//! ResourceLoader against a local HTTP server.

use std::time::Duration;

use http::StatusCode;
use swkit_net::{Fetcher, LoaderConfig, NetError, Request, ResourceLoader};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loader() -> ResourceLoader {
    ResourceLoader::new(LoaderConfig {
        default_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn fetch_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/styles/app.css"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("body{margin:0}", "text/css"),
        )
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/styles/app.css", server.uri())).unwrap();
    let response = loader().fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type(), Some(mime::TEXT_CSS));
    assert_eq!(response.text().unwrap(), "body{margin:0}");
}

#[tokio::test]
async fn error_statuses_are_responses_not_failures() {
    let server = MockServer::start().await;
    Mock::given(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/missing.png", server.uri())).unwrap();
    let response = loader().fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!response.ok());
}

#[tokio::test]
async fn slow_server_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(path("/api/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/api/slow", server.uri())).unwrap();
    let request = Request::get(url).timeout(Duration::from_millis(100));
    let result = loader().fetch(&request).await;

    assert!(matches!(result, Err(NetError::Timeout(_))));
}

#[tokio::test]
async fn unreachable_host_is_an_error() {
    // Nothing listens on the discard port.
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    let result = loader().fetch(&Request::get(url)).await;
    assert!(result.is_err());
}
