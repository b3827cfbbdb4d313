//! End-to-end tests of the offline worker over real HTTP.

use std::time::Duration;

use http::StatusCode;
use sonicstream_common::HostConfig;
use sonicstream_sw::{
    HttpFetcher, OfflineWorker, Request, ServiceWorkerError, WorkerHost, CACHE_NAME,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new("sonicstream-test", Duration::from_secs(5)).unwrap()
}

fn config_for(server: &MockServer) -> HostConfig {
    HostConfig::in_memory(Url::parse(&format!("{}/sw.js", server.uri())).unwrap())
}

async fn serve(server: &MockServer, route: &str, body: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_string(body),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn install_then_serve_root_from_cache() {
    let server = MockServer::start().await;
    serve(&server, "/", "home", 1).await;
    serve(&server, "/static/icon.svg", "<svg/>", 1).await;

    let worker = OfflineWorker::with_assets(fetcher(), CACHE_NAME, ["/", "/static/icon.svg"]);
    let (host, _events) = WorkerHost::new(&config_for(&server), worker).unwrap();

    assert_eq!(host.install().await.unwrap(), 2);
    {
        let caches = host.context().caches().read().await;
        assert_eq!(caches.get("sonicstream-v1").unwrap().len(), 2);
    }

    let root = Request::parse(&format!("{}/", server.uri())).unwrap();
    let response = host.fetch(root).await.unwrap();

    assert!(response.from_cache());
    assert_eq!(response.text().unwrap(), "home");
    assert_eq!(response.header("content-type"), Some("text/plain"));
    // `expect(1)` on the mocks proves the fetch did not reach the server.
}

#[tokio::test]
async fn uncached_request_goes_to_network_once() {
    let server = MockServer::start().await;
    serve(&server, "/", "home", 1).await;
    serve(&server, "/api/data", r#"{"tracks":[]}"#, 1).await;

    let worker = OfflineWorker::with_assets(fetcher(), CACHE_NAME, ["/"]);
    let (host, _events) = WorkerHost::new(&config_for(&server), worker).unwrap();
    host.install().await.unwrap();

    let request = Request::parse(&format!("{}/api/data", server.uri())).unwrap();
    let response = host.fetch(request).await.unwrap();

    assert!(!response.from_cache());
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text().unwrap(), r#"{"tracks":[]}"#);

    let caches = host.context().caches().read().await;
    assert_eq!(caches.get(CACHE_NAME).unwrap().len(), 1);
}

#[tokio::test]
async fn network_error_status_passes_through() {
    let server = MockServer::start().await;
    serve(&server, "/", "home", 1).await;
    Mock::given(method("GET"))
        .and(path("/download/missing.mp3"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&server)
        .await;

    let worker = OfflineWorker::with_assets(fetcher(), CACHE_NAME, ["/"]);
    let (host, _events) = WorkerHost::new(&config_for(&server), worker).unwrap();
    host.install().await.unwrap();

    let request = Request::parse(&format!("{}/download/missing.mp3", server.uri())).unwrap();
    let response = host.fetch(request).await.unwrap();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.text().unwrap(), "not found");
}

#[tokio::test]
async fn install_fails_when_an_asset_is_missing() {
    let server = MockServer::start().await;
    // The batch may be abandoned before this request is sent.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("home"))
        .expect(0..=1)
        .mount(&server)
        .await;

    let worker = OfflineWorker::with_assets(fetcher(), CACHE_NAME, ["/", "/static/gone.svg"]);
    let (host, _events) = WorkerHost::new(&config_for(&server), worker).unwrap();

    let error = host.install().await.unwrap_err();

    assert_eq!(
        error,
        ServiceWorkerError::BadResponse {
            url: format!("{}/static/gone.svg", server.uri()),
            status: 404,
        }
    );
    assert!(host.active_worker().await.is_none());
    let caches = host.context().caches().read().await;
    assert!(caches.get(CACHE_NAME).unwrap().is_empty());
}

#[tokio::test]
async fn transport_failure_propagates() {
    let server = MockServer::start().await;
    let worker = OfflineWorker::with_assets(fetcher(), CACHE_NAME, Vec::<String>::new());
    let (host, _events) = WorkerHost::new(&config_for(&server), worker).unwrap();
    host.install().await.unwrap();

    // Nothing listens on port 9 (discard) on loopback.
    let request = Request::parse("http://127.0.0.1:9/offline").unwrap();
    let result = host.fetch(request).await;

    assert!(matches!(result, Err(ServiceWorkerError::Network(_))));
}
