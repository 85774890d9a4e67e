//! Common test utilities.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Response, StatusCode, Uri},
    Router,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpListener;

use storage_proxy::{
    Config, ContainerStore, ProxyServerBuilder, StorageAccount, UpstreamClient, DEFAULT_ACCOUNT,
    DEFAULT_ACCOUNT_KEY,
};

/// A request as received by the fake storage service.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct FakeState {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Loopback stand-in for the storage service.
///
/// Records every request. Bodies are echoed back; bodiless requests get a
/// chunked body that mentions the service's own container URL. Paths
/// containing `missing` answer 404 with a storage error body.
pub struct FakeStorage {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FakeStorage {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let state = FakeState {
            base_url: base_url.clone(),
            requests: requests.clone(),
        };
        let app = Router::new().fallback(fake_handler).with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, requests }
    }

    /// Endpoint of the fake account, as configured on the proxy.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, DEFAULT_ACCOUNT)
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

async fn fake_handler(
    State(state): State<FakeState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    state.requests.lock().push(RecordedRequest {
        method,
        uri: uri.clone(),
        headers: headers.clone(),
        body: body.clone(),
    });

    if uri.path().contains("missing") {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("x-ms-error-code", "ContainerNotFound")
            .body(Body::from(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>ContainerNotFound</Code><Message>The specified container does not exist.</Message></Error>",
            ))
            .unwrap();
    }

    if !body.is_empty() {
        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| axum::http::HeaderValue::from_static("application/octet-stream"));
        return Response::builder()
            .status(StatusCode::CREATED)
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap();
    }

    let listing = format!(
        "<Containers><Url>{}/{}/photos</Url></Containers>",
        state.base_url, DEFAULT_ACCOUNT
    );
    let chunks: Vec<Result<Bytes, std::io::Error>> = listing
        .into_bytes()
        .chunks(16)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/xml")
        .header("x-ms-request-id", "fake-request")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap()
}

/// Proxy configuration pointing every service at the fake storage endpoint.
pub fn proxy_config(endpoint: &str) -> Config {
    Config {
        account: StorageAccount {
            name: DEFAULT_ACCOUNT.to_string(),
            key: DEFAULT_ACCOUNT_KEY.to_string(),
            blob_endpoint: endpoint.to_string(),
            queue_endpoint: endpoint.to_string(),
            table_endpoint: endpoint.to_string(),
        },
        ..Config::default()
    }
}

/// Test server wrapper.
pub struct TestServer {
    pub base_url: String,
}

impl TestServer {
    /// Starts a proxy in front of the given endpoint on a random port.
    pub async fn start(endpoint: &str) -> Self {
        Self::start_with(ProxyServerBuilder::new().config(proxy_config(endpoint))).await
    }

    /// Starts a proxy whose upstream calls go through `client`.
    pub async fn with_client(endpoint: &str, client: Arc<dyn UpstreamClient>) -> Self {
        Self::start_with(
            ProxyServerBuilder::new()
                .config(proxy_config(endpoint))
                .client(client),
        )
        .await
    }

    /// Starts a proxy whose SAS endpoints use `store`.
    pub async fn with_store(store: Arc<dyn ContainerStore>) -> Self {
        Self::start_with(
            ProxyServerBuilder::new()
                .config(proxy_config("http://127.0.0.1:9/devstoreaccount1"))
                .store(store),
        )
        .await
    }

    async fn start_with(builder: ProxyServerBuilder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = builder.build().unwrap();

        // Start server in background
        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });

        // Wait for server to be ready
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self { base_url }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
