//! End-to-end tests of the credential-injecting proxy.

mod common;

use async_trait::async_trait;
use common::{FakeStorage, RecordedRequest, TestServer};
use reqwest::StatusCode;
use std::sync::Arc;
use url::Url;

use storage_proxy::auth::{build_string_to_sign, build_string_to_sign_lite, compute_signature};
use storage_proxy::context::UpstreamRequest;
use storage_proxy::{
    TransportError, UpstreamClient, UpstreamResponse, DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY,
};

/// Rebuilds the upstream request the fake received, for signature checks.
fn as_upstream(fake: &FakeStorage, recorded: &RecordedRequest) -> UpstreamRequest {
    UpstreamRequest {
        method: recorded.method.clone(),
        url: Url::parse(&format!("{}{}", fake.base_url, recorded.uri)).unwrap(),
        headers: recorded.headers.clone(),
        body: Some(recorded.body.clone()).filter(|b| !b.is_empty()),
    }
}

#[tokio::test]
async fn test_blob_request_is_signed_with_shared_key() {
    let fake = FakeStorage::start().await;
    let proxy = TestServer::start(&fake.endpoint()).await;

    let resp = reqwest::Client::new()
        .get(proxy.url("/blob/photos?restype=container&comp=list"))
        .header("x-ms-meta-owner", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let recorded = fake.recorded();
    assert_eq!(recorded.len(), 1);
    let req = &recorded[0];
    assert_eq!(req.uri.path(), "/devstoreaccount1/photos");
    assert_eq!(req.uri.query(), Some("restype=container&comp=list"));
    assert_eq!(req.headers.get_all("x-ms-date").iter().count(), 1);
    assert_eq!(req.headers.get_all("authorization").iter().count(), 1);
    assert_eq!(req.header("x-ms-version"), Some("2009-09-19"));
    assert!(req.header("x-ms-client-request-id").is_some());

    let upstream = as_upstream(&fake, req);
    let expected = compute_signature(
        &build_string_to_sign(&upstream, DEFAULT_ACCOUNT),
        DEFAULT_ACCOUNT_KEY,
    )
    .unwrap();
    assert_eq!(
        req.header("authorization").unwrap(),
        format!("SharedKey {}:{}", DEFAULT_ACCOUNT, expected)
    );
}

#[tokio::test]
async fn test_table_request_is_signed_with_shared_key_lite() {
    let fake = FakeStorage::start().await;
    let proxy = TestServer::start(&fake.endpoint()).await;

    let resp = reqwest::Client::new()
        .get(proxy.url("/table/Tables"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let recorded = fake.recorded();
    let req = &recorded[0];
    let upstream = as_upstream(&fake, req);
    let expected = compute_signature(
        &build_string_to_sign_lite(&upstream, DEFAULT_ACCOUNT),
        DEFAULT_ACCOUNT_KEY,
    )
    .unwrap();
    assert_eq!(
        req.header("authorization").unwrap(),
        format!("SharedKeyLite {}:{}", DEFAULT_ACCOUNT, expected)
    );
}

#[tokio::test]
async fn test_caller_authorization_is_replaced() {
    let fake = FakeStorage::start().await;
    let proxy = TestServer::start(&fake.endpoint()).await;

    reqwest::Client::new()
        .get(proxy.url("/queue/jobs/messages"))
        .header("authorization", "SharedKey someone:forged")
        .header("x-ms-date", "Mon, 01 Jan 2001 00:00:00 GMT")
        .send()
        .await
        .unwrap();

    let recorded = fake.recorded();
    let req = &recorded[0];
    assert!(req
        .header("authorization")
        .unwrap()
        .starts_with("SharedKey devstoreaccount1:"));
    assert_ne!(req.header("x-ms-date"), Some("Mon, 01 Jan 2001 00:00:00 GMT"));
    assert_eq!(req.headers.get_all("x-ms-date").iter().count(), 1);
}

#[tokio::test]
async fn test_body_urls_round_trip() {
    let fake = FakeStorage::start().await;
    let proxy = TestServer::start(&fake.endpoint()).await;

    let local = proxy.url("/blob/");
    let body = format!("<entry><id>{}photos/doc.xml</id></entry>", local);

    let resp = reqwest::Client::new()
        .put(proxy.url("/blob/photos/doc.xml"))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // The storage service only ever sees its own address
    let recorded = fake.recorded();
    let upstream_body = String::from_utf8(recorded[0].body.to_vec()).unwrap();
    assert_eq!(
        upstream_body,
        format!("<entry><id>{}/photos/doc.xml</id></entry>", fake.endpoint())
    );
    assert_eq!(recorded[0].header("content-type"), Some("application/atom+xml"));

    // and the caller only ever sees the proxy's
    assert_eq!(resp.text().await.unwrap(), body);
}

#[tokio::test]
async fn test_response_is_rewritten_and_hop_headers_stripped() {
    let fake = FakeStorage::start().await;
    let proxy = TestServer::start(&fake.endpoint()).await;

    let resp = reqwest::Client::new()
        .get(proxy.url("/blob/photos?restype=container&comp=list"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("transfer-encoding").is_none());
    assert_eq!(
        resp.headers().get("x-ms-request-id").unwrap(),
        "fake-request"
    );

    let text = resp.text().await.unwrap();
    assert_eq!(
        text,
        format!("<Containers><Url>{}photos</Url></Containers>", proxy.url("/blob/"))
    );
}

#[tokio::test]
async fn test_upstream_error_status_passes_through() {
    let fake = FakeStorage::start().await;
    let proxy = TestServer::start(&fake.endpoint()).await;

    let resp = reqwest::Client::new()
        .get(proxy.url("/blob/missing?restype=container"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("x-ms-error-code").unwrap(), "ContainerNotFound");
}

#[tokio::test]
async fn test_missing_requested_path_is_rejected_locally() {
    let fake = FakeStorage::start().await;
    let proxy = TestServer::start(&fake.endpoint()).await;

    let resp = reqwest::Client::new()
        .get(proxy.url("/blob"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/atom+xml"
    );
    let text = resp.text().await.unwrap();
    assert!(text.contains("<code>InvalidUri</code>"));
    assert!(fake.recorded().is_empty());
}

/// Fails every call as if the peer hung up.
struct ClosedConnectionClient;

#[async_trait]
impl UpstreamClient for ClosedConnectionClient {
    async fn send(&self, _request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        Err(TransportError::ConnectionClosed("connection reset by peer".into()))
    }
}

#[tokio::test]
async fn test_connection_closed_returns_fixed_error() {
    let proxy = TestServer::with_client(
        "http://127.0.0.1:9/devstoreaccount1",
        Arc::new(ClosedConnectionClient),
    )
    .await;

    let resp = reqwest::Client::new()
        .get(proxy.url("/table/Tables"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        resp.text().await.unwrap(),
        "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\" ?><error xmlns=\"http://schemas.microsoft.com/ado/2007/08/dataservices/metadata\"><code>ConnectionClosed</code><message xml:lang=\"en-US\">The connection to the storage service was closed.</message></error>"
    );
}

#[tokio::test]
async fn test_unknown_route_is_invalid_uri() {
    let proxy = TestServer::start("http://127.0.0.1:9/devstoreaccount1").await;
    let resp = reqwest::Client::new()
        .get(proxy.url("/files/share"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
