//! Request routing for the proxy and the SAS issuer.

use axum::{
    body::{self, Body},
    extract::{Path, Query, Request, State},
    http::{HeaderMap, Response},
    response::IntoResponse,
    routing::{any, get, put},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::context::ProxyRequest;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::proxy::{ResourceKind, StorageProxy};
use crate::sas::SharedAccessSignatureService;

/// Application state shared between handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub proxy: StorageProxy,
    pub sas: Arc<SharedAccessSignatureService>,
}

/// Creates the router for the proxy and SAS endpoints.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/containers", put(create_root_container).get(list_containers))
        .route(
            "/containers/:name",
            put(create_container)
                .delete(delete_container)
                .head(get_container_properties)
                .get(get_container_sas),
        )
        .route("/blobs/:container/*blob", get(get_blob_sas));

    for kind in ResourceKind::ALL {
        let prefix = kind.prefix(&state.config).trim_matches('/').to_string();
        let handler = move |State(state): State<AppState>, request: Request| {
            proxy_handler(state, kind, request)
        };
        router = router
            .route(&format!("/{}", prefix), any(handler.clone()))
            .route(&format!("/{}/*path", prefix), any(handler));
    }

    router.fallback(not_found).with_state(state)
}

/// Forwards a request under a resource prefix to the storage service.
async fn proxy_handler(state: AppState, kind: ResourceKind, request: Request) -> Response<Body> {
    let prefix = format!("/{}/", kind.prefix(&state.config).trim_matches('/'));

    let (parts, body) = request.into_parts();
    let requested_path = parts
        .uri
        .path()
        .strip_prefix(prefix.as_str())
        .map(str::to_string);

    let request = match body::to_bytes(body, state.config.max_request_body_size).await {
        Ok(bytes) => Some(ProxyRequest::new(
            parts.method,
            parts.uri,
            requested_path,
            parts.headers,
            Some(bytes),
        )),
        Err(e) => {
            warn!("Failed to read {:?} request body: {}", kind, e);
            None
        }
    };

    state.proxy.forward(kind, request).await
}

/// PUT /containers?comp={op}
async fn create_root_container(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response<Body> {
    respond(
        state
            .sas
            .create_container(None, comp(&query), &headers)
            .await,
    )
}

/// PUT /containers/{name}?comp={op}
async fn create_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response<Body> {
    respond(
        state
            .sas
            .create_container(Some(&name), comp(&query), &headers)
            .await,
    )
}

/// DELETE /containers/{name}
async fn delete_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response<Body> {
    respond(state.sas.delete_container(&name).await)
}

/// HEAD /containers/{name}
async fn get_container_properties(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response<Body> {
    respond(state.sas.get_container_properties(&name).await)
}

/// GET /containers?prefix={p}
async fn list_containers(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response<Body> {
    respond(
        state
            .sas
            .list_containers(query_value(&query, "prefix"))
            .await,
    )
}

/// GET /containers/{name}?comp=sas
async fn get_container_sas(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response<Body> {
    respond(
        state
            .sas
            .get_container_shared_access_signature(&name, comp(&query))
            .await,
    )
}

/// GET /blobs/{container}/{*blob}?comp=sas
async fn get_blob_sas(
    State(state): State<AppState>,
    Path((container, blob)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response<Body> {
    respond(
        state
            .sas
            .get_blob_shared_access_signature(&container, &blob, comp(&query))
            .await,
    )
}

async fn not_found() -> Response<Body> {
    StorageError::new(ErrorCode::InvalidUri).into_response()
}

fn respond(result: StorageResult<Response<Body>>) -> Response<Body> {
    result.unwrap_or_else(|e| {
        warn!("SAS request failed: {}", e);
        e.into_response()
    })
}

fn comp(query: &HashMap<String, String>) -> Option<&str> {
    query_value(query, "comp")
}

/// Looks up a query parameter with a case-insensitive name.
fn query_value<'a>(query: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
