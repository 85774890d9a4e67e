//! Single-pass proxy dispatch: rewrite, sign, forward, rewrite back.

use axum::{
    body::Body,
    http::Response,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::SigningScheme;
use crate::config::{Config, StorageAccount};
use crate::context::ProxyRequest;
use crate::error::{ErrorCode, StorageError, StorageResult};

use super::rewrite;
use super::transport::UpstreamClient;

/// Storage service a proxied request is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Blob,
    Queue,
    Table,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Blob,
        ResourceKind::Queue,
        ResourceKind::Table,
    ];

    /// Upstream endpoint for this service.
    pub fn endpoint<'a>(&self, account: &'a StorageAccount) -> &'a str {
        match self {
            ResourceKind::Blob => &account.blob_endpoint,
            ResourceKind::Queue => &account.queue_endpoint,
            ResourceKind::Table => &account.table_endpoint,
        }
    }

    /// Signing variant this service is called with.
    pub fn signing_scheme(&self) -> SigningScheme {
        match self {
            ResourceKind::Blob | ResourceKind::Queue => SigningScheme::SharedKey,
            ResourceKind::Table => SigningScheme::SharedKeyLite,
        }
    }

    /// Route prefix the proxy serves this service under.
    pub fn prefix<'a>(&self, config: &'a Config) -> &'a str {
        match self {
            ResourceKind::Blob => &config.blob_prefix,
            ResourceKind::Queue => &config.queue_prefix,
            ResourceKind::Table => &config.table_prefix,
        }
    }
}

/// Forwards proxy requests to the storage account with injected credentials.
#[derive(Clone)]
pub struct StorageProxy {
    config: Arc<Config>,
    client: Arc<dyn UpstreamClient>,
}

impl StorageProxy {
    pub fn new(config: Arc<Config>, client: Arc<dyn UpstreamClient>) -> Self {
        Self { config, client }
    }

    /// Forwards a request and always produces a response; failures become ATOM error bodies.
    ///
    /// `None` stands for an inbound request that could not be assembled and is
    /// rejected without contacting the storage service.
    pub async fn forward(
        &self,
        kind: ResourceKind,
        request: Option<ProxyRequest>,
    ) -> Response<Body> {
        match self.try_forward(kind, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{:?} proxy request failed: {}", kind, e);
                e.into_response()
            }
        }
    }

    /// Forwards a request, returning failures as errors.
    pub async fn try_forward(
        &self,
        kind: ResourceKind,
        request: Option<ProxyRequest>,
    ) -> StorageResult<Response<Body>> {
        let request = request.ok_or_else(|| StorageError::new(ErrorCode::EmptyRequest))?;
        let account = &self.config.account;
        let endpoint = kind.endpoint(account);

        let local_base = rewrite::local_base(&request)?;
        let mut upstream = rewrite::rewrite_request(&request, endpoint, &self.config.api_version)?;
        kind.signing_scheme().sign(&mut upstream, account)?;

        debug!(
            request_id = %request.request_id,
            "{} {} -> {}",
            upstream.method,
            request.uri,
            upstream.url
        );

        let response = self.client.send(upstream).await.map_err(|e| {
            warn!(request_id = %request.request_id, "Upstream transport failure: {}", e);
            StorageError::from(e)
        })?;

        debug!(request_id = %request.request_id, "Upstream responded {}", response.status);

        Ok(rewrite::rewrite_response(response, endpoint, &local_base))
    }
}
