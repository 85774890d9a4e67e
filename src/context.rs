//! Per-call proxy request state.

use axum::http::{header::HeaderMap, Method, Uri};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

use crate::error::{ErrorCode, StorageError, StorageResult};

/// An inbound request on its way to the storage service.
///
/// Created for each inbound call and mutated in place by the rewriter and the
/// signer until it is forwarded.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Unique request ID, also sent upstream as `x-ms-client-request-id`.
    pub request_id: String,
    /// HTTP method.
    pub method: Method,
    /// Request URI as seen by the caller.
    pub uri: Uri,
    /// Upstream resource path relative to the storage endpoint.
    pub requested_path: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body, `None` when there is nothing to forward.
    pub body: Option<Bytes>,
}

impl ProxyRequest {
    /// Creates a new proxy request.
    pub fn new(
        method: Method,
        uri: Uri,
        requested_path: Option<String>,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            uri,
            requested_path,
            headers,
            body: body.filter(|b| !b.is_empty()),
        }
    }

    /// Returns the first value of a header, or `None` if absent or not text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the requested upstream path or fails when the route did not provide one.
    pub fn requested_path(&self) -> StorageResult<&str> {
        self.requested_path.as_deref().ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidUri,
                "The request does not name an upstream resource.",
            )
        })
    }

    /// Returns the raw query string of the inbound URI.
    pub fn query(&self) -> Option<&str> {
        self.uri.query().filter(|q| !q.is_empty())
    }

    /// Returns the body length, zero when there is no body.
    pub fn content_length(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

/// A request addressed to the storage service, ready to be signed and sent.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    /// Creates an upstream request without headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Returns the first value of a header as text, empty when absent.
    pub fn header_or_empty(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Returns the body length, zero when there is no body.
    pub fn content_length(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

/// Returns user-defined metadata from `x-ms-meta-*` headers.
pub fn metadata_from_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix("x-ms-meta-")?;
            value.to_str().ok().map(|v| (key.to_string(), v.to_string()))
        })
        .collect()
}

/// Parses a query string into a map, keeping the last value of repeated keys.
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Formats a DateTime as RFC 1123 format for HTTP headers.
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date in RFC 1123 format.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT")
                .ok()
                .map(|dt| dt.and_utc())
        })
}
