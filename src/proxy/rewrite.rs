//! URL and body rewriting between the proxy namespace and the storage endpoint.
//!
//! Body rewriting is a literal substring replacement, not URL-aware: any
//! occurrence of the base URL is replaced, including ones inside unrelated
//! text. Callers depend on this exact output, so it stays a plain replace.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Response},
};
use bytes::Bytes;
use regex::Regex;
use url::Url;

use crate::context::{ProxyRequest, UpstreamRequest};
use crate::error::{ErrorCode, StorageError, StorageResult, ATOM_CONTENT_TYPE};

use super::transport::UpstreamResponse;

/// Hop-by-hop headers that are never forwarded in either direction.
const HOP_BY_HOP_HEADERS: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Computes the absolute upstream URI for a requested path and query.
pub fn upstream_uri(
    endpoint: &str,
    requested_path: &str,
    query: Option<&str>,
) -> StorageResult<Url> {
    let mut uri = format!("{}/{}", endpoint.trim_end_matches('/'), requested_path);
    if let Some(query) = query {
        uri.push('?');
        uri.push_str(query);
    }
    Url::parse(&uri).map_err(|e| {
        StorageError::with_message(
            ErrorCode::InvalidUri,
            format!("Invalid upstream URI '{}': {}", uri, e),
        )
    })
}

/// The storage endpoint as it appears in bodies, always ending with `/`.
pub fn endpoint_base(endpoint: &str) -> String {
    format!("{}/", endpoint.trim_end_matches('/'))
}

/// The proxy's externally visible base URL for this request.
///
/// Scheme, the caller's `Host` and the inbound path with the requested-path
/// suffix removed.
pub fn local_base(request: &ProxyRequest) -> StorageResult<String> {
    let requested = request.requested_path()?;

    let scheme = request
        .header("x-forwarded-proto")
        .or_else(|| request.uri.scheme_str())
        .unwrap_or("http");
    let host = request
        .header("host")
        .or_else(|| request.uri.authority().map(|a| a.as_str()))
        .ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidHeaderValue,
                "The Host header is required.",
            )
        })?;

    let suffix = Regex::new(&format!("{}$", regex::escape(requested))).map_err(|e| {
        StorageError::with_message(ErrorCode::InternalError, format!("Invalid path pattern: {}", e))
    })?;
    let mut prefix = suffix.replace(request.uri.path(), "").into_owned();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }

    Ok(format!("{}://{}{}", scheme, host, prefix))
}

/// Replaces every literal occurrence of `from` with `to`.
pub fn replace_bytes(body: &[u8], from: &str, to: &str) -> Bytes {
    let needle = from.as_bytes();
    if needle.is_empty() || body.len() < needle.len() {
        return Bytes::copy_from_slice(body);
    }

    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i..].starts_with(needle) {
            out.extend_from_slice(to.as_bytes());
            i += needle.len();
        } else {
            out.push(body[i]);
            i += 1;
        }
    }
    Bytes::from(out)
}

/// Maps an inbound proxy request onto the storage endpoint.
///
/// The result still needs to be signed.
pub fn rewrite_request(
    request: &ProxyRequest,
    endpoint: &str,
    api_version: &str,
) -> StorageResult<UpstreamRequest> {
    let url = upstream_uri(endpoint, request.requested_path()?, request.query())?;

    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::AUTHORIZATION);
    headers.remove("x-forwarded-proto");

    let host = match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    };
    headers.insert(header::HOST, header_value(&host)?);

    if !headers.contains_key("x-ms-version") {
        headers.insert("x-ms-version", header_value(api_version)?);
    }
    if !headers.contains_key("x-ms-client-request-id") {
        headers.insert("x-ms-client-request-id", header_value(&request.request_id)?);
    }

    let body = match (&request.method, &request.body) {
        (&Method::GET | &Method::HEAD | &Method::DELETE, _) | (_, None) => None,
        (_, Some(body)) => {
            let base = local_base(request)?;
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ATOM_CONTENT_TYPE));
            Some(replace_bytes(body, &base, &endpoint_base(endpoint)))
        }
    };

    Ok(UpstreamRequest {
        method: request.method.clone(),
        url,
        headers,
        body,
    })
}

/// Maps a storage response back into the proxy namespace.
pub fn rewrite_response(
    response: UpstreamResponse,
    endpoint: &str,
    local_base: &str,
) -> Response<Body> {
    let mut headers = response.headers;
    strip_hop_by_hop(&mut headers);

    let body = if response.body.is_empty() {
        response.body
    } else {
        // Length changes with the rewrite; the server recomputes it
        headers.remove(header::CONTENT_LENGTH);
        replace_bytes(&response.body, &endpoint_base(endpoint), local_base)
    };

    let mut rewritten = Response::new(Body::from(body));
    *rewritten.status_mut() = response.status;
    *rewritten.headers_mut() = headers;
    rewritten
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

fn header_value(value: &str) -> StorageResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| StorageError::new(ErrorCode::InvalidHeaderValue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{StatusCode, Uri};

    const ENDPOINT: &str = "https://acct.table.core.windows.net";

    fn proxy_request(
        method: Method,
        uri: &'static str,
        requested: &str,
        body: Option<&'static [u8]>,
    ) -> ProxyRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local:8080"));
        ProxyRequest::new(
            method,
            Uri::from_static(uri),
            Some(requested.to_string()),
            headers,
            body.map(Bytes::from_static),
        )
    }

    #[test]
    fn test_upstream_uri() {
        let url = upstream_uri(
            "https://acct.blob.core.windows.net/",
            "photos/cat.jpg",
            Some("comp=metadata"),
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://acct.blob.core.windows.net/photos/cat.jpg?comp=metadata");

        let url = upstream_uri("http://127.0.0.1:10000/devstoreaccount1", "photos", None).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:10000/devstoreaccount1/photos");
    }

    #[test]
    fn test_local_base_strips_requested_path() {
        let req = proxy_request(
            Method::GET,
            "/table/Customers(PartitionKey='a')?$top=1",
            "Customers(PartitionKey='a')",
            None,
        );
        assert_eq!(local_base(&req).unwrap(), "http://proxy.local:8080/table/");
    }

    #[test]
    fn test_local_base_honors_forwarded_proto() {
        let mut req = proxy_request(Method::GET, "/table/Tables", "Tables", None);
        req.headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(local_base(&req).unwrap(), "https://proxy.local:8080/table/");
    }

    #[test]
    fn test_local_base_requires_requested_path() {
        let mut req = proxy_request(Method::GET, "/table/Tables", "Tables", None);
        req.requested_path = None;
        assert_eq!(local_base(&req).unwrap_err().code, ErrorCode::InvalidUri);
    }

    #[test]
    fn test_rewrite_request_replaces_proxy_base_in_body() {
        let req = proxy_request(
            Method::POST,
            "/table/Customers",
            "Customers",
            Some(b"<id>http://proxy.local:8080/table/Customers('1')</id>"),
        );
        let upstream = rewrite_request(&req, ENDPOINT, "2021-10-04").unwrap();

        assert_eq!(upstream.url.as_str(), "https://acct.table.core.windows.net/Customers");
        assert_eq!(
            upstream.body.as_deref(),
            Some(&b"<id>https://acct.table.core.windows.net/Customers('1')</id>"[..])
        );
        assert_eq!(upstream.headers[header::CONTENT_TYPE], ATOM_CONTENT_TYPE);
        assert_eq!(upstream.headers[header::HOST], "acct.table.core.windows.net");
        assert_eq!(upstream.headers["x-ms-version"], "2021-10-04");
    }

    #[test]
    fn test_rewrite_request_drops_body_for_reads() {
        let req = proxy_request(Method::DELETE, "/table/Customers", "Customers", Some(b"ignored"));
        let upstream = rewrite_request(&req, ENDPOINT, "2021-10-04").unwrap();
        assert!(upstream.body.is_none());
        assert!(!upstream.headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn test_rewrite_request_strips_hop_by_hop_and_credentials() {
        let mut req = proxy_request(Method::GET, "/blob/c/b", "c/b", None);
        req.headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        req.headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer caller"));
        req.headers.insert("x-ms-version", HeaderValue::from_static("2019-02-02"));

        let upstream =
            rewrite_request(&req, "http://127.0.0.1:10000/devstoreaccount1", "2021-10-04")
                .unwrap();
        assert!(!upstream.headers.contains_key(header::CONNECTION));
        assert!(!upstream.headers.contains_key(header::AUTHORIZATION));
        assert_eq!(upstream.headers[header::HOST], "127.0.0.1:10000");
        assert_eq!(upstream.headers["x-ms-version"], "2019-02-02");
    }

    #[test]
    fn test_rewrite_response_strips_transfer_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("44"));
        let response = rewrite_response(
            UpstreamResponse {
                status: StatusCode::OK,
                headers,
                body: Bytes::from_static(b"<a href=\"https://acct.table.core.windows.net/T\"/>"),
            },
            ENDPOINT,
            "http://proxy.local:8080/table/",
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(header::TRANSFER_ENCODING));
        assert!(!response.headers().contains_key(header::CONTENT_LENGTH));
    }

    #[test]
    fn test_empty_response_keeps_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1024"));
        let response = rewrite_response(
            UpstreamResponse {
                status: StatusCode::OK,
                headers,
                body: Bytes::new(),
            },
            ENDPOINT,
            "http://proxy.local:8080/blob/",
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1024");
    }

    #[test]
    fn test_request_response_rewrite_roundtrip() {
        let original: &'static [u8] =
            b"<feed><link href=\"http://proxy.local:8080/table/Customers('1')\"/><id>http://proxy.local:8080/table/</id></feed>";
        let req = proxy_request(
            Method::PUT,
            "/table/Customers('1')",
            "Customers('1')",
            Some(original),
        );
        let base = local_base(&req).unwrap();

        let upstream = rewrite_request(&req, ENDPOINT, "2021-10-04").unwrap();
        let echoed = upstream.body.unwrap();
        assert!(!echoed.windows(base.len()).any(|w| w == base.as_bytes()));

        let restored = replace_bytes(&echoed, &endpoint_base(ENDPOINT), &base);
        assert_eq!(&restored[..], original);
    }

    #[test]
    fn test_replace_bytes_handles_binary() {
        let body = [0xff, b'a', b'b', 0x00, b'a', b'b'];
        assert_eq!(
            &replace_bytes(&body, "ab", "xyz")[..],
            &[0xff, b'x', b'y', b'z', 0x00, b'x', b'y', b'z']
        );
        assert_eq!(&replace_bytes(b"abc", "", "x")[..], b"abc");
    }
}
