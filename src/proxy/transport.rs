//! HTTP transport to the storage service.

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::error::Error as _;
use thiserror::Error;
use tracing::warn;

use crate::config::Config;
use crate::context::UpstreamRequest;
use crate::error::{ErrorCode, StorageError, StorageResult};

/// Failure of the local HTTP stack while talking to the storage service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection went away before a full response was read.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    /// The response body exceeded the configured buffer size.
    #[error("response body exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },
    /// The per-call timeout elapsed.
    #[error("request timed out")]
    Timeout,
    /// Any other client failure.
    #[error("{0}")]
    Http(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::Timeout;
        }
        if is_connection_closed(&err) {
            return TransportError::ConnectionClosed(err.to_string());
        }
        TransportError::Http(err.to_string())
    }
}

fn is_connection_closed(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_closed() || hyper_err.is_incomplete_message() || hyper_err.is_canceled()
            {
                return true;
            }
        }
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

impl From<TransportError> for StorageError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionClosed(_) => StorageError::new(ErrorCode::ConnectionClosed),
            TransportError::ResponseTooLarge { .. } => {
                StorageError::new(ErrorCode::ResponseTooLarge)
            }
            TransportError::Timeout | TransportError::Http(_) => {
                StorageError::new(ErrorCode::TransportFailure)
            }
        }
    }
}

/// A fully buffered response from the storage service.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends signed requests to the storage service.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// `reqwest`-backed upstream client.
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    max_response_buffer_size: usize,
}

impl HttpUpstreamClient {
    /// Creates a client honoring the configured timeout and buffer size.
    pub fn new(config: &Config) -> StorageResult<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("storage-proxy/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                format!("Failed to create HTTP client: {}", e),
            )
        })?;

        Ok(Self {
            client,
            max_response_buffer_size: config.max_response_buffer_size,
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let limit = self.max_response_buffer_size;

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if response.content_length().is_some_and(|len| len > limit as u64) {
            warn!("Upstream response of {:?} bytes exceeds buffer", response.content_length());
            return Err(TransportError::ResponseTooLarge { limit });
        }

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > limit {
                return Err(TransportError::ResponseTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(UpstreamResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }
}
