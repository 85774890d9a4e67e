//! Error types and ATOM error response formatting.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::ext::ReasonPhrase;
use thiserror::Error;

/// Content type of every error body the proxy produces.
pub const ATOM_CONTENT_TYPE: &str = "application/atom+xml";

/// Message returned when the upstream connection is gone before a response arrives.
pub const CONNECTION_CLOSED_MESSAGE: &str = "The connection to the storage service was closed.";

/// Error codes produced by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Client errors
    EmptyRequest,
    InvalidHeaderValue,
    InvalidInput,
    InvalidQueryParameterValue,
    InvalidUri,
    MissingRequiredQueryParameter,

    // Upstream errors
    UpstreamFailure,

    // Transport errors
    ConnectionClosed,
    ResponseTooLarge,
    TransportFailure,

    // Local failures
    InternalError,
    InvalidConfiguration,
}

/// Broad classification of an error, deciding who can act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input; nothing was sent upstream.
    Client,
    /// The storage service rejected or failed the call.
    Upstream,
    /// The local HTTP stack failed while talking to the storage service.
    Transport,
    /// A local failure unrelated to the request.
    Internal,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EmptyRequest => "EmptyRequest",
            ErrorCode::InvalidHeaderValue => "InvalidHeaderValue",
            ErrorCode::InvalidInput => "InvalidInput",
            ErrorCode::InvalidQueryParameterValue => "InvalidQueryParameterValue",
            ErrorCode::InvalidUri => "InvalidUri",
            ErrorCode::MissingRequiredQueryParameter => "MissingRequiredQueryParameter",
            ErrorCode::UpstreamFailure => "UpstreamFailure",
            ErrorCode::ConnectionClosed => "ConnectionClosed",
            ErrorCode::ResponseTooLarge => "ResponseTooLarge",
            ErrorCode::TransportFailure => "TransportFailure",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::InvalidConfiguration => "InvalidConfiguration",
        }
    }

    /// Returns the kind of this error code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::EmptyRequest
            | ErrorCode::InvalidHeaderValue
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidQueryParameterValue
            | ErrorCode::InvalidUri
            | ErrorCode::MissingRequiredQueryParameter => ErrorKind::Client,
            ErrorCode::UpstreamFailure => ErrorKind::Upstream,
            ErrorCode::ConnectionClosed
            | ErrorCode::ResponseTooLarge
            | ErrorCode::TransportFailure => ErrorKind::Transport,
            ErrorCode::InternalError | ErrorCode::InvalidConfiguration => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Client => StatusCode::BAD_REQUEST,
            // Replaced by the upstream status when one is known
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Transport | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::EmptyRequest => "The request is empty.",
            ErrorCode::InvalidHeaderValue => "The value for one of the HTTP headers is not valid.",
            ErrorCode::InvalidQueryParameterValue => {
                "The value for one of the query parameters is not valid."
            }
            ErrorCode::InvalidUri => "The requested URI does not represent any resource.",
            ErrorCode::MissingRequiredQueryParameter => {
                "A required query parameter was not specified."
            }
            ErrorCode::UpstreamFailure => "The storage service failed to process the request.",
            ErrorCode::ConnectionClosed => CONNECTION_CLOSED_MESSAGE,
            ErrorCode::ResponseTooLarge => {
                "The storage service response exceeded the maximum buffer size."
            }
            ErrorCode::TransportFailure => "The request to the storage service failed.",
            ErrorCode::InternalError => "The server encountered an internal error.",
            _ => "An error occurred while processing the request.",
        }
    }
}

/// Storage error with code, status and message.
#[derive(Debug, Error)]
#[error("{code:?} ({status}): {message}")]
pub struct StorageError {
    pub code: ErrorCode,
    pub status: StatusCode,
    /// Error code reported by the storage service, when there is one.
    pub upstream_code: Option<String>,
    pub message: String,
}

impl StorageError {
    /// Creates a new storage error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            status: code.status_code(),
            upstream_code: None,
            message: code.default_message().to_string(),
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: code.status_code(),
            upstream_code: None,
            message: message.into(),
        }
    }

    /// Wraps a fault reported by the storage service.
    pub fn upstream(
        status: StatusCode,
        upstream_code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::UpstreamFailure,
            status,
            upstream_code,
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// The value rendered in the `<code>` element.
    pub fn error_code(&self) -> &str {
        self.upstream_code.as_deref().unwrap_or(self.code.as_str())
    }

    /// Converts the error to its ATOM error body.
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8" standalone="yes" ?><error xmlns="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata"><code>{}</code><message xml:lang="en-US">{}</message></error>"#,
            xml_escape(self.error_code()),
            xml_escape(&self.message)
        )
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            [(CONTENT_TYPE, HeaderValue::from_static(ATOM_CONTENT_TYPE))],
            self.to_xml(),
        )
            .into_response();

        if let Ok(code) = HeaderValue::from_str(self.error_code()) {
            response.headers_mut().insert("x-ms-error-code", code);
        }

        // Surface the message in the status line for HTTP/1.1 clients
        if let Ok(reason) = ReasonPhrase::try_from(self.message.as_bytes()) {
            response.extensions_mut().insert(reason);
        }

        response
    }
}

/// Escapes special XML characters in a string.
pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Result type alias for proxy operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_format() {
        let err =
            StorageError::with_message(ErrorCode::InvalidInput, "Container name is required.");
        assert_eq!(
            err.to_xml(),
            "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\" ?><error xmlns=\"http://schemas.microsoft.com/ado/2007/08/dataservices/metadata\"><code>InvalidInput</code><message xml:lang=\"en-US\">Container name is required.</message></error>"
        );
    }

    #[test]
    fn test_upstream_error_keeps_status_and_code() {
        let err = StorageError::upstream(
            StatusCode::CONFLICT,
            Some("ContainerAlreadyExists".to_string()),
            "The specified container already exists.",
        );
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert!(err.to_xml().contains("<code>ContainerAlreadyExists</code>"));
    }

    #[test]
    fn test_message_is_escaped() {
        let err = StorageError::with_message(ErrorCode::InvalidUri, "a<b & c");
        assert!(err.to_xml().contains("a&lt;b &amp; c"));
    }

    #[test]
    fn test_into_response() {
        let response = StorageError::new(ErrorCode::ConnectionClosed).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], ATOM_CONTENT_TYPE);
        assert_eq!(response.headers()["x-ms-error-code"], "ConnectionClosed");
    }
}
