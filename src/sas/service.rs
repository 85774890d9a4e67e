//! Container lifecycle and shared access signature issuance.

use axum::{
    body::Body,
    http::{
        header::{CONTENT_TYPE, ETAG, LAST_MODIFIED},
        HeaderMap, HeaderName, HeaderValue, Response, StatusCode,
    },
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::context::{format_http_date, metadata_from_headers};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{PublicAccess, SasPermissions, SharedAccessPolicy, SignedIdentifier};
use crate::storage::ContainerStore;
use crate::xml::serialize_container_list;

/// Name of the stored access policy that blob signatures are scoped to.
pub const READONLY_POLICY: &str = "readonly";

/// Container name addressed when a caller names no container.
pub const ROOT_CONTAINER: &str = "$root";

const PUBLIC_ACCESS_HEADER: &str = "x-ms-blob-public-access";

/// Issues shared access signatures and manages containers on behalf of callers.
pub struct SharedAccessSignatureService {
    config: Arc<Config>,
    store: Arc<dyn ContainerStore>,
}

impl SharedAccessSignatureService {
    pub fn new(config: Arc<Config>, store: Arc<dyn ContainerStore>) -> Self {
        Self { config, store }
    }

    /// Creates a container or updates its metadata or public access.
    ///
    /// `operation` is the `comp` query value: none creates, `metadata` sets
    /// metadata, `acl` sets the public access level.
    pub async fn create_container(
        &self,
        name: Option<&str>,
        operation: Option<&str>,
        headers: &HeaderMap,
    ) -> StorageResult<Response<Body>> {
        let name = non_empty(name);
        let operation = non_empty(operation);

        let container = match (name, operation) {
            (None, None) => {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidInput,
                    "A container name or an operation is required.",
                ))
            }
            (None, Some(_)) => ROOT_CONTAINER,
            (Some(name), _) => name,
        };
        let metadata = metadata_from_headers(headers);

        let status = match operation.map(str::to_ascii_lowercase).as_deref() {
            None => {
                let created = self
                    .store
                    .create_container(container, &metadata, public_access(headers)?)
                    .await?;
                if created {
                    info!("Created container {}", container);
                    StatusCode::CREATED
                } else if metadata.is_empty() {
                    debug!("Container {} exists", container);
                    StatusCode::OK
                } else {
                    debug!("Container {} exists, updating metadata", container);
                    self.store.set_container_metadata(container, &metadata).await?;
                    StatusCode::OK
                }
            }
            Some("metadata") => {
                self.store.set_container_metadata(container, &metadata).await?;
                StatusCode::OK
            }
            Some("acl") => {
                let mut permissions = self.store.get_container_permissions(container).await?;
                permissions.public_access = public_access(headers)?;
                self.store
                    .set_container_permissions(container, &permissions, None)
                    .await?;
                StatusCode::OK
            }
            Some(other) => {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidQueryParameterValue,
                    format!("Unsupported container operation '{}'.", other),
                ))
            }
        };

        Ok(text_response(status, self.store.container_uri(container)))
    }

    /// Deletes a container.
    pub async fn delete_container(&self, name: &str) -> StorageResult<Response<Body>> {
        let container = require_name(Some(name), "container")?;
        self.store.delete_container(container).await?;
        info!("Deleted container {}", container);
        Ok(build_response(StatusCode::ACCEPTED, common_headers(), Body::empty()))
    }

    /// Returns container properties as `ETag`, `Last-Modified` and `x-ms-meta-*` headers.
    pub async fn get_container_properties(&self, name: &str) -> StorageResult<Response<Body>> {
        let container = require_name(Some(name), "container")?;
        let properties = self.store.get_container_properties(container).await?;

        let mut headers = common_headers();
        if let Some(etag) = &properties.etag {
            headers.insert(ETAG, header_value(etag)?);
        }
        if let Some(last_modified) = &properties.last_modified {
            headers.insert(LAST_MODIFIED, header_value(&format_http_date(last_modified))?);
        }
        for (key, value) in &properties.metadata {
            let name = HeaderName::from_bytes(format!("x-ms-meta-{}", key).as_bytes())
                .map_err(|_| StorageError::new(ErrorCode::InvalidHeaderValue))?;
            headers.insert(name, header_value(value)?);
        }

        Ok(build_response(StatusCode::OK, headers, Body::empty()))
    }

    /// Lists containers, returning names and URIs as XML.
    pub async fn list_containers(&self, prefix: Option<&str>) -> StorageResult<Response<Body>> {
        let prefix = prefix.map(normalize_prefix).filter(|p| !p.is_empty());
        let containers = self.store.list_containers(prefix.as_deref()).await?;
        debug!("Listed {} containers", containers.len());

        let mut headers = common_headers();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        Ok(build_response(
            StatusCode::OK,
            headers,
            Body::from(serialize_container_list(&containers, prefix.as_deref())),
        ))
    }

    /// Returns the container URI with a read/write/delete/list SAS appended.
    pub async fn get_container_shared_access_signature(
        &self,
        name: &str,
        operation: Option<&str>,
    ) -> StorageResult<Response<Body>> {
        require_sas_operation(operation)?;
        let container = require_name(Some(name), "container")?;

        let expiry = expiry_after(Duration::try_minutes(
            self.config.container_sas_expiration_minutes,
        ))?;
        let token = self
            .store
            .container_sas(container, SasPermissions::ALL, expiry)?;
        info!("Issued container SAS for {} expiring {}", container, expiry);

        Ok(text_response(
            StatusCode::OK,
            format!("{}?{}", self.store.container_uri(container), token),
        ))
    }

    /// Returns the blob URI with a SAS bound to the container's `readonly` policy.
    ///
    /// The policy is added to the container on first use, guarded by the
    /// container ETag so concurrent writers cannot overwrite each other.
    pub async fn get_blob_shared_access_signature(
        &self,
        container: &str,
        blob: &str,
        operation: Option<&str>,
    ) -> StorageResult<Response<Body>> {
        require_sas_operation(operation)?;
        let container = require_name(Some(container), "container")?;
        let blob = require_name(Some(blob.trim_start_matches('/')), "blob")?;

        let mut permissions = self.store.get_container_permissions(container).await?;
        if permissions.policy(READONLY_POLICY).is_none() {
            let expiry = expiry_after(Duration::try_days(self.config.blob_sas_expiration_days))?;
            permissions.signed_identifiers.push(SignedIdentifier {
                id: READONLY_POLICY.to_string(),
                policy: SharedAccessPolicy::read_only(expiry),
            });
            self.store
                .set_container_permissions(container, &permissions, permissions.etag.as_deref())
                .await?;
            info!("Added {} policy to container {}", READONLY_POLICY, container);
        }

        let token = self.store.blob_sas(container, blob, READONLY_POLICY)?;
        Ok(text_response(
            StatusCode::OK,
            format!("{}?{}", self.store.blob_uri(container, blob), token),
        ))
    }
}

/// Adds a configured lifetime to the current time.
fn expiry_after(lifetime: Option<Duration>) -> StorageResult<DateTime<Utc>> {
    lifetime
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidConfiguration,
                "Signature lifetime is out of range",
            )
        })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn require_name<'a>(value: Option<&'a str>, what: &str) -> StorageResult<&'a str> {
    non_empty(value).ok_or_else(|| {
        StorageError::with_message(ErrorCode::InvalidInput, format!("A {} name is required.", what))
    })
}

/// Rejects anything but `comp=sas`, before any storage call is made.
fn require_sas_operation(operation: Option<&str>) -> StorageResult<()> {
    match non_empty(operation) {
        Some(op) if op.eq_ignore_ascii_case("sas") => Ok(()),
        Some(op) => Err(StorageError::with_message(
            ErrorCode::InvalidQueryParameterValue,
            format!("Unsupported operation '{}'; expected 'sas'.", op),
        )),
        None => Err(StorageError::with_message(
            ErrorCode::MissingRequiredQueryParameter,
            "The 'comp=sas' query parameter is required.",
        )),
    }
}

/// Reads `x-ms-blob-public-access`, defaulting to [`PublicAccess::Off`].
fn public_access(headers: &HeaderMap) -> StorageResult<PublicAccess> {
    let Some(value) = headers.get(PUBLIC_ACCESS_HEADER) else {
        return Ok(PublicAccess::Off);
    };
    value
        .to_str()
        .ok()
        .and_then(PublicAccess::from_str)
        .ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidHeaderValue,
                format!("Invalid value for header '{}'", PUBLIC_ACCESS_HEADER),
            )
        })
}

/// Converts backslashes to `/` and strips leading slashes.
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.replace('\\', "/").trim_start_matches('/').to_string()
}

fn common_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        headers.insert("x-ms-request-id", id);
    }
    if let Ok(date) = HeaderValue::from_str(&format_http_date(&Utc::now())) {
        headers.insert("date", date);
    }
    headers
}

fn text_response(status: StatusCode, body: String) -> Response<Body> {
    let mut headers = common_headers();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    build_response(status, headers, Body::from(body))
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn header_value(value: &str) -> StorageResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| StorageError::new(ErrorCode::InvalidHeaderValue))
}
